//! In-memory capture storage

use crate::error::{Error, Result};
use crate::models::{CapturedExchange, CapturedRequest, CapturedResponse};
use crate::storage::CaptureStorage;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

#[derive(Default)]
struct MemoryState {
    exchanges: Vec<CapturedExchange>,
    released: bool,
}

/// Keeps captured exchanges in process memory
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.released {
            return Err(Error::InvalidState("capture storage has been released".to_string()));
        }
        Ok(state)
    }
}

impl CaptureStorage for MemoryStorage {
    fn save_request(&self, request: &CapturedRequest) -> Result<()> {
        self.lock()?.exchanges.push(CapturedExchange {
            request: request.clone(),
            response: None,
        });
        debug!("Stored request {} in memory", request.id);
        Ok(())
    }

    fn save_response(&self, request_id: &str, response: &CapturedResponse) -> Result<()> {
        let mut state = self.lock()?;
        let exchange = state
            .exchanges
            .iter_mut()
            .find(|exchange| exchange.request.id == request_id)
            .ok_or_else(|| Error::InvalidState(format!("no captured request with id {}", request_id)))?;
        exchange.response = Some(response.clone());
        Ok(())
    }

    fn requests(&self) -> Result<Vec<CapturedExchange>> {
        Ok(self.lock()?.exchanges.clone())
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.lock()?;
        let count = state.exchanges.len();
        state.exchanges.clear();
        info!("Cleared memory capture storage ({} entries removed)", count);
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.exchanges.clear();
        state.released = true;
        Ok(())
    }

    fn storage_info(&self) -> String {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.released {
            "Memory storage: released".to_string()
        } else {
            format!("Memory storage: {} requests", state.exchanges.len())
        }
    }
}
