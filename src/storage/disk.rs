//! Disk-backed capture storage, one temporary directory per server instance

use crate::error::{Error, Result};
use crate::models::{CapturedExchange, CapturedRequest, CapturedResponse};
use crate::storage::CaptureStorage;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tempfile::TempDir;
use tracing::{debug, info};

const REQUEST_FILE: &str = "request.json";
const RESPONSE_FILE: &str = "response.json";

struct DiskState {
    dir: Option<TempDir>,
    // Request ids in capture order
    index: Vec<String>,
}

/// Stores each captured request in `<dir>/<id>/request.json` with its
/// response next to it. The directory is removed by `cleanup`.
pub struct DiskStorage {
    state: Mutex<DiskState>,
}

impl DiskStorage {
    pub fn new(base_dir: Option<&Path>) -> std::io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("capture-proxy-");
        let dir = match base_dir {
            Some(base) => builder.tempdir_in(base)?,
            None => builder.tempdir()?,
        };
        info!("Created capture directory {}", dir.path().display());

        Ok(Self {
            state: Mutex::new(DiskState {
                dir: Some(dir),
                index: Vec::new(),
            }),
        })
    }

    /// Capture directory, or `None` once the storage has been released
    pub fn path(&self) -> Option<PathBuf> {
        self.lock().dir.as_ref().map(|dir| dir.path().to_path_buf())
    }

    fn lock(&self) -> MutexGuard<'_, DiskState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn live_dir(state: &DiskState) -> Result<&Path> {
    state
        .dir
        .as_ref()
        .map(TempDir::path)
        .ok_or_else(|| Error::InvalidState("capture storage has been released".to_string()))
}

impl CaptureStorage for DiskStorage {
    fn save_request(&self, request: &CapturedRequest) -> Result<()> {
        let mut state = self.lock();
        let request_dir = live_dir(&state)?.join(&request.id);
        fs::create_dir_all(&request_dir)?;
        fs::write(request_dir.join(REQUEST_FILE), serde_json::to_vec_pretty(request)?)?;
        state.index.push(request.id.clone());
        debug!("Saved request {} to {}", request.id, request_dir.display());
        Ok(())
    }

    fn save_response(&self, request_id: &str, response: &CapturedResponse) -> Result<()> {
        let state = self.lock();
        if !state.index.iter().any(|id| id == request_id) {
            return Err(Error::InvalidState(format!("no captured request with id {}", request_id)));
        }
        let request_dir = live_dir(&state)?.join(request_id);
        fs::write(request_dir.join(RESPONSE_FILE), serde_json::to_vec_pretty(response)?)?;
        debug!("Saved response for request {}", request_id);
        Ok(())
    }

    fn requests(&self) -> Result<Vec<CapturedExchange>> {
        let state = self.lock();
        let dir = live_dir(&state)?;

        state
            .index
            .iter()
            .map(|id| -> Result<CapturedExchange> {
                let request_dir = dir.join(id);
                let request = serde_json::from_slice(&fs::read(request_dir.join(REQUEST_FILE))?)?;
                let response_path = request_dir.join(RESPONSE_FILE);
                let response = if response_path.exists() {
                    Some(serde_json::from_slice(&fs::read(response_path)?)?)
                } else {
                    None
                };
                Ok(CapturedExchange { request, response })
            })
            .collect()
    }

    fn clear(&self) -> Result<()> {
        let mut state = self.lock();
        let dir = live_dir(&state)?.to_path_buf();
        for id in state.index.drain(..) {
            let request_dir = dir.join(&id);
            if request_dir.exists() {
                fs::remove_dir_all(request_dir)?;
            }
        }
        info!("Cleared capture storage {}", dir.display());
        Ok(())
    }

    fn cleanup(&self) -> Result<()> {
        let mut state = self.lock();
        state.index.clear();
        if let Some(dir) = state.dir.take() {
            let path = dir.path().to_path_buf();
            dir.close()?;
            info!("Removed capture directory {}", path.display());
        }
        Ok(())
    }

    fn storage_info(&self) -> String {
        let state = self.lock();
        match &state.dir {
            Some(dir) => format!("Disk storage: {} requests in {}", state.index.len(), dir.path().display()),
            None => "Disk storage: released".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::OutboundRequest;
    use bytes::Bytes;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn captured(url: &str) -> CapturedRequest {
        let outbound = OutboundRequest {
            method: "POST".to_string(),
            url: url.to_string(),
            headers: HashMap::from([("content-type".to_string(), vec!["text/plain".to_string()])]),
            body: Bytes::from_static(b"hello"),
        };
        CapturedRequest::from_outbound(&outbound, None)
    }

    fn response(status_code: u16) -> CapturedResponse {
        CapturedResponse {
            status_code,
            reason: "OK".to_string(),
            headers: HashMap::new(),
            body: b"world".to_vec(),
            response_time_ms: 3,
        }
    }

    #[test]
    fn test_save_and_load_in_order() {
        let base = tempdir().unwrap();
        let storage = DiskStorage::new(Some(base.path())).unwrap();

        let first = captured("http://example.com/one");
        let second = captured("http://example.com/two");
        storage.save_request(&first).unwrap();
        storage.save_request(&second).unwrap();
        storage.save_response(&first.id, &response(200)).unwrap();

        let exchanges = storage.requests().unwrap();
        assert_eq!(exchanges.len(), 2);
        assert_eq!(exchanges[0].request, first);
        assert_eq!(exchanges[0].response.as_ref().map(|r| r.status_code), Some(200));
        assert_eq!(exchanges[1].request.url, "http://example.com/two");
        assert!(exchanges[1].response.is_none());
    }

    #[test]
    fn test_response_for_unknown_request_is_rejected() {
        let base = tempdir().unwrap();
        let storage = DiskStorage::new(Some(base.path())).unwrap();
        assert!(storage.save_response("missing", &response(200)).is_err());
    }

    #[test]
    fn test_clear_keeps_directory() {
        let base = tempdir().unwrap();
        let storage = DiskStorage::new(Some(base.path())).unwrap();
        storage.save_request(&captured("http://example.com/")).unwrap();

        storage.clear().unwrap();
        assert!(storage.requests().unwrap().is_empty());
        assert!(storage.path().unwrap().exists());
    }

    #[test]
    fn test_cleanup_removes_directory() {
        let base = tempdir().unwrap();
        let storage = DiskStorage::new(Some(base.path())).unwrap();
        storage.save_request(&captured("http://example.com/")).unwrap();
        let path = storage.path().unwrap();

        storage.cleanup().unwrap();
        assert!(!path.exists());
        assert!(storage.path().is_none());
        assert_eq!(storage.storage_info(), "Disk storage: released");
        assert!(matches!(
            storage.save_request(&captured("http://example.com/")),
            Err(Error::InvalidState(_))
        ));

        // A second cleanup has nothing left to remove
        storage.cleanup().unwrap();
    }
}
