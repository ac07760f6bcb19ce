use crate::models::CapturedExchange;
use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Once;
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

static INIT: Once = Once::new();

/// Initialize the global logger.
///
/// `level` is an `EnvFilter` directive such as `info` or
/// `capture_proxy=debug,hyper=warn`; `RUST_LOG` wins when it is set.
/// Only the first call has any effect.
pub fn init_logger_with_level(level: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .with_ansi(true)
            .finish();
        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Warning: Failed to install tracing subscriber: {:?}", e);
        }

        // Bridge `log` records from dependencies into tracing
        if let Err(e) = LogTracer::init() {
            eprintln!("Warning: Failed to initialize LogTracer: {:?}", e);
        }
    });
}

/// Log a captured exchange as JSON at debug level
pub fn log_exchange(exchange: &CapturedExchange) -> Result<()> {
    let timestamp = Utc::now().to_rfc3339();
    let message = serde_json::to_string_pretty(exchange)?;
    debug!("[{}] EXCHANGE:\n{}", timestamp, message);
    Ok(())
}

pub fn log_error(message: &str) {
    error!("{}", message);
}

pub fn log_info(message: &str) {
    info!("{}", message);
}

pub fn log_warning(message: &str) {
    warn!("{}", message);
}

pub fn log_debug(message: &str) {
    debug!("{}", message);
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        $crate::logging::log_error(&format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logging::log_info(&format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_warning {
    ($($arg:tt)*) => {
        $crate::logging::log_warning(&format!($($arg)*));
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        $crate::logging::log_debug(&format!($($arg)*));
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CapturedRequest, CapturedResponse, OutboundRequest};
    use bytes::Bytes;
    use std::collections::HashMap;

    #[test]
    fn test_log_exchange_serializes() {
        init_logger_with_level("debug");
        let outbound = OutboundRequest {
            method: "GET".to_string(),
            url: "http://example.com/".to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
        };
        let exchange = CapturedExchange {
            request: CapturedRequest::from_outbound(&outbound, None),
            response: Some(CapturedResponse {
                status_code: 204,
                reason: "No Content".to_string(),
                headers: HashMap::new(),
                body: Vec::new(),
                response_time_ms: 3,
            }),
        };
        assert!(log_exchange(&exchange).is_ok());

        // A second initialization is ignored
        init_logger_with_level("trace");
        log_info!("logged {} exchange", 1);
    }
}
