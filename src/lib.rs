//! Capture Proxy - an intercepting HTTP proxy that records traffic
//!
//! This library provides the proxy server lifecycle, upstream proxy
//! resolution from explicit settings and the environment, capture storage
//! and in-flight request modification.

pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod modifier;
pub mod proxy;
pub mod storage;
pub mod utils;

// Re-export commonly used items
pub use config::settings::ServerSettings;
pub use config::upstream::{ProxyConfigResolver, RawProxyConfig, ResolvedProxyConfig};
pub use error::{Error, Result};
pub use logging::{init_logger_with_level, log_debug, log_error, log_info, log_warning};
pub use models::{CapturedExchange, CapturedRequest, CapturedResponse, HeaderFields, ParsedProxyEndpoint};
pub use proxy::{ProxyServer, ProxyServerBuilder, ServerState};
pub use utils::url::parse_proxy_url;
