//! Proxy server module

pub mod core;
pub mod handler;
pub mod hyper_impl;
pub mod scope;
pub mod server;

// Re-exports
pub use core::{ConnectionContext, ConnectionHandler, Listener, ListenerFactory};
pub use handler::CaptureHandler;
pub use hyper_impl::{HyperListener, HyperListenerFactory};
pub use scope::ScopeFilters;
pub use server::{ProxyServer, ProxyServerBuilder, ServerState};
