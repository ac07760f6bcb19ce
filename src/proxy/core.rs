//! Seams between a server instance and its listener
//!
//! The listener accepts connections and hands every request to a
//! [`ConnectionHandler`] together with the instance's shared
//! [`ConnectionContext`].

use async_trait::async_trait;
use hyper::{Body, Request, Response};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::settings::Options;
use crate::config::upstream::ResolvedProxyConfig;
use crate::error::Result;
use crate::modifier::RequestModifier;
use crate::proxy::scope::ScopeFilters;
use crate::storage::CaptureStorage;

/// Per-instance state shared by every connection task
pub struct ConnectionContext {
    pub storage: Arc<dyn CaptureStorage>,
    pub modifier: Arc<RequestModifier>,
    pub proxy_config: Arc<ResolvedProxyConfig>,
    pub scopes: ScopeFilters,
    pub options: Arc<Options>,
}

/// Handles one request received by the listener
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle(
        &self,
        request: Request<Body>,
        remote_addr: SocketAddr,
        context: Arc<ConnectionContext>,
    ) -> Response<Body>;
}

/// Binds a listener that starts accepting connections before it returns
#[async_trait]
pub trait ListenerFactory: Send + Sync {
    async fn bind(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn ConnectionHandler>,
        context: Arc<ConnectionContext>,
    ) -> Result<Box<dyn Listener>>;
}

/// A running listener
#[async_trait]
pub trait Listener: Send + Sync {
    fn local_addr(&self) -> SocketAddr;

    /// Stop accepting connections and wait for in-flight ones to finish
    async fn shutdown(&mut self) -> Result<()>;
}
