//! Proxy server instance and its lifecycle
//!
//! A [`ProxyServer`] owns the per-instance state every connection depends
//! on. Construction creates capture storage, then the traffic modifier, then
//! resolves the upstream proxy configuration and finally binds the listener.
//! Anything created before a failing step is released before the error is
//! returned. Shutdown stops the listener first and only then releases the
//! capture storage, so no in-flight connection writes to released storage.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::settings::{Options, ServerSettings};
use crate::config::upstream::{ProxyConfigResolver, ProxySource, RawProxyConfig, ResolvedProxyConfig};
use crate::error::{Error, Result};
use crate::modifier::{DefaultModifierFactory, ModifierFactory, RequestModifier};
use crate::proxy::core::{ConnectionContext, ConnectionHandler, Listener, ListenerFactory};
use crate::proxy::handler::CaptureHandler;
use crate::proxy::hyper_impl::HyperListenerFactory;
use crate::proxy::scope::ScopeFilters;
use crate::storage::{factory_from_settings, CaptureStorage, DiskStorageFactory, StorageFactory};

/// Lifecycle state of a server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Constructing,
    Ready,
    /// Shutdown started but did not complete
    ShuttingDown,
    Stopped,
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ServerState::Constructing => "constructing",
            ServerState::Ready => "ready",
            ServerState::ShuttingDown => "shutting down",
            ServerState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

pub struct ProxyServerBuilder {
    listen_addr: SocketAddr,
    proxy_config: RawProxyConfig,
    options: Options,
    request_timeout: Duration,
    resolver: ProxyConfigResolver,
    storage_factory: Box<dyn StorageFactory>,
    modifier_factory: Box<dyn ModifierFactory>,
    listener_factory: Box<dyn ListenerFactory>,
    handler: Option<Arc<dyn ConnectionHandler>>,
}

impl ProxyServerBuilder {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            proxy_config: RawProxyConfig::default(),
            options: Options::new(),
            request_timeout: Duration::from_secs(30),
            resolver: ProxyConfigResolver::default(),
            storage_factory: Box::new(DiskStorageFactory::default()),
            modifier_factory: Box::new(DefaultModifierFactory),
            listener_factory: Box::new(HyperListenerFactory),
            handler: None,
        }
    }

    /// Builder preloaded from settings; scope patterns are not applied here
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self::new(settings.listen_addr)
            .proxy_config(settings.upstream.clone())
            .options(settings.options.clone())
            .request_timeout(Duration::from_secs(settings.request_timeout))
            .storage_factory(factory_from_settings(&settings.storage))
    }

    /// Explicit upstream proxy configuration, overriding the environment
    pub fn proxy_config(mut self, proxy_config: RawProxyConfig) -> Self {
        self.proxy_config = proxy_config;
        self
    }

    pub fn options(mut self, options: Options) -> Self {
        self.options = options;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Where environment proxy settings come from (process environment by default)
    pub fn proxy_source<S>(mut self, source: S) -> Self
    where
        S: ProxySource + Send + Sync + 'static,
    {
        self.resolver = ProxyConfigResolver::new(source);
        self
    }

    pub fn storage_factory(mut self, factory: Box<dyn StorageFactory>) -> Self {
        self.storage_factory = factory;
        self
    }

    pub fn modifier_factory(mut self, factory: Box<dyn ModifierFactory>) -> Self {
        self.modifier_factory = factory;
        self
    }

    pub fn listener_factory(mut self, factory: Box<dyn ListenerFactory>) -> Self {
        self.listener_factory = factory;
        self
    }

    /// Use `handler` instead of a [`CaptureHandler`] built from the resolved configuration
    pub fn handler(mut self, handler: Arc<dyn ConnectionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Provision instance state and start listening
    pub async fn build(self) -> Result<ProxyServer> {
        debug!("Server state: {}", ServerState::Constructing);

        let storage = self.storage_factory.create().map_err(as_acquisition_error)?;
        debug!("Capture storage ready: {}", storage.storage_info());

        let modifier = self
            .modifier_factory
            .create()
            .map_err(as_acquisition_error)
            .or_else(|e| abandon(&storage, e))?;

        let proxy_config = self
            .resolver
            .resolve(&self.proxy_config)
            .or_else(|e| abandon(&storage, e))?;
        let proxy_config = Arc::new(proxy_config);

        let handler = match self.handler {
            Some(handler) => handler,
            None => {
                let handler = CaptureHandler::new(&proxy_config, self.request_timeout)
                    .or_else(|e| abandon(&storage, e))?;
                Arc::new(handler) as Arc<dyn ConnectionHandler>
            }
        };

        let context = Arc::new(ConnectionContext {
            storage: Arc::clone(&storage),
            modifier,
            proxy_config,
            scopes: ScopeFilters::new(),
            options: Arc::new(self.options),
        });

        let listener = self
            .listener_factory
            .bind(self.listen_addr, handler, Arc::clone(&context))
            .await
            .or_else(|e| abandon(&storage, e))?;
        let local_addr = listener.local_addr();

        info!("Proxy server ready on {}", local_addr);
        Ok(ProxyServer {
            state: ServerState::Ready,
            context,
            listener: Some(listener),
            storage_released: false,
            local_addr,
        })
    }
}

fn as_acquisition_error(error: Error) -> Error {
    match error {
        Error::ResourceAcquisition(_) => error,
        other => Error::ResourceAcquisition(other.to_string()),
    }
}

/// Release storage created by a construction that failed later on.
///
/// A failed release is reported inside the returned error.
fn abandon<T>(storage: &Arc<dyn CaptureStorage>, error: Error) -> Result<T> {
    warn!("Server construction failed: {}", error);
    match storage.cleanup() {
        Ok(()) => Err(error),
        Err(cleanup) => Err(with_release_failure(error, &cleanup)),
    }
}

fn with_release_failure(error: Error, cleanup: &Error) -> Error {
    let note = format!("; releasing capture storage also failed: {}", cleanup);
    match error {
        Error::Config(message) => Error::Config(message + &note),
        Error::ResourceAcquisition(message) => Error::ResourceAcquisition(message + &note),
        Error::Listener(message) => Error::Listener(message + &note),
        other => Error::ResourceAcquisition(format!("{}{}", other, note)),
    }
}

/// A running proxy server instance
pub struct ProxyServer {
    state: ServerState,
    context: Arc<ConnectionContext>,
    listener: Option<Box<dyn Listener>>,
    storage_released: bool,
    local_addr: SocketAddr,
}

impl ProxyServer {
    pub fn builder(listen_addr: SocketAddr) -> ProxyServerBuilder {
        ProxyServerBuilder::new(listen_addr)
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn proxy_config(&self) -> &ResolvedProxyConfig {
        &self.context.proxy_config
    }

    pub fn storage(&self) -> &Arc<dyn CaptureStorage> {
        &self.context.storage
    }

    pub fn modifier(&self) -> &Arc<RequestModifier> {
        &self.context.modifier
    }

    /// Scope filters; changes are seen by connections immediately
    pub fn scopes(&self) -> &ScopeFilters {
        &self.context.scopes
    }

    pub fn options(&self) -> &Options {
        &self.context.options
    }

    /// Stop the listener, then release capture storage.
    ///
    /// On error the server stays [`ServerState::ShuttingDown`]; calling
    /// `shutdown` again resumes with the steps that did not complete. A
    /// stopped server cannot be shut down again.
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.state {
            ServerState::Ready => {
                info!("Shutting down proxy server on {}", self.local_addr);
                self.state = ServerState::ShuttingDown;
            }
            ServerState::ShuttingDown => {
                warn!("Resuming incomplete shutdown of proxy server on {}", self.local_addr);
            }
            state => {
                return Err(Error::InvalidState(format!("cannot shut down a server that is {}", state)));
            }
        }

        if let Some(listener) = self.listener.as_mut() {
            listener.shutdown().await?;
            self.listener = None;
        }

        if !self.storage_released {
            self.context
                .storage
                .cleanup()
                .map_err(|e| Error::Shutdown(format!("failed to release capture storage: {}", e)))?;
            self.storage_released = true;
        }

        self.state = ServerState::Stopped;
        info!("Proxy server on {} stopped", self.local_addr);
        Ok(())
    }
}
