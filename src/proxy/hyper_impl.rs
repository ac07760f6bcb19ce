//! Hyper-based listener

use async_trait::async_trait;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::Server;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Error, Result};
use crate::proxy::core::{ConnectionContext, ConnectionHandler, Listener, ListenerFactory};

/// Binds a hyper server and serves it on a tokio task
#[derive(Debug, Clone, Copy, Default)]
pub struct HyperListenerFactory;

pub struct HyperListener {
    local_addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<std::result::Result<(), hyper::Error>>>,
}

#[async_trait]
impl ListenerFactory for HyperListenerFactory {
    async fn bind(
        &self,
        addr: SocketAddr,
        handler: Arc<dyn ConnectionHandler>,
        context: Arc<ConnectionContext>,
    ) -> Result<Box<dyn Listener>> {
        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let remote_addr = conn.remote_addr();
            let handler = Arc::clone(&handler);
            let context = Arc::clone(&context);
            debug!("New connection from: {}", remote_addr);

            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    let handler = Arc::clone(&handler);
                    let context = Arc::clone(&context);
                    async move { Ok::<_, Infallible>(handler.handle(req, remote_addr, context).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)
            .map_err(|e| Error::Listener(format!("failed to bind {}: {}", addr, e)))?
            .serve(make_svc);
        let local_addr = server.local_addr();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let graceful = server.with_graceful_shutdown(async {
            // A dropped sender also stops the server
            let _ = shutdown_rx.await;
        });

        let task = tokio::spawn(async move {
            let result = graceful.await;
            if let Err(e) = &result {
                error!("Server error: {}", e);
            }
            result
        });

        info!("Listening on {}", local_addr);
        Ok(Box::new(HyperListener {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }))
    }
}

#[async_trait]
impl Listener for HyperListener {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn shutdown(&mut self) -> Result<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The server task may already have exited on its own
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            debug!("Waiting for in-flight connections on {} to drain", self.local_addr);
            task.await
                .map_err(|e| Error::Shutdown(format!("listener task failed: {}", e)))?
                .map_err(|e| Error::Shutdown(format!("listener stopped with error: {}", e)))?;
        }

        info!("Listener on {} stopped", self.local_addr);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::upstream::ResolvedProxyConfig;
    use crate::modifier::RequestModifier;
    use crate::proxy::scope::ScopeFilters;
    use crate::storage::MemoryStorage;
    use hyper::{Body, Request, Response};

    struct Echo;

    #[async_trait]
    impl ConnectionHandler for Echo {
        async fn handle(
            &self,
            request: Request<Body>,
            _remote_addr: SocketAddr,
            _context: Arc<ConnectionContext>,
        ) -> Response<Body> {
            Response::new(Body::from(request.uri().path().to_string()))
        }
    }

    fn context() -> Arc<ConnectionContext> {
        Arc::new(ConnectionContext {
            storage: Arc::new(MemoryStorage::new()),
            modifier: Arc::new(RequestModifier::new()),
            proxy_config: Arc::new(ResolvedProxyConfig::default()),
            scopes: ScopeFilters::new(),
            options: Arc::default(),
        })
    }

    #[tokio::test]
    async fn test_bind_serve_and_shutdown() {
        let mut listener = HyperListenerFactory
            .bind("127.0.0.1:0".parse().unwrap(), Arc::new(Echo), context())
            .await
            .unwrap();
        let addr = listener.local_addr();
        assert_ne!(addr.port(), 0);

        let client = hyper::Client::new();
        let uri: hyper::Uri = format!("http://{}/ping", addr).parse().unwrap();
        let response = client.get(uri).await.unwrap();
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], b"/ping");
        drop(client);

        listener.shutdown().await.unwrap();
        assert!(tokio::net::TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_bind_conflict_is_listener_error() {
        let mut first = HyperListenerFactory
            .bind("127.0.0.1:0".parse().unwrap(), Arc::new(Echo), context())
            .await
            .unwrap();

        let result = HyperListenerFactory
            .bind(first.local_addr(), Arc::new(Echo), context())
            .await;
        assert!(matches!(result, Err(Error::Listener(_))));

        first.shutdown().await.unwrap();
    }
}
