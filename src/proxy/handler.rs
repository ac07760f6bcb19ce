//! Capturing connection handler
//!
//! Captures in-scope requests, applies the traffic modifier and forwards to
//! the origin, through the upstream proxy when one is configured for the
//! target scheme and the host is not excluded by `no_proxy`.

use async_trait::async_trait;
use hyper::{Body, Method, Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::upstream::ResolvedProxyConfig;
use crate::error::{Error, Result};
use crate::logging::log_exchange;
use crate::models::{CapturedExchange, CapturedRequest, CapturedResponse, OutboundRequest, ParsedProxyEndpoint};
use crate::proxy::core::{ConnectionContext, ConnectionHandler};
use crate::utils::{build_error_response, end_to_end_headers, is_hop_by_hop_header, map_to_headers};

pub struct CaptureHandler {
    direct: reqwest::Client,
    via_http: Option<reqwest::Client>,
    via_https: Option<reqwest::Client>,
}

impl CaptureHandler {
    /// Build one upstream client per configured proxy plus a direct client
    pub fn new(proxy_config: &ResolvedProxyConfig, timeout: Duration) -> Result<Self> {
        let direct = client_builder(timeout).no_proxy().build()?;
        let via_http = proxy_config
            .http
            .as_ref()
            .map(|endpoint| upstream_client(endpoint, timeout))
            .transpose()?;
        let via_https = proxy_config
            .https
            .as_ref()
            .map(|endpoint| upstream_client(endpoint, timeout))
            .transpose()?;

        Ok(Self {
            direct,
            via_http,
            via_https,
        })
    }

    fn client_for(&self, target: &Url, proxy_config: &ResolvedProxyConfig) -> &reqwest::Client {
        let host = target.host_str().unwrap_or_default();
        if proxy_config.bypasses(host) {
            debug!("{} bypasses the upstream proxy", host);
            return &self.direct;
        }
        let upstream = match target.scheme() {
            "http" => self.via_http.as_ref(),
            "https" => self.via_https.as_ref(),
            _ => None,
        };
        upstream.unwrap_or(&self.direct)
    }

    async fn forward(
        &self,
        request: Request<Body>,
        remote_addr: SocketAddr,
        context: &ConnectionContext,
    ) -> Result<Response<Body>> {
        let (parts, body) = request.into_parts();
        if parts.uri.scheme().is_none() {
            return Ok(build_error_response(
                StatusCode::BAD_REQUEST,
                "proxy requests must use an absolute URI",
            ));
        }

        let mut outbound = OutboundRequest {
            method: parts.method.to_string(),
            url: parts.uri.to_string(),
            headers: end_to_end_headers(&parts.headers),
            body: hyper::body::to_bytes(body).await?,
        };

        let in_scope = context.scopes.in_scope(&outbound.url);
        context.modifier.modify_request(&mut outbound);

        let captured = if in_scope {
            let captured = CapturedRequest::from_outbound(&outbound, Some(remote_addr));
            context.storage.save_request(&captured)?;
            Some(captured)
        } else {
            debug!("{} is out of scope, not capturing", outbound.url);
            None
        };

        let target = Url::parse(&outbound.url)?;
        let client = self.client_for(&target, &context.proxy_config);
        let started = Instant::now();
        let upstream = client
            .request(parts.method.clone(), target)
            .headers(map_to_headers(&outbound.headers))
            .body(outbound.body.clone())
            .send()
            .await?;

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let body = upstream.bytes().await?;
        let response_time_ms = started.elapsed().as_millis() as u64;
        info!("{} {} -> {} ({}ms)", outbound.method, outbound.url, status, response_time_ms);

        if let Some(request) = captured {
            let response = CapturedResponse {
                status_code: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
                headers: end_to_end_headers(&headers),
                body: body.to_vec(),
                response_time_ms,
            };
            context.storage.save_response(&request.id, &response)?;
            if let Err(e) = log_exchange(&CapturedExchange {
                request,
                response: Some(response),
            }) {
                debug!("Could not log exchange: {}", e);
            }
        }

        let mut builder = Response::builder().status(status);
        for (name, value) in headers.iter() {
            if !is_hop_by_hop_header(name.as_str()) {
                builder = builder.header(name, value);
            }
        }
        Ok(builder.body(Body::from(body))?)
    }
}

#[async_trait]
impl ConnectionHandler for CaptureHandler {
    async fn handle(
        &self,
        request: Request<Body>,
        remote_addr: SocketAddr,
        context: Arc<ConnectionContext>,
    ) -> Response<Body> {
        if request.method() == Method::CONNECT {
            debug!("Rejecting CONNECT {} from {}", request.uri(), remote_addr);
            return build_error_response(StatusCode::NOT_IMPLEMENTED, "CONNECT tunneling is not supported");
        }

        let uri = request.uri().to_string();
        match self.forward(request, remote_addr, &context).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to proxy {} for {}: {}", uri, remote_addr, e);
                build_error_response(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        }
    }
}

fn client_builder(timeout: Duration) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
}

fn upstream_client(endpoint: &ParsedProxyEndpoint, timeout: Duration) -> Result<reqwest::Client> {
    let mut proxy = reqwest::Proxy::all(endpoint.proxy_url())
        .map_err(|e| Error::Config(format!("unusable upstream proxy {}: {}", endpoint, e)))?;
    if let Some(username) = &endpoint.username {
        proxy = proxy.basic_auth(username, endpoint.password.as_deref().unwrap_or_default());
    }
    Ok(client_builder(timeout).proxy(proxy).build()?)
}
