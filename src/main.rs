//! Command-line entry point for the capture proxy

use anyhow::Context;
use capture_proxy::{init_logger_with_level, log_error, log_info, log_warning, ProxyServerBuilder, ServerSettings};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "capture-proxy")]
#[command(about = "An intercepting HTTP proxy that records the traffic it forwards")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Proxy listening address
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Upstream proxy for http:// targets, overrides HTTP_PROXY
    #[arg(long)]
    http_proxy: Option<String>,

    /// Upstream proxy for https:// targets, overrides HTTPS_PROXY
    #[arg(long)]
    https_proxy: Option<String>,

    /// Hosts reached without the upstream proxy, overrides NO_PROXY
    #[arg(long)]
    no_proxy: Option<String>,

    /// Only capture URLs matching this regex (repeatable)
    #[arg(long = "scope")]
    scopes: Vec<String>,
}

impl Cli {
    fn apply(self, settings: &mut ServerSettings) {
        if let Some(addr) = self.listen_addr {
            settings.listen_addr = addr;
        }
        if let Some(level) = self.log_level {
            settings.log_level = level;
        }
        if self.http_proxy.is_some() {
            settings.upstream.http = self.http_proxy;
        }
        if self.https_proxy.is_some() {
            settings.upstream.https = self.https_proxy;
        }
        if self.no_proxy.is_some() {
            settings.upstream.no_proxy = self.no_proxy;
        }
        if !self.scopes.is_empty() {
            settings.scopes = self.scopes;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (mut settings, ignored) = ServerSettings::load_config(&cli.config)
        .with_context(|| format!("failed to load configuration from {}", cli.config.display()))?;
    cli.apply(&mut settings);

    init_logger_with_level(&settings.log_level);
    for message in &ignored {
        log_warning!("{}", message);
    }
    log_info!("Starting capture proxy v{}", env!("CARGO_PKG_VERSION"));

    let mut server = ProxyServerBuilder::from_settings(&settings)
        .build()
        .await
        .context("failed to start proxy server")?;

    if let Err(e) = server.scopes().set(&settings.scopes) {
        log_error!("Invalid scope pattern: {}", e);
        server.shutdown().await?;
        return Err(e.into());
    }

    log_info!("Proxy listening on {}", server.local_addr());
    log_info!("Test with: curl -x http://{} http://httpbin.org/get", server.local_addr());

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    log_info!("Received ctrl-c, shutting down");

    match server.storage().requests() {
        Ok(exchanges) => {
            log_info!("Captured {} requests this session", exchanges.len());
        }
        Err(e) => {
            log_error!("Could not read captured requests: {}", e);
        }
    }

    server.shutdown().await?;
    Ok(())
}
