//! Upstream proxy configuration: environment reading, merging and resolution

use crate::error::Result;
use crate::models::ParsedProxyEndpoint;
use crate::utils::url::{no_proxy_matches, parse_proxy_url};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const HTTP_PROXY_VAR: &str = "HTTP_PROXY";
pub const HTTPS_PROXY_VAR: &str = "HTTPS_PROXY";
pub const NO_PROXY_VAR: &str = "NO_PROXY";

/// Unparsed upstream proxy settings.
///
/// A field is present when it is `Some`, even if the string is empty. The
/// same shape is used for caller input, environment input and the merge of
/// the two.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProxyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https: Option<String>,

    /// Comma-separated host patterns that bypass the upstream proxy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_proxy: Option<String>,
}

impl RawProxyConfig {
    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none() && self.no_proxy.is_none()
    }
}

/// Supplies environment-derived proxy settings at resolution time
pub trait ProxySource {
    fn read(&self) -> RawProxyConfig;
}

impl<F> ProxySource for F
where
    F: Fn() -> RawProxyConfig,
{
    fn read(&self) -> RawProxyConfig {
        self()
    }
}

/// Reads `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY` from the process environment.
///
/// Variables are read on every call, so values set after process start but
/// before resolution are honoured. Unset or empty variables are absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvironmentProxyReader;

impl ProxySource for EnvironmentProxyReader {
    fn read(&self) -> RawProxyConfig {
        RawProxyConfig {
            http: non_empty_var(HTTP_PROXY_VAR),
            https: non_empty_var(HTTPS_PROXY_VAR),
            no_proxy: non_empty_var(NO_PROXY_VAR),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

/// Overlay explicit settings on environment settings.
///
/// Every field present in `explicit` wins, including an explicit empty
/// string. Only fields absent from `explicit` fall back to `environment`.
pub fn merge(explicit: &RawProxyConfig, environment: RawProxyConfig) -> RawProxyConfig {
    RawProxyConfig {
        http: explicit.http.clone().or(environment.http),
        https: explicit.https.clone().or(environment.https),
        no_proxy: explicit.no_proxy.clone().or(environment.no_proxy),
    }
}

/// Final upstream proxy configuration held by a server instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedProxyConfig {
    pub http: Option<ParsedProxyEndpoint>,
    pub https: Option<ParsedProxyEndpoint>,
    pub no_proxy: Option<String>,
}

impl ResolvedProxyConfig {
    /// Upstream endpoint for traffic with the given target scheme
    pub fn endpoint_for(&self, scheme: &str) -> Option<&ParsedProxyEndpoint> {
        match scheme {
            "http" => self.http.as_ref(),
            "https" => self.https.as_ref(),
            _ => None,
        }
    }

    /// Whether `host` is excluded from upstream proxying by `no_proxy`
    pub fn bypasses(&self, host: &str) -> bool {
        self.no_proxy
            .as_deref()
            .map(|no_proxy| no_proxy_matches(no_proxy, host))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.http.is_none() && self.https.is_none() && self.no_proxy.is_none()
    }
}

/// Produces a [`ResolvedProxyConfig`] from explicit settings and a [`ProxySource`]
pub struct ProxyConfigResolver {
    source: Box<dyn ProxySource + Send + Sync>,
}

impl ProxyConfigResolver {
    pub fn new<S>(source: S) -> Self
    where
        S: ProxySource + Send + Sync + 'static,
    {
        Self {
            source: Box::new(source),
        }
    }

    /// Read the source, merge `explicit` over it and parse the proxy URLs.
    ///
    /// Empty values are treated as not configured.
    pub fn resolve(&self, explicit: &RawProxyConfig) -> Result<ResolvedProxyConfig> {
        let merged = merge(explicit, self.source.read());

        let resolved = ResolvedProxyConfig {
            http: parse_configured(merged.http.as_deref())?,
            https: parse_configured(merged.https.as_deref())?,
            no_proxy: merged.no_proxy.filter(|value| !value.is_empty()),
        };

        for (kind, endpoint) in [("http", &resolved.http), ("https", &resolved.https)] {
            match endpoint {
                Some(endpoint) => debug!("Upstream {} proxy: {}", kind, endpoint),
                None => debug!("No upstream {} proxy configured", kind),
            }
        }
        if let Some(no_proxy) = &resolved.no_proxy {
            debug!("Upstream proxy bypass list: {}", no_proxy);
        }

        Ok(resolved)
    }
}

impl Default for ProxyConfigResolver {
    fn default() -> Self {
        Self::new(EnvironmentProxyReader)
    }
}

fn parse_configured(value: Option<&str>) -> Result<Option<ParsedProxyEndpoint>> {
    match value {
        Some(url) if !url.is_empty() => parse_proxy_url(url).map(Some),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use serial_test::serial;

    fn raw(http: Option<&str>, https: Option<&str>, no_proxy: Option<&str>) -> RawProxyConfig {
        RawProxyConfig {
            http: http.map(str::to_string),
            https: https.map(str::to_string),
            no_proxy: no_proxy.map(str::to_string),
        }
    }

    fn resolver_with(environment: RawProxyConfig) -> ProxyConfigResolver {
        ProxyConfigResolver::new(move || environment.clone())
    }

    #[test]
    fn test_explicit_wins_over_environment() {
        let explicit = raw(Some("http://explicit:1"), None, None);
        let environment = raw(Some("http://env:2"), Some("http://env:3"), Some("localhost"));

        let merged = merge(&explicit, environment);
        assert_eq!(merged.http.as_deref(), Some("http://explicit:1"));
        assert_eq!(merged.https.as_deref(), Some("http://env:3"));
        assert_eq!(merged.no_proxy.as_deref(), Some("localhost"));
    }

    #[test]
    fn test_explicit_empty_value_overrides_environment() {
        let explicit = raw(Some(""), None, Some(""));
        let environment = raw(Some("http://env:2"), None, Some("localhost"));

        let merged = merge(&explicit, environment.clone());
        assert_eq!(merged.http.as_deref(), Some(""));
        assert_eq!(merged.no_proxy.as_deref(), Some(""));

        let resolved = resolver_with(environment).resolve(&explicit).unwrap();
        assert_eq!(resolved.http, None);
        assert_eq!(resolved.no_proxy, None);
    }

    #[test]
    fn test_absent_everywhere_stays_absent() {
        let merged = merge(&RawProxyConfig::default(), RawProxyConfig::default());
        assert!(merged.is_empty());

        let resolved = resolver_with(RawProxyConfig::default())
            .resolve(&RawProxyConfig::default())
            .unwrap();
        assert!(resolved.is_empty());
    }

    #[test]
    fn test_resolve_mixes_explicit_and_environment() {
        let explicit = raw(Some("http://user:pw@proxy.local:8080"), None, None);
        let resolver = resolver_with(raw(None, Some("https://secure.local:9090"), None));

        let resolved = resolver.resolve(&explicit).unwrap();
        assert_eq!(
            resolved.http,
            Some(ParsedProxyEndpoint {
                scheme: "http".to_string(),
                username: Some("user".to_string()),
                password: Some("pw".to_string()),
                hostport: "proxy.local:8080".to_string(),
            })
        );
        assert_eq!(
            resolved.https,
            Some(ParsedProxyEndpoint {
                scheme: "https".to_string(),
                username: None,
                password: None,
                hostport: "secure.local:9090".to_string(),
            })
        );
        assert_eq!(resolved.no_proxy, None);
    }

    #[test]
    fn test_resolve_does_not_mutate_explicit() {
        let explicit = raw(Some("proxy.local:3128"), None, Some("localhost"));
        let before = explicit.clone();

        let resolved = resolver_with(RawProxyConfig::default()).resolve(&explicit).unwrap();
        assert_eq!(explicit, before);
        assert_eq!(resolved.http.unwrap().scheme, "");
        assert_eq!(resolved.no_proxy.as_deref(), Some("localhost"));
    }

    #[test]
    fn test_resolve_rejects_malformed_environment_value() {
        let resolver = resolver_with(raw(None, Some("https:/secure.local"), None));
        let result = resolver.resolve(&RawProxyConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_endpoint_selection_and_bypass() {
        let resolved = resolver_with(RawProxyConfig::default())
            .resolve(&raw(Some("http://p:1"), None, Some(".example.com")))
            .unwrap();
        assert!(resolved.endpoint_for("http").is_some());
        assert!(resolved.endpoint_for("https").is_none());
        assert!(resolved.endpoint_for("ftp").is_none());
        assert!(resolved.bypasses("api.example.com"));
        assert!(!resolved.bypasses("example.org"));
    }

    #[test]
    #[serial]
    fn test_environment_reader_reads_at_call_time() {
        std::env::remove_var(HTTP_PROXY_VAR);
        std::env::remove_var(HTTPS_PROXY_VAR);
        std::env::remove_var(NO_PROXY_VAR);
        assert!(EnvironmentProxyReader.read().is_empty());

        std::env::set_var(HTTP_PROXY_VAR, "http://late.local:8080");
        std::env::set_var(HTTPS_PROXY_VAR, "");
        std::env::set_var(NO_PROXY_VAR, "localhost");
        let config = EnvironmentProxyReader.read();
        assert_eq!(config.http.as_deref(), Some("http://late.local:8080"));
        assert_eq!(config.https, None);
        assert_eq!(config.no_proxy.as_deref(), Some("localhost"));

        std::env::remove_var(HTTP_PROXY_VAR);
        std::env::remove_var(HTTPS_PROXY_VAR);
        std::env::remove_var(NO_PROXY_VAR);
    }
}
