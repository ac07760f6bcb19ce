//! Traffic modifier: rewrites requests in flight

use crate::error::{Error, Result};
use crate::models::OutboundRequest;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;
use url::Url;

/// Creates one traffic modifier per server instance
pub trait ModifierFactory: Send + Sync {
    fn create(&self) -> Result<Arc<RequestModifier>>;
}

impl<F> ModifierFactory for F
where
    F: Fn() -> Result<Arc<RequestModifier>> + Send + Sync,
{
    fn create(&self) -> Result<Arc<RequestModifier>> {
        self()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultModifierFactory;

impl ModifierFactory for DefaultModifierFactory {
    fn create(&self) -> Result<Arc<RequestModifier>> {
        Ok(Arc::new(RequestModifier::new()))
    }
}

/// Header overrides and URL rewrite rules applied to every outbound request.
///
/// Rules can be changed at any time while connection tasks read them.
#[derive(Debug, Default)]
pub struct RequestModifier {
    // `None` removes the header
    headers: RwLock<HashMap<String, Option<String>>>,
    rewrite_rules: RwLock<Vec<(Regex, String)>>,
}

impl RequestModifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the header overrides; names are matched case-insensitively
    pub fn set_headers(&self, headers: HashMap<String, Option<String>>) {
        let headers = headers
            .into_iter()
            .map(|(name, value)| (name.to_lowercase(), value))
            .collect();
        *self.headers.write().unwrap_or_else(PoisonError::into_inner) = headers;
    }

    pub fn headers(&self) -> HashMap<String, Option<String>> {
        self.headers.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn clear_headers(&self) {
        self.headers.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Replace the URL rewrite rules with `(pattern, replacement)` pairs.
    ///
    /// Replacements may refer to capture groups (`$1`). On an invalid pattern
    /// the existing rules are kept.
    pub fn set_rewrite_rules(&self, rules: Vec<(String, String)>) -> Result<()> {
        let compiled = rules
            .into_iter()
            .map(|(pattern, replacement)| {
                Regex::new(&pattern)
                    .map(|regex| (regex, replacement))
                    .map_err(|e| Error::Config(format!("invalid rewrite pattern '{}': {}", pattern, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        *self.rewrite_rules.write().unwrap_or_else(PoisonError::into_inner) = compiled;
        Ok(())
    }

    pub fn rewrite_rules(&self) -> Vec<(String, String)> {
        self.rewrite_rules
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(regex, replacement)| (regex.as_str().to_string(), replacement.clone()))
            .collect()
    }

    pub fn clear_rewrite_rules(&self) {
        self.rewrite_rules.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Apply rewrite rules in order, then header overrides.
    ///
    /// When a rewrite moves the request to another host, the `host` header
    /// follows it.
    pub fn modify_request(&self, request: &mut OutboundRequest) {
        let original_url = request.url.clone();
        {
            let rules = self.rewrite_rules.read().unwrap_or_else(PoisonError::into_inner);
            for (pattern, replacement) in rules.iter() {
                if pattern.is_match(&request.url) {
                    request.url = pattern.replace(&request.url, replacement.as_str()).into_owned();
                }
            }
        }

        if request.url != original_url {
            debug!("Rewrote {} -> {}", original_url, request.url);
            if let (Some(old), Some(new)) = (authority_of(&original_url), authority_of(&request.url)) {
                if old != new && request.headers.contains_key("host") {
                    request.headers.insert("host".to_string(), vec![new]);
                }
            }
        }

        let overrides = self.headers.read().unwrap_or_else(PoisonError::into_inner);
        for (name, value) in overrides.iter() {
            match value {
                Some(value) => {
                    request.headers.insert(name.clone(), vec![value.clone()]);
                }
                None => {
                    request.headers.remove(name);
                }
            }
        }
    }
}

fn authority_of(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn request(url: &str) -> OutboundRequest {
        OutboundRequest {
            method: "GET".to_string(),
            url: url.to_string(),
            headers: HashMap::from([
                ("host".to_string(), vec!["prod.example.com".to_string()]),
                ("user-agent".to_string(), vec!["test".to_string()]),
                ("accept".to_string(), vec!["text/html".to_string(), "*/*".to_string()]),
            ]),
            body: Bytes::new(),
        }
    }

    #[test]
    fn test_header_overrides() {
        let modifier = RequestModifier::new();
        modifier.set_headers(HashMap::from([
            ("User-Agent".to_string(), None),
            ("X-Test".to_string(), Some("1".to_string())),
        ]));

        let mut req = request("http://prod.example.com/");
        modifier.modify_request(&mut req);
        assert!(!req.headers.contains_key("user-agent"));
        assert_eq!(req.headers["x-test"], vec!["1".to_string()]);
        assert_eq!(req.headers["accept"].len(), 2);
    }

    #[test]
    fn test_rewrite_updates_host_header() {
        let modifier = RequestModifier::new();
        modifier
            .set_rewrite_rules(vec![(
                r"https?://prod\.example\.com(.*)".to_string(),
                "http://staging.example.com:8080$1".to_string(),
            )])
            .unwrap();

        let mut req = request("http://prod.example.com/api?x=1");
        modifier.modify_request(&mut req);
        assert_eq!(req.url, "http://staging.example.com:8080/api?x=1");
        assert_eq!(req.headers["host"], vec!["staging.example.com:8080".to_string()]);
    }

    #[test]
    fn test_invalid_rule_keeps_existing_rules() {
        let modifier = RequestModifier::new();
        modifier
            .set_rewrite_rules(vec![("a".to_string(), "b".to_string())])
            .unwrap();

        let result = modifier.set_rewrite_rules(vec![("(".to_string(), "x".to_string())]);
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(modifier.rewrite_rules(), vec![("a".to_string(), "b".to_string())]);

        modifier.clear_rewrite_rules();
        assert!(modifier.rewrite_rules().is_empty());
    }

    #[test]
    fn test_untouched_request() {
        let modifier = DefaultModifierFactory.create().unwrap();
        let mut req = request("http://prod.example.com/");
        modifier.modify_request(&mut req);
        assert_eq!(req.url, "http://prod.example.com/");
        assert_eq!(req.headers.len(), 3);
    }
}
