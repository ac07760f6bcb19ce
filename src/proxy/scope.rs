//! Scope filters restricting which requests are captured

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::{Arc, PoisonError, RwLock};

/// Ordered list of URL patterns, shared between the server and its
/// connection tasks. Cloning shares the same list.
///
/// An empty list puts every request in scope.
#[derive(Debug, Clone, Default)]
pub struct ScopeFilters {
    patterns: Arc<RwLock<Vec<Regex>>>,
}

impl ScopeFilters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all patterns. Nothing changes if any pattern is invalid.
    pub fn set<I, S>(&self, patterns: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|pattern| compile(pattern.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        *self.patterns.write().unwrap_or_else(PoisonError::into_inner) = compiled;
        Ok(())
    }

    pub fn push(&self, pattern: &str) -> Result<()> {
        let compiled = compile(pattern)?;
        self.patterns
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(compiled);
        Ok(())
    }

    pub fn clear(&self) {
        self.patterns.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|regex| regex.as_str().to_string())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.read().unwrap_or_else(PoisonError::into_inner).is_empty()
    }

    /// Whether `url` matches any pattern anywhere in the string
    pub fn in_scope(&self, url: &str) -> bool {
        let patterns = self.patterns.read().unwrap_or_else(PoisonError::into_inner);
        patterns.is_empty() || patterns.iter().any(|regex| regex.is_match(url))
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::Config(format!("invalid scope pattern '{}': {}", pattern, e)))
}
