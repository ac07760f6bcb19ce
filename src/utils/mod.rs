//! Utility functions for the capture proxy

pub mod http;
pub mod url;

pub use self::http::*;
pub use self::url::*;
