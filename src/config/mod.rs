//! Server settings and upstream proxy configuration

pub mod settings;
pub mod upstream;

pub use settings::{Options, ServerSettings, StorageBackend, StorageSettings};
pub use upstream::{
    merge, EnvironmentProxyReader, ProxyConfigResolver, ProxySource, RawProxyConfig,
    ResolvedProxyConfig,
};
