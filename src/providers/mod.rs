//! Clients for everything outside the process: the upstream transit JSON:API
//! and the optional remote key-value cache.

pub mod jsonapi;
pub mod remote_cache;
pub mod upstream;

pub use remote_cache::RemoteCache;
pub use upstream::{TelemetrySnapshot, UpstreamClient, UpstreamError};
