//! Background services

pub mod proxy_refresh;

pub use proxy_refresh::{ProxyRefreshConfig, ProxyRefreshHandle, ProxyRefreshService};
