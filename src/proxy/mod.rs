//! Outbound proxy handling
//!
//! This module provides:
//! - The shared round-robin [`ProxyPool`]
//! - Provider listing of candidate proxies
//! - CONNECT probing of candidates
//! - [`ProxyPoolManager`], which ties the three together

pub mod manager;
pub mod pool;
pub mod probe;
pub mod provider;

pub use manager::{PoolManagerConfig, ProxyPoolManager};
pub use pool::ProxyPool;
pub use probe::{ConnectProbe, ProxyProbe};
pub use provider::{ProviderClient, ProviderConfig, ProxySource};
