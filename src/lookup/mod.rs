//! Lookup API access
//!
//! - Resilient query client with proxy rotation and retry
//! - Lookup key normalization and validation

pub mod client;
pub mod key;

pub use client::{HttpLookupBackend, LookupApiConfig, LookupBackend, QueryClient, QueryPolicy};
pub use key::LookupKey;
