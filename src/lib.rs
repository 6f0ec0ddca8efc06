//! Lookup Relay - record lookups through rotating proxies
//!
//! A messaging bot that answers record lookups from a third-party API.
//!
//! ## Features
//!
//! - Provider-sourced outbound proxy pool with CONNECT probing and round-robin rotation
//! - Lookup client with per-attempt proxy rotation, escalating timeouts and backoff
//! - Transport supervisor that moves the bot connection to a new proxy on faults
//! - Size-bounded message chunking that keeps lines and words intact

pub mod bot;
pub mod config;
pub mod error;
pub mod lookup;
pub mod models;
pub mod output;
pub mod proxy;
pub mod services;
pub mod supervisor;
pub mod transport;

pub use config::Config;
pub use error::{RelayError, Result};
