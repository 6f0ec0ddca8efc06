//! Inbound messaging transport
//!
//! The relay receives lookup requests and delivers results over a long-lived
//! messaging channel. The channel is rebuilt through a [`TransportFactory`]
//! whenever it has to move to a different outbound proxy.

pub mod telegram;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::Result;
use crate::models::ProxyRecord;

pub use telegram::{TelegramConfig, TelegramFactory, TelegramTransport};

/// Incoming update from the messaging channel
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<IncomingMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Messaging channel the relay is attached to
#[async_trait]
pub trait InboundTransport: Send + Sync {
    /// Long-poll for updates newer than `offset`. Errors here are the
    /// channel's fault stream and are classified with `RelayError::is_transient`.
    async fn poll(&self, offset: i64) -> Result<Vec<Update>>;

    /// Send a text message, returning its message id
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;

    /// Stop using this transport; later polls fail
    async fn shutdown(&self);

    /// Largest text `send_message` accepts, in chars
    fn max_message_len(&self) -> usize;

    /// Proxy this transport is bound to, if any
    fn proxy(&self) -> Option<&ProxyRecord>;
}

/// Builds transports bound to an explicit outbound proxy
pub trait TransportFactory: Send + Sync {
    fn build(&self, proxy: Option<&ProxyRecord>) -> Result<Arc<dyn InboundTransport>>;
}
