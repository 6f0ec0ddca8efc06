//! Telegram Bot API transport
//!
//! Long polling over `getUpdates`, with every request routed through the proxy
//! the transport was built for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{InboundTransport, TransportFactory, Update};
use crate::error::{RelayError, Result};
use crate::models::ProxyRecord;

/// Telegram's hard limit on message text
pub const TELEGRAM_MAX_MESSAGE_LEN: usize = 4096;

/// Telegram transport configuration
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub api_url: String,
    pub token: String,
    /// Long-poll duration requested from the server
    pub poll_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

#[derive(Serialize)]
struct DeleteMessageRequest {
    chat_id: i64,
    message_id: i64,
}

#[derive(Serialize)]
struct GetUpdatesRequest {
    offset: i64,
    timeout: u64,
    allowed_updates: &'static [&'static str],
}

/// Bot API client bound to one outbound proxy
pub struct TelegramTransport {
    client: reqwest::Client,
    config: TelegramConfig,
    proxy: Option<ProxyRecord>,
    closed: AtomicBool,
}

impl TelegramTransport {
    pub fn new(config: TelegramConfig, proxy: Option<ProxyRecord>) -> Result<Self> {
        // Leave headroom above the long-poll duration before the client gives up.
        let mut builder =
            reqwest::Client::builder().timeout(config.poll_timeout + Duration::from_secs(10));

        builder = match &proxy {
            Some(proxy) => {
                let mut upstream = reqwest::Proxy::all(format!("http://{}", proxy.address()))
                    .map_err(|e| RelayError::InvalidProxyAddress(e.to_string()))?;
                if proxy.has_credentials() {
                    upstream = upstream.basic_auth(&proxy.username, &proxy.password);
                }
                builder.proxy(upstream)
            }
            None => builder.no_proxy(),
        };

        Ok(Self {
            client: builder.build()?,
            config,
            proxy,
            closed: AtomicBool::new(false),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.token,
            method
        )
    }

    async fn call<B, T>(&self, method: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(RelayError::Transport("transport is shut down".into()));
        }

        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;

        let api: ApiResponse<T> = response.json().await?;
        if !api.ok {
            return Err(RelayError::Transport(format!(
                "{} failed ({}): {}",
                method,
                api.error_code.unwrap_or_default(),
                api.description.unwrap_or_else(|| "no description".into())
            )));
        }

        api.result
            .ok_or_else(|| RelayError::Transport(format!("{} returned no result", method)))
    }
}

#[async_trait]
impl InboundTransport for TelegramTransport {
    async fn poll(&self, offset: i64) -> Result<Vec<Update>> {
        let request = GetUpdatesRequest {
            offset,
            timeout: self.config.poll_timeout.as_secs(),
            allowed_updates: &["message"],
        };
        self.call("getUpdates", &request).await
    }

    #[instrument(skip(self, text), fields(len = text.chars().count()))]
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<i64> {
        let request = SendMessageRequest {
            chat_id,
            text,
            parse_mode: "Markdown",
            disable_web_page_preview: true,
        };
        let sent: SentMessage = self.call("sendMessage", &request).await?;
        debug!(message_id = sent.message_id, "Message sent");
        Ok(sent.message_id)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let request = DeleteMessageRequest {
            chat_id,
            message_id,
        };
        let _: bool = self.call("deleteMessage", &request).await?;
        Ok(())
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(
                proxy = %self.proxy.as_ref().map(|p| p.to_string()).unwrap_or_else(|| "direct".into()),
                "Telegram transport shut down"
            );
        }
    }

    fn max_message_len(&self) -> usize {
        TELEGRAM_MAX_MESSAGE_LEN
    }

    fn proxy(&self) -> Option<&ProxyRecord> {
        self.proxy.as_ref()
    }
}

/// Builds [`TelegramTransport`]s from a shared configuration
pub struct TelegramFactory {
    config: TelegramConfig,
}

impl TelegramFactory {
    pub fn new(config: TelegramConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for TelegramFactory {
    fn build(&self, proxy: Option<&ProxyRecord>) -> Result<Arc<dyn InboundTransport>> {
        match proxy {
            Some(proxy) => info!(proxy = %proxy.masked_url(), "Building Telegram transport"),
            None => info!("Building Telegram transport without proxy"),
        }
        let transport = TelegramTransport::new(self.config.clone(), proxy.cloned())?;
        Ok(Arc::new(transport))
    }
}
