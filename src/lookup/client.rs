//! Resilient lookup client
//!
//! Runs one logical query against the lookup API, rotating through the proxy
//! pool and retrying transport failures with escalating delays.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::models::{AttemptOutcome, LookupResponse, ProxyRecord, QueryAttempt};
use crate::proxy::ProxyPool;

/// Sends a single lookup request, optionally through a proxy
#[async_trait]
pub trait LookupBackend: Send + Sync {
    async fn send(
        &self,
        key: &str,
        proxy: Option<&ProxyRecord>,
        timeout: Duration,
    ) -> Result<LookupResponse>;
}

/// Lookup API endpoint settings
#[derive(Debug, Clone)]
pub struct LookupApiConfig {
    pub base_url: String,
    pub token: String,
    pub module: String,
}

/// reqwest-backed lookup API client
pub struct HttpLookupBackend {
    config: LookupApiConfig,
    direct: reqwest::Client,
}

impl HttpLookupBackend {
    pub fn new(config: LookupApiConfig) -> Result<Self> {
        let direct = Self::builder().no_proxy().build()?;
        Ok(Self { config, direct })
    }

    fn builder() -> reqwest::ClientBuilder {
        reqwest::Client::builder().user_agent(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36",
        )
    }

    /// A client bound to `proxy`; each attempt gets a fresh connection
    fn proxied_client(&self, proxy: &ProxyRecord) -> Result<reqwest::Client> {
        let mut upstream = reqwest::Proxy::all(format!("http://{}", proxy.address()))
            .map_err(|e| RelayError::InvalidProxyAddress(e.to_string()))?;
        if proxy.has_credentials() {
            upstream = upstream.basic_auth(&proxy.username, &proxy.password);
        }
        Ok(Self::builder().proxy(upstream).build()?)
    }
}

#[async_trait]
impl LookupBackend for HttpLookupBackend {
    async fn send(
        &self,
        key: &str,
        proxy: Option<&ProxyRecord>,
        timeout: Duration,
    ) -> Result<LookupResponse> {
        let client = match proxy {
            Some(proxy) => self.proxied_client(proxy)?,
            None => self.direct.clone(),
        };

        let response = client
            .get(&self.config.base_url)
            .query(&[
                ("token", self.config.token.as_str()),
                ("modulo", self.config.module.as_str()),
                ("consulta", key),
            ])
            .timeout(timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(RelayError::QueryTransport(format!("HTTP {}", status)));
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<LookupResponse>(&body)
            .map_err(|e| RelayError::QueryTransport(format!("undecodable response: {}", e)))
    }
}

/// Retry schedule for one logical query
#[derive(Debug, Clone)]
pub struct QueryPolicy {
    pub max_attempts: u32,
    /// Budget for the first attempt, which may pay for a cold proxy
    pub first_timeout: Duration,
    pub retry_timeout: Duration,
    /// Delay before attempt n+1 is `(n + 1) * backoff_step`
    pub backoff_step: Duration,
}

impl Default for QueryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            first_timeout: Duration::from_secs(90),
            retry_timeout: Duration::from_secs(60),
            backoff_step: Duration::from_secs(2),
        }
    }
}

impl QueryPolicy {
    pub fn timeout_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            self.first_timeout
        } else {
            self.retry_timeout
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff_step * (attempt + 1)
    }
}

/// Lookup client that never fails: every failure resolves to `None`
pub struct QueryClient {
    backend: Arc<dyn LookupBackend>,
    /// `None` when proxy usage is disabled
    pool: Option<Arc<ProxyPool>>,
    policy: QueryPolicy,
}

impl QueryClient {
    pub fn new(
        backend: Arc<dyn LookupBackend>,
        pool: Option<Arc<ProxyPool>>,
        policy: QueryPolicy,
    ) -> Self {
        Self {
            backend,
            pool,
            policy,
        }
    }

    /// Query with the configured attempt budget
    pub async fn lookup(&self, key: &str) -> Option<LookupResponse> {
        self.query(key, self.policy.max_attempts).await
    }

    /// Run up to `max_attempts` sequential attempts, each on the next proxy
    pub async fn query(&self, key: &str, max_attempts: u32) -> Option<LookupResponse> {
        let query_id = Uuid::new_v4();
        let span = tracing::info_span!("query", %query_id, max_attempts);
        self.run(key, max_attempts).instrument(span).await
    }

    async fn run(&self, key: &str, max_attempts: u32) -> Option<LookupResponse> {
        for attempt in 0..max_attempts {
            let timeout = self.policy.timeout_for(attempt);
            let proxy = self.pool.as_ref().and_then(|pool| pool.next());
            if self.pool.is_some() && proxy.is_none() {
                warn!("Proxy pool is empty, querying directly");
            }

            let started_at = Utc::now();
            let started = Instant::now();
            let result = self.attempt(key, attempt, max_attempts, proxy.as_deref(), timeout).await;

            let outcome = match &result {
                Ok(resp) if resp.is_ok() => AttemptOutcome::Success,
                Ok(resp) => AttemptOutcome::Rejected { status: resp.status },
                Err(e) => AttemptOutcome::TransportFailure {
                    reason: e.to_string(),
                },
            };
            log_attempt(&QueryAttempt {
                attempt_number: attempt + 1,
                timeout,
                proxy_used: proxy.as_ref().map(|p| p.to_string()),
                outcome,
                started_at,
                elapsed: started.elapsed(),
            });

            match result {
                Ok(resp) if resp.is_ok() => return Some(resp),
                Ok(resp) => {
                    let err = RelayError::QueryApplication {
                        status: resp.status,
                    };
                    warn!(error = %err, "Lookup rejected, not retrying");
                    return None;
                }
                Err(_) if attempt + 1 < max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    info!("Waiting {:?} before trying the next proxy", delay);
                    tokio::time::sleep(delay).await;
                }
                Err(_) => {
                    error!("All {} attempts failed", max_attempts);
                    return None;
                }
            }
        }

        None
    }

    #[instrument(skip_all, fields(attempt = attempt + 1, proxy = tracing::field::Empty))]
    async fn attempt(
        &self,
        key: &str,
        attempt: u32,
        max_attempts: u32,
        proxy: Option<&ProxyRecord>,
        timeout: Duration,
    ) -> Result<LookupResponse> {
        if let Some(proxy) = proxy {
            tracing::Span::current().record("proxy", tracing::field::display(proxy));
        }
        debug!(
            "Attempt {}/{} with {}s timeout",
            attempt + 1,
            max_attempts,
            timeout.as_secs()
        );

        // The backend applies its own timeout; this one bounds anything it misses.
        match tokio::time::timeout(timeout, self.backend.send(key, proxy, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(RelayError::Timeout),
        }
    }
}

fn log_attempt(attempt: &QueryAttempt) {
    let proxy = attempt.proxy_used.as_deref().unwrap_or("direct");
    let elapsed_ms = attempt.elapsed.as_millis() as u64;
    match &attempt.outcome {
        AttemptOutcome::Success => info!(
            attempt = attempt.attempt_number,
            proxy,
            elapsed_ms,
            "Lookup succeeded"
        ),
        AttemptOutcome::Rejected { status } => warn!(
            attempt = attempt.attempt_number,
            proxy,
            status,
            "Lookup answered with non-OK status"
        ),
        AttemptOutcome::TransportFailure { reason } => warn!(
            attempt = attempt.attempt_number,
            proxy,
            elapsed_ms,
            timeout_s = attempt.timeout.as_secs(),
            started_at = %attempt.started_at,
            reason = %truncate(reason, 100),
            "Lookup attempt failed"
        ),
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
