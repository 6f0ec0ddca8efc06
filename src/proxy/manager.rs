//! Proxy pool manager
//!
//! Fetches candidates from the provider, probes a sample of them and commits
//! the result into the shared [`ProxyPool`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::models::ProxyRecord;
use crate::proxy::pool::ProxyPool;
use crate::proxy::probe::ProxyProbe;
use crate::proxy::provider::ProxySource;

/// Max probes in flight during validation
const PROBE_CONCURRENCY: usize = 5;

/// Pool manager configuration
#[derive(Debug, Clone)]
pub struct PoolManagerConfig {
    /// Region code proxies must belong to
    pub region: String,
    /// How many candidates to probe before committing
    pub validate_sample: usize,
    /// Timeout for each probe
    pub probe_timeout: Duration,
    /// Delay before the second attempt of the initial load
    pub initial_retry_delay: Duration,
}

impl Default for PoolManagerConfig {
    fn default() -> Self {
        Self {
            region: "BR".to_string(),
            validate_sample: 10,
            probe_timeout: Duration::from_secs(8),
            initial_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Owns pool acquisition, validation and rotation
pub struct ProxyPoolManager {
    source: Arc<dyn ProxySource>,
    probe: Arc<dyn ProxyProbe>,
    pool: Arc<ProxyPool>,
    config: PoolManagerConfig,
}

impl ProxyPoolManager {
    pub fn new(
        source: Arc<dyn ProxySource>,
        probe: Arc<dyn ProxyProbe>,
        pool: Arc<ProxyPool>,
        config: PoolManagerConfig,
    ) -> Self {
        Self {
            source,
            probe,
            pool,
            config,
        }
    }

    pub fn pool(&self) -> &Arc<ProxyPool> {
        &self.pool
    }

    /// List candidates for `region` without touching the pool
    pub async fn fetch(&self, region: &str) -> Vec<ProxyRecord> {
        self.source.fetch(region).await
    }

    /// Probe the first `sample_size` candidates.
    ///
    /// Returns the candidates that passed, in their original order, followed
    /// by the untested remainder. If nothing passes, the full candidate list
    /// is returned unvalidated.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len()))]
    pub async fn validate(
        &self,
        candidates: Vec<ProxyRecord>,
        sample_size: usize,
        per_probe_timeout: Duration,
    ) -> Vec<ProxyRecord> {
        let sample_len = sample_size.min(candidates.len());
        if sample_len == 0 {
            return candidates;
        }

        info!("Probing {} of {} proxies", sample_len, candidates.len());

        // Owned inputs: refresh futures must stay Send to be spawned
        let checks: Vec<_> = candidates[..sample_len]
            .iter()
            .cloned()
            .map(|proxy| {
                let probe = self.probe.clone();
                async move {
                    let started = Instant::now();
                    match timeout(per_probe_timeout, probe.probe(&proxy)).await {
                        Ok(Ok(())) => {
                            debug!(proxy = %proxy, elapsed_ms = started.elapsed().as_millis() as u64, "Proxy passed probe");
                            true
                        }
                        Ok(Err(e)) => {
                            debug!(proxy = %proxy, error = %e, "Proxy failed probe");
                            false
                        }
                        Err(_) => {
                            debug!(proxy = %proxy, "Proxy probe timed out");
                            false
                        }
                    }
                }
            })
            .collect();

        let passed: Vec<bool> = futures::stream::iter(checks)
            .buffered(PROBE_CONCURRENCY)
            .collect()
            .await;

        let valid_count = passed.iter().filter(|&&ok| ok).count();
        if valid_count == 0 {
            warn!("No probed proxy passed, keeping all {} candidates", candidates.len());
            return candidates;
        }

        info!("{}/{} probed proxies are usable", valid_count, sample_len);

        let mut candidates = candidates;
        let untested = candidates.split_off(sample_len);
        candidates
            .into_iter()
            .zip(passed)
            .filter_map(|(proxy, ok)| ok.then_some(proxy))
            .chain(untested)
            .collect()
    }

    /// Replace the pool contents and reset rotation
    pub fn commit(&self, proxies: Vec<ProxyRecord>) {
        self.pool.commit(proxies);
    }

    /// Next proxy in rotation, `None` when the pool is empty
    pub fn next(&self) -> Option<Arc<ProxyRecord>> {
        self.pool.next()
    }

    /// Fetch, validate and commit. An empty fetch leaves the current pool in place.
    ///
    /// Returns the pool size afterwards.
    #[instrument(skip(self), fields(region = %self.config.region))]
    pub async fn refresh(&self) -> usize {
        let candidates = self.fetch(&self.config.region).await;
        if candidates.is_empty() {
            warn!(
                "Proxy refresh returned nothing, keeping {} existing proxies",
                self.pool.len()
            );
            return self.pool.len();
        }

        let validated = self
            .validate(candidates, self.config.validate_sample, self.config.probe_timeout)
            .await;

        if let Some(first) = validated.first() {
            info!(example = %first, "Committing {} proxies", validated.len());
        }
        self.commit(validated);
        self.pool.len()
    }

    /// Startup load: one refresh, then a second one after a short delay if the
    /// pool is still empty.
    pub async fn load_initial(&self) -> usize {
        let count = self.refresh().await;
        if count > 0 {
            return count;
        }

        warn!(
            "No proxies loaded, retrying in {}s",
            self.config.initial_retry_delay.as_secs()
        );
        tokio::time::sleep(self.config.initial_retry_delay).await;
        self.refresh().await
    }
}
