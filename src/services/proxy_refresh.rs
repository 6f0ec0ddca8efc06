//! Proxy pool refresh service
//!
//! Periodically re-fetches and re-validates the proxy pool. An empty fetch
//! leaves the current pool in place.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, instrument};

use crate::proxy::ProxyPoolManager;

/// Proxy refresh service configuration
#[derive(Clone)]
pub struct ProxyRefreshConfig {
    /// How often to rebuild the pool
    pub refresh_interval: Duration,
}

impl Default for ProxyRefreshConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30 * 60),
        }
    }
}

/// Proxy refresh service
pub struct ProxyRefreshService {
    manager: Arc<ProxyPoolManager>,
    config: ProxyRefreshConfig,
}

impl ProxyRefreshService {
    pub fn new(manager: Arc<ProxyPoolManager>, config: ProxyRefreshConfig) -> Self {
        Self { manager, config }
    }

    /// Run the refresh loop until shutdown
    #[instrument(skip(self, shutdown))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting proxy refresh service (interval: {}s)",
            self.config.refresh_interval.as_secs()
        );

        let mut ticker = interval(self.config.refresh_interval);
        ticker.tick().await; // Skip immediate tick; startup does the first load

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let count = self.manager.refresh().await;
                    info!(count, "Proxy pool refreshed");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Proxy refresh service shutting down");
                        break;
                    }
                }
            }
        }
    }
}

/// Handle for managing the proxy refresh service
pub struct ProxyRefreshHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl ProxyRefreshHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::manager::tests::{proxy, QueuedSource, ScriptedProbe};
    use crate::proxy::{PoolManagerConfig, ProxyPool};

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_on_interval_until_shutdown() {
        let source = Arc::new(QueuedSource::new(vec![
            vec![proxy(1)],
            vec![proxy(2), proxy(3)],
        ]));
        let manager = Arc::new(ProxyPoolManager::new(
            source.clone(),
            Arc::new(ScriptedProbe::default()),
            Arc::new(ProxyPool::new()),
            PoolManagerConfig::default(),
        ));
        let service = ProxyRefreshService::new(
            manager.clone(),
            ProxyRefreshConfig {
                refresh_interval: Duration::from_secs(60),
            },
        );

        let (handle, rx) = ProxyRefreshHandle::new();
        let task = tokio::spawn(async move { service.run(rx).await });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(*source.calls.lock(), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(*source.calls.lock(), 1);
        assert_eq!(manager.pool().len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(manager.pool().len(), 2);

        handle.shutdown();
        task.await.unwrap();
    }
}
