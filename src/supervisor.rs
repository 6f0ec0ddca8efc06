//! Connection supervisor
//!
//! Watches faults reported by the inbound poll loop and moves the transport to
//! another outbound proxy when the current one stops working.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{RelayError, Result};
use crate::proxy::ProxyPoolManager;
use crate::transport::{InboundTransport, TransportFactory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Connected,
    Faulted,
    Reconnecting,
    WaitingForProxies,
}

/// Supervisor delays
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Pause between a fault and the rebuild
    pub fault_delay: Duration,
    /// Pause before refreshing an empty pool
    pub empty_pool_delay: Duration,
    /// Pause between refreshes while the pool stays empty
    pub empty_pool_retry: Duration,
    /// Pause before the full restart that follows a failed rebuild
    pub restart_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            fault_delay: Duration::from_secs(3),
            empty_pool_delay: Duration::from_secs(5),
            empty_pool_retry: Duration::from_secs(30),
            restart_delay: Duration::from_secs(10),
        }
    }
}

/// The transport in use plus a counter bumped on every swap
pub struct ActiveTransport {
    pub transport: Arc<dyn InboundTransport>,
    pub generation: u64,
}

/// Clears the reconnect flag when recovery ends, however it ends
struct ReconnectGuard<'a>(&'a AtomicBool);

impl Drop for ReconnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct ConnectionSupervisor {
    factory: Arc<dyn TransportFactory>,
    /// `None` when proxy usage is disabled
    manager: Option<Arc<ProxyPoolManager>>,
    config: SupervisorConfig,
    active: ArcSwap<ActiveTransport>,
    state: Mutex<SupervisorState>,
    reconnecting: AtomicBool,
    shutdown: watch::Receiver<bool>,
}

impl ConnectionSupervisor {
    /// Build the first transport on the next pooled proxy, or direct when
    /// the pool is empty or proxies are disabled
    pub fn connect(
        factory: Arc<dyn TransportFactory>,
        manager: Option<Arc<ProxyPoolManager>>,
        config: SupervisorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self> {
        let proxy = manager.as_ref().and_then(|m| m.next());
        if manager.is_some() && proxy.is_none() {
            warn!("Proxy pool is empty, starting transport without proxy");
        }
        let transport = factory.build(proxy.as_deref())?;

        Ok(Self {
            factory,
            manager,
            config,
            active: ArcSwap::from_pointee(ActiveTransport {
                transport,
                generation: 0,
            }),
            state: Mutex::new(SupervisorState::Connected),
            reconnecting: AtomicBool::new(false),
            shutdown,
        })
    }

    /// Transport to use right now. Readers should fetch this on every use.
    pub fn current(&self) -> Arc<ActiveTransport> {
        self.active.load_full()
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.lock()
    }

    fn set_state(&self, state: SupervisorState) {
        let mut current = self.state.lock();
        if *current != state {
            debug!(from = ?*current, to = ?state, "Supervisor state change");
            *current = state;
        }
    }

    /// Handle a fault seen on the transport of `generation`.
    ///
    /// Returns once the transport has been replaced, the fault was ignored, or
    /// shutdown was requested.
    pub async fn on_fault(&self, generation: u64, fault: &RelayError) {
        if !fault.is_transient() {
            debug!(error = %fault, "Ignoring non-transient transport error");
            return;
        }

        let Some(manager) = self.manager.as_ref() else {
            warn!(error = %fault, "Transport fault with proxies disabled, not rebuilding");
            return;
        };

        if generation != self.current().generation {
            debug!(generation, "Fault from a replaced transport, ignoring");
            return;
        }

        if self.reconnecting.swap(true, Ordering::AcqRel) {
            debug!("Reconnect already in progress");
            return;
        }
        let _guard = ReconnectGuard(&self.reconnecting);

        self.set_state(SupervisorState::Faulted);
        warn!(
            error = %fault,
            "Transport fault, reconnecting in {}s",
            self.config.fault_delay.as_secs()
        );
        if !self.pause(self.config.fault_delay).await {
            return;
        }

        loop {
            match self.reconnect(manager).await {
                Ok(true) => {
                    self.set_state(SupervisorState::Connected);
                    return;
                }
                Ok(false) => {
                    self.set_state(SupervisorState::WaitingForProxies);
                    if !self.wait_for_proxies(manager).await {
                        return;
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        "Reconnect failed, restarting in {}s",
                        self.config.restart_delay.as_secs()
                    );
                    if !self.pause(self.config.restart_delay).await {
                        return;
                    }
                    manager.refresh().await;
                }
            }
        }
    }

    /// Swap in a transport on the next proxy. `Ok(false)` when the pool is empty.
    async fn reconnect(&self, manager: &ProxyPoolManager) -> Result<bool> {
        if manager.pool().is_empty() {
            return Ok(false);
        }
        self.set_state(SupervisorState::Reconnecting);

        let previous = self.current();
        previous.transport.shutdown().await;

        let Some(proxy) = manager.next() else {
            return Ok(false);
        };
        let transport = self
            .factory
            .build(Some(&proxy))
            .map_err(|e| RelayError::SupervisorRebuild(format!("{}: {}", proxy, e)))?;

        let generation = previous.generation + 1;
        self.active.store(Arc::new(ActiveTransport {
            transport,
            generation,
        }));
        info!(proxy = %proxy, generation, "Transport rebuilt");
        Ok(true)
    }

    /// Refresh until the pool has proxies. Returns `false` on shutdown.
    async fn wait_for_proxies(&self, manager: &ProxyPoolManager) -> bool {
        warn!(
            "Proxy pool is empty, refreshing in {}s",
            self.config.empty_pool_delay.as_secs()
        );
        if !self.pause(self.config.empty_pool_delay).await {
            return false;
        }

        loop {
            if manager.refresh().await > 0 {
                return true;
            }
            warn!(
                "Still no proxies, retrying in {}s",
                self.config.empty_pool_retry.as_secs()
            );
            if !self.pause(self.config.empty_pool_retry).await {
                return false;
            }
        }
    }

    /// Sleep unless shutdown arrives first. Returns `false` on shutdown.
    async fn pause(&self, duration: Duration) -> bool {
        let mut shutdown = self.shutdown.clone();
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown.changed() => {
                info!("Supervisor stopping");
                false
            }
        }
    }

    /// Tear down the current transport
    pub async fn shutdown(&self) {
        self.current().transport.shutdown().await;
    }
}
