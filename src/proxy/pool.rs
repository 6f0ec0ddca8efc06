//! Round-robin proxy pool
//!
//! The pool and its rotation cursor live behind a single lock so that
//! read-and-advance and wholesale replacement never interleave.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::ProxyRecord;

struct PoolState {
    proxies: Vec<Arc<ProxyRecord>>,
    cursor: usize,
}

/// Shared, ordered set of proxies with a rotation cursor
pub struct ProxyPool {
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PoolState {
                proxies: Vec::new(),
                cursor: 0,
            }),
        }
    }

    /// Build a pool that already holds `proxies`
    pub fn with_proxies(proxies: Vec<ProxyRecord>) -> Self {
        let pool = Self::new();
        pool.commit(proxies);
        pool
    }

    /// Return the proxy under the cursor and advance it; `None` when empty
    pub fn next(&self) -> Option<Arc<ProxyRecord>> {
        let mut state = self.state.lock();
        if state.proxies.is_empty() {
            return None;
        }

        let len = state.proxies.len();
        let idx = state.cursor % len;
        state.cursor = (idx + 1) % len;
        Some(state.proxies[idx].clone())
    }

    /// Replace the pool contents and reset the cursor
    pub fn commit(&self, proxies: Vec<ProxyRecord>) {
        let mut state = self.state.lock();
        state.proxies = proxies.into_iter().map(Arc::new).collect();
        state.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.state.lock().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().proxies.is_empty()
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new()
    }
}
