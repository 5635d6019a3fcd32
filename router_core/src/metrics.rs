//! Lock-free router instrumentation: plain atomics updated inline on the
//! data path, snapshotted on demand via [`Router::metrics`].

use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time snapshot of [`AtomicRouterMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterMetrics {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_connections: u64,
}

/// Lock-free counters updated on the data path. `active_connections` is not
/// a running counter of adds/removes but a direct gauge set whenever the
/// router's connection arena changes shape, so it never drifts.
#[derive(Debug, Default)]
pub struct AtomicRouterMetrics {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
    active_connections: AtomicU64,
}

impl AtomicRouterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_connections(&self, count: u64) {
        self.active_connections.store(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RouterMetrics {
        RouterMetrics {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}
