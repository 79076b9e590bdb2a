//! Idle timer reset by transport activity.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use tokio::time::Instant;

/// Fires once no activity has been recorded for `idle`.
///
/// Activity is stored as nanoseconds since `origin`, so touching the timer
/// from the upload stream never needs a lock.
#[derive(Debug)]
pub(crate) struct IdleTimer {
    origin: Instant,
    idle: Duration,
    last: AtomicU64,
}

impl IdleTimer {
    pub(crate) fn new(idle: Duration) -> Self {
        Self {
            origin: Instant::now(),
            idle,
            last: AtomicU64::new(0),
        }
    }

    /// Record activity now.
    pub(crate) fn touch(&self) {
        let now = u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last.fetch_max(now, Ordering::AcqRel);
    }

    /// Resolves once a full idle period passes without a touch.
    pub(crate) async fn expired(&self) {
        loop {
            let last = self.last.load(Ordering::Acquire);
            tokio::time::sleep_until(self.origin + Duration::from_nanos(last) + self.idle).await;
            if self.last.load(Ordering::Acquire) == last {
                return;
            }
        }
    }
}
