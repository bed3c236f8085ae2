//! Counters for long scans and the task that logs them.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// Accounts and slots processed by the running scan
#[derive(Debug, Default)]
pub struct Progress {
    accounts: AtomicU64,
    slots: AtomicU64,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.accounts.store(0, Ordering::Relaxed);
        self.slots.store(0, Ordering::Relaxed);
    }

    pub fn add_account(&self) {
        self.accounts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_slot(&self) {
        self.slots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accounts(&self) -> u64 {
        self.accounts.load(Ordering::Relaxed)
    }

    pub fn slots(&self) -> u64 {
        self.slots.load(Ordering::Relaxed)
    }

    /// Log the counters every `every` until the returned guard is dropped
    /// or `parent` is cancelled. Without a tokio runtime nothing is logged.
    pub fn start_logger(self: &Arc<Self>, label: &'static str, every: Duration, parent: &CancellationToken) -> ProgressLogger {
        let token = parent.child_token();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let progress = self.clone();
            let stop = token.clone();
            handle.spawn(async move {
                let mut ticker = time::interval(every);
                // The first tick completes immediately
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            info!("{}: accounts={} slots={}", label, progress.accounts(), progress.slots());
                        }
                    }
                }
            });
        }
        ProgressLogger { token }
    }
}

/// Stops its progress log when dropped
pub struct ProgressLogger {
    token: CancellationToken,
}

impl Drop for ProgressLogger {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
