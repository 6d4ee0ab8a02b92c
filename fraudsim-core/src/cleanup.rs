//! Liveness sweeps: mark stale sessions inactive.

use crate::config::TrackingConfig;
use crate::error::Result;
use crate::store::SessionStore;
use crate::types::timestamp_now;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Clone)]
pub struct CleanupScheduler {
    store: Arc<dyn SessionStore>,
    liveness_window: chrono::Duration,
}

impl CleanupScheduler {
    pub fn new(store: Arc<dyn SessionStore>, config: &TrackingConfig) -> Self {
        Self {
            store,
            liveness_window: config.liveness_window(),
        }
    }

    /// Deactivate active sessions idle longer than the liveness window.
    ///
    /// Returns the number of sessions changed; a second run right after
    /// returns 0.
    pub fn run_liveness_sweep(&self) -> Result<usize> {
        let cutoff = timestamp_now() - self.liveness_window;
        let count = self.store.deactivate_sessions(Some(cutoff))?;
        if count > 0 {
            tracing::info!(count, "Liveness sweep deactivated stale sessions");
        }
        Ok(count)
    }

    /// Deactivate every active session regardless of recent activity.
    pub fn force_sweep(&self) -> Result<usize> {
        let count = self.store.deactivate_sessions(None)?;
        tracing::info!(count, "Forced sweep deactivated all active sessions");
        Ok(count)
    }

    /// Run the liveness sweep every `interval` until the handle is stopped.
    pub fn spawn(&self, interval: Duration) -> CleanupHandle {
        let scheduler = self.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = scheduler.run_liveness_sweep() {
                    tracing::warn!(error = %e, "Liveness sweep failed");
                }
            }
        });
        CleanupHandle { task }
    }
}

/// Stops the periodic sweep when dropped.
pub struct CleanupHandle {
    task: JoinHandle<()>,
}

impl CleanupHandle {
    pub fn stop(self) {}
}

impl Drop for CleanupHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
