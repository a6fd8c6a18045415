//! Background removal of expired store entries.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::local::LocalStore;

/// Owns one sweep task. Dropping the sweeper stops it.
pub struct ExpirySweeper {
    store: Arc<dyn LocalStore>,
    interval: Duration,
    task: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn LocalStore>, interval: Duration) -> Self {
        Self { store, interval, task: None }
    }

    /// Start sweeping. A second call while running does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        let store = self.store.clone();
        let period = self.interval;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match store.sweep_expired(Utc::now()).await {
                    Ok(0) => {}
                    Ok(n) => debug!(removed = n, "expired entries swept"),
                    Err(err) => warn!(error = %err, "expiry sweep failed"),
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
