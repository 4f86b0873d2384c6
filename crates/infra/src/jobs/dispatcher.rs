//! Promotion sweep: moves due delayed jobs to `waiting`.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::queue::JobQueue;
use super::store::JobStoreError;

/// Shortest sleep between sweeps while a delayed job is almost due.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Periodically promotes delayed jobs whose `ready_at` has passed.
///
/// Sleeps until the earliest indexed `ready_at` or the poll interval,
/// whichever is sooner, and wakes early when a new delayed job arrives.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    queue: JobQueue,
    poll_interval: Duration,
}

impl Dispatcher {
    pub fn new(queue: JobQueue, poll_interval: Duration) -> Self {
        Self {
            queue,
            poll_interval,
        }
    }

    /// Promote every due job once. Returns how many were promoted.
    pub fn sweep(&self) -> Result<usize, JobStoreError> {
        let now = self.queue.clock().now();
        let promoted = self.queue.store().promote_due(now)?;
        for job_id in &promoted {
            debug!(job_id = %job_id, "job promoted to waiting");
            self.queue.signals().work.notify_one();
        }
        Ok(promoted.len())
    }

    fn next_wait(&self) -> Duration {
        let now = self.queue.clock().now();
        match self.queue.store().next_ready_at() {
            Ok(Some(at)) => (at - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .max(MIN_SWEEP_INTERVAL)
                .min(self.poll_interval),
            Ok(None) => self.poll_interval,
            Err(e) => {
                error!(error = %e, "failed to read delay index");
                self.poll_interval
            }
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(poll_interval_ms = self.poll_interval.as_millis() as u64, "dispatcher started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.sweep() {
                error!(error = %e, "promotion sweep failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.next_wait()) => {}
                _ = self.queue.signals().delays.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("dispatcher stopped");
    }
}
