//! Wires the dispatcher and the worker pool into one running engine.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::dispatcher::Dispatcher;
use super::executor::{ExecutorStats, WorkerPool, WorkerPoolConfig};
use super::handlers::HandlerRegistry;
use super::queue::JobQueue;

/// Background job engine: one dispatcher plus a fixed pool of workers.
pub struct JobEngine {
    queue: JobQueue,
    handlers: HandlerRegistry,
    config: WorkerPoolConfig,
}

impl JobEngine {
    pub fn new(queue: JobQueue, handlers: HandlerRegistry, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            handlers,
            config,
        }
    }

    /// Start the background tasks. Must be called inside a tokio runtime.
    pub fn spawn(self) -> JobEngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher::new(self.queue.clone(), self.config.poll_interval);
        let pool = WorkerPool::new(self.queue, self.handlers, self.config);

        let mut tasks = vec![tokio::spawn(dispatcher.run(shutdown_rx.clone()))];
        tasks.extend(pool.spawn(shutdown_rx));

        info!(
            queue = %pool.config().name,
            concurrency = pool.config().concurrency,
            "job engine started"
        );

        JobEngineHandle {
            shutdown: shutdown_tx,
            tasks,
            pool,
        }
    }
}

/// Handle to control a running engine.
#[derive(Debug)]
pub struct JobEngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    pool: WorkerPool,
}

impl JobEngineHandle {
    /// Get current worker pool statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.pool.stats()
    }

    /// Request graceful shutdown and wait for every background task.
    ///
    /// Workers finish the job they hold; waiting and delayed jobs stay put.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "job engine task ended abnormally");
            }
        }
        info!("job engine stopped");
    }
}
