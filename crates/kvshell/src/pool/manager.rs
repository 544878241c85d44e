//! Bounded pool of asynchronous workers.
//!
//! This module defines the [`WorkerPool`] struct, which owns the submission
//! side of a bounded MPSC queue and a fixed set of worker tasks draining it.
//! The number of workers caps how many submitted futures run at once; the
//! queue depth caps how many wait. When both are exhausted,
//! [`WorkerPool::submit`] waits for room instead of dropping work.

use super::{
    request::WorkRequest,
    worker::{SharedReceiver, worker_loop},
};
use crate::{Error, Result, metrics::increment_tasks_submitted, sync::OnceTrigger};
use core::{future::Future, time::Duration};
use std::sync::Arc;
use tokio::{
    sync::{Mutex, RwLock, mpsc, oneshot},
    time::timeout,
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

/// A fixed-size pool of workers executing submitted futures.
///
/// Cheap to share behind an [`Arc`]; the [`Server`](crate::Server) holds one
/// and submits a task per accepted connection.
pub struct WorkerPool {
    sender: mpsc::Sender<WorkRequest>,
    // Held shared by `submit` and exclusively by `shutdown`, so no task can
    // be queued behind the shutdown requests.
    submit_gate: RwLock<()>,
    workers: TaskTracker,
    num_workers: usize,
    shutdown_token: CancellationToken,
    shutdown_once: OnceTrigger,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawns `num_workers` workers sharing a queue of `queue_depth` slots.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidWorkerCount`] if `num_workers` is 0.
    /// - [`Error::InvalidQueueDepth`] if `queue_depth` is 0.
    pub fn new(num_workers: usize, queue_depth: usize) -> Result<Self> {
        if num_workers == 0 {
            return Err(Error::InvalidWorkerCount);
        }
        if queue_depth == 0 {
            return Err(Error::InvalidQueueDepth);
        }

        let (sender, rx) = mpsc::channel(queue_depth);
        let receiver: SharedReceiver = Arc::new(Mutex::new(rx));

        let workers = TaskTracker::new();
        for worker_id in 0..num_workers {
            workers.spawn(worker_loop(worker_id, Arc::clone(&receiver)));
        }

        tracing::debug!("Spawned {num_workers} workers (queue depth {queue_depth})");

        Ok(Self {
            sender,
            submit_gate: RwLock::new(()),
            workers,
            num_workers,
            shutdown_token: CancellationToken::new(),
            shutdown_once: OnceTrigger::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        })
    }

    /// Sets how long [`shutdown`](WorkerPool::shutdown) waits for each worker
    /// to acknowledge, and then for every worker to exit.
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Maximum number of tasks that run at the same time.
    pub const fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Schedules `task` and returns once it is queued, without waiting for it
    /// to run.
    ///
    /// Uses `try_send()` for the fast path. When the queue is full the caller
    /// waits for a slot; work is never discarded.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PoolClosed`] once [`shutdown`](WorkerPool::shutdown)
    /// has started.
    pub async fn submit<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let _gate = self.submit_gate.read().await;
        if self.shutdown_token.is_cancelled() {
            return Err(Error::PoolClosed);
        }

        let request = WorkRequest::Run(Box::pin(task));
        match self.sender.try_send(request) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                tracing::trace!("Pool queue full, waiting for a slot");
                self.sender
                    .send(request)
                    .await
                    .map_err(|_| Error::PoolClosed)?;
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(Error::PoolClosed),
        }

        increment_tasks_submitted();
        Ok(())
    }

    /// Stops the pool after the already queued work has run.
    ///
    /// - Refuses new submissions and waits for in-flight ones to be queued.
    /// - Queues one [`WorkRequest::Shutdown`] per worker behind pending work.
    /// - Waits up to the shutdown timeout per worker for acknowledgements.
    /// - Waits up to the shutdown timeout again for every worker to exit.
    ///
    /// Queued work only ever runs on the workers, so shutdown never raises
    /// concurrency above [`num_workers`](WorkerPool::num_workers).
    ///
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.shutdown_once.fire(|| self.shutdown_token.cancel()) {
            return Ok(());
        }

        tracing::info!("Shutting down worker pool");

        let mut acks = Vec::with_capacity(self.num_workers);
        {
            let _gate = self.submit_gate.write().await;
            for _ in 0..self.num_workers {
                let (tx, rx) = oneshot::channel();
                let request = WorkRequest::Shutdown { response: tx };
                if let Err(e) = self.sender.send(request).await {
                    tracing::error!("Failed to queue worker shutdown: {e}");
                } else {
                    acks.push(rx);
                }
            }
        }

        let shutdown_timeout = self.shutdown_timeout;
        let waits = acks.into_iter().enumerate().map(|(i, rx)| async move {
            match timeout(shutdown_timeout, rx).await {
                Ok(Ok(())) => tracing::trace!("Shutdown ack {i} received"),
                Ok(Err(e)) => tracing::error!("Shutdown ack {i} failed: {e}"),
                Err(_) => tracing::warn!("Shutdown ack {i} timed out"),
            }
        });
        futures::future::join_all(waits).await;

        self.workers.close();
        if timeout(shutdown_timeout, self.workers.wait()).await.is_err() {
            tracing::warn!(
                "{} workers still busy after shutdown timeout",
                self.workers.len()
            );
        } else {
            tracing::info!("Worker pool shutdown complete");
        }
        Ok(())
    }
}
