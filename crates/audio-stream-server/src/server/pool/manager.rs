//! Asynchronous worker pool for request log writes.
//!
//! This module defines the [`LogWorkerPool`] struct, which owns the log
//! workers and distributes [`RequestRecord`]s to them using round-robin
//! scheduling. Hand-off never waits: a streaming request submits its record
//! and moves on to sending fragments.
//!
//! Each worker listens on its own bounded [`mpsc::Receiver`]. Shutdown is
//! coordinated through a shared [`CancellationToken`] and per-worker
//! acknowledgements.

use crate::server::{
    logger::{RequestLogger, RequestRecord},
    pool::{request::LogRequest, worker::worker_loop},
    telemetry::increment_log_records_dropped,
};
use audio_stream_core::{Error, Result};
use core::time::Duration;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    time::timeout,
};
use tokio_util::sync::CancellationToken;

/// A pool of background tasks appending [`RequestRecord`]s to the shared
/// [`RequestLogger`].
pub struct LogWorkerPool {
    workers: Vec<mpsc::Sender<LogRequest>>,
    next_worker: AtomicUsize,
    /// Records submitted but not yet handled by a worker, deferred ones
    /// included.
    pending: Arc<AtomicUsize>,
    write_delay: Duration,
    shutdown_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl LogWorkerPool {
    /// Spawns `num_workers` log workers, each with a queue of `queue_size`
    /// pending records.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if `num_workers` or `queue_size` is zero.
    pub fn spawn(
        logger: Arc<RequestLogger>,
        num_workers: usize,
        queue_size: usize,
        shutdown_timeout: Duration,
    ) -> Self {
        assert!(num_workers > 0, "log worker pool needs at least one worker");

        let pending = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (tx, rx) = mpsc::channel(queue_size);
            workers.push(tx);
            tokio::spawn(worker_loop(
                worker_id,
                rx,
                Arc::clone(&logger),
                Arc::clone(&pending),
            ));
        }

        Self {
            workers,
            next_worker: AtomicUsize::new(0),
            pending,
            write_delay: logger.write_delay(),
            shutdown_token: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// Returns the index of the next worker to receive work (round-robin).
    ///
    /// Uses a relaxed atomic increment to minimize contention.
    pub fn next_worker_index(&self) -> usize {
        self.next_worker.fetch_add(1, Ordering::Relaxed) % self.workers.len()
    }

    /// Hands a record to the next worker without waiting.
    ///
    /// If that worker's queue is full, the hand-off continues in a spawned
    /// task, so the caller is still not delayed and the record is not lost
    /// unless the pool shuts down first. Only the per-worker queues are
    /// bounded: overflow spawns one task per record, so a sustained burst
    /// beyond the queues grows without limit.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The pool is shutting down (`shutdown_token` was cancelled).
    /// - The worker's channel is closed.
    pub fn submit(&self, record: RequestRecord) -> Result<()> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ServiceShutdown);
        }

        let worker_idx = self.next_worker_index();
        let worker = &self.workers[worker_idx];

        self.pending.fetch_add(1, Ordering::AcqRel);
        match worker.try_send(LogRequest::Record { record }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(request)) => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Log worker {worker_idx} queue full, deferring hand-off");

                let worker = worker.clone();
                let pending = Arc::clone(&self.pending);
                tokio::spawn(async move {
                    if let Err(_e) = worker.send(request).await {
                        pending.fetch_sub(1, Ordering::AcqRel);
                        increment_log_records_dropped();
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Deferred record dropped, worker {worker_idx} stopped");
                    }
                });
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.fetch_sub(1, Ordering::AcqRel);
                Err(Error::ChannelError {
                    context: format!("Log worker {worker_idx} channel closed"),
                })
            }
        }
    }

    /// Gracefully shuts down all log workers.
    ///
    /// - Cancels the shared [`CancellationToken`] so no new records are
    ///   accepted.
    /// - Queues a [`LogRequest::Shutdown`] behind each worker's pending
    ///   records.
    /// - Waits for every worker to drain its queue and acknowledge, for at
    ///   most [`drain_timeout`](Self::drain_timeout).
    ///
    /// Records still queued when that expires are written only if the logger
    /// is still open when their worker reaches them.
    pub async fn shutdown(&self) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new log records");
        self.shutdown_token.cancel();

        #[cfg(feature = "tracing")]
        tracing::debug!("Notifying all log workers to shut down");

        let notify_and_wait = async {
            let mut shutdown_handles = Vec::with_capacity(self.workers.len());

            for (i, worker) in self.workers.iter().enumerate() {
                let (tx, rx) = oneshot::channel();
                if let Err(_e) = worker.send(LogRequest::Shutdown { response: tx }).await {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Failed to send shutdown to log worker {i}: {_e}");
                } else {
                    shutdown_handles.push((i, rx));
                }
            }

            let acks = shutdown_handles.into_iter().map(|(_i, rx)| async move {
                match rx.await {
                    Ok(()) => {
                        #[cfg(feature = "tracing")]
                        tracing::trace!("Log worker {_i} shutdown acknowledged");
                    }
                    Err(_e) => {
                        #[cfg(feature = "tracing")]
                        tracing::error!("Log worker {_i} returned error: {_e}");
                    }
                }
            });
            futures::future::join_all(acks).await;
        };

        let bound = self.drain_timeout();
        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Waiting up to {bound:?} for {} pending records",
            self.pending()
        );

        match timeout(bound, notify_and_wait).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::info!("Log worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Log worker pool shutdown timed out with records pending");
                Err(Error::ChannelError {
                    context: "log workers did not drain before the shutdown timeout".to_string(),
                })
            }
        }
    }

    /// Records accepted by [`submit`](Self::submit) that no worker has
    /// finished with yet.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// How long [`shutdown`](Self::shutdown) waits for the workers.
    ///
    /// Writes are serialized by the logger's lock, so the backlog needs at
    /// least one `write_delay` per pending record on top of
    /// `shutdown_timeout`.
    pub fn drain_timeout(&self) -> Duration {
        let backlog = u32::try_from(self.pending()).unwrap_or(u32::MAX);
        self.shutdown_timeout
            .saturating_add(self.write_delay.saturating_mul(backlog))
    }
}
