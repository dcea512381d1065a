use crate::server::{
    logger::{LogPolicy, RequestLogger, RequestRecord},
    pool::request::LogRequest,
    telemetry::{
        increment_log_records_dropped, increment_log_records_written,
        increment_log_write_failures,
    },
};
use audio_stream_core::Error;
use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Worker task responsible for processing [`LogRequest`] messages.
///
/// Each worker shares the process-wide [`RequestLogger`]; when several workers
/// hold records at once they contend on the logger's lock, which is what
/// serializes the writes. The loop runs until a [`LogRequest::Shutdown`] is
/// received or every sender is dropped.
///
/// # Arguments
///
/// - `worker_id`: Numeric identifier for this worker (used for logs/tracing).
/// - `rx`: Receiver through which [`LogRequest`]s arrive.
/// - `logger`: The shared request logger.
/// - `pending`: The pool's backlog counter, decremented once per record.
pub async fn worker_loop(
    worker_id: usize,
    mut rx: mpsc::Receiver<LogRequest>,
    logger: Arc<RequestLogger>,
    pending: Arc<AtomicUsize>,
) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Log worker {worker_id} started");

    while let Some(work) = rx.recv().await {
        match work {
            LogRequest::Record { record } => {
                store_record(worker_id, &logger, &record).await;
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            LogRequest::Shutdown { response } => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Log worker {worker_id} received shutdown signal");

                if response.send(()).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Log worker {worker_id} failed to acknowledge shutdown");
                }
                break;
            }
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Log worker {worker_id} stopped");
}

/// Appends one record. Failures never reach the request that produced the
/// record; they are counted and reported here.
#[allow(clippy::used_underscore_binding)]
async fn store_record(_worker_id: usize, logger: &RequestLogger, record: &RequestRecord) {
    match logger.append(record).await {
        Ok(()) => increment_log_records_written(),
        Err(Error::LoggerClosed) => {
            increment_log_records_dropped();
            #[cfg(feature = "tracing")]
            tracing::warn!("Log worker {_worker_id} dropped record, request log already closed");
        }
        Err(_e) => {
            increment_log_write_failures();
            match logger.policy() {
                LogPolicy::BestEffort => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Log worker {_worker_id} dropped record: {_e}");
                }
                LogPolicy::Strict => {
                    #[cfg(feature = "tracing")]
                    tracing::error!(
                        "Log worker {_worker_id} failed to store record, refusing new streams: {_e}"
                    );
                }
            }
        }
    }
}
