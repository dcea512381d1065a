use super::writer::{LoggerConfig, RequestLogger};
use audio_stream_core::Result;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Lifecycle of the shared request logger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoggerState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Lazily creates the one [`RequestLogger`] of a process.
///
/// The cell is an ordinary value owned by `main` rather than a global: the
/// instance it yields is passed to the service explicitly. However many tasks
/// race on [`get_instance`](Self::get_instance), the log target is opened once
/// and every caller receives the same `Arc`.
pub struct LoggerCell {
    config: LoggerConfig,
    instance: OnceCell<Arc<RequestLogger>>,
    initializing: AtomicBool,
    init_attempts: AtomicUsize,
}

impl LoggerCell {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            config,
            instance: OnceCell::new(),
            initializing: AtomicBool::new(false),
            init_attempts: AtomicUsize::new(0),
        }
    }

    /// Returns the shared logger, opening the log target on first use.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::LoggerUnavailable`] from opening the target. The
    /// cell stays uninitialized in that case, so a later call retries; the
    /// binary treats it as a fatal startup error instead.
    ///
    /// [`Error::LoggerUnavailable`]: audio_stream_core::Error::LoggerUnavailable
    pub async fn get_instance(&self) -> Result<Arc<RequestLogger>> {
        self.instance
            .get_or_try_init(|| async {
                self.init_attempts.fetch_add(1, Ordering::Relaxed);
                self.initializing.store(true, Ordering::Release);
                #[cfg(feature = "tracing")]
                tracing::info!("Creating request logger instance");
                let res = RequestLogger::open(&self.config).await.map(Arc::new);
                self.initializing.store(false, Ordering::Release);
                res
            })
            .await
            .cloned()
    }

    pub fn state(&self) -> LoggerState {
        match self.instance.get() {
            Some(logger) if logger.is_closed() => LoggerState::Closed,
            Some(_) => LoggerState::Ready,
            None if self.initializing.load(Ordering::Acquire) => LoggerState::Initializing,
            None => LoggerState::Uninitialized,
        }
    }

    /// Number of times the log target open was attempted.
    pub fn init_attempts(&self) -> usize {
        self.init_attempts.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::logger::LogPolicy;
    use core::time::Duration;
    use futures::future::join_all;

    fn cell_in(dir: &tempfile::TempDir) -> LoggerCell {
        LoggerCell::new(LoggerConfig {
            path: dir.path().join("requests.log"),
            write_delay: Duration::ZERO,
            policy: LogPolicy::BestEffort,
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_first_use_opens_once() {
        const CALLERS: usize = 32;
        let dir = tempfile::tempdir().unwrap();
        let cell = Arc::new(cell_in(&dir));
        assert_eq!(cell.state(), LoggerState::Uninitialized);

        let tasks = (0..CALLERS).map(|_| {
            let cell = Arc::clone(&cell);
            tokio::spawn(async move { cell.get_instance().await })
        });
        let loggers: Vec<_> = join_all(tasks)
            .await
            .into_iter()
            .map(|res| res.unwrap().unwrap())
            .collect();

        assert_eq!(cell.init_attempts(), 1);
        assert!(loggers.iter().all(|l| Arc::ptr_eq(l, &loggers[0])));
        assert_eq!(cell.state(), LoggerState::Ready);
    }

    #[tokio::test]
    async fn reports_closed_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let cell = cell_in(&dir);

        cell.get_instance().await.unwrap().close().await;
        assert_eq!(cell.state(), LoggerState::Closed);

        // Closed is terminal: the cell hands back the same closed logger.
        let logger = cell.get_instance().await.unwrap();
        assert!(logger.is_closed());
        assert_eq!(cell.init_attempts(), 1);
    }

    #[tokio::test]
    async fn failed_open_is_surfaced() {
        let dir = tempfile::tempdir().unwrap();
        let cell = LoggerCell::new(LoggerConfig {
            path: dir.path().join("missing").join("requests.log"),
            write_delay: Duration::ZERO,
            policy: LogPolicy::BestEffort,
        });

        assert!(cell.get_instance().await.is_err());
        assert_eq!(cell.state(), LoggerState::Uninitialized);
        assert_eq!(cell.init_attempts(), 1);
    }
}
