use super::record::RequestRecord;
use audio_stream_core::{Error, Result};
use core::time::Duration;
use portable_atomic::{AtomicBool, Ordering};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
    time::sleep,
};

/// How the logger reacts when appending a record fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogPolicy {
    /// The record is lost; the failure is only reported to telemetry.
    #[default]
    BestEffort,
    /// The logger becomes faulted and the service stops accepting streams.
    Strict,
}

/// Settings for opening a [`RequestLogger`].
#[derive(Clone, Debug)]
pub struct LoggerConfig {
    /// Log target, opened in append mode and created if absent.
    pub path: PathBuf,
    /// Time spent holding the write lock before each append.
    pub write_delay: Duration,
    pub policy: LogPolicy,
}

/// Serialized, append-only writer for [`RequestRecord`]s.
///
/// Owns the only handle to the log target. The handle sits behind a single
/// async mutex: at most one record is being written at any instant, and the
/// guard is released on every exit path, including failed writes.
///
/// The configured `write_delay` is spent *inside* the lock before each write,
/// so concurrent callers queue up behind one another. With the default five
/// seconds, callers must expect multi-second waits; streaming never waits on
/// this because records are handed to background workers.
pub struct RequestLogger {
    path: PathBuf,
    target: Mutex<Option<File>>,
    write_delay: Duration,
    policy: LogPolicy,
    faulted: AtomicBool,
    closed: AtomicBool,
}

impl RequestLogger {
    /// Opens (or creates) the log target in append mode.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LoggerUnavailable`] if the file cannot be opened.
    /// Callers treat this as fatal: the service must not run without its log.
    pub async fn open(config: &LoggerConfig) -> Result<Self> {
        #[cfg(feature = "tracing")]
        tracing::info!("Opening request log {}", config.path.display());

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.path)
            .await
            .map_err(|e| Error::LoggerUnavailable {
                reason: format!("cannot open {}: {e}", config.path.display()),
            })?;

        Ok(Self {
            path: config.path.clone(),
            target: Mutex::new(Some(file)),
            write_delay: config.write_delay,
            policy: config.policy,
            faulted: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    /// Records a request made now by `client_address` for `title`.
    pub async fn record(&self, title: &str, client_address: &str) -> Result<()> {
        self.append(&RequestRecord::new(title, client_address))
            .await
    }

    /// Appends one record as a single line.
    ///
    /// The line is encoded before the lock is taken and written with a single
    /// `write_all` followed by a flush, so a successful call leaves exactly one
    /// complete line in the file.
    ///
    /// # Errors
    ///
    /// - [`Error::LoggerClosed`] if [`close`](Self::close) already ran.
    /// - [`Error::LogWrite`] if the write or flush failed. Under
    ///   [`LogPolicy::Strict`] this also marks the logger as faulted.
    pub async fn append(&self, record: &RequestRecord) -> Result<()> {
        let line = record.to_line()?;

        let mut target = self.target.lock().await;
        let Some(file) = target.as_mut() else {
            return Err(Error::LoggerClosed);
        };

        if !self.write_delay.is_zero() {
            sleep(self.write_delay).await;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Storing request record: {}", line.trim_end());

        if let Err(e) = write_line(file, &line).await {
            if self.policy == LogPolicy::Strict {
                self.faulted.store(true, Ordering::Release);
            }
            return Err(Error::LogWrite {
                reason: format!("{}: {e}", self.path.display()),
            });
        }

        Ok(())
    }

    /// Flushes and releases the log target.
    ///
    /// Waits for any in-progress append to finish. Only the first call does
    /// anything; later calls and later appends find the handle gone.
    pub async fn close(&self) {
        let mut target = self.target.lock().await;
        if let Some(mut file) = target.take() {
            #[cfg(feature = "tracing")]
            tracing::info!("Closing request log {}", self.path.display());

            if let Err(_e) = file.flush().await {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to flush request log on close: {_e}");
            }
            self.closed.store(true, Ordering::Release);
        }
    }

    /// Returns `true` once a strict-mode write has failed.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub const fn policy(&self) -> LogPolicy {
        self.policy
    }

    /// Time each append holds the lock before writing.
    pub const fn write_delay(&self) -> Duration {
        self.write_delay
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

async fn write_line(file: &mut File, line: &str) -> std::io::Result<()> {
    file.write_all(line.as_bytes()).await?;
    // tokio buffers file writes; errors only surface once flushed.
    file.flush().await
}
