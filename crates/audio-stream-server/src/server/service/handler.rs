//! gRPC service implementation for fragment-by-fragment song delivery.
//!
//! This module defines [`AudioStreamService`], the concrete implementation of
//! the [`AudioService`] gRPC service defined in the protobuf specification.
//!
//! ## Responsibilities
//!
//! - Own the log worker pool that records every request.
//! - Refuse streams while shutting down or while a strict logger is faulted.
//! - Run [`dispatch`] for each call in its own task, feeding a bounded
//!   response channel.
//! - Track in-flight streams so shutdown can drain them.

use crate::server::{
    config::ServerConfig,
    logger::RequestLogger,
    pool::manager::LogWorkerPool,
    streaming::{dispatcher::dispatch, source::StreamSource},
    telemetry::{
        decrement_streams_inflight, increment_bytes_streamed, increment_requests,
        increment_stream_errors, increment_streams_inflight, record_stream_duration,
    },
};
use audio_stream_core::{
    Error,
    proto::{AudioFragment, StreamRequest, audio_service_server::AudioService},
};
use core::{pin::Pin, time::Duration};
use futures::TryStreamExt;
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status};

/// Per-service bookkeeping shared by every in-flight call.
#[derive(Default)]
struct StreamState {
    inflight: AtomicUsize,
    shutting_down: AtomicBool,
}

/// Counts one in-flight stream for as long as it is alive.
struct InflightGuard(Arc<StreamState>);

impl InflightGuard {
    fn enter(state: &Arc<StreamState>) -> Self {
        state.inflight.fetch_add(1, Ordering::AcqRel);
        increment_streams_inflight();
        Self(Arc::clone(state))
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_streams_inflight();
    }
}

/// gRPC service that streams stored songs and records every request.
///
/// Cloning is cheap; clones share the source, the logger, the log workers and
/// the in-flight bookkeeping.
pub struct AudioStreamService<S> {
    config: ServerConfig,
    source: Arc<S>,
    logger: Arc<RequestLogger>,
    log_pool: Arc<LogWorkerPool>,
    state: Arc<StreamState>,
}

impl<S> Clone for AudioStreamService<S> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            source: Arc::clone(&self.source),
            logger: Arc::clone(&self.logger),
            log_pool: Arc::clone(&self.log_pool),
            state: Arc::clone(&self.state),
        }
    }
}

impl<S: StreamSource> AudioStreamService<S> {
    /// Creates the service and spawns its log workers.
    ///
    /// `logger` is the process-wide instance obtained at startup; the service
    /// closes it during [`shutdown`](Self::shutdown).
    pub fn new(config: ServerConfig, source: S, logger: Arc<RequestLogger>) -> Self {
        let log_pool = LogWorkerPool::spawn(
            Arc::clone(&logger),
            config.log_workers,
            config.log_queue_size,
            config.shutdown_timeout,
        );

        Self {
            config,
            source: Arc::new(source),
            logger,
            log_pool: Arc::new(log_pool),
            state: Arc::new(StreamState::default()),
        }
    }

    pub fn streams_inflight(&self) -> usize {
        self.state.inflight.load(Ordering::Acquire)
    }

    /// Gracefully shuts the service down.
    ///
    /// - Refuses new streams.
    /// - Waits (up to the configured timeout) for in-flight streams.
    /// - Drains pending request records through the log workers.
    /// - Closes the request log.
    pub async fn shutdown(&self) -> Result<(), Error> {
        #[cfg(feature = "tracing")]
        tracing::info!("Refusing new streams");
        self.state.shutting_down.store(true, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Draining in-flight streams ({} active)",
            self.streams_inflight()
        );
        let drained = timeout(self.config.shutdown_timeout, async {
            while self.streams_inflight() > 0 {
                sleep(Duration::from_millis(100)).await;
            }
        })
        .await;

        if drained.is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "Graceful drain timed out ({} streams still active)",
                self.streams_inflight()
            );
        }

        let drained_logs = self.log_pool.shutdown().await;
        self.logger.close().await;
        drained_logs
    }
}

#[tonic::async_trait]
impl<S: StreamSource> AudioService for AudioStreamService<S> {
    type StreamAudioStream = Pin<Box<dyn Stream<Item = Result<AudioFragment, Status>> + Send>>;

    /// Streams the song `<title>.<format>` as a sequence of fragments.
    ///
    /// The response is returned immediately; fragments follow as the
    /// dispatcher reads them. Any failure after that point ends the stream
    /// with an error status.
    ///
    /// If `metrics` is enabled, emits telemetry for:
    /// - request rate
    /// - concurrent stream count
    /// - bytes streamed
    /// - stream duration
    /// - stream errors
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(title = %req.get_ref().title, format = %req.get_ref().format)))]
    async fn stream_audio(
        &self,
        req: Request<StreamRequest>,
    ) -> Result<Response<Self::StreamAudioStream>, Status> {
        if self.state.shutting_down.load(Ordering::Acquire) {
            increment_stream_errors();
            return Err(Error::ServiceShutdown.into());
        }

        if self.logger.is_faulted() {
            increment_stream_errors();
            return Err(Error::LoggerUnavailable {
                reason: "a previous write to the request log failed".to_string(),
            }
            .into());
        }

        let start = std::time::Instant::now();
        let peer = req.remote_addr();
        let request = req.into_inner();

        increment_requests();
        let guard = InflightGuard::enter(&self.state);

        let (resp_tx, resp_rx) =
            mpsc::channel::<Result<AudioFragment, Status>>(self.config.stream_buffer_size);

        let source = Arc::clone(&self.source);
        let log_pool = Arc::clone(&self.log_pool);

        let fut = async move {
            let _guard = guard;
            match dispatch(&request, peer, source.as_ref(), &log_pool, &resp_tx).await {
                Ok(()) => {
                    record_stream_duration(start.elapsed().as_millis() as f64);
                }
                Err(e) => {
                    increment_stream_errors();
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Stream ended with error: {e}");

                    // Best effort: the client may be the thing that failed.
                    if let Err(_e) = resp_tx.send(Err(e.into())).await {
                        #[cfg(feature = "tracing")]
                        tracing::debug!("Failed to forward err: {}", _e);
                    }
                }
            }
        };
        #[cfg(feature = "tracing")]
        let fut = {
            use tracing::Instrument;
            let span = tracing::info_span!("streaming");
            fut.instrument(span)
        };

        tokio::spawn(fut);

        let stream = ReceiverStream::new(resp_rx).inspect_ok(|fragment| {
            increment_bytes_streamed(fragment.data.len() as u64);
        });

        Ok(Response::new(Box::pin(stream)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        logger::{LogPolicy, LoggerConfig, RequestRecord},
        streaming::source::FileSource,
    };
    use audio_stream_core::types::UNKNOWN_CLIENT;
    use futures::StreamExt;
    use std::path::{Path, PathBuf};
    use tonic::Code;

    fn config(dir: &Path, write_delay: Duration) -> ServerConfig {
        ServerConfig {
            server_addr: "127.0.0.1:0".to_string(),
            uds: false,
            audio_dir: dir.join("canciones"),
            chunk_bytes: 4,
            stream_buffer_size: 2,
            log_workers: 2,
            log_queue_size: 8,
            shutdown_timeout: Duration::from_secs(10),
            logger: LoggerConfig {
                path: dir.join("canciones.log"),
                write_delay,
                policy: LogPolicy::BestEffort,
            },
        }
    }

    async fn service(dir: &Path, write_delay: Duration) -> AudioStreamService<FileSource> {
        let config = config(dir, write_delay);
        std::fs::create_dir_all(&config.audio_dir).unwrap();
        std::fs::write(config.audio_dir.join("song.mp3"), b"abcdefghij").unwrap();

        let logger = Arc::new(RequestLogger::open(&config.logger).await.unwrap());
        let source = FileSource::new(&config.audio_dir, config.chunk_bytes);
        AudioStreamService::new(config, source, logger)
    }

    fn request(title: &str, format: &str) -> Request<StreamRequest> {
        Request::new(StreamRequest {
            title: title.to_string(),
            format: format.to_string(),
        })
    }

    fn read_log(path: PathBuf) -> Vec<RequestRecord> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn streams_stored_file_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Duration::ZERO).await;

        let stream = svc
            .stream_audio(request("song", "mp3"))
            .await
            .unwrap()
            .into_inner();
        let fragments: Vec<AudioFragment> = stream.try_collect().await.unwrap();

        let data: Vec<u8> = fragments.iter().flat_map(|f| f.data.to_vec()).collect();
        assert_eq!(data, b"abcdefghij");
        assert!(fragments.iter().all(|f| f.data.len() <= 4));

        svc.shutdown().await.unwrap();
        let records = read_log(dir.path().join("canciones.log"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "song");
        // In-process calls carry no peer address.
        assert_eq!(records[0].client_address, UNKNOWN_CLIENT);
    }

    #[tokio::test]
    async fn missing_song_ends_stream_with_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Duration::ZERO).await;

        let mut stream = svc
            .stream_audio(request("missing", "mp3"))
            .await
            .unwrap()
            .into_inner();

        let status = stream.next().await.unwrap().err().unwrap();
        assert_eq!(status.code(), Code::NotFound);
        assert!(stream.next().await.is_none());

        svc.shutdown().await.unwrap();
        let records = read_log(dir.path().join("canciones.log"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "missing");
    }

    #[tokio::test]
    async fn refuses_streams_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Duration::ZERO).await;
        svc.shutdown().await.unwrap();

        let status = svc.stream_audio(request("song", "mp3")).await.err().unwrap();
        assert_eq!(status.code(), Code::Unavailable);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_writes_records_still_waiting_on_the_delay() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Duration::from_millis(300)).await;

        for _ in 0..3 {
            let stream = svc
                .stream_audio(request("song", "mp3"))
                .await
                .unwrap()
                .into_inner();
            let _: Vec<AudioFragment> = stream.try_collect().await.unwrap();
        }

        svc.shutdown().await.unwrap();
        assert_eq!(read_log(dir.path().join("canciones.log")).len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_keeps_backlog_beyond_the_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), Duration::from_millis(500));
        config.shutdown_timeout = Duration::from_secs(1);
        std::fs::create_dir_all(&config.audio_dir).unwrap();
        std::fs::write(config.audio_dir.join("song.mp3"), b"abc").unwrap();

        let logger = Arc::new(RequestLogger::open(&config.logger).await.unwrap());
        let source = FileSource::new(&config.audio_dir, config.chunk_bytes);
        let svc = AudioStreamService::new(config, source, logger);

        for _ in 0..6 {
            let stream = svc
                .stream_audio(request("song", "mp3"))
                .await
                .unwrap()
                .into_inner();
            let _: Vec<AudioFragment> = stream.try_collect().await.unwrap();
        }

        svc.shutdown().await.unwrap();
        assert_eq!(read_log(dir.path().join("canciones.log")).len(), 6);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn client_leaving_mid_stream_is_still_logged() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Duration::from_millis(200)).await;

        let mut stream = svc
            .stream_audio(request("song", "mp3"))
            .await
            .unwrap()
            .into_inner();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.data.as_ref(), b"abcd");
        drop(stream);

        svc.shutdown().await.unwrap();
        let records = read_log(dir.path().join("canciones.log"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "song");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn strict_logger_fault_refuses_new_streams() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path(), Duration::ZERO);
        config.logger.path = PathBuf::from("/dev/full");
        config.logger.policy = LogPolicy::Strict;
        std::fs::create_dir_all(&config.audio_dir).unwrap();
        std::fs::write(config.audio_dir.join("song.mp3"), b"abc").unwrap();

        let logger = Arc::new(RequestLogger::open(&config.logger).await.unwrap());
        let source = FileSource::new(&config.audio_dir, config.chunk_bytes);
        let svc = AudioStreamService::new(config, source, Arc::clone(&logger));

        // The first stream is served; its record fails in the background.
        let stream = svc
            .stream_audio(request("song", "mp3"))
            .await
            .unwrap()
            .into_inner();
        let _: Vec<AudioFragment> = stream.try_collect().await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !logger.is_faulted() && tokio::time::Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }

        let status = svc.stream_audio(request("song", "mp3")).await.err().unwrap();
        assert_eq!(status.code(), Code::Unavailable);
    }
}
