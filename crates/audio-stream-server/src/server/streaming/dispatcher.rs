use super::source::StreamSource;
use crate::server::{
    logger::RequestRecord, pool::manager::LogWorkerPool, telemetry::increment_log_records_dropped,
};
use audio_stream_core::{
    Error, Result,
    proto::{AudioFragment, StreamRequest},
    types::{UNKNOWN_CLIENT, source_identifier},
};
use futures::StreamExt;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tonic::Status;

/// Outbound half of one response stream.
pub type FragmentSink = mpsc::Sender<core::result::Result<AudioFragment, Status>>;

/// Returns the caller's address, or [`UNKNOWN_CLIENT`] when the transport
/// does not expose one.
pub fn resolve_client_address(peer: Option<SocketAddr>) -> String {
    peer.map_or_else(|| UNKNOWN_CLIENT.to_string(), |addr| addr.to_string())
}

/// Serves one streaming request end-to-end.
///
/// The request is recorded first: the record is handed to the log workers
/// and never awaited, so the artificial delay inside the logger cannot hold
/// back the first fragment, and a failure to log never changes the outcome
/// of the stream. The song named `<title>.<format>` is then opened and each
/// chunk is forwarded to `sink` as an [`AudioFragment`], in the order the
/// source produced it.
///
/// # Arguments
///
/// - `request`: The client's title and format.
/// - `peer`: Transport-level address of the caller, if known.
/// - `source`: Where the song's bytes come from.
/// - `log_pool`: Background writers for the request log.
/// - `sink`: Channel feeding the gRPC response stream.
///
/// # Errors
///
/// Returns the first failure and stops; nothing is retried or re-sent:
/// - the source cannot be opened or a read fails mid-stream;
/// - [`Error::ClientDisconnected`] when `sink` no longer accepts fragments.
///
/// Returns `Ok(())` only after every chunk has been accepted by `sink`.
pub async fn dispatch<S: StreamSource>(
    request: &StreamRequest,
    peer: Option<SocketAddr>,
    source: &S,
    log_pool: &LogWorkerPool,
    sink: &FragmentSink,
) -> Result<()> {
    let client_address = resolve_client_address(peer);

    if let Err(_e) = log_pool.submit(RequestRecord::new(&request.title, client_address)) {
        increment_log_records_dropped();
        #[cfg(feature = "tracing")]
        tracing::warn!("Request record not submitted: {_e}");
    }

    let source_id = source_identifier(&request.title, &request.format);
    let mut chunks = source.open(&source_id).await?;

    while let Some(chunk) = chunks.next().await {
        let data = chunk?;
        if sink.send(Ok(AudioFragment { data })).await.is_err() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Client left while streaming {source_id}");
            return Err(Error::ClientDisconnected);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        logger::{LogPolicy, LoggerConfig, RequestLogger},
        streaming::source::testing::MemorySource,
    };
    use bytes::Bytes;
    use core::time::Duration;
    use std::{path::PathBuf, sync::Arc, time::Instant};

    struct Harness {
        _dir: tempfile::TempDir,
        log_path: PathBuf,
        logger: Arc<RequestLogger>,
        pool: LogWorkerPool,
    }

    impl Harness {
        async fn new(write_delay: Duration) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let log_path = dir.path().join("canciones.log");
            let logger = Arc::new(
                RequestLogger::open(&LoggerConfig {
                    path: log_path.clone(),
                    write_delay,
                    policy: LogPolicy::BestEffort,
                })
                .await
                .unwrap(),
            );
            let pool = LogWorkerPool::spawn(Arc::clone(&logger), 2, 8, Duration::from_secs(10));
            Self {
                _dir: dir,
                log_path,
                logger,
                pool,
            }
        }

        /// Drains the log workers and returns every line written.
        async fn finish(self) -> Vec<RequestRecord> {
            self.pool.shutdown().await.unwrap();
            self.logger.close().await;
            std::fs::read_to_string(&self.log_path)
                .unwrap()
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect()
        }
    }

    fn request(title: &str, format: &str) -> StreamRequest {
        StreamRequest {
            title: title.to_string(),
            format: format.to_string(),
        }
    }

    fn chunks(parts: &[&'static str]) -> Vec<Result<Bytes>> {
        parts
            .iter()
            .map(|p| Ok(Bytes::from_static(p.as_bytes())))
            .collect()
    }

    async fn drain(mut rx: mpsc::Receiver<core::result::Result<AudioFragment, Status>>) -> Vec<Bytes> {
        let mut out = Vec::new();
        while let Some(msg) = rx.recv().await {
            out.push(msg.unwrap().data);
        }
        out
    }

    #[tokio::test]
    async fn streams_song_and_logs_one_line() {
        let harness = Harness::new(Duration::ZERO).await;
        let source = MemorySource::default().with("song.mp3", chunks(&["b1", "b2"]));
        let (tx, rx) = mpsc::channel(8);
        let peer: SocketAddr = "192.168.1.20:51000".parse().unwrap();

        dispatch(&request("song", "mp3"), Some(peer), &source, &harness.pool, &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(drain(rx).await, ["b1", "b2"]);

        let records = harness.finish().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "song");
        assert_eq!(records[0].client_address, "192.168.1.20:51000");
    }

    #[tokio::test]
    async fn preserves_chunk_order() {
        let harness = Harness::new(Duration::ZERO).await;
        let expected: Vec<Bytes> = (0..200u32)
            .map(|i| Bytes::from(i.to_be_bytes().to_vec()))
            .collect();
        let source =
            MemorySource::default().with("long.ogg", expected.iter().cloned().map(Ok).collect());
        let (tx, rx) = mpsc::channel(4);

        let consumer = tokio::spawn(drain(rx));
        dispatch(&request("long", "ogg"), None, &source, &harness.pool, &tx)
            .await
            .unwrap();
        drop(tx);

        assert_eq!(consumer.await.unwrap(), expected);
        harness.finish().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn logging_delay_does_not_hold_back_fragments() {
        let harness = Harness::new(Duration::from_secs(2)).await;
        let source = MemorySource::default().with("song.mp3", chunks(&["b1", "b2"]));
        let (tx, rx) = mpsc::channel(8);

        let start = Instant::now();
        dispatch(&request("song", "mp3"), None, &source, &harness.pool, &tx)
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
        drop(tx);
        assert_eq!(drain(rx).await.len(), 2);

        // The record is still written once the delay has elapsed.
        let records = harness.finish().await;
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn unknown_peer_uses_placeholder() {
        let harness = Harness::new(Duration::ZERO).await;
        let source = MemorySource::default().with("song.mp3", chunks(&["b1"]));
        let (tx, _rx) = mpsc::channel(8);

        dispatch(&request("song", "mp3"), None, &source, &harness.pool, &tx)
            .await
            .unwrap();

        let records = harness.finish().await;
        assert_eq!(records[0].client_address, UNKNOWN_CLIENT);
        assert!(!records[0].client_address.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_stay_independent() {
        let harness = Arc::new(Harness::new(Duration::from_millis(20)).await);
        let source = Arc::new(MemorySource::default().with("song.mp3", chunks(&["b1", "b2"])));

        let tasks = (0..2).map(|_| {
            let harness = Arc::clone(&harness);
            let source = Arc::clone(&source);
            tokio::spawn(async move {
                let (tx, rx) = mpsc::channel(8);
                let consumer = tokio::spawn(drain(rx));
                dispatch(&request("song", "mp3"), None, source.as_ref(), &harness.pool, &tx)
                    .await
                    .unwrap();
                drop(tx);
                consumer.await.unwrap()
            })
        });

        for res in futures::future::join_all(tasks).await {
            assert_eq!(res.unwrap(), ["b1", "b2"]);
        }

        let harness = Arc::into_inner(harness).unwrap();
        let records = harness.finish().await;
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.title == "song"));
    }

    #[tokio::test]
    async fn missing_source_fails_but_is_still_logged() {
        let harness = Harness::new(Duration::ZERO).await;
        let source = MemorySource::default();
        let (tx, rx) = mpsc::channel(8);

        let err = dispatch(&request("missing", "mp3"), None, &source, &harness.pool, &tx)
            .await
            .err()
            .unwrap();
        drop(tx);

        assert_eq!(
            err,
            Error::SourceNotFound {
                source_id: "missing.mp3".to_string()
            }
        );
        assert!(drain(rx).await.is_empty());

        let records = harness.finish().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "missing");
    }

    #[tokio::test]
    async fn read_error_stops_after_delivered_chunks() {
        let harness = Harness::new(Duration::ZERO).await;
        let read_error = Error::SourceRead {
            reason: "disk gone".to_string(),
        };
        let source = MemorySource::default().with(
            "song.mp3",
            vec![
                Ok(Bytes::from_static(b"b1")),
                Err(read_error.clone()),
                Ok(Bytes::from_static(b"never")),
            ],
        );
        let (tx, rx) = mpsc::channel(8);

        let err = dispatch(&request("song", "mp3"), None, &source, &harness.pool, &tx)
            .await
            .err()
            .unwrap();
        drop(tx);

        assert_eq!(err, read_error);
        assert_eq!(drain(rx).await, ["b1"]);
        harness.finish().await;
    }

    #[tokio::test]
    async fn disconnected_client_aborts_dispatch() {
        let harness = Harness::new(Duration::ZERO).await;
        let source = MemorySource::default().with("song.mp3", chunks(&["b1", "b2"]));
        let (tx, rx) = mpsc::channel(8);
        drop(rx);

        let err = dispatch(&request("song", "mp3"), None, &source, &harness.pool, &tx)
            .await
            .err()
            .unwrap();

        assert_eq!(err, Error::ClientDisconnected);

        // The record was handed off before the first send failed.
        let records = harness.finish().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "song");
    }

    #[test]
    fn resolves_known_peer() {
        let peer: SocketAddr = "[::1]:9000".parse().unwrap();
        assert_eq!(resolve_client_address(Some(peer)), "[::1]:9000");
        assert_eq!(resolve_client_address(None), UNKNOWN_CLIENT);
    }
}
