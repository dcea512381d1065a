use audio_stream_core::{Error, Result};
use bytes::Bytes;
use core::future::Future;
use futures::{StreamExt, TryStreamExt, stream::BoxStream};
use std::{
    io::ErrorKind,
    path::{Component, Path, PathBuf},
};
use tokio_util::io::ReaderStream;

/// Successive chunks of one audio source. The stream ending means the source
/// is exhausted; an `Err` item is a read failure.
pub type ChunkStream = BoxStream<'static, Result<Bytes>>;

/// Capability that yields the bytes of a stored song.
pub trait StreamSource: Send + Sync + 'static {
    /// Opens the source named `source_id` (e.g. `"song.mp3"`).
    ///
    /// # Errors
    ///
    /// [`Error::SourceNotFound`] when nothing is stored under the identifier,
    /// [`Error::SourceUnavailable`] or [`Error::InvalidRequest`] otherwise.
    fn open(&self, source_id: &str) -> impl Future<Output = Result<ChunkStream>> + Send;
}

/// Serves songs from files under a root directory, `chunk_bytes` at a time.
#[derive(Clone, Debug)]
pub struct FileSource {
    root: PathBuf,
    chunk_bytes: usize,
}

impl FileSource {
    pub fn new(root: impl Into<PathBuf>, chunk_bytes: usize) -> Self {
        Self {
            root: root.into(),
            chunk_bytes,
        }
    }

    /// Maps an identifier to a path below the root. Only plain file and
    /// directory names are accepted, so `..` or absolute paths cannot escape.
    fn resolve(&self, source_id: &str) -> Result<PathBuf> {
        let relative = Path::new(source_id);
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));

        if source_id.is_empty() || !plain {
            return Err(Error::InvalidRequest {
                reason: format!("invalid audio source identifier: {source_id:?}"),
            });
        }

        Ok(self.root.join(relative))
    }
}

impl StreamSource for FileSource {
    async fn open(&self, source_id: &str) -> Result<ChunkStream> {
        let path = self.resolve(source_id)?;

        let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::SourceNotFound {
                source_id: source_id.to_string(),
            },
            _ => Error::SourceUnavailable {
                source_id: source_id.to_string(),
                reason: e.to_string(),
            },
        })?;

        #[cfg(feature = "tracing")]
        tracing::debug!("Opened audio source {}", path.display());

        Ok(ReaderStream::with_capacity(file, self.chunk_bytes)
            .map_err(|e| Error::SourceRead {
                reason: e.to_string(),
            })
            .boxed())
    }
}
