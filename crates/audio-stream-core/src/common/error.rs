//! Error types for the audio streaming service.
//!
//! This module defines the central `Error` enum shared by the server and its
//! clients. It implements `From<Error>` for `tonic::Status` so request-scoped
//! failures surface to callers with an appropriate status code.
//!
//! ## Error Cases
//! - `SourceNotFound` / `SourceUnavailable`: the requested song could not be
//!   opened.
//! - `SourceRead`: a read failed after the stream had started.
//! - `InvalidRequest`: the client request cannot name a stored song.
//! - `ClientDisconnected`: the outbound stream rejected a fragment.
//! - `ChannelError`: an internal hand-off between tasks failed.
//! - `ServiceShutdown`: a request arrived while the service was shutting down.
//! - `LoggerUnavailable` / `LogWrite` / `LoggerClosed`: request log failures.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the audio streaming service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// No audio source exists for the identifier.
    #[error("Audio source not found: {source_id}")]
    SourceNotFound { source_id: String },

    /// The audio source exists but could not be opened.
    #[error("Audio source {source_id} unavailable: {reason}")]
    SourceUnavailable { source_id: String, reason: String },

    /// Reading the next chunk from an open source failed.
    #[error("Audio source read failed: {reason}")]
    SourceRead { reason: String },

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The client went away before every fragment was delivered.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Internal channel send/receive failure (e.g., closed or full channel).
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The request log cannot accept records.
    #[error("Request logger unavailable: {reason}")]
    LoggerUnavailable { reason: String },

    /// Appending a record to the request log failed.
    #[error("Request log write failed: {reason}")]
    LogWrite { reason: String },

    /// The request log was already closed.
    #[error("Request logger is closed")]
    LoggerClosed,
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::SourceNotFound { source_id } => {
                Status::not_found(format!("Audio source not found: {source_id}"))
            }
            Error::SourceUnavailable { source_id, reason } => {
                Status::internal(format!("Audio source {source_id} unavailable: {reason}"))
            }
            Error::SourceRead { reason } => Status::internal(format!("Read error: {reason}")),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ClientDisconnected => Status::cancelled("Client disconnected"),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {context}"))
            }
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::LoggerUnavailable { reason } => {
                Status::unavailable(format!("Request logger unavailable: {reason}"))
            }
            Error::LogWrite { reason } => Status::internal(format!("Log write failed: {reason}")),
            Error::LoggerClosed => Status::unavailable("Request logger is closed"),
        }
    }
}
