//! # Shared Constants and Helpers
//!
//! Values both ends of the audio service agree on: how a request names a
//! stored song, and what a request log records when the caller's address is
//! unknown.

/// Client address recorded when the transport does not expose the peer
/// address (Unix sockets, in-process calls).
///
/// The request log is read by existing tooling that expects this literal, so
/// it matches the rest of the persisted record format.
pub const UNKNOWN_CLIENT: &str = "desconocido";

/// Default request log file, created in the working directory.
pub const DEFAULT_LOG_FILE: &str = "canciones.log";

/// Combines a request's title and format into the identifier used to look up
/// the audio source, e.g. `("song", "mp3")` -> `"song.mp3"`.
pub fn source_identifier(title: &str, format: &str) -> String {
    format!("{title}.{format}")
}
