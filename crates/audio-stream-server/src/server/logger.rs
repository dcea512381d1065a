//! Append-only request log.
//!
//! Every streaming request leaves one [`RequestRecord`] in a shared log file.
//! Writes from concurrent requests go through a single [`RequestLogger`] which
//! serializes them behind one lock, so lines never interleave. The logger is
//! obtained once through a [`LoggerCell`] during startup and handed to the
//! service, and closed once during shutdown.
//!
//! ## Structure
//!
//! - [`record`] - the persisted line format.
//! - [`writer`] - the lock-guarded log target.
//! - [`cell`] - one-time initialization of the shared instance.

pub mod cell;
pub mod record;
pub mod writer;

pub use cell::{LoggerCell, LoggerState};
pub use record::RequestRecord;
pub use writer::{LogPolicy, LoggerConfig, RequestLogger};
