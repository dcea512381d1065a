//! Background workers that write request records.
//!
//! Streaming requests never write the log themselves. They hand a
//! [`RequestRecord`](crate::server::logger::RequestRecord) to a
//! [`LogWorkerPool`](manager::LogWorkerPool), whose workers append it through
//! the shared [`RequestLogger`](crate::server::logger::RequestLogger).
//!
//! ## Structure
//!
//! - [`manager`] - round-robin hand-off and coordinated shutdown.
//! - [`worker`] - the per-worker receive loop.
//! - [`request`] - messages accepted by a worker.

pub mod manager;
pub mod request;
pub mod worker;
