//! gRPC service implementation and request lifecycle.
//!
//! This module contains the client-facing side of the server: it accepts
//! streaming calls, hands each one to the dispatcher, and coordinates
//! shutdown of the log workers and the request log.
//!
//! ## Structure
//!
//! - [`handler`] - gRPC service entry point (`AudioStreamService`).

pub mod handler;
