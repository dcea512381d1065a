//! Delivery of one song to one client.
//!
//! - [`source`] - the [`StreamSource`](source::StreamSource) capability and
//!   its file-backed implementation.
//! - [`dispatcher`] - per-request flow: record the request, then relay
//!   chunks to the response stream in order.

pub mod dispatcher;
pub mod source;
