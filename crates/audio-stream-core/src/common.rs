pub mod error;
pub mod types;

pub use error::{Error, Result};

/// Generated protobuf messages and gRPC client/server bindings.
pub mod proto {
    tonic::include_proto!("audio");

    /// Encoded file descriptor set for gRPC server reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("audio_descriptor");
}
