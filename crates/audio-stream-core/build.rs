/// Builds the gRPC client and server code for the `audio.proto` definition
/// using `tonic-prost-build`.
///
/// The generated modules land in the crate's `OUT_DIR` together with an
/// encoded file descriptor set (`audio_descriptor.bin`) that the server
/// registers with gRPC reflection.
///
/// # Byte Field Optimization
///
/// The `data` field of `AudioFragment` is marked with `.bytes(...)` so it is
/// generated as `bytes::Bytes` instead of `Vec<u8>`. Chunks read from disk are
/// already `Bytes`, so fragments move to the encoder without another copy.
///
/// # Panics
///
/// Panics if code generation fails.
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("audio_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".audio.AudioFragment.data"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/audio.proto"], &["proto"])
        .unwrap();
}
