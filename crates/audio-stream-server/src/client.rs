use anyhow::Context;
use audio_stream_core::{
    proto::{StreamRequest, audio_service_client::AudioServiceClient},
    types::source_identifier,
};
use clap::Parser;
use std::{path::PathBuf, time::Instant};
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tonic::codec::CompressionEncoding;

/// Downloads one song from an `audio-stream-server`.
#[derive(Parser, Debug)]
#[command(name = "audio-stream-client", version)]
struct ClientArgs {
    /// Server URI.
    #[arg(long, env = "AUDIO_SERVER", default_value = "http://127.0.0.1:50051")]
    server_addr: String,

    /// Song title.
    #[arg(long)]
    title: String,

    /// Song format (file extension).
    #[arg(long, default_value = "mp3")]
    format: String,

    /// Where to write the song. Defaults to `<title>.<format>`.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = ClientArgs::parse();
    let output = args
        .output
        .unwrap_or_else(|| source_identifier(&args.title, &args.format).into());

    let mut client = AudioServiceClient::connect(args.server_addr.clone())
        .await
        .with_context(|| format!("failed to connect to {}", args.server_addr))?
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip);

    let start = Instant::now();
    let mut stream = client
        .stream_audio(StreamRequest {
            title: args.title,
            format: args.format,
        })
        .await?
        .into_inner();

    let mut file = tokio::fs::File::create(&output)
        .await
        .with_context(|| format!("failed to create {}", output.display()))?;

    let mut fragments = 0_usize;
    let mut bytes = 0_usize;
    while let Some(fragment) = stream.next().await {
        let data = fragment?.data;
        file.write_all(&data).await?;
        fragments += 1;
        bytes += data.len();
    }
    file.flush().await?;

    println!(
        "{:<25} | {:>8} fragments | {:>10} bytes | {:>8.2} ms",
        output.display(),
        fragments,
        bytes,
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(())
}
