use crate::server::logger::{LogPolicy, LoggerConfig};
use anyhow::bail;
use audio_stream_core::types::DEFAULT_LOG_FILE;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `audio-stream-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a
/// `.env` file is loaded first). By default songs are served from
/// `canciones/`, requests are appended to `canciones.log`, and every write
/// waits five seconds inside the log lock.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "audio-stream-server",
    version,
    about = "A gRPC service that streams stored songs in fragments"
)]
pub struct CliArgs {
    /// Address to listen on (TCP or Unix socket path; use --uds for Unix socket).
    ///
    /// Example: "0.0.0.0:50051" or "/tmp/audio-stream.sock"
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// Listen on a Unix socket instead of TCP. If set, `SERVER_ADDR` must be a file path.
    #[arg(short, long, default_value_t = false)]
    pub uds: bool,

    /// Directory holding the audio files, looked up as `<title>.<format>`.
    ///
    /// Environment variable: `AUDIO_DIR`
    #[arg(long, env = "AUDIO_DIR", default_value = "canciones")]
    pub audio_dir: PathBuf,

    /// Maximum number of bytes carried by one `AudioFragment`.
    ///
    /// Environment variable: `CHUNK_BYTES`
    #[arg(long, env = "CHUNK_BYTES", default_value_t = 64 * 1024)]
    pub chunk_bytes: usize,

    /// Capacity of the response buffer between the dispatcher and the gRPC
    /// stream.
    ///
    /// Lower values make a slow client push back on disk reads sooner.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Append-only request log file.
    ///
    /// Environment variable: `LOG_FILE`
    #[arg(long, env = "LOG_FILE", default_value = DEFAULT_LOG_FILE)]
    pub log_file: PathBuf,

    /// Delay, in milliseconds, spent holding the log lock before each write.
    ///
    /// Environment variable: `LOG_WRITE_DELAY_MS`
    #[arg(long, env = "LOG_WRITE_DELAY_MS", default_value_t = 5_000)]
    pub log_write_delay_ms: u64,

    /// What a failed log write does: `best-effort` counts and drops it,
    /// `strict` stops accepting new streams.
    ///
    /// Environment variable: `LOG_POLICY`
    #[arg(long, env = "LOG_POLICY", value_enum, default_value_t = LogPolicy::BestEffort)]
    pub log_policy: LogPolicy,

    /// Number of background tasks writing request records.
    ///
    /// Environment variable: `LOG_WORKERS`
    #[arg(long, env = "LOG_WORKERS", default_value_t = 4)]
    pub log_workers: usize,

    /// Pending records buffered per log worker before hand-offs spill into
    /// their own tasks.
    ///
    /// Environment variable: `LOG_QUEUE_SIZE`
    #[arg(long, env = "LOG_QUEUE_SIZE", default_value_t = 1024)]
    pub log_queue_size: usize,

    /// Seconds allowed for each shutdown drain phase (in-flight streams, then
    /// pending log records).
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 10)]
    pub shutdown_timeout: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub uds: bool,
    pub audio_dir: PathBuf,
    pub chunk_bytes: usize,
    pub stream_buffer_size: usize,
    pub log_workers: usize,
    pub log_queue_size: usize,
    pub shutdown_timeout: Duration,
    pub logger: LoggerConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.chunk_bytes == 0 {
            bail!("CHUNK_BYTES must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.log_workers == 0 {
            bail!("LOG_WORKERS must be greater than 0");
        }

        if args.log_queue_size == 0 {
            bail!("LOG_QUEUE_SIZE must be greater than 0");
        }

        if args.log_file.as_os_str().is_empty() {
            bail!("LOG_FILE must not be empty");
        }

        Ok(Self {
            server_addr: args.server_addr,
            uds: args.uds,
            audio_dir: args.audio_dir,
            chunk_bytes: args.chunk_bytes,
            stream_buffer_size: args.stream_buffer_size,
            log_workers: args.log_workers,
            log_queue_size: args.log_queue_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            logger: LoggerConfig {
                path: args.log_file,
                write_delay: Duration::from_millis(args.log_write_delay_ms),
                policy: args.log_policy,
            },
        })
    }
}
