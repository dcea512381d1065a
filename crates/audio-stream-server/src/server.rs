pub mod config;
pub mod logger;
pub mod pool;
pub mod service;
pub mod streaming;
pub mod telemetry;
