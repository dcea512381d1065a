use audio_stream_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Timestamp layout of the `fecha` field, second precision, local time.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One entry of the request log: what was requested, by whom, and when.
///
/// Field names on disk are `titulo`, `cliente` and `fecha` so that existing
/// `canciones.log` files and the tools reading them keep working.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestRecord {
    #[serde(rename = "titulo")]
    pub title: String,
    #[serde(rename = "cliente")]
    pub client_address: String,
    #[serde(rename = "fecha")]
    pub timestamp: String,
}

impl RequestRecord {
    /// Captures a record stamped with the current local time.
    pub fn new(title: impl Into<String>, client_address: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            client_address: client_address.into(),
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    /// Renders the record as one compact JSON object terminated by `\n`.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(self).map_err(|e| Error::LogWrite {
            reason: format!("failed to encode record: {e}"),
        })?;
        line.push('\n');
        Ok(line)
    }
}
