use crate::server::logger::RequestRecord;
use tokio::sync::oneshot;

/// A message processed by a log worker.
#[derive(Debug)]
pub enum LogRequest {
    /// Append one record to the request log.
    Record { record: RequestRecord },

    /// Stop after everything queued ahead of this message, then acknowledge.
    Shutdown { response: oneshot::Sender<()> },
}
