//! Batch result reporting back to the model
//!
//! The executor hands every finalized batch to a `ResultReporter`. The model
//! client (outside this crate) turns it into a new input message.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use picar_shared::{codec, BatchResult};
use tokio::sync::mpsc;
use tracing::debug;

/// Receives the outcome of each finalized batch
#[async_trait]
pub trait ResultReporter: Send + Sync {
    /// Deliver one result; best effort, the executor bounds the wait
    async fn send_result(&self, result: BatchResult) -> Result<()>;
}

/// Encodes results as `[EXEC_RESULT ..]` messages onto a channel
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    outbound_tx: mpsc::Sender<String>,
}

impl ChannelReporter {
    /// Create a reporter and the receiving end for the model client
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        (Self { outbound_tx }, outbound_rx)
    }
}

#[async_trait]
impl ResultReporter for ChannelReporter {
    async fn send_result(&self, result: BatchResult) -> Result<()> {
        let message = codec::encode_result(&result);
        debug!("Sending exec result: {:?}", message);
        self.outbound_tx
            .send(message)
            .await
            .map_err(|_| anyhow!("Model client closed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use picar_shared::{BatchReason, BatchStatus, CommandOutcome};

    #[tokio::test]
    async fn test_channel_reporter_encodes() {
        let (reporter, mut rx) = ChannelReporter::new(4);
        reporter
            .send_result(BatchResult::from_outcome(3, CommandOutcome::Safety))
            .await
            .unwrap();

        let message = rx.recv().await.unwrap();
        assert_eq!(message, "[EXEC_RESULT id=3]\nSTATUS: FAILED\nREASON: SAFETY");

        let decoded = codec::ResultDecoder::new().unwrap().decode(&message).unwrap();
        assert_eq!(decoded.status, BatchStatus::Failed);
        assert_eq!(decoded.reason, BatchReason::Safety);
    }

    #[tokio::test]
    async fn test_closed_client_is_an_error() {
        let (reporter, rx) = ChannelReporter::new(1);
        drop(rx);
        assert!(reporter.send_result(BatchResult::ok(1)).await.is_err());
    }
}
