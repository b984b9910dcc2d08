//! STOP handler

use super::{Command, HandlerError};
use crate::body::RobotBody;
use async_trait::async_trait;
use picar_shared::CommandOutcome;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Halt the motors
///
/// The executor consumes a STOP that arrives mid-batch as a preemption, so
/// this handler only runs when STOP opens a batch or follows other commands
/// in the queue.
pub struct StopCommand {
    body: Arc<dyn RobotBody>,
}

impl StopCommand {
    pub fn new(body: Arc<dyn RobotBody>) -> Self {
        Self { body }
    }
}

#[async_trait]
impl Command for StopCommand {
    fn name(&self) -> &str {
        "STOP"
    }

    async fn execute(
        &self,
        _args: &[String],
        _cancel: &CancellationToken,
    ) -> Result<CommandOutcome, HandlerError> {
        info!("[STOP] Halting motors");
        self.body.stop()?;
        Ok(CommandOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::SimulatedBody;

    #[tokio::test]
    async fn test_stop_halts_motors() {
        let body = Arc::new(SimulatedBody::new(100.0));
        body.set_power(60).unwrap();

        let stop = StopCommand::new(body.clone());
        let outcome = stop.execute(&[], &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, CommandOutcome::Ok);
        assert_eq!(body.power(), 0);
    }
}
