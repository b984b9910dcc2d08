//! CAMERA pan/tilt handler

use super::{expect_args, int_arg, Command, HandlerError};
use crate::body::RobotBody;
use crate::config::MotionConfig;
use async_trait::async_trait;
use picar_shared::CommandOutcome;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Point the camera; out-of-range angles are clamped to the servo limits
pub struct CameraCommand {
    body: Arc<dyn RobotBody>,
    config: MotionConfig,
}

impl CameraCommand {
    pub fn new(body: Arc<dyn RobotBody>, config: MotionConfig) -> Self {
        Self { body, config }
    }
}

fn clamp(value: i32, (low, high): (i32, i32)) -> i32 {
    value.max(low).min(high)
}

#[async_trait]
impl Command for CameraCommand {
    fn name(&self) -> &str {
        "CAMERA"
    }

    async fn execute(
        &self,
        args: &[String],
        _cancel: &CancellationToken,
    ) -> Result<CommandOutcome, HandlerError> {
        expect_args(self.name(), args, 2)?;
        let pan = int_arg(self.name(), args, 0)?;
        let tilt = int_arg(self.name(), args, 1)?;

        let clamped_pan = clamp(pan, self.config.camera_pan_deg);
        let clamped_tilt = clamp(tilt, self.config.camera_tilt_deg);
        if (clamped_pan, clamped_tilt) != (pan, tilt) {
            debug!(
                "[CAMERA] Clamped ({}, {}) to ({}, {})",
                pan, tilt, clamped_pan, clamped_tilt
            );
        }

        info!("[CAMERA] pan={} tilt={}", clamped_pan, clamped_tilt);
        self.body
            .set_camera(clamped_pan as f64, clamped_tilt as f64)?;
        Ok(CommandOutcome::Ok)
    }
}
