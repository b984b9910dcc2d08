//! FORWARD / BACK / LEFT / RIGHT handlers
//!
//! Moves are timed: the motors run at a fixed power for a duration derived
//! from the requested distance or angle, then stop. Forward motion watches
//! the front distance sensor and stops early for obstacles.

use super::{expect_args, int_arg, Command, HandlerError};
use crate::body::RobotBody;
use crate::config::MotionConfig;
use async_trait::async_trait;
use picar_shared::CommandOutcome;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drive straight for a distance in centimetres
pub struct DriveCommand {
    name: &'static str,
    /// +1 forward, -1 backward
    direction: i32,
    body: Arc<dyn RobotBody>,
    config: MotionConfig,
}

impl DriveCommand {
    pub fn forward(body: Arc<dyn RobotBody>, config: MotionConfig) -> Self {
        Self {
            name: "FORWARD",
            direction: 1,
            body,
            config,
        }
    }

    pub fn back(body: Arc<dyn RobotBody>, config: MotionConfig) -> Self {
        Self {
            name: "BACK",
            direction: -1,
            body,
            config,
        }
    }
}

#[async_trait]
impl Command for DriveCommand {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, HandlerError> {
        expect_args(self.name, args, 1)?;
        let distance_cm = int_arg(self.name, args, 0)?;
        if distance_cm < 0 {
            return Err(HandlerError::InvalidArgument {
                command: self.name.to_string(),
                index: 1,
                value: args[0].clone(),
            });
        }
        if distance_cm > self.config.max_drive_cm {
            warn!(
                "[{}] Refusing {}cm (limit {}cm)",
                self.name, distance_cm, self.config.max_drive_cm
            );
            return Ok(CommandOutcome::Safety);
        }

        let watch_front = self.direction > 0;
        if watch_front && obstacle_ahead(self.body.as_ref(), &self.config)? {
            info!("[{}] Obstacle ahead, not moving", self.name);
            return Ok(CommandOutcome::Obstacle);
        }

        if cancel.is_cancelled() {
            return Ok(CommandOutcome::Interrupted);
        }
        info!("[{}] {}cm", self.name, distance_cm);
        self.body.set_steering(0.0)?;
        self.body.set_power(self.direction * self.config.drive_power)?;

        let duration = self.config.drive_duration(distance_cm);
        run_timed(self.body.as_ref(), &self.config, duration, watch_front, cancel).await
    }
}

/// Steer and drive forward to change heading by an angle in degrees
pub struct TurnCommand {
    name: &'static str,
    /// -1 left, +1 right
    side: f64,
    body: Arc<dyn RobotBody>,
    config: MotionConfig,
}

impl TurnCommand {
    pub fn left(body: Arc<dyn RobotBody>, config: MotionConfig) -> Self {
        Self {
            name: "LEFT",
            side: -1.0,
            body,
            config,
        }
    }

    pub fn right(body: Arc<dyn RobotBody>, config: MotionConfig) -> Self {
        Self {
            name: "RIGHT",
            side: 1.0,
            body,
            config,
        }
    }
}

#[async_trait]
impl Command for TurnCommand {
    fn name(&self) -> &str {
        self.name
    }

    async fn execute(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, HandlerError> {
        expect_args(self.name, args, 1)?;
        let degrees = int_arg(self.name, args, 0)?;
        if degrees < 0 {
            return Err(HandlerError::InvalidArgument {
                command: self.name.to_string(),
                index: 1,
                value: args[0].clone(),
            });
        }
        if degrees > self.config.max_turn_deg {
            warn!(
                "[{}] Refusing {} degrees (limit {})",
                self.name, degrees, self.config.max_turn_deg
            );
            return Ok(CommandOutcome::Safety);
        }

        if obstacle_ahead(self.body.as_ref(), &self.config)? {
            info!("[{}] Obstacle ahead, not turning", self.name);
            return Ok(CommandOutcome::Obstacle);
        }

        if cancel.is_cancelled() {
            return Ok(CommandOutcome::Interrupted);
        }
        info!("[{}] {} degrees", self.name, degrees);
        self.body
            .set_steering(self.side * self.config.turn_steering_deg)?;
        self.body.set_power(self.config.drive_power)?;

        let duration = self.config.turn_duration(degrees);
        let outcome = run_timed(self.body.as_ref(), &self.config, duration, true, cancel).await;
        let straightened = self.body.set_steering(0.0);

        let outcome = outcome?;
        straightened?;
        Ok(outcome)
    }
}

/// Positive sensor reading below the obstacle threshold
fn obstacle_ahead(body: &dyn RobotBody, config: &MotionConfig) -> Result<bool, HandlerError> {
    let distance = body.distance_cm()?;
    Ok(distance > 0.0 && distance < config.obstacle_distance_cm)
}

/// Keep the motors running for `duration`, then stop them
///
/// The motors are stopped on every exit path.
async fn run_timed(
    body: &dyn RobotBody,
    config: &MotionConfig,
    duration: Duration,
    watch_front: bool,
    cancel: &CancellationToken,
) -> Result<CommandOutcome, HandlerError> {
    let held = hold(body, config, duration, watch_front, cancel).await;
    let stopped = body.stop();

    let outcome = held?;
    stopped?;
    Ok(outcome)
}

async fn hold(
    body: &dyn RobotBody,
    config: &MotionConfig,
    duration: Duration,
    watch_front: bool,
    cancel: &CancellationToken,
) -> Result<CommandOutcome, HandlerError> {
    let deadline = Instant::now() + duration;
    let mut poll = interval(config.obstacle_poll());
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(CommandOutcome::Interrupted),
            _ = sleep_until(deadline) => return Ok(CommandOutcome::Ok),
            _ = poll.tick(), if watch_front => {
                if obstacle_ahead(body, config)? {
                    info!("Obstacle detected, stopping");
                    return Ok(CommandOutcome::Obstacle);
                }
            }
        }
    }
}
