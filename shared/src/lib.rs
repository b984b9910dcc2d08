//! PiCar Shared Protocol Types
//!
//! This crate provides the batch, command and result records exchanged
//! between the response parser, the batch executor and the model client,
//! together with the line codec for the model command stream.

pub mod codec;
pub mod state_machine;

use std::fmt;

/// Batch identifier announced by a `[COMMANDS id=..]` header
pub type BatchId = u32;

/// Motion and timing defaults for the robot
pub mod limits {
    /// Upper bound for delivering a batch result to the model
    pub const REPORT_TIMEOUT_MS: u64 = 5000;

    /// Motor power used for timed moves (0-100)
    pub const DRIVE_POWER: i32 = 80;

    /// Drive time per centimetre at `DRIVE_POWER`
    pub const MS_PER_CM: u64 = 10;

    /// Drive time per degree of heading change while steering
    pub const MS_PER_DEGREE: u64 = 10;

    /// Steering servo angle used for LEFT/RIGHT
    pub const TURN_STEERING_DEG: f64 = 30.0;

    /// Longest single FORWARD/BACK the robot accepts
    pub const MAX_DRIVE_CM: i32 = 300;

    /// Largest single LEFT/RIGHT the robot accepts
    pub const MAX_TURN_DEG: i32 = 360;

    /// Forward motion stops when the front sensor reads below this
    pub const OBSTACLE_DISTANCE_CM: f64 = 15.0;

    /// Distance sensor poll interval while moving
    pub const OBSTACLE_POLL_MS: u64 = 50;

    /// Camera pan range (left negative)
    pub const CAMERA_PAN_DEG: (i32, i32) = (-45, 45);

    /// Camera tilt range (down negative)
    pub const CAMERA_TILT_DEG: (i32, i32) = (-10, 60);
}

/// One parsed command line: `>NAME arg arg ...`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Upper-cased command name
    pub name: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Create a command spec, normalizing the name to upper case
    pub fn new(name: impl AsRef<str>, args: Vec<String>) -> Self {
        Self {
            name: name.as_ref().to_ascii_uppercase(),
            args,
        }
    }

    /// Case-insensitive name comparison
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Outcome of a single handler invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Ok,
    Interrupted,
    Failed,
    ParseError,
    Obstacle,
    UserStop,
    Safety,
}

impl CommandOutcome {
    pub fn is_ok(self) -> bool {
        self == CommandOutcome::Ok
    }

    /// Batch status and reason reported for this outcome
    pub fn verdict(self) -> (BatchStatus, BatchReason) {
        match self {
            CommandOutcome::Ok => (BatchStatus::Ok, BatchReason::None),
            CommandOutcome::Obstacle => (BatchStatus::Interrupted, BatchReason::Obstacle),
            CommandOutcome::UserStop | CommandOutcome::Interrupted => {
                (BatchStatus::Interrupted, BatchReason::UserStop)
            }
            CommandOutcome::Safety => (BatchStatus::Failed, BatchReason::Safety),
            CommandOutcome::ParseError => (BatchStatus::Failed, BatchReason::ParseError),
            CommandOutcome::Failed => (BatchStatus::Failed, BatchReason::InternalError),
        }
    }
}

/// Final status of a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Ok,
    Interrupted,
    Failed,
    Ignored,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchStatus::Ok => "OK",
            BatchStatus::Interrupted => "INTERRUPTED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Ignored => "IGNORED",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a batch did not finish with `OK`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchReason {
    None,
    Obstacle,
    UserStop,
    Safety,
    ParseError,
    InternalError,
}

impl BatchReason {
    pub fn as_str(self) -> &'static str {
        match self {
            BatchReason::None => "NONE",
            BatchReason::Obstacle => "OBSTACLE",
            BatchReason::UserStop => "USER_STOP",
            BatchReason::Safety => "SAFETY",
            BatchReason::ParseError => "PARSE_ERROR",
            BatchReason::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for BatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome record sent back to the model once per finalized batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchResult {
    pub batch_id: BatchId,
    pub status: BatchStatus,
    pub reason: BatchReason,
}

impl BatchResult {
    /// Result for a batch whose commands all completed
    pub fn ok(batch_id: BatchId) -> Self {
        Self {
            batch_id,
            status: BatchStatus::Ok,
            reason: BatchReason::None,
        }
    }

    /// Result for a batch that ended with the given command outcome
    pub fn from_outcome(batch_id: BatchId, outcome: CommandOutcome) -> Self {
        let (status, reason) = outcome.verdict();
        Self {
            batch_id,
            status,
            reason,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == BatchStatus::Ok
    }
}
