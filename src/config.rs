//! Runtime configuration for the edge pilot

use anyhow::{Context, Result};
use picar_shared::limits;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PilotConfig {
    /// Bound for delivering one batch result to the model
    pub report_timeout_ms: u64,
    /// Handler motion parameters
    pub motion: MotionConfig,
    /// Simulated body and speech settings
    pub simulation: SimulationConfig,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            report_timeout_ms: limits::REPORT_TIMEOUT_MS,
            motion: MotionConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl PilotConfig {
    /// Load configuration from a JSON file, or defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn report_timeout(&self) -> Duration {
        Duration::from_millis(self.report_timeout_ms)
    }
}

/// Parameters for the movement and camera handlers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Motor power for timed moves (0-100)
    pub drive_power: i32,
    pub ms_per_cm: u64,
    pub ms_per_degree: u64,
    /// Steering servo angle used while turning
    pub turn_steering_deg: f64,
    /// Longer drives are refused as unsafe
    pub max_drive_cm: i32,
    /// Larger turns are refused as unsafe
    pub max_turn_deg: i32,
    /// Forward motion stops below this sensor reading
    pub obstacle_distance_cm: f64,
    pub obstacle_poll_ms: u64,
    pub camera_pan_deg: (i32, i32),
    pub camera_tilt_deg: (i32, i32),
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            drive_power: limits::DRIVE_POWER,
            ms_per_cm: limits::MS_PER_CM,
            ms_per_degree: limits::MS_PER_DEGREE,
            turn_steering_deg: limits::TURN_STEERING_DEG,
            max_drive_cm: limits::MAX_DRIVE_CM,
            max_turn_deg: limits::MAX_TURN_DEG,
            obstacle_distance_cm: limits::OBSTACLE_DISTANCE_CM,
            obstacle_poll_ms: limits::OBSTACLE_POLL_MS,
            camera_pan_deg: limits::CAMERA_PAN_DEG,
            camera_tilt_deg: limits::CAMERA_TILT_DEG,
        }
    }
}

impl MotionConfig {
    /// How long to drive for a distance
    pub fn drive_duration(&self, distance_cm: i32) -> Duration {
        Duration::from_millis(distance_cm.unsigned_abs() as u64 * self.ms_per_cm)
    }

    /// How long to steer for a heading change
    pub fn turn_duration(&self, degrees: i32) -> Duration {
        Duration::from_millis(degrees.unsigned_abs() as u64 * self.ms_per_degree)
    }

    pub fn obstacle_poll(&self) -> Duration {
        Duration::from_millis(self.obstacle_poll_ms.max(1))
    }
}

/// Settings for the simulated robot used by the demo binary
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Distance the simulated front sensor reports
    pub front_distance_cm: f64,
    /// Speaking pace of the console text player
    pub speech_ms_per_word: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            front_distance_cm: 120.0,
            speech_ms_per_word: 250,
        }
    }
}
