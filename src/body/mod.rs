//! Robot body collaborators
//!
//! Narrow interfaces to the hardware the command handlers drive:
//! - Wheels, steering and camera mount (`RobotBody`)
//! - Front distance sensor (`RobotBody::distance_cm`)
//! - Speech output (`TextPlayer`)
//!
//! Concrete drivers live outside this crate; the simulated body and console
//! player here back the demo binary and the tests.

mod sim;
mod speech;

pub use sim::{BodyEvent, SimulatedBody};
pub use speech::{ConsolePlayer, TextPlayer};

use anyhow::Result;

/// Wheels, steering, camera and distance sensor of the car
///
/// Calls are short register writes/reads and must not block for long; timed
/// motion is the handlers' job.
pub trait RobotBody: Send + Sync {
    /// Set the steering servo angle (negative = left)
    fn set_steering(&self, degrees: f64) -> Result<()>;

    /// Drive both rear wheels (negative = backward, 0-100 magnitude)
    fn set_power(&self, power: i32) -> Result<()>;

    /// Stop both motors immediately
    fn stop(&self) -> Result<()>;

    /// Point the camera mount (pan negative = left, tilt negative = down)
    fn set_camera(&self, pan_deg: f64, tilt_deg: f64) -> Result<()>;

    /// Front ultrasonic reading; non-positive means no echo
    fn distance_cm(&self) -> Result<f64>;
}
