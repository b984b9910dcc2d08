//! Simulated robot body
//!
//! Records every actuator call instead of driving hardware.

use super::RobotBody;
use anyhow::{anyhow, Result};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Actuator call recorded by the simulated body
#[derive(Debug, Clone, PartialEq)]
pub enum BodyEvent {
    Steering(f64),
    Power(i32),
    Stop,
    Camera { pan: f64, tilt: f64 },
}

#[derive(Debug)]
struct SimState {
    power: i32,
    steering: f64,
    distance_cm: f64,
    fault: Option<String>,
    events: Vec<BodyEvent>,
}

/// In-memory stand-in for the car hardware
#[derive(Debug)]
pub struct SimulatedBody {
    state: Mutex<SimState>,
}

impl SimulatedBody {
    /// Create a simulated body whose sensor reads the given distance
    pub fn new(distance_cm: f64) -> Self {
        Self {
            state: Mutex::new(SimState {
                power: 0,
                steering: 0.0,
                distance_cm,
                fault: None,
                events: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Change what the distance sensor reports
    pub fn set_distance(&self, distance_cm: f64) {
        self.lock().distance_cm = distance_cm;
    }

    /// Make every subsequent motor call fail
    pub fn set_fault(&self, message: impl Into<String>) {
        self.lock().fault = Some(message.into());
    }

    /// All actuator calls so far
    pub fn events(&self) -> Vec<BodyEvent> {
        self.lock().events.clone()
    }

    /// Current motor power
    pub fn power(&self) -> i32 {
        self.lock().power
    }

    /// Current steering angle
    pub fn steering(&self) -> f64 {
        self.lock().steering
    }

    /// Number of stop calls so far
    pub fn stop_count(&self) -> usize {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, BodyEvent::Stop))
            .count()
    }

    fn record(&self, event: BodyEvent) -> Result<()> {
        let mut state = self.lock();
        if let Some(fault) = &state.fault {
            return Err(anyhow!("Motor fault: {}", fault));
        }

        debug!("[SIM] {:?}", event);
        match &event {
            BodyEvent::Steering(degrees) => state.steering = *degrees,
            BodyEvent::Power(power) => state.power = *power,
            BodyEvent::Stop => state.power = 0,
            BodyEvent::Camera { .. } => {}
        }
        state.events.push(event);
        Ok(())
    }
}

impl RobotBody for SimulatedBody {
    fn set_steering(&self, degrees: f64) -> Result<()> {
        self.record(BodyEvent::Steering(degrees))
    }

    fn set_power(&self, power: i32) -> Result<()> {
        self.record(BodyEvent::Power(power))
    }

    fn stop(&self) -> Result<()> {
        // A stop must go through even when the simulated motors are faulted
        let mut state = self.lock();
        state.power = 0;
        state.events.push(BodyEvent::Stop);
        Ok(())
    }

    fn set_camera(&self, pan_deg: f64, tilt_deg: f64) -> Result<()> {
        self.record(BodyEvent::Camera {
            pan: pan_deg,
            tilt: tilt_deg,
        })
    }

    fn distance_cm(&self) -> Result<f64> {
        Ok(self.lock().distance_cm)
    }
}
