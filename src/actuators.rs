//! Controller output to joint motors.

use crate::config::ActuationConfig;
use crate::error::{Result, SimError};
use crate::physics::PhysicsWorld;
use crate::rig::{MotorSlot, Rig};

pub const ACTUATOR_COUNT: usize = MotorSlot::COUNT;

pub type ActuatorVector = [f32; ACTUATOR_COUNT];

pub const ACTUATOR_LABELS: [&str; ACTUATOR_COUNT] =
    ["Hip0", "Knee0", "Ankle0", "Hip1", "Knee1", "Ankle1"];

/// What had to be repaired in a controller's output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputIssue {
    WrongLength { len: usize },
    NonFinite { count: usize },
}

/// Coerce a raw decision into `[-1, 1]^6`.
///
/// A vector of the wrong length becomes a neutral all-zero action; non-finite
/// entries become zero; everything else is clamped.
pub fn sanitize(output: &[f32]) -> (ActuatorVector, Option<OutputIssue>) {
    if output.len() != ACTUATOR_COUNT {
        return (
            [0.0; ACTUATOR_COUNT],
            Some(OutputIssue::WrongLength { len: output.len() }),
        );
    }
    let mut values = [0.0; ACTUATOR_COUNT];
    let mut non_finite = 0usize;
    for (value, raw) in values.iter_mut().zip(output) {
        if raw.is_finite() {
            *value = raw.clamp(-1.0, 1.0);
        } else {
            non_finite += 1;
        }
    }
    let issue = (non_finite > 0).then_some(OutputIssue::NonFinite { count: non_finite });
    (values, issue)
}

/// Set each motor's target rate to `-value * motor_speed`, in slot order.
/// Returns the rates written.
///
/// A positive command drives the child's angular velocity relative to its
/// parent toward `-motor_speed`, the same sense as a pymunk `SimpleMotor`
/// with that rate.
pub fn apply(
    rig: &Rig,
    world: &mut PhysicsWorld,
    values: &ActuatorVector,
    config: &ActuationConfig,
) -> Result<ActuatorVector> {
    let mut rates = [0.0; ACTUATOR_COUNT];
    for slot in MotorSlot::ALL {
        let rate = -values[slot.index()] * config.motor_speed;
        if !world.set_motor_rate(rig.motor(slot), rate, config.motor_response) {
            return Err(SimError::MissingJoint(slot));
        }
        rates[slot.index()] = rate;
    }
    Ok(rates)
}
