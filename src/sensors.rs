//! Body state to controller input.

use std::f32::consts::PI;

use crate::config::{ArenaConfig, LivenessConfig};
use crate::rig::{BodyRole, JointKind, MotorSlot, RigState, Side};

pub const SENSOR_COUNT: usize = 14;

pub type SensorVector = [f32; SENSOR_COUNT];

pub const SENSOR_LABELS: [&str; SENSOR_COUNT] = [
    "TorsoAng",
    "TorsoAngVel",
    "VelX",
    "VelY",
    "Hip0",
    "Knee0",
    "Ankle0",
    "Foot0",
    "Hip1",
    "Knee1",
    "Ankle1",
    "Foot1",
    "HeadY",
    "Distance",
];

const ANGULAR_VELOCITY_SCALE: f32 = 10.0;
const LINEAR_VELOCITY_SCALE: f32 = 100.0;

/// Fixed normalisation constants for one arena.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SensorFrame {
    pub width: f32,
    pub height: f32,
    /// Foot `y` at or past this counts as ground contact.
    pub contact_line: f32,
}

impl SensorFrame {
    pub fn new(arena: &ArenaConfig, liveness: &LivenessConfig) -> Self {
        Self {
            width: arena.width,
            height: arena.height,
            contact_line: arena.ground_level() - liveness.contact_margin,
        }
    }
}

/// Encode one frame of rig state. Order is part of the controller contract.
pub fn encode(state: &RigState, spawn: [f32; 2], frame: &SensorFrame) -> SensorVector {
    let torso = state.torso();
    let mut inputs = [0.0; SENSOR_COUNT];
    inputs[0] = torso.angle / PI;
    inputs[1] = torso.angular_velocity / ANGULAR_VELOCITY_SCALE;
    inputs[2] = torso.vx / LINEAR_VELOCITY_SCALE;
    inputs[3] = torso.vy / LINEAR_VELOCITY_SCALE;

    for (leg, side) in Side::ALL.into_iter().enumerate() {
        let base = 4 + leg * 4;
        for (offset, kind) in [JointKind::Hip, JointKind::Knee, JointKind::Ankle]
            .into_iter()
            .enumerate()
        {
            inputs[base + offset] = state.joint_angle(MotorSlot::new(kind, side)) / PI;
        }
        let foot = state.part(BodyRole::foot(side));
        inputs[base + 3] = if foot.y >= frame.contact_line { 1.0 } else { 0.0 };
    }

    inputs[12] = (state.head().y - spawn[1]) / frame.height;
    inputs[13] = (torso.x - spawn[0]) / frame.width;
    inputs
}
