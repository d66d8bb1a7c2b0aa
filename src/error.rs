use thiserror::Error;

use crate::rig::{BodyRole, MotorSlot};

/// Errors surfaced by the simulation core.
///
/// Construction and physics failures abort the generation; malformed
/// controller output never reaches this type because the actuator mapper
/// recovers from it locally.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid spawn position ({x}, {y})")]
    InvalidSpawn { x: f32, y: f32 },
    #[error("{0:?} body missing from physics world")]
    MissingBody(BodyRole),
    #[error("{0:?} motor joint missing from physics world")]
    MissingJoint(MotorSlot),
    #[error("neck joint missing from physics world")]
    MissingNeck,
    #[error("physics diverged at tick {tick}: non-finite body state")]
    PhysicsDiverged { tick: u64 },
    #[error("invalid rig blueprint: {0}")]
    Blueprint(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
