//! Termination rules and the advancing elimination boundary.

use serde::{Deserialize, Serialize};

use crate::config::{ArenaConfig, BoundaryConfig, LivenessConfig};
use crate::rig::RigState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeathCause {
    /// Head or torso reached the ground line.
    Fell,
    /// Torso tilted past the upright limit.
    Tipped,
    /// Torso fell behind the elimination boundary.
    LeftBehind,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LivenessPolicy {
    fall_line: f32,
    max_tilt: f32,
    boundary_margin: f32,
}

impl LivenessPolicy {
    pub fn new(arena: &ArenaConfig, liveness: &LivenessConfig) -> Self {
        Self {
            fall_line: arena.ground_level() + liveness.fall_margin,
            max_tilt: liveness.max_tilt,
            boundary_margin: liveness.boundary_margin,
        }
    }

    /// `None` while the agent is still viable. Any returned cause is terminal.
    pub fn check(&self, state: &RigState, boundary_x: f32) -> Option<DeathCause> {
        let torso = state.torso();
        // Screen space: larger y is closer to the ground.
        if state.head().y >= self.fall_line || torso.y >= self.fall_line {
            return Some(DeathCause::Fell);
        }
        if torso.angle.abs() > self.max_tilt {
            return Some(DeathCause::Tipped);
        }
        if torso.x < boundary_x - self.boundary_margin {
            return Some(DeathCause::LeftBehind);
        }
        None
    }
}

/// Horizontal kill line that moves right at a constant speed from the start
/// of a generation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EliminationBoundary {
    initial_x: f32,
    speed: f32,
    dt: f32,
}

impl EliminationBoundary {
    pub fn new(spawn_x: f32, config: &BoundaryConfig, dt: f32) -> Self {
        Self {
            initial_x: spawn_x - config.start_offset,
            speed: config.speed,
            dt,
        }
    }

    pub fn initial_x(&self) -> f32 {
        self.initial_x
    }

    /// Position after `tick` completed frames. Computed from the tick count,
    /// never accumulated.
    pub fn position_at(&self, tick: u64) -> f32 {
        self.initial_x + self.speed * tick as f32 * self.dt
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;

    use super::*;
    use crate::rig::BodyRole;

    fn policy() -> LivenessPolicy {
        LivenessPolicy::new(&ArenaConfig::default(), &LivenessConfig::default())
    }

    fn upright() -> RigState {
        let mut state = RigState::default();
        state.part_mut(BodyRole::Torso).x = 150.0;
        state.part_mut(BodyRole::Torso).y = 750.0;
        state.part_mut(BodyRole::Head).x = 150.0;
        state.part_mut(BodyRole::Head).y = 690.0;
        state
    }

    #[test]
    fn upright_agent_inside_boundary_lives() {
        assert_eq!(policy().check(&upright(), 0.0), None);
    }

    #[test]
    fn torso_at_ground_line_falls() {
        let mut state = upright();
        state.part_mut(BodyRole::Torso).y = 885.0;
        assert_eq!(policy().check(&state, 0.0), Some(DeathCause::Fell));
    }

    #[test]
    fn head_at_ground_line_falls() {
        let mut state = upright();
        state.part_mut(BodyRole::Head).y = 886.0;
        assert_eq!(policy().check(&state, 0.0), Some(DeathCause::Fell));
        state.part_mut(BodyRole::Head).y = 884.9;
        assert_eq!(policy().check(&state, 0.0), None);
    }

    #[test]
    fn tilt_beyond_quarter_turn_is_terminal() {
        let mut state = upright();
        state.part_mut(BodyRole::Torso).angle = PI / 2.0 + 1e-3;
        assert_eq!(policy().check(&state, 0.0), Some(DeathCause::Tipped));
        state.part_mut(BodyRole::Torso).angle = -(PI / 2.0 + 1e-3);
        assert_eq!(policy().check(&state, 0.0), Some(DeathCause::Tipped));
        state.part_mut(BodyRole::Torso).angle = PI / 2.0 - 1e-3;
        assert_eq!(policy().check(&state, 0.0), None);
    }

    #[test]
    fn boundary_margin_gives_a_little_slack() {
        let state = upright();
        assert_eq!(policy().check(&state, 160.0), None);
        assert_eq!(policy().check(&state, 165.0), None);
        assert_eq!(policy().check(&state, 165.5), Some(DeathCause::LeftBehind));
    }

    #[test]
    fn boundary_position_is_linear_in_ticks() {
        let boundary = EliminationBoundary::new(150.0, &BoundaryConfig::default(), 1.0 / 60.0);
        assert_eq!(boundary.initial_x(), 0.0);
        assert_eq!(boundary.position_at(0), 0.0);
        assert!((boundary.position_at(60) - 5.0).abs() < 1e-5);
        assert!((boundary.position_at(600) - 50.0).abs() < 1e-4);
    }
}
