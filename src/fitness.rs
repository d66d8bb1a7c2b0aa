//! Multi-term locomotion score.
//!
//! The score is recomputed from scratch every frame. Only the survival term
//! depends on history, through the step counter the caller passes in.

use std::f32::consts::PI;

use serde::{Deserialize, Serialize};

use crate::rig::{BodyRole, JointKind, MotorSlot, RigState, Side};

/// Term weights and shaping thresholds. Defaults are the reference policy.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FitnessWeights {
    pub progress: f32,
    pub velocity: f32,
    pub upright: f32,
    pub head_height: f32,
    pub stability: f32,
    pub leg_activity: f32,
    pub feet: f32,
    pub torso_ground: f32,
    pub head_ground: f32,
    pub leg_spread: f32,
    /// Per-step survival credit. Grows without bound while the agent lives.
    pub survival: f32,

    pub velocity_scale: f32,
    pub upright_range: f32,
    /// Target head height above the spawn point.
    pub head_target_offset: f32,
    pub head_range: f32,
    pub stability_scale: f32,
    pub activity_scale: f32,
    pub foot_range: f32,
    pub ground_range: f32,
    pub spread_threshold: f32,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            progress: 0.1,
            velocity: 2.0,
            upright: 25.0,
            head_height: 39.0,
            stability: 10.0,
            leg_activity: 8.0,
            feet: 10.0,
            torso_ground: 35.0,
            head_ground: 45.0,
            leg_spread: 50.0,
            survival: 0.01,
            velocity_scale: 50.0,
            upright_range: PI / 3.0,
            head_target_offset: 110.0,
            head_range: 100.0,
            stability_scale: 10.0,
            activity_scale: 10.0,
            foot_range: PI / 2.0,
            ground_range: 120.0,
            spread_threshold: 30.0,
        }
    }
}

/// Weighted contribution of every term. Penalties are stored as positive
/// magnitudes and subtracted in [`FitnessBreakdown::total`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitnessBreakdown {
    pub progress: f32,
    pub velocity: f32,
    pub upright: f32,
    pub head_height: f32,
    pub stability: f32,
    pub leg_activity: f32,
    pub feet: f32,
    pub torso_ground_penalty: f32,
    pub head_ground_penalty: f32,
    pub leg_spread_penalty: f32,
    pub survival: f32,
}

impl FitnessBreakdown {
    pub fn total(&self) -> f32 {
        self.progress
            + self.velocity
            + self.upright
            + self.head_height
            + self.stability
            + self.leg_activity
            + self.feet
            - self.torso_ground_penalty
            - self.head_ground_penalty
            - self.leg_spread_penalty
            + self.survival
    }

    pub fn ground_penalty(&self) -> f32 {
        self.torso_ground_penalty + self.head_ground_penalty
    }
}

/// Score one frame. `steps` is the number of alive evaluations so far,
/// including this one.
pub fn evaluate(
    state: &RigState,
    spawn: [f32; 2],
    ground_level: f32,
    weights: &FitnessWeights,
    steps: u64,
) -> FitnessBreakdown {
    let torso = state.torso();
    let head = state.head();

    let upright = ((weights.upright_range - torso.angle.abs()) / weights.upright_range).max(0.0);
    let target_head_y = spawn[1] - weights.head_target_offset;
    let head_height = (1.0 - (head.y - target_head_y).abs() / weights.head_range).max(0.0);
    let stability = (1.0 - torso.angular_velocity.abs() / weights.stability_scale).max(0.0);

    let activity: f32 = state.motor_rates.iter().map(|rate| rate.abs()).sum();
    let activity = (activity / weights.activity_scale).min(1.0);

    let feet = Side::ALL
        .into_iter()
        .map(|side| {
            let ankle = state.joint_angle(MotorSlot::new(JointKind::Ankle, side));
            (1.0 - ankle.abs() / weights.foot_range).max(0.0)
        })
        .sum::<f32>()
        / Side::ALL.len() as f32;

    let proximity = |y: f32| (1.0 - (ground_level - y) / weights.ground_range).max(0.0);

    let spread = (state.part(BodyRole::UpperLegLeft).x - state.part(BodyRole::UpperLegRight).x)
        .abs();
    let excess_spread = (spread - weights.spread_threshold).max(0.0);

    FitnessBreakdown {
        progress: (torso.x - spawn[0]) * weights.progress,
        velocity: (torso.vx / weights.velocity_scale).max(0.0) * weights.velocity,
        upright: upright * weights.upright,
        head_height: head_height * weights.head_height,
        stability: stability * weights.stability,
        leg_activity: activity * weights.leg_activity,
        feet: feet * weights.feet,
        torso_ground_penalty: proximity(torso.y) * weights.torso_ground,
        head_ground_penalty: proximity(head.y) * weights.head_ground,
        leg_spread_penalty: excess_spread * weights.leg_spread,
        survival: steps as f32 * weights.survival,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPAWN: [f32; 2] = [150.0, 800.0];
    const GROUND: f32 = 900.0;

    fn standing() -> RigState {
        let mut state = RigState::default();
        let parts = [
            (BodyRole::Torso, 0.0, 750.0),
            (BodyRole::Head, 0.0, 690.0),
            (BodyRole::UpperLegLeft, -15.0, 795.0),
            (BodyRole::LowerLegLeft, -15.0, 845.0),
            (BodyRole::FootLeft, -15.0, 875.0),
            (BodyRole::UpperLegRight, 15.0, 795.0),
            (BodyRole::LowerLegRight, 15.0, 845.0),
            (BodyRole::FootRight, 15.0, 875.0),
        ];
        for (role, dx, y) in parts {
            let part = state.part_mut(role);
            part.x = SPAWN[0] + dx;
            part.y = y;
        }
        state
    }

    #[test]
    fn standing_pose_scores_reference_terms() {
        let breakdown = evaluate(&standing(), SPAWN, GROUND, &FitnessWeights::default(), 1);
        assert_eq!(breakdown.progress, 0.0);
        assert_eq!(breakdown.velocity, 0.0);
        assert!((breakdown.upright - 25.0).abs() < 1e-4);
        assert!((breakdown.head_height - 39.0).abs() < 1e-4);
        assert!((breakdown.stability - 10.0).abs() < 1e-4);
        assert_eq!(breakdown.leg_activity, 0.0);
        assert!((breakdown.feet - 10.0).abs() < 1e-4);
        assert_eq!(breakdown.ground_penalty(), 0.0);
        assert_eq!(breakdown.leg_spread_penalty, 0.0);
        assert!((breakdown.survival - 0.01).abs() < 1e-6);
        assert!((breakdown.total() - 84.01).abs() < 1e-3);
    }

    #[test]
    fn evaluation_is_a_pure_function() {
        let mut state = standing();
        state.part_mut(BodyRole::Torso).vx = 37.0;
        state.part_mut(BodyRole::Torso).angle = 0.3;
        state.motor_rates = [1.0, -2.0, 0.5, 0.0, 3.0, -1.0];
        let weights = FitnessWeights::default();
        let a = evaluate(&state, SPAWN, GROUND, &weights, 42);
        let b = evaluate(&state, SPAWN, GROUND, &weights, 42);
        assert_eq!(a, b);
        assert_eq!(a.total().to_bits(), b.total().to_bits());
    }

    #[test]
    fn survival_term_never_decreases_with_steps() {
        let state = standing();
        let weights = FitnessWeights::default();
        let mut previous = f32::NEG_INFINITY;
        for steps in 1..500 {
            let survival = evaluate(&state, SPAWN, GROUND, &weights, steps).survival;
            assert!(survival > previous);
            previous = survival;
        }
    }

    #[test]
    fn collapsed_rig_is_dominated_by_ground_penalties() {
        let mut state = standing();
        state.part_mut(BodyRole::Torso).y = 888.0;
        state.part_mut(BodyRole::Torso).angle = PI / 2.0;
        state.part_mut(BodyRole::Head).y = 890.0;
        state.part_mut(BodyRole::Head).x = SPAWN[0] - 60.0;

        let breakdown = evaluate(&state, SPAWN, GROUND, &FitnessWeights::default(), 30);
        assert!(breakdown.torso_ground_penalty > 30.0);
        assert!(breakdown.head_ground_penalty > 40.0);
        assert_eq!(breakdown.upright, 0.0);
        assert_eq!(breakdown.head_height, 0.0);
        assert!(breakdown.total() < 0.0);
    }

    #[test]
    fn leg_spread_beyond_threshold_is_penalised() {
        let mut state = standing();
        state.part_mut(BodyRole::UpperLegLeft).x = SPAWN[0] - 20.0;
        state.part_mut(BodyRole::UpperLegRight).x = SPAWN[0] + 20.0;
        let breakdown = evaluate(&state, SPAWN, GROUND, &FitnessWeights::default(), 1);
        assert!((breakdown.leg_spread_penalty - 500.0).abs() < 1e-3);
    }

    #[test]
    fn leg_activity_is_capped() {
        let mut state = standing();
        state.motor_rates = [4.0, -4.0, 4.0, -4.0, 4.0, -4.0];
        let breakdown = evaluate(&state, SPAWN, GROUND, &FitnessWeights::default(), 1);
        assert!((breakdown.leg_activity - 8.0).abs() < 1e-5);
    }

    #[test]
    fn backward_velocity_earns_nothing() {
        let mut state = standing();
        state.part_mut(BodyRole::Torso).vx = -80.0;
        let breakdown = evaluate(&state, SPAWN, GROUND, &FitnessWeights::default(), 1);
        assert_eq!(breakdown.velocity, 0.0);
    }

    #[test]
    fn weights_deserialize_with_defaults() {
        let weights: FitnessWeights = serde_json::from_str(r#"{"survival": 0.0}"#).unwrap();
        assert_eq!(weights.survival, 0.0);
        assert_eq!(weights.upright, 25.0);
    }
}
