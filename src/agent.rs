//! One simulated walker: its rig handles plus liveness and score bookkeeping.

use crate::actuators::{self, OutputIssue};
use crate::config::ActuationConfig;
use crate::error::Result;
use crate::fitness::{self, FitnessBreakdown, FitnessWeights};
use crate::liveness::{DeathCause, LivenessPolicy};
use crate::physics::PhysicsWorld;
use crate::rig::{Rig, RigBlueprint, RigState};
use crate::sensors::{self, SensorFrame, SensorVector};

#[derive(Debug)]
pub struct Agent {
    rig: Option<Rig>,
    spawn: [f32; 2],
    alive: bool,
    death: Option<DeathCause>,
    steps: u64,
    fitness: f32,
    breakdown: FitnessBreakdown,
    max_x: f32,
}

impl Agent {
    pub fn spawn(
        world: &mut PhysicsWorld,
        blueprint: &RigBlueprint,
        spawn: [f32; 2],
        motor_response: f32,
    ) -> Result<Self> {
        let rig = Rig::build(world, blueprint, spawn, motor_response)?;
        Ok(Self {
            rig: Some(rig),
            spawn,
            alive: true,
            death: None,
            steps: 0,
            fitness: 0.0,
            breakdown: FitnessBreakdown::default(),
            max_x: spawn[0],
        })
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn death(&self) -> Option<DeathCause> {
        self.death
    }

    /// Alive evaluations so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Last computed fitness. Frozen once the agent dies.
    pub fn fitness(&self) -> f32 {
        self.fitness
    }

    pub fn breakdown(&self) -> &FitnessBreakdown {
        &self.breakdown
    }

    pub fn max_x(&self) -> f32 {
        self.max_x
    }

    pub fn rig(&self) -> Option<&Rig> {
        self.rig.as_ref()
    }

    /// Current physical state, or `None` once dead.
    pub fn state(&self, world: &PhysicsWorld) -> Result<Option<RigState>> {
        match &self.rig {
            Some(rig) if self.alive => rig.read_state(world).map(Some),
            _ => Ok(None),
        }
    }

    pub fn sense(&self, world: &PhysicsWorld, frame: &SensorFrame) -> Result<Option<SensorVector>> {
        Ok(self
            .state(world)?
            .map(|state| sensors::encode(&state, self.spawn, frame)))
    }

    /// Drive the motors from a raw controller decision. Does nothing for a
    /// dead agent. The returned issue describes any repair that was needed.
    pub fn act(
        &self,
        world: &mut PhysicsWorld,
        output: &[f32],
        config: &ActuationConfig,
    ) -> Result<Option<OutputIssue>> {
        let Some(rig) = self.rig.as_ref().filter(|_| self.alive) else {
            return Ok(None);
        };
        let (values, issue) = actuators::sanitize(output);
        actuators::apply(rig, world, &values, config)?;
        Ok(issue)
    }

    /// Apply the liveness policy to `state`. A returned cause has already
    /// killed the agent.
    pub fn check_liveness(
        &mut self,
        state: &RigState,
        policy: &LivenessPolicy,
        boundary_x: f32,
    ) -> Option<DeathCause> {
        if !self.alive {
            return None;
        }
        let cause = policy.check(state, boundary_x)?;
        self.kill(cause);
        Some(cause)
    }

    /// Score the frame and advance the step counter. `None` for a dead agent.
    pub fn evaluate(
        &mut self,
        state: &RigState,
        ground_level: f32,
        weights: &FitnessWeights,
    ) -> Option<f32> {
        if !self.alive {
            return None;
        }
        self.steps += 1;
        self.max_x = self.max_x.max(state.torso().x);
        self.breakdown = fitness::evaluate(state, self.spawn, ground_level, weights, self.steps);
        self.fitness = self.breakdown.total();
        Some(self.fitness)
    }

    /// One-way transition. The first cause sticks.
    pub fn kill(&mut self, cause: DeathCause) {
        if self.alive {
            self.alive = false;
            self.death = Some(cause);
        }
    }

    /// Remove the rig from the world. Later calls return 0.
    pub fn release(&mut self, world: &mut PhysicsWorld) -> usize {
        self.rig.take().map_or(0, |rig| rig.release(world))
    }
}
