//! Generation lifecycle: spawn every agent, step them together, cull, and
//! hand the results back to the evolutionary driver.

use serde::{Deserialize, Serialize};
use slotmap::{SlotMap, new_key_type};
use tracing::{debug, info};

use crate::agent::Agent;
use crate::config::{ActuationConfig, RunConfig};
use crate::controller::Controller;
use crate::error::Result;
use crate::fitness::{FitnessBreakdown, FitnessWeights};
use crate::liveness::{DeathCause, EliminationBoundary, LivenessPolicy};
use crate::physics::PhysicsWorld;
use crate::rig::{BodyRole, RigBlueprint};
use crate::sensors::SensorFrame;

new_key_type! {
    pub struct AgentId;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Spawning,
    Running,
    Done,
}

/// State that outlives a single generation. Owned by the caller and passed
/// in, so independent simulations never share it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRecord {
    pub best_fitness_ever: f32,
    pub generations_run: usize,
}

impl Default for GenerationRecord {
    fn default() -> Self {
        Self {
            best_fitness_ever: 0.0,
            generations_run: 0,
        }
    }
}

/// Fixed per-generation parameters derived from a [`RunConfig`].
#[derive(Clone, Debug)]
pub struct GenerationSettings {
    pub spawn: [f32; 2],
    pub ground_level: f32,
    pub dt: f32,
    /// Whole ticks a generation may run; it ends on the tick after.
    pub budget_ticks: u64,
    pub sensor_frame: SensorFrame,
    pub policy: LivenessPolicy,
    pub boundary: EliminationBoundary,
    pub actuation: ActuationConfig,
    pub weights: FitnessWeights,
}

impl GenerationSettings {
    pub fn from_config(config: &RunConfig) -> Self {
        let arena = &config.arena;
        Self {
            spawn: arena.spawn,
            ground_level: arena.ground_level(),
            dt: arena.dt(),
            budget_ticks: (config.generation.generation_seconds * arena.tick_hz).floor() as u64,
            sensor_frame: SensorFrame::new(arena, &config.liveness),
            policy: LivenessPolicy::new(arena, &config.liveness),
            boundary: EliminationBoundary::new(arena.spawn[0], &config.boundary, arena.dt()),
            actuation: config.actuation.clone(),
            weights: config.fitness.clone(),
        }
    }
}

struct Slot<C> {
    index: usize,
    agent: Agent,
    controller: C,
}

/// What one frame did.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub tick: u64,
    pub alive: usize,
    pub deaths: Vec<(AgentId, DeathCause)>,
    pub generation_best: Option<f32>,
    pub boundary_x: f32,
    pub phase: Phase,
}

/// Final result for one spawned agent.
#[derive(Debug)]
pub struct AgentOutcome<C> {
    pub id: AgentId,
    pub controller: C,
    pub fitness: f32,
    pub breakdown: FitnessBreakdown,
    pub steps: u64,
    pub max_x: f32,
    pub death: Option<DeathCause>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BodyPose {
    pub p: [f32; 2],
    pub a: f32,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFrame {
    pub index: usize,
    pub fitness: f32,
    pub bodies: Vec<BodyPose>,
}

/// Read-only view of every live agent for inspection.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationFrame {
    pub tick: u64,
    pub time: f32,
    pub boundary_x: f32,
    pub alive: usize,
    pub population: usize,
    pub best_index: Option<usize>,
    pub agents: Vec<AgentFrame>,
}

pub struct Generation<C> {
    phase: Phase,
    settings: GenerationSettings,
    slots: SlotMap<AgentId, Slot<C>>,
    order: Vec<AgentId>,
    live: Vec<AgentId>,
    tick: u64,
    boundary_x: f32,
    best: Option<(AgentId, f32)>,
}

impl<C: Controller> Generation<C> {
    pub fn new(settings: GenerationSettings) -> Self {
        let boundary_x = settings.boundary.initial_x();
        Self {
            phase: Phase::Spawning,
            settings,
            slots: SlotMap::with_key(),
            order: Vec::new(),
            live: Vec::new(),
            tick: 0,
            boundary_x,
            best: None,
        }
    }

    /// Build one agent per controller. An empty population goes straight to
    /// [`Phase::Done`]. A construction error aborts the whole setup.
    pub fn spawn(
        settings: GenerationSettings,
        world: &mut PhysicsWorld,
        blueprint: &RigBlueprint,
        controllers: impl IntoIterator<Item = C>,
    ) -> Result<Self> {
        let mut generation = Self::new(settings);
        let spawn = generation.settings.spawn;
        let response = generation.settings.actuation.motor_response;
        for (index, controller) in controllers.into_iter().enumerate() {
            let agent = match Agent::spawn(world, blueprint, spawn, response) {
                Ok(agent) => agent,
                Err(err) => {
                    generation.release_all(world);
                    return Err(err);
                }
            };
            let id = generation.slots.insert(Slot {
                index,
                agent,
                controller,
            });
            generation.order.push(id);
            generation.live.push(id);
        }
        generation.phase = if generation.live.is_empty() {
            Phase::Done
        } else {
            Phase::Running
        };
        debug!(agents = generation.order.len(), "generation spawned");
        Ok(generation)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn elapsed(&self) -> f32 {
        self.tick as f32 * self.settings.dt
    }

    pub fn boundary_x(&self) -> f32 {
        self.boundary_x
    }

    pub fn population(&self) -> usize {
        self.order.len()
    }

    pub fn alive(&self) -> usize {
        self.live.len()
    }

    pub fn settings(&self) -> &GenerationSettings {
        &self.settings
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.slots.get(id).map(|slot| &slot.agent)
    }

    pub fn controller(&self, id: AgentId) -> Option<&C> {
        self.slots.get(id).map(|slot| &slot.controller)
    }

    /// Agent ids in spawn order.
    pub fn ids(&self) -> &[AgentId] {
        &self.order
    }

    /// Highest-scoring live agent after the most recent frame.
    pub fn best(&self) -> Option<(AgentId, f32)> {
        self.best
    }

    pub fn best_controller(&self) -> Option<&C> {
        self.best.and_then(|(id, _)| self.controller(id))
    }

    /// Run one frame: every live agent senses and acts on the pre-step
    /// state, the world advances once, then every live agent is checked and
    /// scored against the post-step state.
    pub fn step_frame(
        &mut self,
        world: &mut PhysicsWorld,
        record: &mut GenerationRecord,
    ) -> Result<FrameReport> {
        if self.phase != Phase::Running {
            return Ok(self.report(Vec::new()));
        }

        for &id in &self.live {
            let Some(slot) = self.slots.get_mut(id) else {
                continue;
            };
            let Some(inputs) = slot.agent.sense(world, &self.settings.sensor_frame)? else {
                continue;
            };
            let output = slot.controller.decide(&inputs);
            if let Some(issue) = slot.agent.act(world, &output, &self.settings.actuation)? {
                debug!(agent = slot.index, ?issue, "repaired controller output");
            }
        }

        world.step()?;
        self.tick += 1;

        let mut deaths = Vec::new();
        let mut best: Option<(AgentId, f32)> = None;
        for &id in &self.live {
            let Some(slot) = self.slots.get_mut(id) else {
                continue;
            };
            let Some(state) = slot.agent.state(world)? else {
                continue;
            };
            if let Some(cause) =
                slot.agent
                    .check_liveness(&state, &self.settings.policy, self.boundary_x)
            {
                deaths.push((id, cause));
                continue;
            }
            if let Some(fitness) =
                slot.agent
                    .evaluate(&state, self.settings.ground_level, &self.settings.weights)
            {
                slot.controller.report_fitness(fitness);
                if best.is_none_or(|(_, top)| fitness > top) {
                    best = Some((id, fitness));
                }
                if fitness > record.best_fitness_ever {
                    record.best_fitness_ever = fitness;
                }
            }
        }

        for &(id, cause) in &deaths {
            if let Some(slot) = self.slots.get_mut(id) {
                slot.agent.release(world);
                debug!(agent = slot.index, ?cause, fitness = slot.agent.fitness(), "agent eliminated");
            }
        }
        self.live.retain(|id| {
            self.slots
                .get(*id)
                .is_some_and(|slot| slot.agent.is_alive())
        });

        self.boundary_x = self.settings.boundary.position_at(self.tick);
        self.best = best;

        if self.live.is_empty() || self.tick > self.settings.budget_ticks {
            self.phase = Phase::Done;
        }
        Ok(self.report(deaths))
    }

    /// Step until [`Phase::Done`].
    pub fn run(&mut self, world: &mut PhysicsWorld, record: &mut GenerationRecord) -> Result<()> {
        while !self.is_done() {
            self.step_frame(world, record)?;
        }
        Ok(())
    }

    /// Release every remaining rig and return one outcome per spawned agent,
    /// in spawn order. Valid in any phase, so a cancelled generation still
    /// reports the last computed fitness values. Only a generation that
    /// reached [`Phase::Done`] on its own counts as run.
    pub fn finish(
        mut self,
        world: &mut PhysicsWorld,
        record: &mut GenerationRecord,
    ) -> Vec<AgentOutcome<C>> {
        let completed = self.phase == Phase::Done;
        self.release_all(world);
        self.phase = Phase::Done;
        if completed {
            record.generations_run += 1;
        }

        let best = self
            .order
            .iter()
            .filter_map(|id| self.slots.get(*id))
            .map(|slot| slot.agent.fitness())
            .fold(None, |acc: Option<f32>, value| {
                Some(acc.map_or(value, |top| top.max(value)))
            });
        info!(
            generation = record.generations_run,
            agents = self.order.len(),
            ticks = self.tick,
            best = best.unwrap_or(0.0),
            best_ever = record.best_fitness_ever,
            completed,
            "generation finished"
        );

        let mut slots = std::mem::take(&mut self.slots);
        self.order
            .iter()
            .filter_map(|id| {
                let slot = slots.remove(*id)?;
                Some(AgentOutcome {
                    id: *id,
                    fitness: slot.agent.fitness(),
                    breakdown: *slot.agent.breakdown(),
                    steps: slot.agent.steps(),
                    max_x: slot.agent.max_x(),
                    death: slot.agent.death(),
                    controller: slot.controller,
                })
            })
            .collect()
    }

    /// Body transforms of every live agent.
    pub fn snapshot(&self, world: &PhysicsWorld) -> Result<GenerationFrame> {
        let mut agents = Vec::with_capacity(self.live.len());
        for &id in &self.live {
            let Some(slot) = self.slots.get(id) else {
                continue;
            };
            let Some(state) = slot.agent.state(world)? else {
                continue;
            };
            agents.push(AgentFrame {
                index: slot.index,
                fitness: slot.agent.fitness(),
                bodies: BodyRole::ALL
                    .iter()
                    .map(|role| {
                        let part = state.part(*role);
                        BodyPose {
                            p: [part.x, part.y],
                            a: part.angle,
                        }
                    })
                    .collect(),
            });
        }
        Ok(GenerationFrame {
            tick: self.tick,
            time: self.elapsed(),
            boundary_x: self.boundary_x,
            alive: self.live.len(),
            population: self.order.len(),
            best_index: self
                .best
                .and_then(|(id, _)| self.slots.get(id))
                .map(|slot| slot.index),
            agents,
        })
    }

    fn release_all(&mut self, world: &mut PhysicsWorld) {
        for slot in self.slots.values_mut() {
            slot.agent.release(world);
        }
        self.live.clear();
    }

    fn report(&self, deaths: Vec<(AgentId, DeathCause)>) -> FrameReport {
        FrameReport {
            tick: self.tick,
            alive: self.live.len(),
            deaths,
            generation_best: self.best.map(|(_, fitness)| fitness),
            boundary_x: self.boundary_x,
            phase: self.phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SensorVector;

    struct Constant(Vec<f32>);

    impl Controller for Constant {
        fn decide(&mut self, _inputs: &SensorVector) -> Vec<f32> {
            self.0.clone()
        }

        fn report_fitness(&mut self, _fitness: f32) {}
    }

    fn settings() -> GenerationSettings {
        GenerationSettings::from_config(&RunConfig::default())
    }

    fn world() -> PhysicsWorld {
        PhysicsWorld::new(&RunConfig::default().arena)
    }

    #[test]
    fn budget_is_counted_in_whole_ticks() {
        assert_eq!(settings().budget_ticks, 3600);
        let mut config = RunConfig::default();
        config.generation.generation_seconds = 0.5;
        assert_eq!(GenerationSettings::from_config(&config).budget_ticks, 30);
    }

    #[test]
    fn spawn_builds_one_agent_per_controller() {
        let mut world = world();
        let controllers = (0..3).map(|_| Constant(vec![0.0; 6]));
        let generation =
            Generation::spawn(settings(), &mut world, &RigBlueprint::humanoid(), controllers)
                .unwrap();
        assert_eq!(generation.phase(), Phase::Running);
        assert_eq!(generation.population(), 3);
        assert_eq!(generation.alive(), 3);
        assert_eq!(world.dynamic_body_count(), 3 * BodyRole::COUNT);
    }

    #[test]
    fn first_frame_scores_and_records_best() {
        let mut world = world();
        let mut record = GenerationRecord::default();
        let controllers = (0..2).map(|_| Constant(vec![0.0; 6]));
        let mut generation =
            Generation::spawn(settings(), &mut world, &RigBlueprint::humanoid(), controllers)
                .unwrap();
        let report = generation.step_frame(&mut world, &mut record).unwrap();
        assert_eq!(report.tick, 1);
        assert_eq!(report.alive, 2);
        assert!(report.deaths.is_empty());
        let best = report.generation_best.unwrap();
        assert!(best.is_finite());
        assert!(record.best_fitness_ever >= best);
        for id in generation.ids() {
            assert_eq!(generation.agent(*id).unwrap().steps(), 1);
        }
    }

    #[test]
    fn finish_mid_generation_reports_every_agent() {
        let mut world = world();
        let mut record = GenerationRecord::default();
        let controllers = (0..4).map(|_| Constant(vec![0.2; 6]));
        let mut generation =
            Generation::spawn(settings(), &mut world, &RigBlueprint::humanoid(), controllers)
                .unwrap();
        for _ in 0..5 {
            generation.step_frame(&mut world, &mut record).unwrap();
        }
        let ids = generation.ids().to_vec();
        let outcomes = generation.finish(&mut world, &mut record);
        assert_eq!(outcomes.len(), 4);
        assert_eq!(outcomes.iter().map(|o| o.id).collect::<Vec<_>>(), ids);
        assert!(outcomes.iter().all(|o| o.fitness.is_finite()));
        assert_eq!(world.dynamic_body_count(), 0);
        assert_eq!(record.generations_run, 0);
    }

    #[test]
    fn snapshot_lists_live_bodies() {
        let mut world = world();
        let mut record = GenerationRecord::default();
        let mut generation = Generation::spawn(
            settings(),
            &mut world,
            &RigBlueprint::humanoid(),
            [Constant(vec![0.0; 6])],
        )
        .unwrap();
        generation.step_frame(&mut world, &mut record).unwrap();
        let frame = generation.snapshot(&world).unwrap();
        assert_eq!(frame.agents.len(), 1);
        assert_eq!(frame.agents[0].bodies.len(), BodyRole::COUNT);
        assert_eq!(frame.best_index, Some(0));
    }
}
