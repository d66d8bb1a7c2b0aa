//! Neuroevolution of 2D ragdoll walkers.
//!
//! A generation spawns one humanoid rig per controller into a shared
//! rapier2d world, steps them together at a fixed tick, culls agents that
//! fall, tip over or are overtaken by the advancing elimination boundary,
//! and scores the rest every frame. [`runner::run_evolution`] wraps that in
//! a genetic algorithm over feed-forward network weights.

pub mod actuators;
pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod error;
pub mod evolution;
pub mod fitness;
pub mod liveness;
pub mod monitor;
pub mod network;
pub mod physics;
pub mod population;
pub mod rig;
pub mod runner;
pub mod sensors;
pub mod server;

pub use config::RunConfig;
pub use controller::Controller;
pub use error::{Result, SimError};
pub use physics::PhysicsWorld;
pub use population::{AgentId, AgentOutcome, Generation, GenerationRecord, GenerationSettings, Phase};
pub use rig::{Rig, RigBlueprint};
