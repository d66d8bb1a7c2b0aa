//! Shared, read-mostly view of a running evolution.
//!
//! The simulation worker is the only writer of simulation state; it publishes
//! status, history and body frames here. The inspection server reads them and
//! can only flip the pause/stop flags.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::checkpoint::RuntimeSnapshot;
use crate::evolution::GenerationSummary;
use crate::network::{Genome, NetworkDescription};
use crate::population::GenerationFrame;
use crate::rig::RigBlueprint;

const EVENT_CAPACITY: usize = 256;
const FRAME_HISTORY_LIMIT: usize = 120;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionStatus {
    pub generation: usize,
    pub generations_total: usize,
    pub population_size: usize,
    pub alive: usize,
    pub tick: u64,
    pub elapsed_seconds: f32,
    pub boundary_x: f32,
    pub best_fitness_ever: f32,
    pub generation_best: Option<f32>,
    pub paused: bool,
    pub stop_requested: bool,
    pub finished: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status {
        status: EvolutionStatus,
    },
    GenerationStarted {
        generation: usize,
        population: usize,
        part_sizes: Vec<[f32; 2]>,
    },
    Snapshot {
        frame: GenerationFrame,
    },
    GenerationSummary {
        summary: GenerationSummary,
    },
    Error {
        message: String,
    },
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRequest {
    pub action: String,
    pub name: Option<String>,
}

#[derive(Debug, Default)]
struct CommandState {
    paused: bool,
    stop_requested: bool,
}

#[derive(Debug, Default)]
struct SharedState {
    status: EvolutionStatus,
    history: Vec<GenerationSummary>,
    frames: VecDeque<GenerationFrame>,
    best_network: Option<NetworkDescription>,
    best_genome: Option<Genome>,
    blueprint: Option<RigBlueprint>,
    runtime_snapshot: Option<RuntimeSnapshot>,
}

pub struct EvolutionMonitor {
    commands: Mutex<CommandState>,
    shared: Mutex<SharedState>,
    events: broadcast::Sender<StreamEvent>,
}

impl Default for EvolutionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl EvolutionMonitor {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            commands: Mutex::new(CommandState::default()),
            shared: Mutex::new(SharedState::default()),
            events,
        }
    }

    fn commands(&self) -> MutexGuard<'_, CommandState> {
        self.commands.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shared(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    pub fn has_subscribers(&self) -> bool {
        self.events.receiver_count() > 0
    }

    /// `(paused, stop_requested)`
    pub fn command_snapshot(&self) -> (bool, bool) {
        let commands = self.commands();
        (commands.paused, commands.stop_requested)
    }

    /// Pause, resume or stop. Checkpoint requests are served by the caller
    /// from [`EvolutionMonitor::runtime_snapshot`].
    pub fn apply_control(&self, action: &str) -> Result<EvolutionStatus, String> {
        let (paused, stop_requested) = {
            let mut commands = self.commands();
            match action {
                "pause" => commands.paused = true,
                "resume" => commands.paused = false,
                "toggle_pause" => commands.paused = !commands.paused,
                "stop" => commands.stop_requested = true,
                other => return Err(format!("unsupported action '{other}'")),
            }
            (commands.paused, commands.stop_requested)
        };
        Ok(self.update_status(|status| {
            status.paused = paused;
            status.stop_requested = stop_requested;
        }))
    }

    pub fn request_stop(&self) {
        self.commands().stop_requested = true;
    }

    pub fn snapshot_status(&self) -> EvolutionStatus {
        self.shared().status.clone()
    }

    pub fn update_status<F>(&self, mutator: F) -> EvolutionStatus
    where
        F: FnOnce(&mut EvolutionStatus),
    {
        let status = {
            let mut shared = self.shared();
            mutator(&mut shared.status);
            shared.status.clone()
        };
        let _ = self.events.send(StreamEvent::Status {
            status: status.clone(),
        });
        status
    }

    pub fn start_generation(&self, generation: usize, population: usize, part_sizes: Vec<[f32; 2]>) {
        self.shared().frames.clear();
        self.update_status(|status| {
            status.generation = generation;
            status.population_size = population;
            status.alive = population;
            status.tick = 0;
            status.elapsed_seconds = 0.0;
            status.generation_best = None;
        });
        let _ = self.events.send(StreamEvent::GenerationStarted {
            generation,
            population,
            part_sizes,
        });
    }

    pub fn push_snapshot(&self, frame: GenerationFrame) {
        {
            let mut shared = self.shared();
            shared.frames.push_back(frame.clone());
            while shared.frames.len() > FRAME_HISTORY_LIMIT {
                shared.frames.pop_front();
            }
        }
        let _ = self.events.send(StreamEvent::Snapshot { frame });
    }

    pub fn latest_frame(&self) -> Option<GenerationFrame> {
        self.shared().frames.back().cloned()
    }

    pub fn emit_generation_summary(&self, summary: GenerationSummary) {
        {
            let mut shared = self.shared();
            let append = shared
                .history
                .last()
                .is_none_or(|last| summary.generation > last.generation);
            if append {
                shared.history.push(summary.clone());
            }
        }
        let _ = self.events.send(StreamEvent::GenerationSummary { summary });
    }

    pub fn set_history(&self, history: Vec<GenerationSummary>) {
        self.shared().history = history;
    }

    pub fn history(&self) -> Vec<GenerationSummary> {
        self.shared().history.clone()
    }

    pub fn set_best_network(&self, network: NetworkDescription) {
        self.shared().best_network = Some(network);
    }

    pub fn best_network(&self) -> Option<NetworkDescription> {
        self.shared().best_network.clone()
    }

    pub fn set_best_genome(&self, genome: Genome) {
        self.shared().best_genome = Some(genome);
    }

    pub fn best_genome(&self) -> Option<Genome> {
        self.shared().best_genome.clone()
    }

    pub fn set_blueprint(&self, blueprint: RigBlueprint) {
        self.shared().blueprint = Some(blueprint);
    }

    pub fn blueprint(&self) -> Option<RigBlueprint> {
        self.shared().blueprint.clone()
    }

    pub fn update_runtime_snapshot(&self, snapshot: RuntimeSnapshot) {
        self.shared().runtime_snapshot = Some(snapshot);
    }

    pub fn runtime_snapshot(&self) -> Option<RuntimeSnapshot> {
        self.shared().runtime_snapshot.clone()
    }

    pub fn emit_error(&self, message: String) {
        let _ = self.events.send(StreamEvent::Error { message });
    }
}
