//! The evolution loop driven by the worker thread: spawn a generation of
//! network-controlled walkers, simulate it to completion, breed, repeat.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::checkpoint::{CheckpointStore, RuntimeSnapshot};
use crate::config::RunConfig;
use crate::error::Result;
use crate::evolution::{Candidate, Evolver, GenerationSummary};
use crate::monitor::EvolutionMonitor;
use crate::network::{FeedForwardNetwork, Genome};
use crate::physics::PhysicsWorld;
use crate::population::{Generation, GenerationRecord, GenerationSettings};
use crate::rig::{Rig, RigBlueprint};

const PAUSE_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Debug)]
pub struct RunOutcome {
    pub generations_run: usize,
    pub best_fitness_ever: f32,
    pub best_genome: Option<(Genome, f32)>,
    pub history: Vec<GenerationSummary>,
    pub stopped: bool,
}

pub fn run_evolution(
    config: &RunConfig,
    monitor: &EvolutionMonitor,
    store: &CheckpointStore,
    resume: Option<RuntimeSnapshot>,
) -> Result<RunOutcome> {
    config.validate()?;
    let population_size = config.generation.population_size;
    let settings = GenerationSettings::from_config(config);
    let mut evolver = Evolver::new(config.controller.clone(), config.generation.seed);

    let (blueprint, mut genomes, mut record, mut history) = match resume {
        Some(snapshot) => {
            info!(
                generation = snapshot.generation,
                best_fitness_ever = snapshot.best_fitness_ever,
                "resuming from checkpoint"
            );
            let best = snapshot.best_genome.clone().zip(snapshot.best_genome_fitness);
            evolver.restore(snapshot.generation, best);
            let record = GenerationRecord {
                best_fitness_ever: snapshot.best_fitness_ever,
                generations_run: snapshot.generation,
            };
            let mut genomes = snapshot.genomes;
            genomes.truncate(population_size);
            let missing = population_size - genomes.len();
            genomes.extend(evolver.initial_population(missing));
            (snapshot.blueprint, genomes, record, snapshot.history)
        }
        None => (
            RigBlueprint::humanoid(),
            evolver.initial_population(population_size),
            GenerationRecord::default(),
            Vec::new(),
        ),
    };
    blueprint.validate()?;
    monitor.set_blueprint(blueprint.clone());
    monitor.set_history(history.clone());
    monitor.update_status(|status| {
        status.generations_total = config.generation.generations;
        status.best_fitness_ever = record.best_fitness_ever;
        status.finished = false;
    });

    let mut stopped = false;
    while evolver.generation() < config.generation.generations {
        if wait_while_paused(monitor) {
            stopped = true;
            break;
        }
        let generation_index = evolver.generation();
        let mut world = PhysicsWorld::new(&config.arena);
        let networks = genomes
            .drain(..)
            .map(FeedForwardNetwork::new)
            .collect::<Result<Vec<_>>>()?;
        let mut generation = Generation::spawn(settings.clone(), &mut world, &blueprint, networks)?;

        let part_sizes = generation
            .ids()
            .first()
            .and_then(|id| generation.agent(*id))
            .and_then(|agent| agent.rig())
            .map(Rig::part_extents)
            .map(|extents| extents.to_vec())
            .unwrap_or_default();
        monitor.start_generation(generation_index, generation.population(), part_sizes);

        let frame_budget = Duration::from_secs_f32(settings.dt);
        while !generation.is_done() {
            if wait_while_paused(monitor) {
                stopped = true;
                break;
            }
            let frame_started = Instant::now();
            let report = generation.step_frame(&mut world, &mut record)?;

            let snapshot_every = config.server.snapshot_every.max(1);
            if report.tick % snapshot_every == 0 || generation.is_done() {
                if monitor.has_subscribers() {
                    monitor.push_snapshot(generation.snapshot(&world)?);
                }
                if let Some(best) = generation.best_controller() {
                    monitor.set_best_network(best.describe());
                }
                monitor.update_status(|status| {
                    status.alive = report.alive;
                    status.tick = report.tick;
                    status.elapsed_seconds = generation.elapsed();
                    status.boundary_x = report.boundary_x;
                    status.generation_best = report.generation_best;
                    status.best_fitness_ever = record.best_fitness_ever;
                });
            }

            if config.generation.realtime {
                let spent = frame_started.elapsed();
                if spent < frame_budget {
                    thread::sleep(frame_budget - spent);
                }
            }
        }

        let ticks = generation.tick();
        let outcomes = generation.finish(&mut world, &mut record);
        if stopped {
            info!(
                generation = generation_index,
                ticks,
                "generation interrupted, discarding partial results"
            );
            break;
        }
        let candidates: Vec<Candidate> = outcomes.into_iter().map(Candidate::from_outcome).collect();
        let summary = GenerationSummary::build(
            generation_index,
            &candidates,
            record.best_fitness_ever,
            settings.spawn[0],
            ticks,
        );
        info!(
            generation = summary.generation,
            best_fitness_ever = summary.best_fitness_ever,
            generation_best = summary.best_fitness,
            mean = summary.mean_fitness,
            survivors = summary.survivors,
            population = summary.population,
            "generation complete"
        );
        history.push(summary.clone());
        monitor.emit_generation_summary(summary);

        genomes = evolver.breed(&candidates, population_size);
        if let Some((best, _)) = evolver.best() {
            monitor.set_best_genome(best.clone());
        }
        let snapshot = runtime_snapshot(&evolver, &record, &genomes, &history, &blueprint);
        monitor.update_runtime_snapshot(snapshot.clone());
        autosave_if_due(config, store, &snapshot);
    }

    let best = evolver.best().map(|(genome, fitness)| (genome.clone(), fitness));
    if let Some((_, fitness)) = &best {
        info!(
            generations = record.generations_run,
            best_fitness = fitness,
            "evolution finished"
        );
    }
    monitor.update_status(|status| {
        status.finished = true;
        status.best_fitness_ever = record.best_fitness_ever;
    });

    Ok(RunOutcome {
        generations_run: record.generations_run,
        best_fitness_ever: record.best_fitness_ever,
        best_genome: best,
        history,
        stopped,
    })
}

fn runtime_snapshot(
    evolver: &Evolver,
    record: &GenerationRecord,
    genomes: &[Genome],
    history: &[GenerationSummary],
    blueprint: &RigBlueprint,
) -> RuntimeSnapshot {
    RuntimeSnapshot {
        generation: evolver.generation(),
        best_fitness_ever: record.best_fitness_ever,
        genomes: genomes.to_vec(),
        best_genome: evolver.best().map(|(genome, _)| genome.clone()),
        best_genome_fitness: evolver.best().map(|(_, fitness)| fitness),
        history: history.to_vec(),
        blueprint: blueprint.clone(),
    }
}

fn autosave_if_due(config: &RunConfig, store: &CheckpointStore, snapshot: &RuntimeSnapshot) {
    let every = config.checkpoint.autosave_every;
    if every == 0 || snapshot.generation == 0 || snapshot.generation % every != 0 {
        return;
    }
    match store.save(snapshot, Some("autosave")) {
        Ok(saved) => info!(id = %saved.id, generation = snapshot.generation, "autosaved checkpoint"),
        Err(err) => warn!("autosave checkpoint failed: {err}"),
    }
}

/// Block while paused. Returns `true` once a stop has been requested.
fn wait_while_paused(monitor: &EvolutionMonitor) -> bool {
    loop {
        let (paused, stop_requested) = monitor.command_snapshot();
        if stop_requested {
            return true;
        }
        if !paused {
            return false;
        }
        thread::sleep(PAUSE_POLL);
    }
}
