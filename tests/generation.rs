use std::cell::Cell;
use std::rc::Rc;
use std::thread;

use tokio::sync::broadcast::error::RecvError;

use walker_evolution::checkpoint::CheckpointStore;
use walker_evolution::liveness::DeathCause;
use walker_evolution::monitor::{EvolutionMonitor, StreamEvent};
use walker_evolution::rig::BodyRole;
use walker_evolution::runner::run_evolution;
use walker_evolution::sensors::SensorVector;
use walker_evolution::{
    Controller, Generation, GenerationRecord, GenerationSettings, Phase, PhysicsWorld, RigBlueprint,
    RunConfig,
};

/// Replays a fixed decision and counts how often it was asked.
struct Scripted {
    output: Vec<f32>,
    decisions: Rc<Cell<usize>>,
    last_fitness: Option<f32>,
}

impl Scripted {
    fn new(output: Vec<f32>) -> Self {
        Self {
            output,
            decisions: Rc::new(Cell::new(0)),
            last_fitness: None,
        }
    }
}

impl Controller for Scripted {
    fn decide(&mut self, _inputs: &SensorVector) -> Vec<f32> {
        self.decisions.set(self.decisions.get() + 1);
        self.output.clone()
    }

    fn report_fitness(&mut self, fitness: f32) {
        self.last_fitness = Some(fitness);
    }
}

fn spawn(
    config: &RunConfig,
    world: &mut PhysicsWorld,
    controllers: Vec<Scripted>,
) -> Generation<Scripted> {
    Generation::spawn(
        GenerationSettings::from_config(config),
        world,
        &RigBlueprint::humanoid(),
        controllers,
    )
    .unwrap()
}

#[test]
fn empty_population_is_done_immediately() {
    let config = RunConfig::default();
    let mut world = PhysicsWorld::new(&config.arena);
    let mut record = GenerationRecord::default();
    let mut generation = spawn(&config, &mut world, Vec::new());
    assert_eq!(generation.phase(), Phase::Done);

    let report = generation.step_frame(&mut world, &mut record).unwrap();
    assert_eq!(report.tick, 0);
    assert_eq!(world.tick(), 0);

    let outcomes = generation.finish(&mut world, &mut record);
    assert!(outcomes.is_empty());
    assert_eq!(record.best_fitness_ever, 0.0);
    assert_eq!(record.generations_run, 1);
}

#[test]
fn boundary_follows_tick_count_exactly() {
    let config = RunConfig::default();
    let mut world = PhysicsWorld::new(&config.arena);
    let mut record = GenerationRecord::default();
    let mut generation = spawn(&config, &mut world, vec![Scripted::new(vec![0.0; 6])]);

    let initial = config.arena.spawn[0] - config.boundary.start_offset;
    assert_eq!(generation.boundary_x(), initial);
    let dt = config.arena.dt();
    for tick in 1..=30u64 {
        let report = generation.step_frame(&mut world, &mut record).unwrap();
        assert_eq!(report.tick, tick);
        let expected = initial + config.boundary.speed * tick as f32 * dt;
        assert_eq!(report.boundary_x, expected);
        if generation.is_done() {
            break;
        }
    }
}

#[test]
fn idle_walker_collapses_and_scores_negative() {
    let config = RunConfig::default();
    let mut world = PhysicsWorld::new(&config.arena);
    let mut record = GenerationRecord::default();
    let mut generation = spawn(&config, &mut world, vec![Scripted::new(vec![0.0; 6])]);
    generation.run(&mut world, &mut record).unwrap();

    // Collapse happens within a few seconds, long before the boundary matters.
    assert!(generation.tick() < 300, "ended at tick {}", generation.tick());
    let outcomes = generation.finish(&mut world, &mut record);
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert!(
        matches!(outcome.death, Some(DeathCause::Fell | DeathCause::Tipped)),
        "died of {:?}",
        outcome.death
    );

    let terms = &outcome.breakdown;
    let rewards = terms.upright
        + terms.head_height
        + terms.stability
        + terms.feet
        + terms.leg_activity
        + terms.velocity
        + terms.survival;
    assert!(
        terms.ground_penalty() > rewards,
        "ground penalty {} vs rewards {rewards}",
        terms.ground_penalty()
    );
    assert!(outcome.fitness < 0.0);
    assert_eq!(outcome.fitness, terms.total());
    assert_eq!(world.dynamic_body_count(), 0);
    assert_eq!(record.generations_run, 1);
}

#[test]
fn generation_ends_on_the_tick_after_its_budget() {
    let mut config = RunConfig::default();
    config.generation.generation_seconds = 0.5;
    let mut world = PhysicsWorld::new(&config.arena);
    let mut record = GenerationRecord::default();
    let mut generation = spawn(&config, &mut world, vec![Scripted::new(vec![0.0; 6])]);
    generation.run(&mut world, &mut record).unwrap();

    assert_eq!(generation.phase(), Phase::Done);
    assert_eq!(generation.tick(), 31);
    assert_eq!(generation.alive(), 1);
    let outcomes = generation.finish(&mut world, &mut record);
    assert_eq!(outcomes[0].death, None);
    assert_eq!(outcomes[0].steps, 31);
    assert_eq!(record.generations_run, 1);
}

#[test]
fn dead_agent_is_never_asked_again() {
    let mut config = RunConfig::default();
    // Boundary starts ahead of the spawn point.
    config.boundary.start_offset = -100.0;
    let mut world = PhysicsWorld::new(&config.arena);
    let mut record = GenerationRecord::default();
    let controller = Scripted::new(vec![0.5; 6]);
    let decisions = Rc::clone(&controller.decisions);
    let mut generation = spawn(&config, &mut world, vec![controller]);
    let id = generation.ids()[0];

    let report = generation.step_frame(&mut world, &mut record).unwrap();
    assert_eq!(report.deaths, vec![(id, DeathCause::LeftBehind)]);
    assert_eq!(report.phase, Phase::Done);
    assert_eq!(decisions.get(), 1);
    assert_eq!(world.dynamic_body_count(), 0);

    for _ in 0..5 {
        generation.step_frame(&mut world, &mut record).unwrap();
    }
    assert_eq!(decisions.get(), 1);
    let agent = generation.agent(id).unwrap();
    assert!(!agent.is_alive());
    assert_eq!(agent.steps(), 0);
    assert_eq!(agent.fitness(), 0.0);
    assert!(agent.state(&world).unwrap().is_none());
    assert!(generation.controller(id).unwrap().last_fitness.is_none());
}

#[test]
fn malformed_controller_output_does_not_stop_the_loop() {
    let config = RunConfig::default();
    let mut world = PhysicsWorld::new(&config.arena);
    let mut record = GenerationRecord::default();
    let controllers = vec![
        Scripted::new(vec![1.0; 3]),
        Scripted::new(vec![f32::NAN, 0.5, f32::INFINITY, -0.5, 0.0, 2.0]),
        Scripted::new(Vec::new()),
    ];
    let mut generation = spawn(&config, &mut world, controllers);
    for _ in 0..10 {
        generation.step_frame(&mut world, &mut record).unwrap();
    }
    assert_eq!(generation.tick(), 10);
    for id in generation.ids() {
        let controller = generation.controller(*id).unwrap();
        if let Some(fitness) = controller.last_fitness {
            assert!(fitness.is_finite());
        }
        let agent = generation.agent(*id).unwrap();
        if let Some(state) = agent.state(&world).unwrap() {
            assert!(BodyRole::ALL.iter().all(|role| state.part(*role).x.is_finite()));
        }
    }
}

#[test]
fn short_evolution_run_records_history_and_checkpoints() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RunConfig::default();
    config.generation.population_size = 3;
    config.generation.generations = 2;
    config.generation.generation_seconds = 0.5;
    config.generation.seed = Some(42);
    config.checkpoint.autosave_every = 1;
    config.server.enabled = false;
    let store = CheckpointStore::new(dir.path());
    let monitor = EvolutionMonitor::new();

    let outcome = run_evolution(&config, &monitor, &store, None).unwrap();
    assert_eq!(outcome.generations_run, 2);
    assert_eq!(outcome.history.len(), 2);
    assert!(!outcome.stopped);
    assert!(outcome.best_genome.is_some());
    assert!(monitor.snapshot_status().finished);
    assert_eq!(monitor.history().len(), 2);

    let (_, snapshot) = store.load(None).unwrap();
    assert_eq!(snapshot.generation, 2);
    assert_eq!(snapshot.genomes.len(), 3);
    assert_eq!(snapshot.history.len(), 2);

    // Resuming at the generation limit runs nothing further.
    let resumed = run_evolution(&config, &EvolutionMonitor::new(), &store, Some(snapshot)).unwrap();
    assert_eq!(resumed.generations_run, 2);
    assert_eq!(resumed.history.len(), 2);
}

#[test]
fn stop_request_ends_the_run_early() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RunConfig::default();
    config.generation.population_size = 2;
    config.generation.generations = 5;
    config.generation.generation_seconds = 0.2;
    config.checkpoint.autosave_every = 0;
    let store = CheckpointStore::new(dir.path());
    let monitor = EvolutionMonitor::new();
    monitor.request_stop();

    let outcome = run_evolution(&config, &monitor, &store, None).unwrap();
    assert!(outcome.stopped);
    assert_eq!(outcome.generations_run, 0);
    assert!(store.list().unwrap().is_empty());
}

#[test]
fn stopping_mid_run_counts_only_completed_generations() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = RunConfig::default();
    config.generation.population_size = 2;
    config.generation.generations = 3;
    config.generation.seed = Some(7);
    config.checkpoint.autosave_every = 0;
    let store = CheckpointStore::new(dir.path());
    let monitor = EvolutionMonitor::new();
    let mut events = monitor.subscribe();

    let outcome = thread::scope(|scope| {
        let worker = scope.spawn(|| run_evolution(&config, &monitor, &store, None));
        loop {
            match events.blocking_recv() {
                Ok(StreamEvent::GenerationStarted { .. }) => break,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
        monitor.request_stop();
        worker.join().unwrap()
    })
    .unwrap();

    assert!(outcome.generations_run <= 3);
    assert_eq!(outcome.history.len(), outcome.generations_run);
    match monitor.runtime_snapshot() {
        Some(snapshot) => {
            assert_eq!(snapshot.generation, outcome.generations_run);
            assert_eq!(snapshot.history.len(), outcome.generations_run);
        }
        None => assert_eq!(outcome.generations_run, 0),
    }
}
