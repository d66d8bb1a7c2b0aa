use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, bail};
use clap::Parser;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use walker_evolution::RunConfig;
use walker_evolution::checkpoint::CheckpointStore;
use walker_evolution::monitor::EvolutionMonitor;
use walker_evolution::runner::{self, RunOutcome};
use walker_evolution::server::{self, AppState};

#[derive(Debug, Parser)]
#[command(name = "walker-evolution", about = "Evolve 2D ragdoll walkers")]
struct Cli {
    /// JSON run configuration. Missing fields use defaults.
    #[arg(long, env = "WALKER_CONFIG")]
    config: Option<PathBuf>,

    /// Write the effective configuration to this path and exit.
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Resume from a checkpoint id, or `latest`.
    #[arg(long)]
    resume: Option<String>,

    #[arg(long)]
    generations: Option<usize>,

    #[arg(long)]
    population: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long)]
    port: Option<u16>,

    /// Pace simulation to wall-clock time.
    #[arg(long)]
    realtime: bool,

    /// Run without the inspection server.
    #[arg(long)]
    headless: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();
    let config = resolve_config(&cli)?;

    if let Some(path) = &cli.dump_config {
        config
            .save(path)
            .with_context(|| format!("failed writing config to '{}'", path.display()))?;
        info!("wrote configuration to {}", path.display());
        return Ok(());
    }

    let store = CheckpointStore::new(&config.checkpoint.dir);
    let resume = match cli.resume.as_deref() {
        Some(requested) => {
            let id = (requested != "latest").then_some(requested);
            let (id, snapshot) = store
                .load(id)
                .with_context(|| format!("failed loading checkpoint '{requested}'"))?;
            info!(%id, generation = snapshot.generation, "loaded checkpoint");
            Some(snapshot)
        }
        None => None,
    };

    info!(
        population = config.generation.population_size,
        generations = config.generation.generations,
        seconds_per_generation = config.generation.generation_seconds,
        seed = ?config.generation.seed,
        "starting evolution"
    );

    let monitor = Arc::new(EvolutionMonitor::new());
    if config.server.enabled && !cli.headless {
        let state = AppState {
            monitor: Arc::clone(&monitor),
            store: store.clone(),
        };
        let host = config.server.host.clone();
        let port = config.server.port;
        tokio::spawn(async move {
            if let Err(message) = server::serve(state, &host, port).await {
                error!("{message}");
            }
        });
    }

    let (done_tx, mut done_rx) = oneshot::channel();
    {
        let monitor = Arc::clone(&monitor);
        let store = store.clone();
        let config = config.clone();
        thread::Builder::new()
            .name("evolution-worker".to_string())
            .spawn(move || {
                let result = runner::run_evolution(&config, &monitor, &store, resume);
                if let Err(err) = &result {
                    monitor.emit_error(err.to_string());
                }
                let _ = done_tx.send(result);
            })
            .context("failed spawning evolution worker")?;
    }

    let result = tokio::select! {
        result = &mut done_rx => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupt received, stopping after the current frame");
            monitor.request_stop();
            done_rx.await
        }
    };
    let outcome = match result {
        Ok(outcome) => outcome.context("evolution aborted")?,
        Err(_) => bail!("evolution worker exited without reporting"),
    };
    report(&outcome);

    if let Some(snapshot) = monitor.runtime_snapshot() {
        match store.save(&snapshot, Some("final")) {
            Ok(saved) => info!(id = %saved.id, "saved final checkpoint"),
            Err(err) => warn!("final checkpoint failed: {err}"),
        }
    }
    Ok(())
}

fn resolve_config(cli: &Cli) -> anyhow::Result<RunConfig> {
    let mut config = match &cli.config {
        Some(path) => RunConfig::from_file(path)
            .with_context(|| format!("failed loading config '{}'", path.display()))?,
        None => RunConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(generations) = cli.generations {
        config.generation.generations = generations;
    }
    if let Some(population) = cli.population {
        config.generation.population_size = population;
    }
    if let Some(seed) = cli.seed {
        config.generation.seed = Some(seed);
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if cli.realtime {
        config.generation.realtime = true;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn report(outcome: &RunOutcome) {
    if outcome.stopped {
        warn!(generations = outcome.generations_run, "evolution stopped early");
    }
    match &outcome.best_genome {
        Some((genome, fitness)) => info!(
            generations = outcome.generations_run,
            best_fitness_ever = outcome.best_fitness_ever,
            winner_fitness = fitness,
            hidden_neurons = genome.hidden,
            "winner"
        ),
        None => info!(generations = outcome.generations_run, "no generation completed"),
    }
}
