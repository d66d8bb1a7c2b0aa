//! Run configuration.
//!
//! Everything is defaulted so a partial JSON file (or none at all) yields the
//! reference behaviour. A handful of knobs can be overridden from the
//! environment for quick experiments without editing the file.

use std::f32::consts::PI;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SimError};
use crate::fitness::FitnessWeights;

const ENV_POPULATION_SIZE: &str = "WALKER_POPULATION_SIZE";
const ENV_GENERATIONS: &str = "WALKER_GENERATIONS";
const ENV_PORT: &str = "WALKER_PORT";
const ENV_SEED: &str = "WALKER_SEED";

pub const MAX_POPULATION_SIZE: usize = 512;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RunConfig {
    pub arena: ArenaConfig,
    pub liveness: LivenessConfig,
    pub boundary: BoundaryConfig,
    pub actuation: ActuationConfig,
    pub generation: GenerationConfig,
    pub controller: ControllerConfig,
    pub fitness: FitnessWeights,
    pub checkpoint: CheckpointConfig,
    pub server: ServerConfig,
}

/// Screen-space world frame: pixels, `y` grows downward.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ArenaConfig {
    pub width: f32,
    pub height: f32,
    /// Distance from the bottom edge to the ground surface line.
    pub ground_inset: f32,
    pub ground_half_thickness: f32,
    pub ground_friction: f32,
    pub gravity: f32,
    pub tick_hz: f32,
    pub spawn: [f32; 2],
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            width: 1500.0,
            height: 1000.0,
            ground_inset: 100.0,
            ground_half_thickness: 8.0,
            ground_friction: 1.0,
            gravity: 1200.0,
            tick_hz: 60.0,
            spawn: [150.0, 800.0],
        }
    }
}

impl ArenaConfig {
    pub fn ground_level(&self) -> f32 {
        self.height - self.ground_inset
    }

    pub fn dt(&self) -> f32 {
        1.0 / self.tick_hz
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LivenessConfig {
    /// Added to the ground level; a head or torso at or past it has fallen.
    pub fall_margin: f32,
    pub max_tilt: f32,
    pub boundary_margin: f32,
    /// A foot within this distance of the ground counts as touching it.
    pub contact_margin: f32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            fall_margin: -15.0,
            max_tilt: PI / 2.0,
            boundary_margin: 15.0,
            contact_margin: 15.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct BoundaryConfig {
    /// How far behind the spawn point the boundary starts.
    pub start_offset: f32,
    /// Pixels per simulated second.
    pub speed: f32,
}

impl Default for BoundaryConfig {
    fn default() -> Self {
        Self {
            start_offset: 150.0,
            speed: 5.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ActuationConfig {
    /// Rad/s at full command. A positive command decreases the child's angle
    /// relative to its parent; see [`crate::actuators::apply`].
    pub motor_speed: f32,
    pub motor_response: f32,
}

impl Default for ActuationConfig {
    fn default() -> Self {
        Self {
            motor_speed: 4.0,
            motor_response: 12.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerationConfig {
    pub population_size: usize,
    pub generations: usize,
    /// Simulated seconds before a generation is cut off.
    pub generation_seconds: f32,
    /// Pace frames to wall-clock time for live viewing.
    pub realtime: bool,
    pub seed: Option<u64>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            generations: 1000,
            generation_seconds: 60.0,
            realtime: false,
            seed: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ControllerConfig {
    pub hidden_neurons: usize,
    pub init_weight_range: f32,
    pub weight_limit: f32,
    pub mutation_rate: f32,
    pub mutation_power: f32,
    pub elite_count: usize,
    pub tournament_size: usize,
    pub crossover_rate: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            hidden_neurons: 10,
            init_weight_range: 1.0,
            weight_limit: 30.0,
            mutation_rate: 0.2,
            mutation_power: 0.5,
            elite_count: 2,
            tournament_size: 3,
            crossover_rate: 0.75,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct CheckpointConfig {
    pub dir: String,
    /// Zero disables autosave.
    pub autosave_every: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: "data/checkpoints".to_string(),
            autosave_every: 5,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Publish a body snapshot every N frames.
    pub snapshot_every: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8787,
            snapshot_every: 2,
        }
    }
}

impl RunConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RunConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let payload = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, payload)?;
        Ok(())
    }

    /// Apply `WALKER_*` environment overrides. Unparseable values are ignored
    /// with a warning.
    pub fn apply_env_overrides(&mut self) {
        if let Some(value) = env_parse::<usize>(ENV_POPULATION_SIZE) {
            self.generation.population_size = value.clamp(1, MAX_POPULATION_SIZE);
        }
        if let Some(value) = env_parse::<usize>(ENV_GENERATIONS) {
            self.generation.generations = value;
        }
        if let Some(value) = env_parse::<u16>(ENV_PORT) {
            self.server.port = value;
        }
        if let Some(value) = env_parse::<u64>(ENV_SEED) {
            self.generation.seed = Some(value);
        }
    }

    pub fn validate(&self) -> Result<()> {
        let arena = &self.arena;
        if !(arena.width > 0.0 && arena.height > 0.0) {
            return Err(SimError::Config("arena dimensions must be positive".into()));
        }
        if !(arena.tick_hz > 0.0 && arena.tick_hz.is_finite()) {
            return Err(SimError::Config("tickHz must be positive".into()));
        }
        if arena.ground_inset <= 0.0 || arena.ground_inset >= arena.height {
            return Err(SimError::Config(
                "groundInset must lie inside the arena".into(),
            ));
        }
        if !arena.spawn.iter().all(|v| v.is_finite()) {
            return Err(SimError::Config("spawn must be finite".into()));
        }
        if arena.spawn[1] >= arena.ground_level() {
            return Err(SimError::Config("spawn must be above the ground".into()));
        }
        let population = self.generation.population_size;
        if population == 0 || population > MAX_POPULATION_SIZE {
            return Err(SimError::Config(format!(
                "populationSize must be between 1 and {MAX_POPULATION_SIZE}"
            )));
        }
        if self.generation.generation_seconds <= 0.0 {
            return Err(SimError::Config("generationSeconds must be positive".into()));
        }
        if self.liveness.max_tilt <= 0.0 {
            return Err(SimError::Config("maxTilt must be positive".into()));
        }
        let controller = &self.controller;
        if controller.hidden_neurons == 0 {
            return Err(SimError::Config("hiddenNeurons must be non-zero".into()));
        }
        if !(0.0..=1.0).contains(&controller.mutation_rate)
            || !(0.0..=1.0).contains(&controller.crossover_rate)
        {
            return Err(SimError::Config(
                "mutationRate and crossoverRate must be within [0, 1]".into(),
            ));
        }
        if !(controller.init_weight_range >= 0.0 && controller.weight_limit > 0.0) {
            return Err(SimError::Config(
                "initWeightRange must be non-negative and weightLimit positive".into(),
            ));
        }
        if controller.tournament_size == 0 {
            return Err(SimError::Config("tournamentSize must be non-zero".into()));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {key}={raw}: not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn reference_frame_matches_screen_layout() {
        let arena = ArenaConfig::default();
        assert_eq!(arena.ground_level(), 900.0);
        assert_eq!(arena.spawn, [150.0, 800.0]);
        assert!((arena.dt() - 1.0 / 60.0).abs() < f32::EPSILON);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: RunConfig =
            serde_json::from_str(r#"{"generation": {"populationSize": 12}}"#).unwrap();
        assert_eq!(config.generation.population_size, 12);
        assert_eq!(config.generation.generations, 1000);
        assert_eq!(config.arena, ArenaConfig::default());
    }

    #[test]
    fn config_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut config = RunConfig::default();
        config.generation.seed = Some(7);
        config.fitness.survival = 0.02;
        config.save(&path).unwrap();
        let loaded = RunConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn rejects_spawn_below_ground() {
        let mut config = RunConfig::default();
        config.arena.spawn = [150.0, 950.0];
        assert!(matches!(config.validate(), Err(SimError::Config(_))));
    }

    #[test]
    fn rejects_empty_population() {
        let mut config = RunConfig::default();
        config.generation.population_size = 0;
        assert!(config.validate().is_err());
    }
}
