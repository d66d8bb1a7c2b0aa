//! Generational GA over controller genomes: elitism, tournament selection,
//! blend crossover and gaussian weight mutation.

use std::f32::consts::PI;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ControllerConfig;
use crate::network::{FeedForwardNetwork, Genome};
use crate::population::AgentOutcome;

/// One evaluated genome.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub genome: Genome,
    pub fitness: f32,
    pub max_x: f32,
    pub survived: bool,
}

impl Candidate {
    pub fn from_outcome(outcome: AgentOutcome<FeedForwardNetwork>) -> Self {
        Self {
            fitness: outcome.fitness,
            max_x: outcome.max_x,
            survived: outcome.death.is_none(),
            genome: outcome.controller.into_genome(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSummary {
    pub generation: usize,
    pub population: usize,
    pub best_fitness: f32,
    pub mean_fitness: f32,
    pub median_fitness: f32,
    pub worst_fitness: f32,
    pub best_fitness_ever: f32,
    pub best_distance: f32,
    pub survivors: usize,
    pub ticks: u64,
}

impl GenerationSummary {
    pub fn build(
        generation: usize,
        candidates: &[Candidate],
        best_fitness_ever: f32,
        spawn_x: f32,
        ticks: u64,
    ) -> Self {
        let fitnesses: Vec<f32> = candidates
            .iter()
            .map(|candidate| finite_or_zero(candidate.fitness))
            .collect();
        let best_fitness = fitnesses.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let worst_fitness = fitnesses.iter().copied().fold(f32::INFINITY, f32::min);
        Self {
            generation,
            population: candidates.len(),
            best_fitness: if fitnesses.is_empty() { 0.0 } else { best_fitness },
            mean_fitness: mean(&fitnesses),
            median_fitness: median(&fitnesses),
            worst_fitness: if fitnesses.is_empty() { 0.0 } else { worst_fitness },
            best_fitness_ever,
            best_distance: candidates
                .iter()
                .map(|candidate| candidate.max_x - spawn_x)
                .fold(0.0, f32::max),
            survivors: candidates.iter().filter(|c| c.survived).count(),
            ticks,
        }
    }
}

pub struct Evolver {
    config: ControllerConfig,
    rng: SmallRng,
    generation: usize,
    best: Option<(Genome, f32)>,
}

impl Evolver {
    pub fn new(config: ControllerConfig, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random::<u64>()),
        };
        Self {
            config,
            rng,
            generation: 0,
            best: None,
        }
    }

    /// Resume from a checkpoint.
    pub fn restore(&mut self, generation: usize, best: Option<(Genome, f32)>) {
        self.generation = generation;
        self.best = best;
    }

    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn best(&self) -> Option<(&Genome, f32)> {
        self.best.as_ref().map(|(genome, fitness)| (genome, *fitness))
    }

    pub fn initial_population(&mut self, size: usize) -> Vec<Genome> {
        (0..size)
            .map(|_| {
                Genome::random(
                    self.config.hidden_neurons,
                    self.config.init_weight_range,
                    &mut self.rng,
                )
            })
            .collect()
    }

    /// Produce `size` genomes from scored candidates. The top
    /// `elite_count` survive unchanged; the rest are bred.
    pub fn breed(&mut self, candidates: &[Candidate], size: usize) -> Vec<Genome> {
        self.generation += 1;
        if candidates.is_empty() {
            return self.initial_population(size);
        }

        let mut ranked: Vec<&Candidate> = candidates.iter().collect();
        ranked.sort_by(|a, b| finite_or_min(b.fitness).total_cmp(&finite_or_min(a.fitness)));

        let top = ranked[0];
        if self
            .best
            .as_ref()
            .is_none_or(|(_, fitness)| top.fitness > *fitness)
            && top.fitness.is_finite()
        {
            self.best = Some((top.genome.clone(), top.fitness));
        }

        let mut next: Vec<Genome> = ranked
            .iter()
            .take(self.config.elite_count.min(size))
            .map(|candidate| candidate.genome.clone())
            .collect();

        let tournament_size = self.config.tournament_size.max(1);
        while next.len() < size {
            let parent_a = tournament_select(&ranked, tournament_size, &mut self.rng);
            let child = if ranked.len() > 1 && self.rng.random::<f32>() < self.config.crossover_rate
            {
                let parent_b = tournament_select(&ranked, tournament_size, &mut self.rng);
                crossover_genome(&parent_a.genome, &parent_b.genome, &mut self.rng)
            } else {
                parent_a.genome.clone()
            };
            next.push(self.mutate_genome(child));
        }

        debug!(
            generation = self.generation,
            elites = self.config.elite_count.min(size),
            population = next.len(),
            "bred next generation"
        );
        next
    }

    fn mutate_genome(&mut self, mut genome: Genome) -> Genome {
        let limit = self.config.weight_limit;
        for weight in &mut genome.weights {
            *weight = mutate_number(
                *weight,
                -limit,
                limit,
                self.config.mutation_rate,
                self.config.mutation_power,
                &mut self.rng,
            );
        }
        genome
    }
}

fn tournament_select<'a>(
    ranked: &[&'a Candidate],
    size: usize,
    rng: &mut SmallRng,
) -> &'a Candidate {
    let len = ranked.len();
    let mut best = ranked[rng.random_range(0..len)];
    for _ in 1..size {
        let candidate = ranked[rng.random_range(0..len)];
        if finite_or_min(candidate.fitness) > finite_or_min(best.fitness) {
            best = candidate;
        }
    }
    best
}

/// Per-weight blend. Parents of different shape yield a copy of `a`.
fn crossover_genome(a: &Genome, b: &Genome, rng: &mut SmallRng) -> Genome {
    if a.hidden != b.hidden || a.weights.len() != b.weights.len() {
        return a.clone();
    }
    let weights = a
        .weights
        .iter()
        .zip(&b.weights)
        .map(|(wa, wb)| {
            let blend = rng.random_range(0.2..0.8);
            lerp(*wa, *wb, blend)
        })
        .collect();
    Genome {
        hidden: a.hidden,
        weights,
    }
}

/// Gaussian step of `power` standard deviations, applied with probability
/// `chance` and clamped to `[min, max]`.
fn mutate_number(
    value: f32,
    min: f32,
    max: f32,
    chance: f32,
    power: f32,
    rng: &mut SmallRng,
) -> f32 {
    if rng.random::<f32>() > chance {
        return value;
    }
    (value + rand_normal(rng) * power).clamp(min, max)
}

fn rand_normal(rng: &mut SmallRng) -> f32 {
    let mut u = 0.0;
    let mut v = 0.0;
    while u == 0.0 {
        u = rng.random::<f32>();
    }
    while v == 0.0 {
        v = rng.random::<f32>();
    }
    (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn finite_or_zero(value: f32) -> f32 {
    if value.is_finite() { value } else { 0.0 }
}

fn finite_or_min(value: f32) -> f32 {
    if value.is_finite() { value } else { f32::MIN }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

fn median(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f32::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) * 0.5
    } else {
        sorted[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ControllerConfig {
        ControllerConfig {
            hidden_neurons: 3,
            ..ControllerConfig::default()
        }
    }

    fn candidate(fill: f32, fitness: f32) -> Candidate {
        let mut genome = Genome::zeros(3);
        genome.weights.fill(fill);
        Candidate {
            genome,
            fitness,
            max_x: 150.0 + fitness,
            survived: false,
        }
    }

    #[test]
    fn initial_population_has_requested_shape() {
        let mut evolver = Evolver::new(config(), Some(1));
        let population = evolver.initial_population(12);
        assert_eq!(population.len(), 12);
        for genome in &population {
            genome.validate().unwrap();
            assert!(genome.weights.iter().all(|w| w.abs() <= 1.0));
        }
    }

    #[test]
    fn breeding_keeps_size_and_elites() {
        let mut evolver = Evolver::new(config(), Some(2));
        let candidates: Vec<_> = (0..10).map(|i| candidate(i as f32 * 0.1, i as f32)).collect();
        let next = evolver.breed(&candidates, 10);
        assert_eq!(next.len(), 10);
        assert_eq!(next[0], candidates[9].genome);
        assert_eq!(next[1], candidates[8].genome);
        assert_eq!(evolver.generation(), 1);
        let (best, fitness) = evolver.best().unwrap();
        assert_eq!(best, &candidates[9].genome);
        assert_eq!(fitness, 9.0);
    }

    #[test]
    fn population_can_grow_or_shrink() {
        let mut evolver = Evolver::new(config(), Some(3));
        let candidates: Vec<_> = (0..4).map(|i| candidate(0.0, i as f32)).collect();
        assert_eq!(evolver.breed(&candidates, 9).len(), 9);
        assert_eq!(evolver.breed(&candidates, 1).len(), 1);
    }

    #[test]
    fn mutated_weights_stay_within_limit() {
        let mut config = config();
        config.mutation_rate = 1.0;
        config.mutation_power = 100.0;
        config.weight_limit = 5.0;
        let mut evolver = Evolver::new(config, Some(4));
        let candidates: Vec<_> = (0..5).map(|i| candidate(4.0, i as f32)).collect();
        for genome in evolver.breed(&candidates, 20) {
            assert!(genome.weights.iter().all(|w| w.abs() <= 5.0));
        }
    }

    #[test]
    fn non_finite_fitness_never_wins() {
        let mut evolver = Evolver::new(config(), Some(5));
        let candidates = vec![candidate(1.0, f32::NAN), candidate(2.0, -3.0)];
        let next = evolver.breed(&candidates, 2);
        assert_eq!(next[0], candidates[1].genome);
        assert_eq!(evolver.best().map(|(_, f)| f), Some(-3.0));
    }

    #[test]
    fn same_seed_breeds_the_same_population() {
        let candidates: Vec<_> = (0..6).map(|i| candidate(i as f32 * 0.2, i as f32)).collect();
        let mut a = Evolver::new(config(), Some(9));
        let mut b = Evolver::new(config(), Some(9));
        assert_eq!(a.breed(&candidates, 6), b.breed(&candidates, 6));
    }

    #[test]
    fn summary_reports_distribution() {
        let candidates = vec![candidate(0.0, 1.0), candidate(0.0, 3.0), candidate(0.0, 8.0)];
        let summary = GenerationSummary::build(4, &candidates, 10.0, 150.0, 600);
        assert_eq!(summary.population, 3);
        assert_eq!(summary.best_fitness, 8.0);
        assert_eq!(summary.worst_fitness, 1.0);
        assert_eq!(summary.median_fitness, 3.0);
        assert!((summary.mean_fitness - 4.0).abs() < 1e-6);
        assert_eq!(summary.best_distance, 8.0);
        assert_eq!(summary.best_fitness_ever, 10.0);
    }
}
