//! Fixed-topology feed-forward controller: 14 inputs, one tanh hidden layer,
//! 6 tanh outputs.

use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::actuators::{ACTUATOR_COUNT, ACTUATOR_LABELS};
use crate::controller::Controller;
use crate::error::{Result, SimError};
use crate::sensors::{SENSOR_COUNT, SENSOR_LABELS, SensorVector};

/// Flat weight vector. Layout: input->hidden weights (row per hidden
/// neuron), hidden biases, hidden->output weights (row per output), output
/// biases.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genome {
    pub hidden: usize,
    pub weights: Vec<f32>,
}

impl Genome {
    pub fn weight_count(hidden: usize) -> usize {
        hidden * SENSOR_COUNT + hidden + ACTUATOR_COUNT * hidden + ACTUATOR_COUNT
    }

    pub fn zeros(hidden: usize) -> Self {
        Self {
            hidden,
            weights: vec![0.0; Self::weight_count(hidden)],
        }
    }

    pub fn random(hidden: usize, range: f32, rng: &mut SmallRng) -> Self {
        let weights = (0..Self::weight_count(hidden))
            .map(|_| rng.random_range(-range..=range))
            .collect();
        Self { hidden, weights }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hidden == 0 {
            return Err(SimError::Config("genome needs at least one hidden neuron".into()));
        }
        let expected = Self::weight_count(self.hidden);
        if self.weights.len() != expected {
            return Err(SimError::Config(format!(
                "genome has {} weights, expected {expected}",
                self.weights.len()
            )));
        }
        if self.weights.iter().any(|w| !w.is_finite()) {
            return Err(SimError::Config("genome has non-finite weights".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct FeedForwardNetwork {
    genome: Genome,
    hidden_state: Vec<f32>,
    fitness: f32,
}

impl FeedForwardNetwork {
    pub fn new(genome: Genome) -> Result<Self> {
        genome.validate()?;
        Ok(Self {
            hidden_state: vec![0.0; genome.hidden],
            genome,
            fitness: 0.0,
        })
    }

    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    pub fn into_genome(self) -> Genome {
        self.genome
    }

    /// Last fitness reported by the simulation.
    pub fn fitness(&self) -> f32 {
        self.fitness
    }

    pub fn activate(&mut self, inputs: &SensorVector) -> [f32; ACTUATOR_COUNT] {
        let hidden = self.genome.hidden;
        let w = &self.genome.weights;
        let (input_weights, rest) = w.split_at(hidden * SENSOR_COUNT);
        let (hidden_bias, rest) = rest.split_at(hidden);
        let (output_weights, output_bias) = rest.split_at(ACTUATOR_COUNT * hidden);

        for (h, value) in self.hidden_state.iter_mut().enumerate() {
            let row = &input_weights[h * SENSOR_COUNT..(h + 1) * SENSOR_COUNT];
            let sum: f32 = row.iter().zip(inputs).map(|(w, x)| w * x).sum();
            *value = (sum + hidden_bias[h]).tanh();
        }

        let mut outputs = [0.0; ACTUATOR_COUNT];
        for (o, value) in outputs.iter_mut().enumerate() {
            let row = &output_weights[o * hidden..(o + 1) * hidden];
            let sum: f32 = row.iter().zip(&self.hidden_state).map(|(w, h)| w * h).sum();
            *value = (sum + output_bias[o]).tanh();
        }
        outputs
    }

    /// Layered view of the weights for display.
    pub fn describe(&self) -> NetworkDescription {
        let hidden = self.genome.hidden;
        let w = &self.genome.weights;
        let (input_weights, rest) = w.split_at(hidden * SENSOR_COUNT);
        let (hidden_bias, rest) = rest.split_at(hidden);
        let (output_weights, output_bias) = rest.split_at(ACTUATOR_COUNT * hidden);
        NetworkDescription {
            inputs: SENSOR_LABELS.iter().map(|label| label.to_string()).collect(),
            outputs: ACTUATOR_LABELS.iter().map(|label| label.to_string()).collect(),
            hidden,
            input_hidden: input_weights.chunks(SENSOR_COUNT).map(<[f32]>::to_vec).collect(),
            hidden_bias: hidden_bias.to_vec(),
            hidden_output: output_weights.chunks(hidden).map(<[f32]>::to_vec).collect(),
            output_bias: output_bias.to_vec(),
        }
    }
}

impl Controller for FeedForwardNetwork {
    fn decide(&mut self, inputs: &SensorVector) -> Vec<f32> {
        self.activate(inputs).to_vec()
    }

    fn report_fitness(&mut self, fitness: f32) {
        self.fitness = fitness;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescription {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub hidden: usize,
    pub input_hidden: Vec<Vec<f32>>,
    pub hidden_bias: Vec<f32>,
    pub hidden_output: Vec<Vec<f32>>,
    pub output_bias: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn zero_genome_outputs_zero() {
        let mut network = FeedForwardNetwork::new(Genome::zeros(10)).unwrap();
        assert_eq!(network.activate(&[0.7; SENSOR_COUNT]), [0.0; ACTUATOR_COUNT]);
    }

    #[test]
    fn outputs_stay_in_unit_range() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut genome = Genome::random(10, 1.0, &mut rng);
        for w in &mut genome.weights {
            *w *= 50.0;
        }
        let mut network = FeedForwardNetwork::new(genome).unwrap();
        let outputs = network.decide(&[1.0; SENSOR_COUNT]);
        assert_eq!(outputs.len(), ACTUATOR_COUNT);
        assert!(outputs.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn output_bias_alone_sets_the_action() {
        let mut genome = Genome::zeros(4);
        let bias_start = genome.weights.len() - ACTUATOR_COUNT;
        genome.weights[bias_start + 3] = 0.5;
        let mut network = FeedForwardNetwork::new(genome).unwrap();
        let outputs = network.activate(&[0.0; SENSOR_COUNT]);
        assert!((outputs[3] - 0.5f32.tanh()).abs() < 1e-6);
        assert_eq!(outputs[0], 0.0);
    }

    #[test]
    fn malformed_genomes_are_rejected() {
        let short = Genome {
            hidden: 3,
            weights: vec![0.0; 5],
        };
        assert!(FeedForwardNetwork::new(short).is_err());
        let mut bad = Genome::zeros(3);
        bad.weights[0] = f32::NAN;
        assert!(FeedForwardNetwork::new(bad).is_err());
    }

    #[test]
    fn description_matches_layer_shapes() {
        let network = FeedForwardNetwork::new(Genome::zeros(5)).unwrap();
        let description = network.describe();
        assert_eq!(description.inputs.len(), SENSOR_COUNT);
        assert_eq!(description.input_hidden.len(), 5);
        assert_eq!(description.hidden_output.len(), ACTUATOR_COUNT);
        assert!(description.hidden_output.iter().all(|row| row.len() == 5));
    }

    #[test]
    fn last_report_wins() {
        let mut network = FeedForwardNetwork::new(Genome::zeros(2)).unwrap();
        network.report_fitness(3.0);
        network.report_fitness(-1.5);
        assert_eq!(network.fitness(), -1.5);
    }
}
