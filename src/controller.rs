//! The decision-maker bound to one agent for one generation.

use crate::sensors::SensorVector;

pub trait Controller {
    /// Map one sensor frame to actuator commands. Six values in `[-1, 1]` are
    /// expected; anything else is repaired before it reaches the motors.
    fn decide(&mut self, inputs: &SensorVector) -> Vec<f32>;

    /// Called every frame the agent is alive. The last report before the
    /// generation ends is the genome's result.
    fn report_fitness(&mut self, fitness: f32);
}

impl<C: Controller + ?Sized> Controller for Box<C> {
    fn decide(&mut self, inputs: &SensorVector) -> Vec<f32> {
        (**self).decide(inputs)
    }

    fn report_fitness(&mut self, fitness: f32) {
        (**self).report_fitness(fitness)
    }
}
