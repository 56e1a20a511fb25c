//! Epsilon-greedy exploration with a warm-up phase of purely random actions
//! followed by a linear decay of epsilon.

use crate::config::AgentConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct EpsilonGreedy {
    epsilon: f64,
    epsilon_min: f64,
    step: f64,
    random_frames: u64,
}

impl EpsilonGreedy {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            epsilon: config.epsilon_max,
            epsilon_min: config.epsilon_min,
            step: (config.epsilon_max - config.epsilon_min) / config.epsilon_greedy_frames as f64,
            random_frames: config.epsilon_random_frames,
        }
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// `draw` is a uniform sample from `[0, 1)`.
    pub fn should_explore(&self, frame_count: u64, draw: f64) -> bool {
        frame_count < self.random_frames || self.epsilon > draw
    }

    /// Called once per frame.
    pub fn decay(&mut self) {
        self.epsilon = (self.epsilon - self.step).max(self.epsilon_min);
    }
}
