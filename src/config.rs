//! Hyperparameters for the agent, the Atari preprocessing pipeline and the
//! training loop.
//!
//! Defaults follow the DeepMind Breakout setup: a 1M-frame linear epsilon
//! schedule after 50k purely random frames, a 100k transition replay memory
//! and a target network refreshed every 10k frames.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DqnError, Result};

/// Smallest frame edge the convolutional stack accepts.
pub const MIN_FRAME_SIZE: usize = 36;

/// Configuration of the DQN agent itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Adam learning rate.
    pub learning_rate: f64,

    /// Each gradient tensor is rescaled so its L2 norm does not exceed this.
    pub clip_norm: f64,

    /// Discount factor for future rewards.
    pub gamma: f64,

    pub epsilon_max: f64,
    pub epsilon_min: f64,

    /// Number of frames during which actions are always random.
    pub epsilon_random_frames: u64,

    /// Number of frames over which epsilon decays from max to min.
    pub epsilon_greedy_frames: u64,

    pub batch_size: usize,

    /// Maximum number of transitions kept in the replay buffer.
    pub replay_capacity: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.00025,
            clip_norm: 1.0,
            gamma: 0.99,
            epsilon_max: 1.0,
            epsilon_min: 0.1,
            epsilon_random_frames: 50_000,
            epsilon_greedy_frames: 1_000_000,
            batch_size: 32,
            replay_capacity: 100_000,
        }
    }
}

/// Configuration of the Atari preprocessing wrappers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WrapperConfig {
    /// Upper bound of random no-op actions taken after a reset.
    pub noop_max: u32,
    /// Emulator frames per agent step.
    pub frame_skip: u32,
    pub episodic_life: bool,
    pub fire_reset: bool,
    pub clip_rewards: bool,
    pub frame_width: usize,
    pub frame_height: usize,
    pub frame_stack: usize,
}

impl Default for WrapperConfig {
    fn default() -> Self {
        Self {
            noop_max: 30,
            frame_skip: 4,
            episodic_life: true,
            fire_reset: true,
            clip_rewards: true,
            frame_width: 84,
            frame_height: 84,
            frame_stack: 4,
        }
    }
}

impl WrapperConfig {
    /// The same preprocessing with a whole game as one episode and the
    /// game's own score as the reward.
    pub fn for_evaluation(&self) -> Self {
        Self {
            episodic_life: false,
            clip_rewards: false,
            ..self.clone()
        }
    }
}

/// Configuration of a full training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// Gymnasium environment id.
    pub env_id: String,
    pub seed: u64,
    pub max_steps_per_episode: u64,

    /// Run a gradient step every this many frames.
    pub update_after_actions: u64,

    /// Synchronise the target network and checkpoint every this many frames.
    pub update_target_network: u64,

    /// Number of recent episodes averaged into the running reward.
    pub reward_history_len: usize,

    /// Training stops once the running reward exceeds this value.
    pub solved_reward: f64,

    pub checkpoint_dir: PathBuf,
    pub checkpoint_prefix: String,

    pub agent: AgentConfig,
    pub wrappers: WrapperConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            env_id: "BreakoutNoFrameskip-v4".to_string(),
            seed: 42,
            max_steps_per_episode: 10_000,
            update_after_actions: 4,
            update_target_network: 10_000,
            reward_history_len: 100,
            solved_reward: 40.0,
            checkpoint_dir: PathBuf::from("."),
            checkpoint_prefix: "saved_model".to_string(),
            agent: AgentConfig::default(),
            wrappers: WrapperConfig::default(),
        }
    }
}

impl TrainConfig {
    /// Read a JSON configuration file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: TrainConfig = serde_json::from_str(&contents)?;
        Ok(config)
    }

    /// Check that every hyperparameter is in a usable range.
    pub fn validate(&self) -> Result<()> {
        self.agent.validate()?;
        self.wrappers.validate()?;

        if self.env_id.is_empty() {
            return Err(DqnError::Config("env_id must not be empty".to_string()));
        }
        if self.max_steps_per_episode < 2 {
            return Err(DqnError::Config(format!(
                "max_steps_per_episode must be at least 2, got {}",
                self.max_steps_per_episode
            )));
        }
        if self.update_after_actions == 0 {
            return Err(DqnError::Config(
                "update_after_actions must be at least 1".to_string(),
            ));
        }
        if self.update_target_network == 0 {
            return Err(DqnError::Config(
                "update_target_network must be at least 1".to_string(),
            ));
        }
        if self.reward_history_len == 0 {
            return Err(DqnError::Config(
                "reward_history_len must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.learning_rate <= 0.0 {
            return Err(DqnError::Config(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.clip_norm <= 0.0 {
            return Err(DqnError::Config(format!(
                "clip_norm must be positive, got {}",
                self.clip_norm
            )));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(DqnError::Config(format!(
                "gamma must be in [0, 1], got {}",
                self.gamma
            )));
        }
        if !(0.0..=1.0).contains(&self.epsilon_min) || !(0.0..=1.0).contains(&self.epsilon_max) {
            return Err(DqnError::Config(format!(
                "epsilon bounds must be in [0, 1], got [{}, {}]",
                self.epsilon_min, self.epsilon_max
            )));
        }
        if self.epsilon_min > self.epsilon_max {
            return Err(DqnError::Config(format!(
                "epsilon_min ({}) cannot exceed epsilon_max ({})",
                self.epsilon_min, self.epsilon_max
            )));
        }
        if self.epsilon_greedy_frames == 0 {
            return Err(DqnError::Config(
                "epsilon_greedy_frames must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(DqnError::Config("batch_size must be at least 1".to_string()));
        }
        if self.replay_capacity <= self.batch_size {
            return Err(DqnError::Config(format!(
                "replay_capacity ({}) must exceed batch_size ({})",
                self.replay_capacity, self.batch_size
            )));
        }
        Ok(())
    }
}

impl WrapperConfig {
    pub fn validate(&self) -> Result<()> {
        if self.frame_skip == 0 {
            return Err(DqnError::Config("frame_skip must be at least 1".to_string()));
        }
        if self.frame_stack == 0 {
            return Err(DqnError::Config("frame_stack must be at least 1".to_string()));
        }
        if self.frame_width < MIN_FRAME_SIZE || self.frame_height < MIN_FRAME_SIZE {
            return Err(DqnError::Config(format!(
                "frames must be at least {MIN_FRAME_SIZE}x{MIN_FRAME_SIZE}, got {}x{}",
                self.frame_width, self.frame_height
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TrainConfig::default().validate().is_ok());
    }

    #[test]
    fn test_defaults_match_breakout_setup() {
        let config = TrainConfig::default();
        assert_eq!(config.env_id, "BreakoutNoFrameskip-v4");
        assert_eq!(config.agent.batch_size, 32);
        assert_eq!(config.agent.replay_capacity, 100_000);
        assert_eq!(config.update_target_network, 10_000);
        assert_eq!(config.wrappers.frame_stack, 4);
    }

    #[test]
    fn test_validation_rejects_bad_gamma() {
        let mut config = TrainConfig::default();
        config.agent.gamma = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_epsilon_bounds() {
        let mut config = TrainConfig::default();
        config.agent.epsilon_min = 0.9;
        config.agent.epsilon_max = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_capacity_below_batch() {
        let mut config = TrainConfig::default();
        config.agent.replay_capacity = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_tiny_frames() {
        let mut config = TrainConfig::default();
        config.wrappers.frame_width = 20;
        assert!(matches!(config.validate(), Err(DqnError::Config(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{ "env_id": "PongNoFrameskip-v4", "agent": { "batch_size": 64 } }"#,
        )
        .unwrap();

        let config = TrainConfig::from_file(&path).unwrap();
        assert_eq!(config.env_id, "PongNoFrameskip-v4");
        assert_eq!(config.agent.batch_size, 64);
        assert_eq!(config.agent.gamma, 0.99);
        assert_eq!(config.update_after_actions, 4);
    }

    #[test]
    fn test_evaluation_wrappers_keep_games_whole() {
        let train = WrapperConfig {
            noop_max: 5,
            frame_width: 64,
            ..WrapperConfig::default()
        };
        let eval = train.for_evaluation();
        assert!(!eval.episodic_life);
        assert!(!eval.clip_rewards);
        assert_eq!(eval.noop_max, 5);
        assert_eq!(eval.frame_width, 64);
        assert_eq!(eval.frame_skip, train.frame_skip);
        assert_eq!(eval.fire_reset, train.fire_reset);
    }
}
