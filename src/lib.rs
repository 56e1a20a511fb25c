//! This crate provides a Deep Q-Network (DQN) agent that learns to play
//! Atari games from pixels.
//! It includes the Q-network, replay buffer, training loop, DeepMind-style
//! frame preprocessing and a gymnasium bridge to the Atari emulator.

pub mod agent;
pub mod checkpoint;
pub mod config;
pub mod demo;
pub mod environment;
pub mod error;
pub mod exploration;
pub mod gym_wrapper;
pub mod qnetwork;
pub mod replay_buffer;
pub mod stats;
pub mod trainer;
pub mod wrappers;

pub use agent::DqnAgent;
pub use config::{AgentConfig, TrainConfig, WrapperConfig};
pub use error::{DqnError, Result};
pub use trainer::{Trainer, TrainingSummary};
