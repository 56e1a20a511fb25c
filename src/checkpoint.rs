//! Periodic model checkpoints.
//!
//! Weights are written in libtorch's `.ot` format as `<prefix>_<frame>.ot`;
//! a `<prefix>_<frame>.meta.json` file next to them records where training
//! was when they were saved.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::agent::DqnAgent;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub env_id: String,
    pub frame_count: u64,
    pub episode_count: u64,
    pub running_reward: f64,
    pub epsilon: f64,
    pub version: String,
}

impl CheckpointMetadata {
    pub fn new(
        env_id: &str,
        frame_count: u64,
        episode_count: u64,
        running_reward: f64,
        epsilon: f64,
    ) -> Self {
        Self {
            env_id: env_id.to_string(),
            frame_count,
            episode_count,
            running_reward,
            epsilon,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

pub fn checkpoint_path(dir: &Path, prefix: &str, frame_count: u64) -> PathBuf {
    dir.join(format!("{prefix}_{frame_count}.ot"))
}

/// Save the agent's weights and the metadata, creating `dir` if needed.
/// Returns the path of the weights file.
pub fn save_checkpoint(
    agent: &DqnAgent,
    dir: &Path,
    prefix: &str,
    metadata: &CheckpointMetadata,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let path = checkpoint_path(dir, prefix, metadata.frame_count);
    agent.save(&path)?;

    let meta_path = path.with_extension("meta.json");
    std::fs::write(&meta_path, serde_json::to_string_pretty(metadata)?)?;

    info!(path = %path.display(), "saved checkpoint");
    Ok(path)
}

/// Read the metadata saved alongside a weights file.
pub fn load_metadata(weights_path: &Path) -> Result<CheckpointMetadata> {
    let contents = std::fs::read_to_string(weights_path.with_extension("meta.json"))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Frame counter recorded next to `weights_path`, or 0 when no readable
/// metadata was saved with the weights.
pub fn resume_frame(weights_path: &Path) -> u64 {
    match load_metadata(weights_path) {
        Ok(metadata) => metadata.frame_count,
        Err(err) => {
            warn!(path = %weights_path.display(), "no checkpoint metadata: {err}");
            0
        }
    }
}
