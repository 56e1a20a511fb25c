//! Error type shared by the library modules.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DqnError {
    #[error("python error: {0}")]
    Python(#[from] pyo3::PyErr),

    #[error("torch error: {0}")]
    Torch(#[from] tch::TchError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("observation shape mismatch: expected {expected:?}, got {actual:?}")]
    Shape {
        expected: [usize; 3],
        actual: [usize; 3],
    },

    #[error("action {action} is outside the action space of size {num_actions}")]
    InvalidAction { action: usize, num_actions: usize },

    #[error("environment error: {0}")]
    Environment(String),
}

pub type Result<T> = std::result::Result<T, DqnError>;
