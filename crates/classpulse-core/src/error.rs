//! Error types for ClassPulse.

use thiserror::Error;

/// Core error type for all ClassPulse operations.
#[derive(Error, Debug)]
pub enum ClassPulseError {
    #[error("No roster match for '{name}'")]
    EntityNotFound {
        name: String,
        suggestions: Vec<String>,
    },

    #[error("Ambiguous entity '{name}', candidates: {candidates:?}")]
    AmbiguousEntity {
        name: String,
        candidates: Vec<String>,
    },

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Session store unavailable: {0}")]
    SessionStoreUnavailable(String),

    #[error("Invalid scope transition: {0}")]
    InvalidScopeTransition(String),

    #[error("Ticket delivery error: {0}")]
    Ticket(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, ClassPulseError>;
