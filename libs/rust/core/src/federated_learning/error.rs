use thiserror::Error;
use uuid::Uuid;

use crate::state_store::StoreError;

/// A run configuration that was refused; the previously stored one stays in effect.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cycle_count must be at least 1")]
    ZeroCycles,
    #[error("at least one node endpoint is required")]
    NoEndpoints,
    #[error("node endpoint name must not be empty")]
    EmptyName,
    #[error("duplicate node endpoint name: {0}")]
    DuplicateName(String),
    #[error("invalid address for node {name}: {reason}")]
    InvalidAddress { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("run {run_id} is already in progress")]
    AlreadyRunning { run_id: Uuid },
    #[error("run {run_id} is in progress; state cannot be reset until it finishes")]
    Busy { run_id: Uuid },
    #[error("invalid run configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
}
