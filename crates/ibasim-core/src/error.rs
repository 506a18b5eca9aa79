//! Errors raised while preparing or running a simulation.

use ibasim_physics::PhysicsError;
use thiserror::Error;

/// Errors from simulation setup and transport.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Sanity check failed: {0}")]
    SanityCheckFailure(String),

    #[error("Workspace initialization failed for detector {detector}: {reason}")]
    WorkspaceInitFailure { detector: usize, reason: String },

    #[error("Physics data error: {0}")]
    Physics(#[from] PhysicsError),
}

impl SimError {
    pub(crate) fn sanity(msg: impl Into<String>) -> Self {
        SimError::SanityCheckFailure(msg.into())
    }
}
