//! Error type shared by the physics providers.
//!
//! The provider traits themselves live next to their implementations in
//! [`stopping`](crate::stopping) and [`cross_section`](crate::cross_section).

use thiserror::Error;

/// Errors from physics data providers.
#[derive(Debug, Error)]
pub enum PhysicsError {
    #[error("Nuclide not found: {0}")]
    UnknownNuclide(String),

    #[error("Invalid table: {0}")]
    InvalidTable(String),
}
