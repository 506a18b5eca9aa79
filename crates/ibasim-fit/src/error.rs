//! Fit errors.

use ibasim_compute::ComputeError;
use ibasim_core::SimError;
use thiserror::Error;

use crate::stats::FitStats;

/// Reasons a fit can fail. Every variant leaves the fit variables at their
/// pre-fit values.
#[derive(Debug, Error)]
pub enum FitError {
    #[error("No parameters to fit")]
    NoParameters,

    #[error("No fit range(s) given, can not fit")]
    NoRanges,

    #[error("Not enough data ({points} points) for {params} free parameters")]
    NotEnoughData { points: usize, params: usize },

    #[error("Invalid fit range \"{input}\": {reason}")]
    InvalidRoi { input: String, reason: String },

    #[error("Unknown fit variable \"{0}\"")]
    UnknownVariable(String),

    #[error("Simulation failed sanity check: {0}")]
    SanityCheckFailure(String),

    #[error("Simulation workspace could not be initialized: {0}")]
    WorkspaceInitFailure(String),

    #[error("Fit variable {0} is not finite")]
    NonFiniteParameter(String),

    #[error("Iteration is not making progress")]
    NoProgress,

    #[error("Maximum number of iterations reached (chisq/dof {:.6})", .stats.chisq_dof)]
    MaxIterationsReached { stats: Box<FitStats> },

    #[error("User requested abort")]
    UserAbort,

    #[error("An impossible thing has happened: {0}")]
    Impossible(String),

    #[error("Simulation error: {0}")]
    Simulation(SimError),

    #[error("Compute backend error: {0}")]
    Compute(ComputeError),
}

impl From<SimError> for FitError {
    fn from(e: SimError) -> Self {
        match e {
            SimError::SanityCheckFailure(msg) => FitError::SanityCheckFailure(msg),
            e @ SimError::WorkspaceInitFailure { .. } => FitError::WorkspaceInitFailure(e.to_string()),
            e => FitError::Simulation(e),
        }
    }
}

impl From<ComputeError> for FitError {
    fn from(e: ComputeError) -> Self {
        match e {
            ComputeError::Task { source, .. } => source.into(),
            e => FitError::Compute(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_errors_map_to_fit_kinds() {
        let e: FitError = SimError::SanityCheckFailure("bad layer".into()).into();
        assert!(matches!(e, FitError::SanityCheckFailure(ref m) if m == "bad layer"));

        let e: FitError = SimError::WorkspaceInitFailure {
            detector: 1,
            reason: "too many channels".into(),
        }
        .into();
        assert!(matches!(e, FitError::WorkspaceInitFailure(_)));
    }

    #[test]
    fn test_task_errors_unwrap_to_sim_kind() {
        let e: FitError = ComputeError::Task {
            index: 3,
            source: SimError::SanityCheckFailure("x".into()),
        }
        .into();
        assert!(matches!(e, FitError::SanityCheckFailure(_)));

        let e: FitError = ComputeError::ThreadPool("gone".into()).into();
        assert!(matches!(e, FitError::Compute(_)));
    }
}
