//! Compute backend trait and device abstraction.
//!
//! The [`ComputeBackend`] trait decides how a batch of independent spectrum
//! workspaces is executed, so the fit driver in `ibasim-fit` never deals
//! with threads directly.

use ibasim_core::{simulate_workspace, SimError, Simulation, SpectrumWorkspace};
use thiserror::Error;

/// Errors originating from compute backends.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Backend not available: {0}")]
    Unavailable(String),

    #[error("Simulation of workspace {index} failed: {source}")]
    Task {
        index: usize,
        #[source]
        source: SimError,
    },

    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}

impl ComputeError {
    /// Position of the failing workspace within the batch, if any.
    pub fn task_index(&self) -> Option<usize> {
        match self {
            ComputeError::Task { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Describes the capabilities of a compute backend.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub name: String,
    pub backend_type: BackendType,
    pub compute_units: Option<usize>,
}

/// The type of compute backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    Serial,
    Cpu,
}

/// Abstraction over batch execution.
///
/// Implementations must run every workspace in the batch, even after one of
/// them fails, and report the error of the lowest-index failure so that the
/// outcome does not depend on scheduling.
pub trait ComputeBackend: Send + Sync {
    /// Return information about the device.
    fn device_info(&self) -> DeviceInfo;

    /// Fully simulate every workspace in `batch` against `sim`.
    ///
    /// # Arguments
    /// * `sim` - Read-only simulation definition shared by all tasks.
    /// * `batch` - Workspaces to simulate; each is mutated by exactly one task.
    fn simulate_batch(&self, sim: &Simulation, batch: &mut [&mut SpectrumWorkspace]) -> Result<(), ComputeError>;
}

/// Turn per-task results into the batch result: the first error by index.
pub(crate) fn first_error(results: Vec<Result<(), SimError>>) -> Result<(), ComputeError> {
    match results.into_iter().enumerate().find(|(_, r)| r.is_err()) {
        Some((index, Err(source))) => Err(ComputeError::Task { index, source }),
        _ => Ok(()),
    }
}

/// Runs the batch on the calling thread, in order.
#[derive(Debug, Clone, Copy, Default)]
pub struct SerialBackend;

impl ComputeBackend for SerialBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: "Serial".into(),
            backend_type: BackendType::Serial,
            compute_units: Some(1),
        }
    }

    fn simulate_batch(&self, sim: &Simulation, batch: &mut [&mut SpectrumWorkspace]) -> Result<(), ComputeError> {
        let results = batch.iter_mut().map(|ws| simulate_workspace(ws, sim)).collect();
        first_error(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanity(msg: &str) -> SimError {
        SimError::SanityCheckFailure(msg.into())
    }

    #[test]
    fn test_first_error_picks_lowest_index() {
        let results = vec![Ok(()), Err(sanity("one")), Err(sanity("two"))];
        let err = first_error(results).unwrap_err();
        assert_eq!(err.task_index(), Some(1));
        assert!(err.to_string().contains("one"));
    }

    #[test]
    fn test_first_error_all_ok() {
        assert!(first_error(vec![Ok(()), Ok(())]).is_ok());
        assert!(first_error(Vec::new()).is_ok());
    }

    #[test]
    fn test_serial_device_info() {
        let info = SerialBackend.device_info();
        assert_eq!(info.backend_type, BackendType::Serial);
        assert_eq!(info.compute_units, Some(1));
    }
}
