//! # ibasim Compute
//!
//! Execution backends for spectrum workspaces. Each detector's
//! [`SpectrumWorkspace`](ibasim_core::SpectrumWorkspace) owns all of its
//! mutable state, so a batch of workspaces can be simulated independently.
//! The [`ComputeBackend`](backend::ComputeBackend) trait hides how that batch
//! is scheduled.
//!
//! ## Available backends
//!
//! | Backend | Feature flag | Execution |
//! |---------|-------------|-----------|
//! | Serial | always | Calling thread, in order |
//! | CPU (Rayon) | `cpu` (default) | One workspace per task |

pub mod backend;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use backend::{BackendType, ComputeBackend, ComputeError, DeviceInfo, SerialBackend};

#[cfg(feature = "cpu")]
pub use cpu::CpuBackend;

/// The preferred backend for this build: rayon when the `cpu` feature is on,
/// serial otherwise.
pub fn default_backend() -> Box<dyn ComputeBackend> {
    #[cfg(feature = "cpu")]
    {
        Box::new(CpuBackend::new())
    }
    #[cfg(not(feature = "cpu"))]
    {
        Box::new(SerialBackend)
    }
}
