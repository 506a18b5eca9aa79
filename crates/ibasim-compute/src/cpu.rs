//! CPU compute backend using Rayon for shared-memory parallelism.

use ibasim_core::{simulate_workspace, Simulation, SpectrumWorkspace};
use log::debug;
use rayon::prelude::*;

use crate::backend::{first_error, BackendType, ComputeBackend, ComputeError, DeviceInfo};

/// CPU backend that runs one workspace per Rayon task.
pub struct CpuBackend {
    num_threads: usize,
    pool: Option<rayon::ThreadPool>,
}

impl CpuBackend {
    /// Create a new CPU backend on the global Rayon pool.
    pub fn new() -> Self {
        Self {
            num_threads: rayon::current_num_threads(),
            pool: None,
        }
    }

    /// Create a CPU backend with its own pool of `num_threads` threads.
    pub fn with_threads(num_threads: usize) -> Result<Self, ComputeError> {
        if num_threads == 0 {
            return Err(ComputeError::ThreadPool("thread count must be at least 1".into()));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| ComputeError::ThreadPool(e.to_string()))?;
        Ok(Self {
            num_threads,
            pool: Some(pool),
        })
    }

    fn run(&self, sim: &Simulation, batch: &mut [&mut SpectrumWorkspace]) -> Result<(), ComputeError> {
        let results = batch
            .par_iter_mut()
            .map(|ws| simulate_workspace(ws, sim))
            .collect();
        first_error(results)
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeBackend for CpuBackend {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            name: format!("CPU ({} threads)", self.num_threads),
            backend_type: BackendType::Cpu,
            compute_units: Some(self.num_threads),
        }
    }

    fn simulate_batch(&self, sim: &Simulation, batch: &mut [&mut SpectrumWorkspace]) -> Result<(), ComputeError> {
        if batch.len() == 1 {
            return simulate_workspace(&mut *batch[0], sim).map_err(|source| ComputeError::Task { index: 0, source });
        }
        debug!("Simulating {} workspaces on {} threads", batch.len(), self.num_threads);
        match &self.pool {
            Some(pool) => pool.install(|| self.run(sim, batch)),
            None => self.run(sim, batch),
        }
    }
}
