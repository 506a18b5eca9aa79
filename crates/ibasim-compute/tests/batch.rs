//! Batch execution across backends.
//!
//! ## Coverage
//! - Serial and Rayon backends produce identical spectra
//! - A failing workspace aborts the batch with the lowest failing index
//! - A batch of one runs inline

use std::sync::Arc;

use approx::assert_relative_eq;

use ibasim_compute::{ComputeBackend, ComputeError, CpuBackend, SerialBackend};
use ibasim_core::{Detector, LayerModel, SampleModel, Simulation, SpectrumWorkspace};
use ibasim_physics::stopping::AnalyticStopping;
use ibasim_physics::Nuclide;

// ─────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────

fn nuclide(name: &str) -> Arc<Nuclide> {
    Arc::new(Nuclide::lookup(name).unwrap())
}

/// Au on Si seen by three detectors at different angles.
fn three_detector_simulation() -> Simulation {
    let model = SampleModel::new(
        vec![nuclide("197Au"), nuclide("28Si")],
        vec![
            LayerModel::new(30.0, vec![1.0, 0.0]),
            LayerModel::new(1500.0, vec![0.0, 1.0]),
        ],
    );
    let mut sim = Simulation::new(nuclide("4He"), 2000.0, model, Arc::new(AnalyticStopping));
    sim.detectors = [165.0, 150.0, 120.0]
        .iter()
        .map(|deg: &f64| Detector {
            theta: deg.to_radians(),
            ..Detector::default()
        })
        .collect();
    sim.add_auto_reactions(true, false);
    sim
}

fn workspaces(sim: &Simulation) -> Vec<SpectrumWorkspace> {
    (0..sim.detectors.len())
        .map(|i| SpectrumWorkspace::new(sim, i).unwrap())
        .collect()
}

fn run(backend: &dyn ComputeBackend, sim: &Simulation, ws: &mut [SpectrumWorkspace]) -> Result<(), ComputeError> {
    let mut batch: Vec<&mut SpectrumWorkspace> = ws.iter_mut().collect();
    backend.simulate_batch(sim, &mut batch)
}

fn broken_foil() -> SampleModel {
    SampleModel::new(vec![nuclide("28Si")], vec![LayerModel::new(-5.0, vec![1.0])])
}

// ─────────────────────────────────────────────────────────────
// Agreement
// ─────────────────────────────────────────────────────────────

#[test]
fn test_serial_and_parallel_agree() {
    let sim = three_detector_simulation();
    let mut serial = workspaces(&sim);
    let mut parallel = workspaces(&sim);

    run(&SerialBackend, &sim, &mut serial).unwrap();
    run(&CpuBackend::with_threads(3).unwrap(), &sim, &mut parallel).unwrap();

    for (a, b) in serial.iter().zip(&parallel) {
        assert!(a.sum.sum() > 0.0);
        for (x, y) in a.sum.bins.iter().zip(b.sum.bins.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-12, epsilon = 1e-15);
        }
    }
}

#[test]
fn test_single_workspace_runs_inline() {
    let sim = three_detector_simulation();
    let mut ws = vec![SpectrumWorkspace::new(&sim, 2).unwrap()];
    run(&CpuBackend::new(), &sim, &mut ws).unwrap();
    assert!(ws[0].sum.sum() > 0.0);
}

// ─────────────────────────────────────────────────────────────
// Failures
// ─────────────────────────────────────────────────────────────

#[test]
fn test_lowest_failing_index_is_reported() {
    let mut sim = three_detector_simulation();
    let mut ws = workspaces(&sim);
    sim.detectors[1].foil = Some(broken_foil());
    sim.detectors[2].foil = Some(broken_foil());

    for backend in [&SerialBackend as &dyn ComputeBackend, &CpuBackend::with_threads(2).unwrap()] {
        let err = run(backend, &sim, &mut ws).unwrap_err();
        assert_eq!(err.task_index(), Some(1), "{}", backend.device_info().name);
    }
}

#[test]
fn test_single_workspace_failure_has_index_zero() {
    let mut sim = three_detector_simulation();
    let mut ws = vec![SpectrumWorkspace::new(&sim, 0).unwrap()];
    sim.detectors[0].foil = Some(broken_foil());
    let err = run(&CpuBackend::new(), &sim, &mut ws).unwrap_err();
    assert!(matches!(err, ComputeError::Task { index: 0, .. }));
}
