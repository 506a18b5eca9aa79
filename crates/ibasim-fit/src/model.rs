//! Residual evaluation against measured spectra.
//!
//! [`FitModel`] owns the simulation being fitted, its workspaces and the
//! measured spectra. Each evaluation writes the solver coordinates into the
//! simulation, brings every workspace with fit ranges up to date (full
//! simulation, histogram rescaling, or the residual cache) and assembles the
//! weighted residual vector
//!
//! $$f_i = \sqrt{w_i}\,(y_i^{exp} - y_i^{sim}), \qquad w_i = \begin{cases} 1/y_i^{exp} & y_i^{exp} > 1 \\ 1 & \text{otherwise.} \end{cases}$$
//!
//! Channels past the end of the simulated spectrum count as zero.

use std::time::Instant;

use ibasim_compute::ComputeBackend;
use ibasim_core::{SimCalcParams, Simulation, SpectrumWorkspace};
use log::debug;
use nalgebra::DVector;

use crate::cache::ResidualCache;
use crate::error::FitError;
use crate::lm::{EvalKind, Residuals};
use crate::roi::Roi;
use crate::stats::{FitPhase, FitStats};
use crate::variable::{FitParams, ParamRef};

/// How a workspace's histograms relate to the current variable values.
enum WorkspaceState {
    Current,
    /// Only the fluence changed; the histograms can be rescaled.
    FluenceOnly,
    Stale,
}

pub struct FitModel {
    pub sim: Simulation,
    pub params: FitParams,
    pub rois: Vec<Roi>,
    /// Measured spectrum per detector.
    pub experimental: Vec<Option<Vec<f64>>>,
    pub workspaces: Vec<SpectrumWorkspace>,
    pub stats: FitStats,
    backend: Box<dyn ComputeBackend>,
    calc: SimCalcParams,
    cache: ResidualCache,
    /// Active variable values each workspace's histograms were made with.
    snapshots: Vec<Option<Vec<f64>>>,
    /// Indices into `params.vars` of the active variables, in solver order.
    active: Vec<usize>,
}

impl FitModel {
    pub fn new(sim: Simulation, params: FitParams, backend: Box<dyn ComputeBackend>) -> Self {
        let n_det = sim.detectors.len();
        let calc = sim.params.clone();
        Self {
            sim,
            params,
            rois: Vec::new(),
            experimental: vec![None; n_det],
            workspaces: Vec::new(),
            stats: FitStats::new(FitPhase::Slow),
            backend,
            calc,
            cache: ResidualCache::new(n_det),
            snapshots: vec![None; n_det],
            active: Vec::new(),
        }
    }

    /// Number of residuals: total channels of all ranges.
    pub fn n_residuals(&self) -> usize {
        self.rois.iter().map(Roi::len).sum()
    }

    /// Start a phase: fix the active set, switch calculation parameters and
    /// rebuild every workspace.
    pub(crate) fn begin_phase(&mut self, calc: SimCalcParams) -> Result<(), FitError> {
        self.active = self.params.active_indices();
        self.calc = calc;
        self.cache.invalidate();
        self.snapshots.iter_mut().for_each(|s| *s = None);
        self.rebuild_workspaces()
    }

    pub(crate) fn rebuild_workspaces(&mut self) -> Result<(), FitError> {
        self.workspaces = (0..self.sim.detectors.len())
            .map(|i| SpectrumWorkspace::with_params(&self.sim, i, self.calc.clone()))
            .collect::<Result<_, _>>()?;
        self.snapshots = vec![None; self.workspaces.len()];
        Ok(())
    }

    /// Solver coordinates of the current variable values.
    pub(crate) fn coordinates(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.active.len(),
            self.active.iter().map(|&i| {
                let v = &self.params.vars[i];
                v.value(&self.sim) / v.scale()
            }),
        )
    }

    /// Write solver coordinates `x` into the simulation.
    pub(crate) fn apply(&mut self, x: &DVector<f64>) -> Result<(), FitError> {
        for (k, &i) in self.active.iter().enumerate() {
            let var = &self.params.vars[i];
            let value = x[k] * var.scale();
            if !value.is_finite() {
                return Err(FitError::NonFiniteParameter(var.name.clone()));
            }
            var.target.set(&mut self.sim, value);
        }
        Ok(())
    }

    /// Put every variable back to its pre-fit value.
    pub(crate) fn restore(&mut self) {
        for var in &self.params.vars {
            var.target.set(&mut self.sim, var.value_orig);
        }
        self.snapshots.iter_mut().for_each(|s| *s = None);
        self.cache.invalidate();
    }

    fn active_values(&self) -> Vec<f64> {
        self.active
            .iter()
            .map(|&i| self.params.vars[i].value(&self.sim))
            .collect()
    }

    fn affects(&self, var: usize, workspace: usize) -> bool {
        self.params.vars[var]
            .target
            .detector()
            .map_or(true, |d| d == workspace)
    }

    /// Values of the active variables that affect `workspace`.
    fn key(&self, workspace: usize, values: &[f64]) -> Vec<f64> {
        self.active
            .iter()
            .zip(values)
            .filter(|(&i, _)| self.affects(i, workspace))
            .map(|(_, &v)| v)
            .collect()
    }

    fn state(&self, workspace: usize, values: &[f64]) -> WorkspaceState {
        let Some(snapshot) = &self.snapshots[workspace] else {
            return WorkspaceState::Stale;
        };
        let mut fluence_changed = false;
        for ((&i, now), then) in self.active.iter().zip(values).zip(snapshot) {
            if now.to_bits() == then.to_bits() || !self.affects(i, workspace) {
                continue;
            }
            if self.params.vars[i].target == ParamRef::Fluence {
                fluence_changed = true;
            } else {
                return WorkspaceState::Stale;
            }
        }
        if fluence_changed {
            WorkspaceState::FluenceOnly
        } else {
            WorkspaceState::Current
        }
    }

    fn has_rois(&self, workspace: usize) -> bool {
        self.rois.iter().any(|r| r.detector == workspace)
    }

    /// Fully simulate the given workspaces at the current values.
    pub(crate) fn simulate(&mut self, which: &[usize]) -> Result<(), FitError> {
        if which.is_empty() {
            return Ok(());
        }
        self.sim.sanity_check()?;
        for &k in which {
            self.workspaces[k] = SpectrumWorkspace::with_params(&self.sim, k, self.calc.clone())?;
        }
        let start = Instant::now();
        let mut batch: Vec<&mut SpectrumWorkspace> = self
            .workspaces
            .iter_mut()
            .enumerate()
            .filter(|(k, _)| which.contains(k))
            .map(|(_, ws)| ws)
            .collect();
        self.backend.simulate_batch(&self.sim, &mut batch)?;
        self.stats.cputime_iter += start.elapsed().as_secs_f64();
        self.stats.n_evals_iter += 1;

        let values = self.active_values();
        for &k in which {
            self.snapshots[k] = Some(values.clone());
        }
        Ok(())
    }

    /// Simulate every workspace at the current values.
    pub(crate) fn simulate_all(&mut self) -> Result<(), FitError> {
        let all: Vec<usize> = (0..self.workspaces.len()).collect();
        self.simulate(&all)
    }

    /// Weighted residuals of `workspace`, its ranges in order.
    fn residual_block(&self, workspace: usize) -> Result<Vec<f64>, FitError> {
        let exp = self.experimental[workspace]
            .as_deref()
            .ok_or_else(|| FitError::Impossible(format!("no measured spectrum for detector {}", workspace + 1)))?;
        let sum = &self.workspaces[workspace].sum.bins;
        let mut block = Vec::new();
        for roi in self.rois.iter().filter(|r| r.detector == workspace) {
            for i in roi.channels() {
                let e = exp.get(i).copied().ok_or_else(|| {
                    FitError::Impossible(format!("fit range {roi} beyond measured spectrum of {} channels", exp.len()))
                })?;
                let s = sum.get(i).copied().unwrap_or(0.0);
                let w = if e > 1.0 { 1.0 / e } else { 1.0 };
                block.push(w.sqrt() * (e - s));
            }
        }
        Ok(block)
    }
}

impl Residuals for FitModel {
    fn evaluate(&mut self, x: &DVector<f64>, kind: EvalKind, out: &mut DVector<f64>) -> Result<(), FitError> {
        self.stats.iter_call += 1;
        self.apply(x)?;
        let values = self.active_values();
        if kind == EvalKind::Base {
            self.cache.begin_epoch();
        }

        let mut pending = Vec::new();
        let mut refresh = Vec::new();
        let mut rescaled = false;
        for k in 0..self.workspaces.len() {
            if !self.has_rois(k) {
                continue;
            }
            let key = self.key(k, &values);
            if kind == EvalKind::Jacobian && self.cache.lookup(k, &key).is_some() {
                self.stats.n_cache_hits += 1;
                continue;
            }
            match self.state(k, &values) {
                WorkspaceState::Current => {}
                WorkspaceState::FluenceOnly => {
                    let fluence = self.sim.fluence;
                    if self.workspaces[k].rescale_fluence(fluence) {
                        self.snapshots[k] = Some(values.clone());
                        rescaled = true;
                    } else {
                        pending.push(k);
                    }
                }
                WorkspaceState::Stale => pending.push(k),
            }
            refresh.push((k, key));
        }
        if rescaled {
            self.stats.n_speedup_evals_iter += 1;
        }
        debug!(
            "Evaluation {} ({:?}): simulating {:?}, {} blocks refreshed",
            self.stats.iter_call,
            kind,
            pending,
            refresh.len()
        );
        self.simulate(&pending)?;

        // Only base evaluations populate the cache; Jacobian blocks are used once.
        let mut fresh: Vec<Option<Vec<f64>>> = vec![None; self.workspaces.len()];
        for (k, key) in refresh {
            let block = self.residual_block(k)?;
            if kind == EvalKind::Base {
                self.cache.store(k, key, block);
            } else {
                fresh[k] = Some(block);
            }
        }

        let mut offsets = vec![0usize; self.workspaces.len()];
        let mut i_vec = 0;
        for roi in &self.rois {
            let k = roi.detector;
            let block = match &fresh[k] {
                Some(block) => block.as_slice(),
                None => self
                    .cache
                    .lookup(k, &self.key(k, &values))
                    .ok_or_else(|| FitError::Impossible(format!("residuals of detector {} missing", k + 1)))?,
            };
            let n = roi.len();
            let part = block
                .get(offsets[k]..offsets[k] + n)
                .ok_or_else(|| FitError::Impossible("residual block shorter than its fit ranges".into()))?;
            if i_vec + n > out.len() {
                return Err(FitError::Impossible("too many channels for the residual vector".into()));
            }
            out.rows_mut(i_vec, n).copy_from_slice(part);
            offsets[k] += n;
            i_vec += n;
        }
        if i_vec != out.len() {
            return Err(FitError::Impossible(format!(
                "{} residuals set, {} expected",
                i_vec,
                out.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibasim_compute::SerialBackend;
    use ibasim_core::{LayerModel, SampleModel};
    use ibasim_physics::stopping::AnalyticStopping;
    use ibasim_physics::Nuclide;
    use std::sync::Arc;

    /// 500 tfu Si with `fluence` and `det1_solid` active, at the start of a
    /// phase.
    fn model() -> FitModel {
        let si = Arc::new(Nuclide::lookup("28Si").unwrap());
        let model = SampleModel::new(vec![si], vec![LayerModel::new(500.0, vec![1.0])]);
        let mut sim = Simulation::new(
            Arc::new(Nuclide::lookup("4He").unwrap()),
            2000.0,
            model,
            Arc::new(AnalyticStopping),
        );
        sim.add_auto_reactions(true, false);
        let mut params = FitParams::all(&sim);
        params.activate(&["fluence", "det1_solid"]).unwrap();
        for var in &mut params.vars {
            var.value_orig = var.value(&sim);
            var.value_phase = var.value_orig;
        }
        let calc = sim.params.clone();
        let mut m = FitModel::new(sim, params, Box::new(SerialBackend));
        m.begin_phase(calc).unwrap();
        m
    }

    #[test]
    fn test_non_finite_coordinate_is_rejected_and_restored() {
        let mut m = model();
        let solid = m.sim.detectors[0].solid;

        let err = m.apply(&DVector::from_vec(vec![1.5, f64::NAN])).unwrap_err();
        assert!(matches!(&err, FitError::NonFiniteParameter(name) if name == "det1_solid"));
        assert_eq!(err.to_string(), "Fit variable det1_solid is not finite");
        assert_eq!(m.sim.fluence, 1.5e12);
        assert_eq!(m.sim.detectors[0].solid, solid);

        m.restore();
        assert_eq!(m.sim.fluence, 1.0e12);
        assert_eq!(m.coordinates().as_slice(), &[1.0, 1.0]);
    }

    #[test]
    fn test_infinite_first_coordinate_writes_nothing() {
        let mut m = model();
        let err = m.apply(&DVector::from_vec(vec![f64::INFINITY, 1.0])).unwrap_err();
        assert!(matches!(&err, FitError::NonFiniteParameter(name) if name == "fluence"));
        assert_eq!(m.sim.fluence, 1.0e12);
    }
}
