//! Two-phase fit driver.
//!
//! A fit runs up to two phases over the same active variables:
//!
//! | Phase | Calculation parameters | Step tolerance | χ² tolerance |
//! |-------|------------------------|----------------|--------------|
//! | Fast  | [`SimCalcParams::fast`](ibasim_core::SimCalcParams::fast) | `10·xtol` | `chisq_fast_tol` |
//! | Slow  | the simulation's own | `xtol` | `chisq_tol` |
//!
//! Each phase normalises every active variable to 1.0 and iterates the
//! Levenberg-Marquardt solver until the step or the relative change of the
//! reduced χ² drops below tolerance. Any error puts every variable back to
//! its pre-fit value.

use ibasim_compute::ComputeBackend;
use ibasim_core::{Simulation, SpectrumWorkspace};
use log::{info, warn};
use nalgebra::DVector;
use serde::Serialize;

use crate::error::FitError;
use crate::lm::{correlation, IterOutcome, LevenbergMarquardt, LmConfig};
use crate::model::FitModel;
use crate::roi::{roi_sum, Roi};
use crate::stats::{FitPhase, FitStats, FitStatus};
use crate::variable::{FitParams, FittedValue};

/// Iteration callback. Returning `true` aborts the fit.
pub type FitCallback = Box<dyn FnMut(&FitStats) -> bool>;

/// Tolerances and limits of a fit.
#[derive(Debug, Clone, Copy)]
pub struct FitConfig {
    /// Iterations per phase.
    pub n_iters_max: usize,
    /// Relative step tolerance of the slow phase.
    pub xtol: f64,
    pub chisq_tol: f64,
    pub chisq_fast_tol: f64,
    pub phase_start: FitPhase,
    pub phase_stop: FitPhase,
    pub lm: LmConfig,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            n_iters_max: 150,
            xtol: 1e-7,
            chisq_tol: 1e-6,
            chisq_fast_tol: 0.1,
            phase_start: FitPhase::Fast,
            phase_stop: FitPhase::Slow,
            lm: LmConfig::default(),
        }
    }
}

impl FitConfig {
    /// Step and χ² tolerances of `phase`.
    pub fn tolerances(&self, phase: FitPhase) -> (f64, f64) {
        match phase {
            FitPhase::Fast => (10.0 * self.xtol, self.chisq_fast_tol),
            FitPhase::Slow => (self.xtol, self.chisq_tol),
        }
    }

    fn phases(&self) -> impl Iterator<Item = FitPhase> + '_ {
        [FitPhase::Fast, FitPhase::Slow]
            .into_iter()
            .filter(move |p| *p >= self.phase_start && *p <= self.phase_stop)
    }
}

/// Measured and simulated counts of one fit range.
#[derive(Debug, Clone, Serialize)]
pub struct RoiSummary {
    pub roi: Roi,
    pub experimental: f64,
    pub simulated: f64,
}

impl RoiSummary {
    /// Simulated over measured counts, zero when nothing was measured.
    pub fn ratio(&self) -> f64 {
        if self.experimental > 0.0 {
            self.simulated / self.experimental
        } else {
            0.0
        }
    }
}

/// Result of a successful fit.
#[derive(Debug, Clone, Serialize)]
pub struct FitOutcome {
    pub status: FitStatus,
    pub stats: FitStats,
    /// Active variables in solver order.
    pub variables: Vec<FittedValue>,
    /// Correlation matrix, rows and columns in the order of `variables`.
    pub correlation: Vec<Vec<f64>>,
    pub rois: Vec<RoiSummary>,
}

/// Fits a simulation to measured spectra.
pub struct FitDriver {
    model: FitModel,
    config: FitConfig,
    callback: Option<FitCallback>,
}

impl FitDriver {
    /// Every fittable quantity of `sim` is registered, none active.
    pub fn new(sim: Simulation, backend: Box<dyn ComputeBackend>) -> Self {
        let params = FitParams::all(&sim);
        Self {
            model: FitModel::new(sim, params, backend),
            config: FitConfig::default(),
            callback: None,
        }
    }

    pub fn simulation(&self) -> &Simulation {
        &self.model.sim
    }

    pub fn into_simulation(self) -> Simulation {
        self.model.sim
    }

    pub fn params(&self) -> &FitParams {
        &self.model.params
    }

    pub fn params_mut(&mut self) -> &mut FitParams {
        &mut self.model.params
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut FitConfig {
        &mut self.config
    }

    pub fn rois(&self) -> &[Roi] {
        &self.model.rois
    }

    /// Spectra of the most recent simulation, one per detector.
    pub fn workspaces(&self) -> &[SpectrumWorkspace] {
        &self.model.workspaces
    }

    pub fn into_workspaces(self) -> Vec<SpectrumWorkspace> {
        self.model.workspaces
    }

    pub fn experimental(&self, detector: usize) -> Option<&[f64]> {
        self.model.experimental.get(detector)?.as_deref()
    }

    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&FitStats) -> bool + 'static,
    {
        self.callback = Some(Box::new(callback));
    }

    /// Attach the measured spectrum of `detector`.
    pub fn set_experimental(&mut self, detector: usize, counts: Vec<f64>) -> Result<(), FitError> {
        let slot = self
            .model
            .experimental
            .get_mut(detector)
            .ok_or_else(|| FitError::Impossible(format!("no detector {}", detector + 1)))?;
        *slot = Some(counts);
        Ok(())
    }

    /// Add a fit range. The detector must exist.
    pub fn add_roi(&mut self, roi: Roi) -> Result<(), FitError> {
        if roi.detector >= self.model.sim.detectors.len() {
            return Err(FitError::InvalidRoi {
                input: roi.to_string(),
                reason: format!("no detector {}", roi.detector + 1),
            });
        }
        self.model.rois.push(roi);
        Ok(())
    }

    /// Simulate every detector with the simulation's own calculation
    /// parameters.
    pub fn simulate_all(&mut self) -> Result<(), FitError> {
        self.model.begin_phase(self.model.sim.params.clone())?;
        self.model.simulate_all()
    }

    /// Lowest energy of interest for `detector`, given its fit ranges. This
    /// is the beam energy when the detector has no fit ranges.
    pub fn fit_emin(&self, detector: usize) -> f64 {
        let sim = &self.model.sim;
        let Some(det) = sim.detectors.get(detector) else {
            return sim.beam_energy;
        };
        self.model
            .rois
            .iter()
            .filter(|r| r.detector == detector)
            .map(|r| 0.95 * (det.calibration.energy(r.low) - 3.0 * det.calibration.resolution) - 10.0)
            .fold(sim.beam_energy, f64::min)
    }

    /// Measured and simulated counts of every fit range.
    pub fn roi_summaries(&self) -> Vec<RoiSummary> {
        self.model
            .rois
            .iter()
            .map(|roi| {
                let experimental = self
                    .experimental(roi.detector)
                    .map_or(0.0, |exp| roi_sum(exp, roi));
                let simulated = self
                    .model
                    .workspaces
                    .get(roi.detector)
                    .map_or(0.0, |ws| roi_sum(ws.sum.bins.as_slice().unwrap_or(&[]), roi));
                RoiSummary {
                    roi: *roi,
                    experimental,
                    simulated,
                }
            })
            .collect()
    }

    /// Run the fit. On error every variable is back at its pre-fit value.
    pub fn fit(&mut self) -> Result<FitOutcome, FitError> {
        self.check_setup()?;
        let sim = &self.model.sim;
        for var in &mut self.model.params.vars {
            var.value_orig = var.target.get(sim);
            var.value_final = var.value_orig;
            var.err = 0.0;
        }
        match self.run_phases() {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.model.restore();
                Err(e)
            }
        }
    }

    fn check_setup(&self) -> Result<(), FitError> {
        let n_params = self.model.params.n_active();
        if n_params == 0 {
            return Err(FitError::NoParameters);
        }
        if self.model.rois.is_empty() {
            return Err(FitError::NoRanges);
        }
        for roi in &self.model.rois {
            let exp = self.experimental(roi.detector).ok_or_else(|| FitError::InvalidRoi {
                input: roi.to_string(),
                reason: format!("no measured spectrum for detector {}", roi.detector + 1),
            })?;
            if roi.high >= exp.len() {
                return Err(FitError::InvalidRoi {
                    input: roi.to_string(),
                    reason: format!("measured spectrum has {} channels", exp.len()),
                });
            }
        }
        let points = self.model.n_residuals();
        if points < n_params {
            return Err(FitError::NotEnoughData {
                points,
                params: n_params,
            });
        }
        Ok(())
    }

    fn run_phases(&mut self) -> Result<FitOutcome, FitError> {
        let mut last = None;
        for phase in self.config.phases().collect::<Vec<_>>() {
            let (status, lm) = self.run_phase(phase)?;
            info!("Fit phase {} finished: {}", phase.number(), status);
            last = Some((status, lm));
        }
        let (status, lm) = last.ok_or_else(|| FitError::Impossible("no fit phase selected".into()))?;
        self.finish(status, &lm)
    }

    fn run_phase(&mut self, phase: FitPhase) -> Result<(FitStatus, LevenbergMarquardt), FitError> {
        let calc = match phase {
            FitPhase::Fast => self.model.sim.params.fast(),
            FitPhase::Slow => self.model.sim.params.clone(),
        };
        let (xtol, chisq_tol) = self.config.tolerances(phase);

        let sim = &self.model.sim;
        for var in self.model.params.vars.iter_mut().filter(|v| v.active) {
            var.value_phase = var.target.get(sim);
        }
        self.model.stats = FitStats::new(phase);
        self.model.begin_phase(calc)?;

        let n = self.model.n_residuals();
        let p = self.model.params.n_active();
        let dof = n - p;
        info!(
            "Fit phase {} ({:?}): {} parameters, {} data points, xtol {:e}, chisq tol {:e}",
            phase.number(),
            phase,
            p,
            n,
            xtol,
            chisq_tol
        );
        if self.abort_requested() {
            return Err(FitError::UserAbort);
        }

        self.model.stats.begin_iteration(0);
        let x0 = self.model.coordinates();
        let mut lm = LevenbergMarquardt::new(&mut self.model, x0, n, self.config.lm)?;
        self.model.stats.chisq0 = lm.chisq();
        info!("{}", FitStats::header());

        for iter in 0..=self.config.n_iters_max {
            let chisq_dof_old = self.model.stats.chisq_dof;
            if iter > 0 {
                self.model.stats.begin_iteration(iter);
                let outcome = lm.iterate(&mut self.model)?;
                if outcome == IterOutcome::NoProgress && iter == 1 {
                    return Err(FitError::NoProgress);
                }
            }
            self.model.stats.end_iteration(lm.chisq(), lm.rcond(), dof);
            info!("{}", self.model.stats);
            if self.abort_requested() {
                return Err(FitError::UserAbort);
            }
            if iter == 0 {
                continue;
            }
            if test_delta(lm.dx(), lm.x(), xtol * xtol, xtol) {
                return Ok((FitStatus::SuccessDelta, lm));
            }
            let chisq_change = 1.0 - self.model.stats.chisq_dof / chisq_dof_old;
            if chisq_change < 0.0 {
                warn!("Chi squared increased by {:.3e} (relative)", -chisq_change);
            }
            if chisq_change < chisq_tol {
                return Ok((FitStatus::SuccessChisq, lm));
            }
        }
        Err(FitError::MaxIterationsReached {
            stats: Box::new(self.model.stats.clone()),
        })
    }

    /// Write the solution back, derive uncertainties and resimulate at full
    /// fidelity.
    fn finish(&mut self, status: FitStatus, lm: &LevenbergMarquardt) -> Result<FitOutcome, FitError> {
        self.model.apply(lm.x())?;
        let cov = lm.covariance()?;
        let chisq_dof = self.model.stats.chisq_dof;
        let active = self.model.params.active_indices();

        let sim = &self.model.sim;
        for (k, &i) in active.iter().enumerate() {
            let var = &mut self.model.params.vars[i];
            var.value_final = var.target.get(sim);
            var.err = var.scale().abs() * (cov[(k, k)] * chisq_dof).sqrt();
        }

        self.model.sim.sample_model.renormalize();
        let sim = &self.model.sim;
        for var in &mut self.model.params.vars {
            let value = var.target.get(sim);
            if var.active && var.target.is_concentration() && var.value_final != 0.0 {
                var.err *= value / var.value_final;
            }
            var.value_final = value;
        }

        let corr = correlation(&cov);
        let names: Vec<&str> = active.iter().map(|&i| self.model.params.vars[i].name.as_str()).collect();
        info!("Correlation coefficients:");
        for (k, name) in names.iter().enumerate() {
            let row: Vec<String> = (0..k).map(|j| format!("{:6.3}", corr[(k, j)])).collect();
            info!("{:>24} {}", name, row.join(" "));
        }

        self.model.begin_phase(self.model.sim.params.clone())?;
        self.model.simulate_all()?;

        let variables: Vec<FittedValue> = active
            .iter()
            .map(|&i| FittedValue::from(&self.model.params.vars[i]))
            .collect();
        for v in &variables {
            info!("{:>24} = {:12e} +- {:12e} {}", v.name, v.value, v.error, v.unit);
        }
        let rois = self.roi_summaries();
        for r in &rois {
            info!(
                "Det {} {:>14}: exp {:10.0} sim {:12.1} ratio {:.5}",
                r.roi.detector + 1,
                r.roi.to_string(),
                r.experimental,
                r.simulated,
                r.ratio()
            );
        }

        Ok(FitOutcome {
            status,
            stats: self.model.stats.clone(),
            variables,
            correlation: corr.row_iter().map(|row| row.iter().copied().collect()).collect(),
            rois,
        })
    }

    fn abort_requested(&mut self) -> bool {
        match self.callback.as_mut() {
            Some(callback) => callback(&self.model.stats),
            None => false,
        }
    }
}

/// True when every step component satisfies `|dx_i| < epsabs + epsrel·|x_i|`.
pub fn test_delta(dx: &DVector<f64>, x: &DVector<f64>, epsabs: f64, epsrel: f64) -> bool {
    dx.iter()
        .zip(x.iter())
        .all(|(d, xi)| d.abs() < epsabs + epsrel * xi.abs())
}
