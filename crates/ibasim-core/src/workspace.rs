//! Per-detector simulation state.
//!
//! A [`SpectrumWorkspace`] owns everything one detector's simulation
//! mutates: the reaction channels with their bricks and histograms, the sum
//! spectrum and a snapshot of the calculation parameters. Workspaces are
//! independent of each other and can be simulated in parallel.
//!
//! Creation sizes the histograms and brick storage once. Everything that a
//! fit may change (sample, calibration, beam energy, fluence) is re-read
//! from the [`Simulation`] by [`SpectrumWorkspace::prepare`] before every run.

use std::sync::Arc;

use ibasim_physics::ReactionKey;
use log::{debug, warn};

use crate::detector::Detector;
use crate::error::SimError;
use crate::geostragg::GeostraggVars;
use crate::ion::IonState;
use crate::params::SimCalcParams;
use crate::reaction::ReactionChannel;
use crate::sample::Sample;
use crate::simulation::Simulation;
use crate::spectrum::Histogram;
use crate::units::{BRICKS_MAX, CHANNELS_ABSOLUTE_MAX, CHANNELS_ABSOLUTE_MIN};

pub struct SpectrumWorkspace {
    pub detector_index: usize,
    pub detector: Detector,
    pub params: SimCalcParams,
    pub sample: Arc<Sample>,
    pub foil: Option<Arc<Sample>>,
    /// Beam at the surface, in the sample frame.
    pub incident: IonState,
    pub channels: Vec<ReactionChannel>,
    pub sum: Histogram,
    pub n_channels: usize,
    pub n_bricks: usize,
    /// Fluence the histograms currently correspond to.
    pub fluence: f64,
    /// keV
    pub emin: f64,
    pub geostragg: GeostraggVars,
}

impl SpectrumWorkspace {
    /// Workspace for detector `detector_index` using the simulation's own
    /// calculation parameters.
    pub fn new(sim: &Simulation, detector_index: usize) -> Result<Self, SimError> {
        Self::with_params(sim, detector_index, sim.params.clone())
    }

    /// Workspace for detector `detector_index` with explicit parameters.
    ///
    /// Unsupported option combinations are downgraded with a warning: a
    /// manual exit angle is dropped when dual scattering is on, and
    /// geometric straggling is dropped when a manual exit angle is set.
    pub fn with_params(sim: &Simulation, detector_index: usize, params: SimCalcParams) -> Result<Self, SimError> {
        let detector = sim
            .detectors
            .get(detector_index)
            .cloned()
            .ok_or_else(|| SimError::WorkspaceInitFailure {
                detector: detector_index,
                reason: format!("only {} detectors defined", sim.detectors.len()),
            })?;

        let mut params = params;
        let manual_beta = params.beta_manual.is_some();
        if manual_beta && params.ds {
            warn!("Manual exit angle together with dual scattering is not supported, manual exit angle disabled");
            params.beta_manual = None;
        }
        if manual_beta && params.geostragg {
            warn!("Manual exit angle together with geometric straggling is not supported, geometric straggling disabled");
            params.geostragg = false;
        }

        let n_channels = channel_count(sim, &detector).ok_or_else(|| SimError::WorkspaceInitFailure {
            detector: detector_index,
            reason: format!("spectrum would need more than {CHANNELS_ABSOLUTE_MAX} channels"),
        })?;
        let n_bricks = brick_count(sim, &detector, &params);
        debug!(
            "Workspace for detector {}: {} channels, {} bricks per reaction",
            detector_index, n_channels, n_bricks
        );

        let channels = sim
            .reactions
            .iter()
            .map(|r| {
                let key = ReactionKey::new(r.kind, &r.incident, &r.target);
                ReactionChannel::new(
                    r.clone(),
                    sim.sample_model.nuclide_index(&r.target),
                    sim.cross_sections.resolve(&key),
                    n_bricks,
                    n_channels,
                    &detector.calibration,
                )
            })
            .collect();

        let mut ws = Self {
            detector_index,
            sum: Histogram::new(n_channels, &detector.calibration),
            detector,
            params,
            sample: Arc::new(Sample::from_model(&sim.sample_model)?),
            foil: None,
            incident: IonState::new(Arc::clone(&sim.beam), sim.beam_energy, 0.0),
            channels,
            n_channels,
            n_bricks,
            fluence: sim.fluence,
            emin: sim.emin,
            geostragg: GeostraggVars::default(),
        };
        ws.prepare(sim)?;
        Ok(ws)
    }

    /// Re-read everything a fit may have changed.
    pub fn prepare(&mut self, sim: &Simulation) -> Result<(), SimError> {
        self.detector = sim
            .detectors
            .get(self.detector_index)
            .cloned()
            .ok_or_else(|| SimError::WorkspaceInitFailure {
                detector: self.detector_index,
                reason: "detector removed".into(),
            })?;
        self.sample = Arc::new(Sample::from_model(&sim.sample_model)?);
        self.foil = match &self.detector.foil {
            Some(model) => Some(Arc::new(Sample::from_model(model)?)),
            None => None,
        };

        let mut incident = IonState::new(Arc::clone(&sim.beam), sim.beam_energy, sim.beam_spread_variance());
        let (theta, phi) = sim.incident_angles();
        incident.set_angle(theta, phi);
        self.incident = incident;

        self.fluence = sim.fluence;
        self.emin = sim.emin;
        let calibration = self.detector.calibration;
        self.sum.set_calibration(&calibration);
        for ch in &mut self.channels {
            ch.histogram.set_calibration(&calibration);
        }
        self.geostragg = GeostraggVars::new(sim, &self.detector, &self.params, self.incident.angles());
        Ok(())
    }

    pub fn histograms_reset(&mut self) {
        for ch in &mut self.channels {
            ch.histogram.reset();
        }
        self.sum.reset();
    }

    pub fn histograms_scale(&mut self, factor: f64) {
        for ch in &mut self.channels {
            ch.histogram.scale(factor);
        }
    }

    /// Rebuild the sum spectrum from the reaction histograms.
    pub fn calculate_sum(&mut self) {
        self.sum.reset();
        for ch in &self.channels {
            self.sum.add(&ch.histogram);
        }
    }

    /// Rescale existing spectra to `fluence` without re-simulating.
    ///
    /// Returns `false` (and changes nothing) when the current spectra were
    /// made at zero fluence and cannot be rescaled.
    pub fn rescale_fluence(&mut self, fluence: f64) -> bool {
        if !(self.fluence > 0.0) {
            return false;
        }
        self.histograms_scale(fluence / self.fluence);
        self.fluence = fluence;
        self.calculate_sum();
        true
    }
}

/// Channels needed to hold the highest product energy plus three resolution
/// sigmas and a 10 % margin. `None` when that exceeds the absolute maximum.
fn channel_count(sim: &Simulation, detector: &Detector) -> Option<usize> {
    let cal = &detector.calibration;
    let sigma = detector.resolution_variance().sqrt();
    let mut n = CHANNELS_ABSOLUTE_MIN;
    for r in &sim.reactions {
        let Some(k) = r.kinematic_factor(detector.theta) else {
            debug!("{} is not possible at {:.2} deg", r.name(), detector.theta.to_degrees());
            continue;
        };
        let e_safe = 1.1 * (k * sim.beam_energy + 3.0 * sigma);
        let needed = ((e_safe - cal.offset) / cal.slope).ceil();
        if !needed.is_finite() || needed > CHANNELS_ABSOLUTE_MAX as f64 {
            return None;
        }
        if needed > n as f64 {
            n = needed as usize;
        }
    }
    Some(n)
}

/// Bricks per reaction: one per incident step down to zero energy, a 10 %
/// margin for steps that lose less than their budget, one per layer
/// boundary and the surface brick.
fn brick_count(sim: &Simulation, detector: &Detector, params: &SimCalcParams) -> usize {
    if params.n_bricks_max > 0 {
        return params.n_bricks_max;
    }
    let step = if params.incident.step > 0.0 {
        params.incident.step
    } else {
        params.brick_width_sigmas * detector.resolution_variance().sqrt()
    };
    let steps = (sim.beam_energy / step).ceil();
    if !steps.is_finite() || steps > BRICKS_MAX as f64 {
        warn!("Number of bricks limited to {BRICKS_MAX}");
        return BRICKS_MAX;
    }
    let steps = steps as usize;
    let estimate = steps + steps / 10 + sim.sample_model.layers.len() + 1;
    if estimate > BRICKS_MAX {
        warn!("Number of bricks limited to {BRICKS_MAX}");
        return BRICKS_MAX;
    }
    estimate.max(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{LayerModel, SampleModel};
    use ibasim_physics::stopping::AnalyticStopping;
    use ibasim_physics::Nuclide;

    fn simulation() -> Simulation {
        let au = Arc::new(Nuclide::lookup("197Au").unwrap());
        let model = SampleModel::new(vec![au], vec![LayerModel::new(500.0, vec![1.0])]);
        let mut sim = Simulation::new(
            Arc::new(Nuclide::lookup("4He").unwrap()),
            2000.0,
            model,
            Arc::new(AnalyticStopping),
        );
        sim.detectors[0].calibration.slope = 2.0;
        sim.add_auto_reactions(true, false);
        sim
    }

    #[test]
    fn test_channel_count_covers_highest_energy() {
        let sim = simulation();
        let ws = SpectrumWorkspace::new(&sim, 0).unwrap();
        let k = sim.reactions[0].kinematic_factor(sim.detectors[0].theta).unwrap();
        let top = ws.detector.calibration.energy(ws.n_channels);
        assert!(top >= 1.1 * k * 2000.0);
        assert!(ws.n_channels < 2000);
        assert_eq!(ws.channels.len(), 1);
        assert_eq!(ws.channels[0].histogram.len(), ws.n_channels);
    }

    #[test]
    fn test_too_many_channels_fails() {
        let mut sim = simulation();
        sim.detectors[0].calibration.slope = 0.01;
        assert!(matches!(
            SpectrumWorkspace::new(&sim, 0),
            Err(SimError::WorkspaceInitFailure { detector: 0, .. })
        ));
    }

    #[test]
    fn test_brick_count_from_fixed_step() {
        let mut sim = simulation();
        sim.params.incident.step = 20.0;
        let ws = SpectrumWorkspace::new(&sim, 0).unwrap();
        // 100 steps, 10 spare, one layer boundary and the surface brick.
        assert_eq!(ws.n_bricks, 112);
    }

    #[test]
    fn test_brick_count_has_room_for_every_boundary() {
        let mut sim = simulation();
        sim.params.incident.step = 20.0;
        let au = sim.sample_model.layers[0].clone();
        sim.sample_model.layers = vec![au; 30];
        let ws = SpectrumWorkspace::new(&sim, 0).unwrap();
        assert_eq!(ws.n_bricks, 100 + 10 + 30 + 1);
        assert!(ws.n_bricks > 1 + 100 + 30);
    }

    #[test]
    fn test_fixed_brick_capacity_wins() {
        let mut sim = simulation();
        sim.params.n_bricks_max = 77;
        let ws = SpectrumWorkspace::new(&sim, 0).unwrap();
        assert_eq!(ws.n_bricks, 77);
        assert!(ws.channels.iter().all(|c| !c.is_full()));
    }

    #[test]
    fn test_zero_resolution_caps_bricks() {
        let mut sim = simulation();
        sim.detectors[0].calibration.resolution = 0.0;
        let ws = SpectrumWorkspace::new(&sim, 0).unwrap();
        assert_eq!(ws.n_bricks, BRICKS_MAX);
    }

    #[test]
    fn test_missing_detector() {
        let sim = simulation();
        assert!(SpectrumWorkspace::new(&sim, 3).is_err());
    }

    #[test]
    fn test_rescale_fluence() {
        let sim = simulation();
        let mut ws = SpectrumWorkspace::new(&sim, 0).unwrap();
        ws.channels[0].histogram.bins[3] = 4.0;
        assert!(ws.rescale_fluence(2.0 * sim.fluence));
        assert_eq!(ws.sum.bins[3], 8.0);
        assert_eq!(ws.fluence, 2.0 * sim.fluence);
    }
}
