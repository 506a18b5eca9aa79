//! Complete description of one ion-beam experiment.

use std::sync::Arc;

use ibasim_physics::kinematics::ReactionKind;
use ibasim_physics::{CrossSectionRegistry, Nuclide, StoppingModel};
use log::debug;

use crate::detector::Detector;
use crate::error::SimError;
use crate::geometry::{self, Aperture};
use crate::params::SimCalcParams;
use crate::reaction::Reaction;
use crate::sample::SampleModel;
use crate::units::fwhm_to_variance;

/// Beam, sample, detectors, reactions and the physics used to simulate them.
#[derive(Clone)]
pub struct Simulation {
    pub beam: Arc<Nuclide>,
    /// keV
    pub beam_energy: f64,
    /// Beam energy spread FWHM (keV).
    pub beam_energy_spread: f64,
    /// Number of incident particles.
    pub fluence: f64,
    /// Sample tilt, polar (rad).
    pub alpha: f64,
    /// Sample tilt, azimuth (rad).
    pub sample_phi: f64,
    pub beam_aperture: Aperture,
    pub detectors: Vec<Detector>,
    pub sample_model: SampleModel,
    pub reactions: Vec<Reaction>,
    /// Transport cutoff energy (keV).
    pub emin: f64,
    /// Yield multiplier for the deepest layer.
    pub channeling: f64,
    pub params: SimCalcParams,
    pub stopping: Arc<dyn StoppingModel>,
    pub cross_sections: CrossSectionRegistry,
}

impl Simulation {
    /// A simulation with one default detector and no reactions.
    pub fn new(
        beam: Arc<Nuclide>,
        beam_energy: f64,
        sample_model: SampleModel,
        stopping: Arc<dyn StoppingModel>,
    ) -> Self {
        Self {
            beam,
            beam_energy,
            beam_energy_spread: 0.0,
            fluence: 1.0e12,
            alpha: 0.0,
            sample_phi: 0.0,
            beam_aperture: Aperture::default(),
            detectors: vec![Detector::default()],
            sample_model,
            reactions: Vec::new(),
            emin: 10.0,
            channeling: 1.0,
            params: SimCalcParams::default(),
            stopping,
            cross_sections: CrossSectionRegistry::default(),
        }
    }

    pub fn beam_spread_variance(&self) -> f64 {
        fwhm_to_variance(self.beam_energy_spread)
    }

    /// Beam direction in the sample frame.
    pub fn incident_angles(&self) -> (f64, f64) {
        geometry::to_frame(0.0, 0.0, self.alpha, self.sample_phi)
    }

    /// Direction from the sample to `detector`, in the sample frame.
    pub fn detector_angles(&self, detector: &Detector) -> (f64, f64) {
        geometry::to_frame(detector.theta, detector.phi, self.alpha, self.sample_phi)
    }

    /// Add one RBS reaction per sample nuclide and, if some detector looks
    /// forward, one ERD reaction per nuclide. Existing reactions are kept.
    pub fn add_auto_reactions(&mut self, rbs: bool, erd: bool) {
        let forward = self
            .detectors
            .iter()
            .any(|d| d.theta < std::f64::consts::FRAC_PI_2);
        let targets = self.sample_model.nuclides.clone();
        for target in targets {
            if rbs {
                self.push_unique(Reaction::rbs(Arc::clone(&self.beam), Arc::clone(&target)));
            }
            if erd && forward {
                self.push_unique(Reaction::erd(Arc::clone(&self.beam), Arc::clone(&target)));
            }
        }
        debug!("{} reactions after automatic generation", self.reactions.len());
    }

    fn push_unique(&mut self, reaction: Reaction) {
        let exists = self.reactions.iter().any(|r| {
            r.kind == reaction.kind
                && r.incident.same_isotope(&reaction.incident)
                && r.target.same_isotope(&reaction.target)
        });
        if !exists {
            self.reactions.push(reaction);
        }
    }

    /// Number of reactions of `kind`.
    pub fn count_reactions(&self, kind: ReactionKind) -> usize {
        self.reactions.iter().filter(|r| r.kind == kind).count()
    }

    /// Validate everything needed before transport.
    pub fn sanity_check(&self) -> Result<(), SimError> {
        if !(self.beam_energy.is_finite() && self.beam_energy > 0.0) {
            return Err(SimError::sanity(format!(
                "beam energy {} keV must be positive",
                self.beam_energy
            )));
        }
        if !(self.beam_energy_spread.is_finite() && self.beam_energy_spread >= 0.0) {
            return Err(SimError::sanity("beam energy spread must be non-negative"));
        }
        if !(self.fluence.is_finite() && self.fluence >= 0.0) {
            return Err(SimError::sanity(format!("fluence {} is invalid", self.fluence)));
        }
        if !(self.emin.is_finite() && self.emin > 0.0 && self.emin < self.beam_energy) {
            return Err(SimError::sanity(format!(
                "cutoff energy {} keV must be positive and below the beam energy",
                self.emin
            )));
        }
        if !(self.alpha.is_finite() && self.alpha.abs() < std::f64::consts::FRAC_PI_2) {
            return Err(SimError::sanity(format!(
                "sample tilt {} rad must be below 90 degrees",
                self.alpha
            )));
        }
        if !self.sample_phi.is_finite() {
            return Err(SimError::sanity("sample azimuth is not finite"));
        }
        if !(self.channeling.is_finite() && self.channeling >= 0.0) {
            return Err(SimError::sanity("channeling correction must be non-negative"));
        }
        if self.detectors.is_empty() {
            return Err(SimError::sanity("no detectors"));
        }
        for det in &self.detectors {
            det.sanity_check()?;
        }
        self.sample_model.sanity_check()?;
        for r in &self.reactions {
            if !r.incident.same_isotope(&self.beam) {
                return Err(SimError::sanity(format!(
                    "reaction {} has incident {}, beam is {}",
                    r.name(),
                    r.incident,
                    self.beam
                )));
            }
        }
        check_params(&self.params)
    }
}

fn check_params(p: &SimCalcParams) -> Result<(), SimError> {
    if !(p.incident.step.is_finite() && p.incident.step >= 0.0)
        || !(p.exiting.step.is_finite() && p.exiting.step >= 0.0)
    {
        return Err(SimError::sanity("stopping steps must be non-negative"));
    }
    if p.incident.step == 0.0 && !(p.incident.sigmas > 0.0 && p.incident.min > 0.0) {
        return Err(SimError::sanity("automatic incident step needs positive sigmas and minimum"));
    }
    if p.cs_n_steps == 0 {
        return Err(SimError::sanity("cross section needs at least one sub-step"));
    }
    if !(p.sigmas_cutoff > 0.0) {
        return Err(SimError::sanity("convolution cutoff must be positive"));
    }
    if p.ds && (p.ds_steps_polar < 2 || p.ds_steps_azi < 1) {
        return Err(SimError::sanity(
            "dual scattering needs at least two polar and one azimuthal step",
        ));
    }
    if !(p.stall_nudge > 0.0) {
        return Err(SimError::sanity("stall nudge must be positive"));
    }
    if let Some(beta) = p.beta_manual {
        if !(beta.is_finite() && beta.abs() < std::f64::consts::FRAC_PI_2) {
            return Err(SimError::sanity("manual exit angle must be below 90 degrees"));
        }
    }
    Ok(())
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("beam", &self.beam.name)
            .field("beam_energy", &self.beam_energy)
            .field("fluence", &self.fluence)
            .field("alpha", &self.alpha)
            .field("detectors", &self.detectors.len())
            .field("layers", &self.sample_model.layers.len())
            .field("reactions", &self.reactions.len())
            .field("stopping", &self.stopping.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::LayerModel;
    use ibasim_physics::stopping::AnalyticStopping;

    fn simulation() -> Simulation {
        let he = Arc::new(Nuclide::lookup("4He").unwrap());
        let au = Arc::new(Nuclide::lookup("197Au").unwrap());
        let si = Arc::new(Nuclide::lookup("28Si").unwrap());
        let model = SampleModel::new(
            vec![au, si],
            vec![
                LayerModel::new(100.0, vec![1.0, 0.0]),
                LayerModel::new(5000.0, vec![0.0, 1.0]),
            ],
        );
        Simulation::new(he, 2000.0, model, Arc::new(AnalyticStopping))
    }

    #[test]
    fn test_auto_reactions_backscattering_only() {
        let mut sim = simulation();
        sim.add_auto_reactions(true, true);
        assert_eq!(sim.count_reactions(ReactionKind::Rbs), 2);
        assert_eq!(sim.count_reactions(ReactionKind::Erd), 0);
        sim.add_auto_reactions(true, true);
        assert_eq!(sim.reactions.len(), 2);
    }

    #[test]
    fn test_auto_reactions_forward_detector_adds_erd() {
        let mut sim = simulation();
        sim.detectors[0].theta = 30f64.to_radians();
        sim.add_auto_reactions(true, true);
        assert_eq!(sim.count_reactions(ReactionKind::Erd), 2);
    }

    #[test]
    fn test_sanity_check() {
        let mut sim = simulation();
        assert!(sim.sanity_check().is_ok());
        sim.emin = 5000.0;
        assert!(matches!(sim.sanity_check(), Err(SimError::SanityCheckFailure(_))));
    }

    #[test]
    fn test_untilted_sample_sees_detector_in_lab_direction() {
        let sim = simulation();
        let (theta, _) = sim.detector_angles(&sim.detectors[0]);
        approx::assert_abs_diff_eq!(theta, sim.detectors[0].theta, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(sim.incident_angles().0, 0.0, epsilon = 1e-12);
    }
}
