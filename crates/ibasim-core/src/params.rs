//! Calculation parameters.
//!
//! Every stepping, transport and convolution call reads its numerical knobs
//! from an explicit [`SimCalcParams`] value. A workspace snapshots the
//! parameters when it is created, so a fit can swap in the relaxed
//! [`SimCalcParams::fast`] set for its first phase without affecting anything
//! else.

use ibasim_physics::NuclearStopping;
use serde::{Deserialize, Serialize};

/// Energy step control for one transport leg.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepParams {
    /// Fixed energy step (keV); 0 selects the automatic step.
    pub step: f64,
    /// Automatic step as a multiple of the local energy spread.
    pub sigmas: f64,
    /// Lower bound of the automatic step (keV).
    pub min: f64,
    /// Upper bound of the automatic step (keV).
    pub max: f64,
}

impl Default for StepParams {
    fn default() -> Self {
        Self {
            step: 0.0,
            sigmas: 0.5,
            min: 0.1,
            max: 1000.0,
        }
    }
}

impl StepParams {
    pub fn fixed(step: f64) -> Self {
        Self {
            step,
            ..Self::default()
        }
    }

    /// Energy step for a local spread variance `variance` (keV²).
    pub fn auto_step(&self, variance: f64) -> f64 {
        if self.step > 0.0 {
            return self.step;
        }
        (self.sigmas * variance.max(0.0).sqrt()).clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimCalcParams {
    pub incident: StepParams,
    /// Only `step` is used; 0 selects `0.1·E + sqrt(S) + 2 keV`.
    pub exiting: StepParams,
    /// Fourth-order Runge–Kutta stopping integration.
    pub rk4: bool,
    /// Accumulate straggling only; otherwise rescale the existing variance
    /// by the squared stopping ratio before adding.
    pub statistical_straggling: bool,
    pub nuclear_stopping: NuclearStopping,
    /// Evaluate cross section × concentration once at the step midpoint.
    pub mean_conc_and_energy: bool,
    /// Sub-steps per depth step for cross section × concentration.
    pub cs_n_steps: usize,
    /// Quadrature points for cross-section straggling weighting (0 or 1 = off).
    pub cs_n_stragg_steps: usize,
    /// Brick width estimate in resolution sigmas, used to size brick storage.
    pub brick_width_sigmas: f64,
    /// Fixed brick capacity; 0 = estimate.
    pub n_bricks_max: usize,
    /// Gaussian tails beyond this many sigmas are not convolved.
    pub sigmas_cutoff: f64,
    /// Dual scattering correction.
    pub ds: bool,
    pub ds_steps_polar: usize,
    pub ds_steps_azi: usize,
    /// Geometric straggling correction.
    pub geostragg: bool,
    /// Manual exit angle (rad).
    pub beta_manual: Option<f64>,
    /// Depth nudge (tfu) applied when a step makes no progress.
    pub stall_nudge: f64,
    /// Warnings tolerated in one transport run before it is stopped.
    pub warning_limit: usize,
    /// Products closer than this to the surface (tfu) have exited.
    pub depth_tolerance: f64,
}

impl Default for SimCalcParams {
    fn default() -> Self {
        Self {
            incident: StepParams::default(),
            exiting: StepParams::fixed(0.0),
            rk4: true,
            statistical_straggling: false,
            nuclear_stopping: NuclearStopping::Universal,
            mean_conc_and_energy: false,
            cs_n_steps: 4,
            cs_n_stragg_steps: 15,
            brick_width_sigmas: 0.5,
            n_bricks_max: 0,
            sigmas_cutoff: 4.0,
            ds: false,
            ds_steps_polar: 10,
            ds_steps_azi: 12,
            geostragg: false,
            beta_manual: None,
            stall_nudge: 1e-4,
            warning_limit: 1000,
            depth_tolerance: 1e-6,
        }
    }
}

impl SimCalcParams {
    /// Relaxed-fidelity variant of `self`.
    ///
    /// Coarser incident steps, no RK4, simplified nuclear stopping, midpoint
    /// cross sections and no cross-section straggling. Corrections the user
    /// switched on stay on.
    pub fn fast(&self) -> Self {
        Self {
            incident: StepParams {
                sigmas: 2.0 * self.incident.sigmas,
                ..self.incident
            },
            rk4: false,
            nuclear_stopping: NuclearStopping::Simplified,
            mean_conc_and_energy: true,
            cs_n_stragg_steps: 0,
            ds_steps_polar: self.ds_steps_polar.clamp(2, 6),
            ds_steps_azi: self.ds_steps_azi.clamp(1, 6),
            ..self.clone()
        }
    }

    /// Parameters used by the dual-scattering pre-trace.
    pub fn ds_trace(&self) -> Self {
        Self {
            rk4: false,
            nuclear_stopping: NuclearStopping::Simplified,
            mean_conc_and_energy: true,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_step_is_clamped() {
        let p = StepParams::default();
        assert_eq!(p.auto_step(0.0), p.min);
        assert_eq!(p.auto_step(1e12), p.max);
        assert_eq!(p.auto_step(16.0), 2.0);
        assert_eq!(StepParams::fixed(7.5).auto_step(16.0), 7.5);
    }

    #[test]
    fn test_fast_keeps_user_corrections() {
        let p = SimCalcParams {
            geostragg: true,
            ds: true,
            ..SimCalcParams::default()
        };
        let f = p.fast();
        assert!(!f.rk4);
        assert!(f.mean_conc_and_energy);
        assert_eq!(f.nuclear_stopping, NuclearStopping::Simplified);
        assert!(f.geostragg && f.ds);
        assert_eq!(f.incident.sigmas, 2.0 * p.incident.sigmas);
    }
}
