//! Detector description and energy calibration.

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::geometry::Aperture;
use crate::sample::SampleModel;
use crate::units::fwhm_to_variance;

/// Linear energy calibration and Gaussian energy resolution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// keV per channel
    pub slope: f64,
    /// Energy of the low edge of channel 0 (keV).
    pub offset: f64,
    /// Resolution FWHM (keV).
    pub resolution: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            slope: 1.0,
            offset: 0.0,
            resolution: 15.0,
        }
    }
}

impl Calibration {
    /// Energy of the low edge of `channel`.
    pub fn energy(&self, channel: usize) -> f64 {
        self.offset + self.slope * channel as f64
    }

    /// Resolution as a variance (keV²).
    pub fn resolution_variance(&self) -> f64 {
        fwhm_to_variance(self.resolution)
    }
}

/// One detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Detector {
    /// Polar angle in the lab frame (rad).
    pub theta: f64,
    /// Azimuth in the lab frame (rad).
    pub phi: f64,
    /// Solid angle (sr).
    pub solid: f64,
    pub calibration: Calibration,
    /// Number of channels in measured spectra.
    pub channels: usize,
    /// Sample-to-detector distance (mm); 0 = unknown.
    pub distance: f64,
    pub aperture: Aperture,
    /// Absorber foil in front of the detector.
    pub foil: Option<SampleModel>,
}

impl Default for Detector {
    fn default() -> Self {
        Self {
            theta: 165f64.to_radians(),
            phi: 0.0,
            solid: 1e-3,
            calibration: Calibration::default(),
            channels: 16_384,
            distance: 0.0,
            aperture: Aperture::default(),
            foil: None,
        }
    }
}

impl Detector {
    pub fn resolution_variance(&self) -> f64 {
        self.calibration.resolution_variance()
    }

    pub fn sanity_check(&self) -> Result<(), SimError> {
        let c = &self.calibration;
        if !(self.theta.is_finite() && (0.0..=std::f64::consts::PI).contains(&self.theta)) {
            return Err(SimError::sanity(format!(
                "detector angle {} rad is outside [0, pi]",
                self.theta
            )));
        }
        if !self.phi.is_finite() {
            return Err(SimError::sanity("detector azimuth is not finite"));
        }
        if !(self.solid.is_finite() && self.solid > 0.0) {
            return Err(SimError::sanity(format!(
                "detector solid angle {} sr must be positive",
                self.solid
            )));
        }
        if !(c.slope.is_finite() && c.slope > 0.0) {
            return Err(SimError::sanity(format!(
                "calibration slope {} keV/ch must be positive",
                c.slope
            )));
        }
        if !c.offset.is_finite() {
            return Err(SimError::sanity("calibration offset is not finite"));
        }
        if !(c.resolution.is_finite() && c.resolution >= 0.0) {
            return Err(SimError::sanity(format!(
                "detector resolution {} keV must be non-negative",
                c.resolution
            )));
        }
        if !(self.distance.is_finite() && self.distance >= 0.0) {
            return Err(SimError::sanity("detector distance must be non-negative"));
        }
        if let Some(foil) = &self.foil {
            foil.sanity_check()?;
        }
        Ok(())
    }
}
