//! Unit conventions and numerical thresholds.
//!
//! | Quantity | Unit |
//! |----------|------|
//! | Energy | keV |
//! | Areal density (depth) | tfu = $10^{15}$ atoms/cm² |
//! | Stopping | keV/tfu |
//! | Straggling | keV²/tfu |
//! | Cross section | mb/sr |
//! | Angles | rad |

/// FWHM of a unit-variance Gaussian, $2\sqrt{2\ln 2}$.
pub const C_FWHM: f64 = 2.354_820_045_030_949;

/// Converts mb/sr · tfu into a probability per steradian.
pub const MB_SR_TFU: f64 = 1e-12;

/// Stopping below this (keV/tfu) stalls the stepper.
pub const STOPPING_STALL_THRESHOLD: f64 = 1e-6;

/// Concentrations below this are treated as absent.
pub const ABUNDANCE_THRESHOLD: f64 = 1e-8;

/// A step that advances less than `PROGRESS_DEPTH_MIN` (tfu) and loses less
/// than `PROGRESS_ENERGY_MIN` (keV) made no progress.
pub const PROGRESS_DEPTH_MIN: f64 = 1e-3;
pub const PROGRESS_ENERGY_MIN: f64 = 1e-3;

/// Ions moving towards the surface stop being tracked this close to it (tfu).
pub const SURFACE_ESCAPE_DEPTH: f64 = 1e-3;

/// Ions travelling this close to parallel with the surface are not tracked.
pub const GRAZING_COS_MIN: f64 = 1e-6;

pub const CHANNELS_ABSOLUTE_MIN: usize = 16;
pub const CHANNELS_ABSOLUTE_MAX: usize = 16_384;
pub const BRICKS_MAX: usize = 10_000;

/// Angle used for finite-difference geometry derivatives (rad).
pub const GEOSTRAGG_EPSILON: f64 = 0.001 * std::f64::consts::PI / 180.0;

/// FWHM (keV) to Gaussian variance (keV²).
pub fn fwhm_to_variance(fwhm: f64) -> f64 {
    let sigma = fwhm / C_FWHM;
    sigma * sigma
}

/// Gaussian variance (keV²) to FWHM (keV).
pub fn variance_to_fwhm(variance: f64) -> f64 {
    variance.max(0.0).sqrt() * C_FWHM
}
