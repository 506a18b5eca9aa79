//! # ibasim Fit
//!
//! Nonlinear least-squares fitting of simulated spectra to measured ones.
//!
//! ## Usage
//!
//! ```ignore
//! let mut driver = FitDriver::new(sim, ibasim_compute::default_backend());
//! driver.set_experimental(0, counts)?;
//! driver.add_roi(Roi::parse(0, "[300:500]")?)?;
//! driver.params_mut().activate_list("fluence,thick1,calib")?;
//! let outcome = driver.fit()?;
//! ```
//!
//! ## Modules
//!
//! - [`variable`]: Registry of fittable quantities.
//! - [`roi`]: Channel ranges.
//! - [`lm`]: Levenberg-Marquardt solver.
//! - [`cache`]: Residual cache for Jacobian evaluations.
//! - [`driver`]: Two-phase fit driver.
//! - [`stats`]: Per-iteration statistics.

pub mod cache;
pub mod driver;
pub mod error;
pub mod lm;
mod model;
pub mod roi;
pub mod stats;
pub mod variable;

pub use driver::{FitCallback, FitConfig, FitDriver, FitOutcome, RoiSummary};
pub use error::FitError;
pub use roi::Roi;
pub use stats::{FitPhase, FitStats, FitStatus};
pub use variable::{FitParams, FitVariable, FittedValue, ParamRef};
