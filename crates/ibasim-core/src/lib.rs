//! # ibasim Core
//!
//! Depth-resolved transport engine for ion-beam analysis spectra (RBS and
//! ERD). Given a layered sample, a beam and a set of detectors, the engine
//! steps the beam into the sample, records per-reaction "bricks" (depth
//! slices with their detected energy and yield) and convolves them into
//! energy histograms.
//!
//! ## Architecture
//!
//! A [`simulation::Simulation`] describes the experiment. Each detector gets
//! a [`workspace::SpectrumWorkspace`] holding all mutable state, so
//! workspaces can be simulated independently (and in parallel, see
//! `ibasim-compute`). [`ensemble::simulate_workspace`] is the entry point
//! for a full simulation of one workspace.
//!
//! ## Modules
//!
//! - [`stepper`]: Energy-loss integration over one step.
//! - [`transport`]: Primary beam transport and brick generation.
//! - [`exit`]: Transport of reaction products to the detector.
//! - [`geostragg`]: Geometric straggling correction.
//! - [`ensemble`]: Roughness and dual-scattering ensembles.
//! - [`spectrum`]: Histograms and brick convolution.
//! - [`workspace`]: Per-detector state.
//! - [`sample`], [`detector`], [`reaction`], [`ion`], [`geometry`]: Model types.
//! - [`params`]: Calculation parameters.
//! - [`export`]: Text output of bricks and spectra.

pub mod detector;
pub mod ensemble;
pub mod error;
pub mod exit;
pub mod export;
pub mod geometry;
pub mod geostragg;
pub mod ion;
pub mod params;
pub mod reaction;
pub mod sample;
pub mod simulation;
pub mod spectrum;
pub mod stepper;
pub mod transport;
pub mod units;
pub mod workspace;

pub use detector::{Calibration, Detector};
pub use ensemble::simulate_workspace;
pub use error::SimError;
pub use params::SimCalcParams;
pub use reaction::Reaction;
pub use sample::{LayerModel, Roughness, SampleModel};
pub use simulation::Simulation;
pub use workspace::SpectrumWorkspace;
