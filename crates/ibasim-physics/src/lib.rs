//! # ibasim Physics
//!
//! Physical data and models consumed by the ibasim transport engine. Every
//! model sits behind a small trait so the simulation never depends on a
//! particular data source:
//!
//! | Concern | Trait | Built-in implementations |
//! |---------|-------|--------------------------|
//! | Electronic/nuclear stopping, straggling | [`StoppingModel`](stopping::StoppingModel) | [`AnalyticStopping`](stopping::AnalyticStopping), [`ConstantStopping`](stopping::ConstantStopping), [`TabulatedStopping`](stopping::TabulatedStopping) |
//! | Differential cross sections | [`CrossSectionProvider`](cross_section::CrossSectionProvider) | [`Rutherford`](cross_section::Rutherford), [`Andersen`](cross_section::Andersen), [`TabulatedCrossSection`](cross_section::TabulatedCrossSection) |
//!
//! ## Units
//!
//! Energies are in keV, areal densities in thin-film units
//! (1 tfu = $10^{15}$ atoms/cm²), stopping in keV/tfu, straggling in
//! keV²/tfu, angles in radians and differential cross sections in mb/sr.
//!
//! ## Interpolation
//!
//! Tabulated stopping and cross-section data are interpolated with natural
//! cubic splines ([`spline::CubicSpline`]).

pub mod cross_section;
pub mod kinematics;
pub mod nuclide;
pub mod provider;
pub mod spline;
pub mod stopping;

pub use cross_section::{CrossSectionProvider, CrossSectionRegistry, ReactionKey};
pub use kinematics::ReactionKind;
pub use nuclide::Nuclide;
pub use provider::PhysicsError;
pub use stopping::{NuclearStopping, StoppingModel, StoppingRates};
