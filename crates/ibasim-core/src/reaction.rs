//! Reactions and their per-workspace channel state.
//!
//! A [`Reaction`] names a physical process (beam × target × kind). A
//! [`ReactionChannel`] is the mutable state one workspace keeps for it during
//! a transport run: kinematic factor at the current scattering angle, the
//! product ion, the brick sequence and the reaction's histogram.

use std::sync::Arc;

use ibasim_physics::kinematics::{kinematic_factor, ReactionKind};
use ibasim_physics::{CrossSectionProvider, Nuclide};
use log::warn;

use crate::detector::Calibration;
use crate::ion::IonState;
use crate::sample::DepthPosition;
use crate::spectrum::Histogram;

/// One elastic reaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub kind: ReactionKind,
    pub incident: Arc<Nuclide>,
    pub target: Arc<Nuclide>,
}

impl Reaction {
    pub fn rbs(incident: Arc<Nuclide>, target: Arc<Nuclide>) -> Self {
        Self {
            kind: ReactionKind::Rbs,
            incident,
            target,
        }
    }

    pub fn erd(incident: Arc<Nuclide>, target: Arc<Nuclide>) -> Self {
        Self {
            kind: ReactionKind::Erd,
            incident,
            target,
        }
    }

    /// The detected particle.
    pub fn product(&self) -> &Arc<Nuclide> {
        match self.kind {
            ReactionKind::Rbs => &self.incident,
            ReactionKind::Erd => &self.target,
        }
    }

    pub fn kinematic_factor(&self, theta: f64) -> Option<f64> {
        kinematic_factor(self.kind, self.incident.mass, self.target.mass, theta)
    }

    pub fn is_possible(&self, theta: f64) -> bool {
        self.kinematic_factor(theta).is_some()
    }

    /// e.g. `"28Si (RBS)"`
    pub fn name(&self) -> String {
        format!("{} ({})", self.target.name, self.kind.label())
    }
}

/// One depth-step record of a reaction channel.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Brick {
    pub depth: DepthPosition,
    /// Incident energy at the end of the step (keV).
    pub energy_in: f64,
    /// Product energy after leaving the sample (keV).
    pub energy: f64,
    /// Product energy variance after leaving the sample (keV²).
    pub variance: f64,
    /// Total broadening sigma, set during convolution (keV).
    pub sigma: f64,
    /// Yield per unit fluence and solid angle.
    pub q: f64,
}

/// Per-workspace state of one reaction.
pub struct ReactionChannel {
    pub reaction: Reaction,
    /// Index of the target in the sample's nuclide list.
    pub isotope: Option<usize>,
    cross_section: Arc<dyn CrossSectionProvider>,
    /// Scattering angle of the current run (rad).
    pub theta: f64,
    /// Kinematic factor at `theta`.
    pub k: f64,
    pub product: IonState,
    pub bricks: Vec<Brick>,
    brick_capacity: usize,
    /// Deepest point at which the target occurs (tfu).
    pub max_depth: f64,
    active: bool,
    pub histogram: Histogram,
}

impl ReactionChannel {
    pub fn new(
        reaction: Reaction,
        isotope: Option<usize>,
        cross_section: Arc<dyn CrossSectionProvider>,
        brick_capacity: usize,
        n_channels: usize,
        calibration: &Calibration,
    ) -> Self {
        let product = IonState::new(Arc::clone(reaction.product()), 0.0, 0.0);
        Self {
            reaction,
            isotope,
            cross_section,
            theta: 0.0,
            k: 0.0,
            product,
            bricks: Vec::with_capacity(brick_capacity),
            brick_capacity,
            max_depth: 0.0,
            active: false,
            histogram: Histogram::new(n_channels, calibration),
        }
    }

    /// Prepare for a new transport run at scattering angle `theta`.
    ///
    /// The channel stays inactive when the reaction is impossible at this
    /// angle or its target is not in the sample.
    pub fn reset(&mut self, theta: f64, max_depth: f64) {
        self.bricks.clear();
        self.theta = theta;
        self.max_depth = max_depth;
        match (self.reaction.kinematic_factor(theta), self.isotope) {
            (Some(k), Some(_)) if max_depth > 0.0 => {
                self.k = k;
                self.active = true;
            }
            _ => {
                self.k = 0.0;
                self.active = false;
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    /// Index of the last filled brick, 0 when at most the start brick exists.
    pub fn last_brick(&self) -> usize {
        self.bricks.len().saturating_sub(1)
    }

    /// Append a brick, deactivating the channel when storage is exhausted.
    pub fn push_brick(&mut self, brick: Brick) -> bool {
        if self.is_full() {
            self.overflow();
            return false;
        }
        self.bricks.push(brick);
        true
    }

    /// Stop the channel because brick storage ran out.
    pub fn overflow(&mut self) {
        warn!(
            "Too many bricks for {}, data partial ({} bricks)",
            self.reaction.name(),
            self.brick_capacity
        );
        self.deactivate();
    }

    pub fn is_full(&self) -> bool {
        self.bricks.len() >= self.brick_capacity
    }

    pub fn cross_section_name(&self) -> &str {
        self.cross_section.name()
    }

    /// Cross section (mb/sr) at incident energy `energy` and the run's angle.
    pub fn cross_section(&self, energy: f64) -> f64 {
        self.cross_section.cross_section(
            self.reaction.kind,
            &self.reaction.incident,
            &self.reaction.target,
            self.theta,
            energy,
        )
    }

    /// Cross section averaged over a Gaussian incident energy spread.
    ///
    /// Uses `n` quadrature points over ±2σ weighted by the normal density.
    pub fn cross_section_straggled(&self, energy: f64, variance: f64, n: usize) -> f64 {
        if n < 2 || variance <= 0.0 {
            return self.cross_section(energy);
        }
        const SIGMAS: f64 = 2.0;
        let std_dev = variance.sqrt();
        let half_n = (n / 2) as f64;
        let w = SIGMAS / half_n;
        let mut sum = 0.0;
        let mut weight_sum = 0.0;
        for i in 0..n {
            let x = w * (i as f64 - half_n);
            let weight = (-0.5 * x * x).exp();
            sum += weight * self.cross_section(energy + x * std_dev);
            weight_sum += weight;
        }
        sum / weight_sum
    }

    /// Product energy for incident energy `energy` at angle `theta`.
    pub fn product_energy(&self, theta: f64, energy: f64) -> f64 {
        self.reaction.kinematic_factor(theta).map_or(0.0, |k| k * energy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ibasim_physics::cross_section::Rutherford;

    fn channel() -> ReactionChannel {
        let he = Arc::new(Nuclide::lookup("4He").unwrap());
        let si = Arc::new(Nuclide::lookup("28Si").unwrap());
        ReactionChannel::new(
            Reaction::rbs(he, si),
            Some(0),
            Arc::new(Rutherford),
            3,
            100,
            &Calibration::default(),
        )
    }

    #[test]
    fn test_reset_sets_kinematics() {
        let mut ch = channel();
        ch.reset(170f64.to_radians(), 1000.0);
        assert!(ch.is_active());
        assert!(ch.k > 0.5 && ch.k < 0.6);
        assert_eq!(ch.reaction.name(), "28Si (RBS)");
    }

    #[test]
    fn test_missing_target_stays_inactive() {
        let mut ch = channel();
        ch.isotope = None;
        ch.reset(170f64.to_radians(), 1000.0);
        assert!(!ch.is_active());
    }

    #[test]
    fn test_brick_capacity_deactivates() {
        let mut ch = channel();
        ch.reset(170f64.to_radians(), 1000.0);
        for _ in 0..3 {
            assert!(ch.push_brick(Brick::default()));
        }
        assert!(!ch.push_brick(Brick::default()));
        assert!(!ch.is_active());
        assert_eq!(ch.last_brick(), 2);
    }

    #[test]
    fn test_straggled_cross_section_close_to_plain() {
        let mut ch = channel();
        ch.reset(170f64.to_radians(), 1000.0);
        let plain = ch.cross_section(1500.0);
        let straggled = ch.cross_section_straggled(1500.0, 100.0, 15);
        assert_relative_eq!(straggled, plain, max_relative = 1e-3);
        assert_eq!(ch.cross_section_straggled(1500.0, 0.0, 15), plain);
    }
}
