//! Energy-loss integration over one bounded step.
//!
//! The stepper converts an energy-loss budget $\Delta E$ into a path length
//! $h = \Delta E / S(E)$, clipped so the ion never crosses a layer boundary
//! within one step. With RK4 enabled the stopping is averaged over four
//! evaluations,
//!
//! $$\bar S = \tfrac{1}{6}(k_1 + 2k_2 + 2k_3 + k_4),$$
//!
//! where $k_2, k_3$ are evaluated at the half-step depth with the energies
//! predicted by $k_1$ and $k_2$, and $k_4$ at the full step with the energy
//! predicted by $k_3$.

use ibasim_physics::{NuclearStopping, Nuclide, StoppingModel};

use crate::ion::IonState;
use crate::params::SimCalcParams;
use crate::sample::{DepthPosition, Sample};
use crate::units::{ABUNDANCE_THRESHOLD, STOPPING_STALL_THRESHOLD};

/// Result of one step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// The ion moved; its new depth.
    Advanced(DepthPosition),
    /// No progress was possible; the ion is unchanged.
    Stall,
}

/// Advances ions through a sample.
#[derive(Clone, Copy)]
pub struct DepthStepper<'a> {
    pub model: &'a dyn StoppingModel,
    pub rk4: bool,
    pub statistical: bool,
    pub nuclear: NuclearStopping,
}

impl<'a> DepthStepper<'a> {
    pub fn new(model: &'a dyn StoppingModel, params: &SimCalcParams) -> Self {
        Self {
            model,
            rk4: params.rk4,
            statistical: params.statistical_straggling,
            nuclear: params.nuclear_stopping,
        }
    }

    /// Same stepper with RK4 switched off.
    pub fn simple(&self) -> Self {
        Self { rk4: false, ..*self }
    }

    /// Stopping of the sample at `depth` (keV/tfu).
    pub fn stopping(&self, ion: &Nuclide, sample: &Sample, depth: DepthPosition, energy: f64) -> f64 {
        let layer = &sample.layers[depth.layer];
        let s: f64 = sample
            .nuclides
            .iter()
            .enumerate()
            .map(|(i, target)| {
                let c = sample.concentration(depth, i);
                if c < ABUNDANCE_THRESHOLD {
                    return 0.0;
                }
                c * (self.model.electronic(ion, target, energy)
                    + self.model.nuclear(ion, target, energy, self.nuclear))
            })
            .sum();
        s * layer.bragg
    }

    /// Straggling of the sample at `depth` (keV²/tfu).
    pub fn straggling(&self, ion: &Nuclide, sample: &Sample, depth: DepthPosition, energy: f64) -> f64 {
        let layer = &sample.layers[depth.layer];
        let s: f64 = sample
            .nuclides
            .iter()
            .enumerate()
            .map(|(i, target)| {
                let c = sample.concentration(depth, i);
                if c < ABUNDANCE_THRESHOLD {
                    return 0.0;
                }
                c * self.model.straggling(ion, target, energy)
            })
            .sum();
        s * layer.stragg
    }

    /// Next layer boundary along the ion's direction of travel.
    ///
    /// The returned layer index is the layer the step will be taken in.
    pub fn next_crossing(ion: &IonState, sample: &Sample, depth: DepthPosition) -> DepthPosition {
        let last = sample.n_layers().saturating_sub(1);
        let mut i = depth.layer.min(last);
        if ion.cos_theta() > 0.0 {
            while i < last && depth.x >= sample.layers[i].end {
                i += 1;
            }
            DepthPosition::new(sample.layers[i].end, i)
        } else if ion.cos_theta() < 0.0 {
            while i > 0 && depth.x <= sample.layers[i].begin {
                i -= 1;
            }
            DepthPosition::new(sample.layers[i].begin, i)
        } else {
            depth
        }
    }

    /// Lose at most `budget` keV, stopping at the next layer boundary.
    pub fn step(&self, ion: &mut IonState, sample: &Sample, depth: DepthPosition, budget: f64) -> StepOutcome {
        if !(budget > 0.0) || ion.cos_theta() == 0.0 {
            return StepOutcome::Stall;
        }
        let next = Self::next_crossing(ion, sample, depth);
        let h_max_perp = next.x - depth.x;
        let h_max = h_max_perp * ion.inverse_cos();
        if !(h_max > 0.0) {
            return StepOutcome::Stall;
        }
        let depth = DepthPosition::new(depth.x, next.layer);
        let nuclide: &Nuclide = &ion.nuclide;
        let e = ion.energy;

        let k1 = self.stopping(nuclide, sample, depth, e);
        if !(k1 >= STOPPING_STALL_THRESHOLD) {
            return StepOutcome::Stall;
        }

        let mut h = budget / k1;
        let (half, full) = if h >= h_max {
            h = h_max;
            (
                DepthPosition::new(depth.x + 0.5 * h_max_perp, depth.layer),
                next,
            )
        } else {
            let h_perp = h * ion.cos_theta();
            (
                DepthPosition::new(depth.x + 0.5 * h_perp, depth.layer),
                DepthPosition::new(depth.x + h_perp, depth.layer),
            )
        };

        let stop = if self.rk4 {
            let k2 = self.stopping(nuclide, sample, half, e - 0.5 * h * k1);
            let k3 = self.stopping(nuclide, sample, half, e - 0.5 * h * k2);
            let k4 = self.stopping(nuclide, sample, full, e - h * k3);
            (k1 + 2.0 * k2 + 2.0 * k3 + k4) / 6.0
        } else {
            k1
        };
        if !(stop > 0.0) {
            return StepOutcome::Stall;
        }

        let de = -h * stop;
        if !self.statistical {
            let ratio = self.stopping(nuclide, sample, full, e + de) / k1;
            ion.variance *= ratio * ratio;
        }
        ion.variance += h * self.straggling(nuclide, sample, half, e + 0.5 * de);
        ion.energy = (e + de).max(0.0);
        StepOutcome::Advanced(full)
    }
}
