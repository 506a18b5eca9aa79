//! Transport of reaction products out of the sample.
//!
//! Products are stepped toward the surface with the simple (non-RK4)
//! stepper, then through the detector foil if one is configured. This runs
//! once per channel per incident step, so it uses coarse automatic steps:
//! $0.1E + \sqrt{S} + 2$ keV in the sample and $0.1E + \sqrt{S}$ in the foil.

use crate::ion::IonState;
use crate::params::SimCalcParams;
use crate::sample::{DepthPosition, Sample};
use crate::stepper::{DepthStepper, StepOutcome};

/// How a product left the sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Exited,
    /// Energy fell below the cutoff (or transport stalled); energy is zero.
    Underflow,
}

/// Everything needed to move products out of the sample.
#[derive(Clone, Copy)]
pub struct ExitTransport<'a> {
    pub stepper: DepthStepper<'a>,
    pub sample: &'a Sample,
    pub foil: Option<&'a Sample>,
    pub params: &'a SimCalcParams,
    /// keV
    pub emin: f64,
}

impl<'a> ExitTransport<'a> {
    /// Move `product` from `start` to the surface and through the foil.
    pub fn exit(&self, product: &mut IonState, start: DepthPosition) -> ExitOutcome {
        let mut depth = start;
        while depth.x > self.params.depth_tolerance {
            if product.energy < self.emin {
                return underflow(product);
            }
            let budget = self.sample_step(product);
            match self.stepper.step(product, self.sample, depth, budget) {
                StepOutcome::Advanced(d) => depth = d,
                StepOutcome::Stall => return underflow(product),
            }
        }
        if product.energy < self.emin {
            return underflow(product);
        }
        match self.foil {
            Some(foil) => self.through_foil(product, foil),
            None => ExitOutcome::Exited,
        }
    }

    fn sample_step(&self, product: &IonState) -> f64 {
        if self.params.exiting.step > 0.0 {
            self.params.exiting.step
        } else {
            0.1 * product.energy + product.variance.max(0.0).sqrt() + 2.0
        }
    }

    fn through_foil(&self, product: &mut IonState, foil: &Sample) -> ExitOutcome {
        let (theta, phi) = product.angles();
        let mut ion = product.clone();
        // The foil faces the detector: travel straight through it.
        ion.set_angle(0.0, 0.0);
        let thickness = foil.thickness();
        let mut depth = foil.seek(0.0);
        while depth.x < thickness {
            if ion.energy < self.emin {
                return underflow(product);
            }
            let budget = if self.params.exiting.step > 0.0 {
                self.params.exiting.step
            } else {
                0.1 * ion.energy + ion.variance.max(0.0).sqrt()
            };
            match self.stepper.step(&mut ion, foil, depth, budget) {
                StepOutcome::Advanced(d) => depth = d,
                StepOutcome::Stall => return underflow(product),
            }
        }
        if ion.energy < self.emin {
            return underflow(product);
        }
        ion.set_angle(theta, phi);
        *product = ion;
        ExitOutcome::Exited
    }
}

fn underflow(product: &mut IonState) -> ExitOutcome {
    product.energy = 0.0;
    ExitOutcome::Underflow
}
