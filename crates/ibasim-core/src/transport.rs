//! Depth-resolved transport of the primary beam.
//!
//! The beam is stepped into the sample. After each step every active
//! reaction channel gets one brick: the product created at the end of the
//! step is carried out of the sample to find its detected energy, and the
//! yield of the step is
//!
//! $$Q = \frac{\overline{\sigma c}\;\Delta x}{|\cos\theta_{in}|} \cdot 10^{-12} \cdot f_{yield},$$
//!
//! with $\overline{\sigma c}$ the cross section × concentration averaged
//! over the step (mb/sr) and $\Delta x$ the step thickness (tfu).
//! Finished brick sequences are convolved into the channel histograms.

use std::f64::consts::PI;

use log::{debug, warn};

use crate::exit::{ExitOutcome, ExitTransport};
use crate::geometry;
use crate::ion::IonState;
use crate::params::SimCalcParams;
use crate::reaction::{Brick, ReactionChannel};
use crate::sample::{DepthPosition, Sample};
use crate::simulation::Simulation;
use crate::spectrum::{brick_sigmas, convolve_bricks};
use crate::stepper::{DepthStepper, StepOutcome};
use crate::units::{
    ABUNDANCE_THRESHOLD, GRAZING_COS_MIN, MB_SR_TFU, PROGRESS_DEPTH_MIN, PROGRESS_ENERGY_MIN,
    SURFACE_ESCAPE_DEPTH,
};
use crate::workspace::SpectrumWorkspace;

/// How a transport pass ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportSummary {
    /// Depth the beam reached.
    pub depth: DepthPosition,
    /// Steps that made no progress and were nudged forward.
    pub stalls: usize,
    /// The pass was cut short by the warning limit.
    pub warning_limit_hit: bool,
}

/// Run one transport pass and add its spectra, weighted by `weight`, to the
/// workspace histograms.
///
/// # Arguments
/// * `incident` - Beam ion in the sample frame at `start`.
/// * `start` - Depth where the beam enters (the surface, or the point of a
///   first scattering for dual scattering).
/// * `sample` - Sample to use; may differ from the workspace's own sample
///   for roughness ensembles.
/// * `weight` - Fraction of the fluence this pass represents.
pub fn simulate(
    ws: &mut SpectrumWorkspace,
    sim: &Simulation,
    incident: &IonState,
    start: DepthPosition,
    sample: &Sample,
    weight: f64,
) -> TransportSummary {
    let params = ws.params.clone();
    let foil = ws.foil.clone();
    let stepper = DepthStepper::new(sim.stopping.as_ref(), &params);
    let exit = ExitTransport {
        stepper: stepper.simple(),
        sample,
        foil: foil.as_deref(),
        params: &params,
        emin: ws.emin,
    };
    let geostragg = ws.geostragg;
    let resolution_variance = ws.detector.resolution_variance();
    let thickness = sample.thickness();
    let last_layer = sample.n_layers().saturating_sub(1);

    let detector_dir = sim.detector_angles(&ws.detector);
    let product_dir = match params.beta_manual {
        Some(beta) => (PI - beta, detector_dir.1),
        None => detector_dir,
    };
    let scatter = geometry::angle_between(incident.angles(), detector_dir);
    debug!(
        "Transport from {:.3} tfu, scattering angle {:.3} deg, weight {:.4e}",
        start.x,
        scatter.to_degrees(),
        weight
    );

    let mut ion = incident.clone();
    for ch in &mut ws.channels {
        let max_depth = ch.isotope.map_or(0.0, |i| sample.isotope_max_depth(i));
        ch.reset(scatter, max_depth);
        if !ch.is_active() {
            continue;
        }
        ch.product.energy = ion.energy * ch.k;
        ch.product.variance = ion.variance * ch.k;
        ch.product.set_angle(product_dir.0, product_dir.1);
        exit.exit(&mut ch.product, start);
        ch.push_brick(Brick {
            depth: start,
            energy_in: ion.energy,
            energy: ch.product.energy,
            variance: ch.product.variance,
            sigma: 0.0,
            q: 0.0,
        });
    }

    let mut summary = TransportSummary {
        depth: start,
        stalls: 0,
        warning_limit_hit: false,
    };
    if ion.cos_theta().abs() < GRAZING_COS_MIN {
        debug!("Beam travels parallel to the surface, nothing to simulate");
        return summary;
    }

    let mut depth = start;
    loop {
        if summary.stalls > params.warning_limit {
            warn!("Warning limit reached at {:.3} tfu, transport stopped", depth.x);
            summary.warning_limit_hit = true;
            break;
        }
        if depth.x >= thickness {
            break;
        }
        if !ion.is_inbound() && depth.x < SURFACE_ESCAPE_DEPTH {
            break;
        }
        if ion.energy < ws.emin {
            break;
        }

        let e_front = ion.energy;
        let s_front = ion.variance;
        let budget = params.incident.auto_step(resolution_variance + ion.variance);
        let after = match stepper.step(&mut ion, sample, depth, budget) {
            StepOutcome::Advanced(d) => d,
            StepOutcome::Stall => depth,
        };
        let d_diff = (after.x - depth.x).abs();
        if d_diff < PROGRESS_DEPTH_MIN && e_front - ion.energy < PROGRESS_ENERGY_MIN {
            warn!(
                "No progress at {:.4} tfu (E = {:.3} keV, step goal {:.3} keV), check stopping or step size",
                depth.x, ion.energy, budget
            );
            depth = sample.seek(depth.x + params.stall_nudge * ion.inverse_cos().signum());
            summary.stalls += 1;
            continue;
        }

        let mid = DepthPosition::new(0.5 * (depth.x + after.x), after.layer);
        let path_factor = ion.inverse_cos().abs() * d_diff * MB_SR_TFU * sample.yield_factor(mid);
        for ch in &mut ws.channels {
            if !ch.is_active() {
                continue;
            }
            if ch.is_full() {
                ch.overflow();
                continue;
            }
            if depth.x >= ch.max_depth {
                ch.deactivate();
                continue;
            }
            ch.product.energy = ion.energy * ch.k;
            ch.product.variance = ion.variance * ch.k;
            if exit.exit(&mut ch.product, after) == ExitOutcome::Underflow {
                ch.deactivate();
                continue;
            }
            let mut sigma_conc =
                cross_section_concentration(ch, sample, &params, depth, after, (e_front, ion.energy), (s_front, ion.variance));
            if after.layer == last_layer {
                sigma_conc *= sim.channeling;
            }
            let q = (sigma_conc * path_factor).max(0.0);

            let mut variance = ch.product.variance;
            if geostragg.is_enabled() {
                variance += geostragg.brick_variance(&exit, ch, after, ion.energy);
            }
            ch.push_brick(Brick {
                depth: after,
                energy_in: ion.energy,
                energy: ch.product.energy,
                variance,
                sigma: 0.0,
                q,
            });
        }
        depth = after;
        if !ws.channels.iter().any(ReactionChannel::is_active) {
            break;
        }
    }

    summary.depth = depth;

    let scale = ws.fluence * ws.detector.solid * weight;
    for ch in &mut ws.channels {
        if ch.last_brick() == 0 {
            continue;
        }
        brick_sigmas(&mut ch.bricks, resolution_variance);
        convolve_bricks(&mut ch.histogram, &ch.bricks, scale, params.sigmas_cutoff);
    }
    summary
}

/// Cross section × concentration (mb/sr) averaged over one incident step.
///
/// `energy` and `variance` are the `(front, back)` values of the beam.
fn cross_section_concentration(
    ch: &ReactionChannel,
    sample: &Sample,
    params: &SimCalcParams,
    before: DepthPosition,
    after: DepthPosition,
    energy: (f64, f64),
    variance: (f64, f64),
) -> f64 {
    let Some(i) = ch.isotope else {
        return 0.0;
    };
    if params.mean_conc_and_energy {
        let mid = DepthPosition::new(0.5 * (before.x + after.x), after.layer);
        let c = sample.concentration(mid, i);
        if c < ABUNDANCE_THRESHOLD {
            return 0.0;
        }
        return c * ch.cross_section(0.5 * (energy.0 + energy.1));
    }
    let n = params.cs_n_steps.max(1);
    let frac = 1.0 / n as f64;
    let x_step = (after.x - before.x) * frac;
    let e_step = (energy.1 - energy.0) * frac;
    let s_step = (variance.1 - variance.0) * frac;
    let sum: f64 = (1..=n)
        .map(|k| {
            let k = k as f64;
            let d = DepthPosition::new(before.x + x_step * k, after.layer);
            let c = sample.concentration(d, i);
            if c < ABUNDANCE_THRESHOLD {
                return 0.0;
            }
            let e = energy.0 + e_step * k;
            let sigma = if params.cs_n_stragg_steps > 1 {
                ch.cross_section_straggled(e, variance.0 + s_step * k, params.cs_n_stragg_steps)
            } else {
                ch.cross_section(e)
            };
            c * sigma
        })
        .sum();
    sum * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Calibration;
    use crate::reaction::Reaction;
    use crate::sample::{LayerModel, SampleModel};
    use approx::assert_relative_eq;
    use ibasim_physics::cross_section::Rutherford;
    use ibasim_physics::Nuclide;
    use std::sync::Arc;

    fn channel() -> (ReactionChannel, Sample) {
        let he = Arc::new(Nuclide::lookup("4He").unwrap());
        let si = Arc::new(Nuclide::lookup("28Si").unwrap());
        let o = Arc::new(Nuclide::lookup("16O").unwrap());
        let mut layer = LayerModel::new(100.0, vec![1.0, 0.0]);
        layer.concentrations_end = Some(vec![0.0, 1.0]);
        let sample = Sample::from_model(&SampleModel::new(vec![si.clone(), o], vec![layer])).unwrap();
        let mut ch = ReactionChannel::new(
            Reaction::rbs(he, si),
            Some(0),
            Arc::new(Rutherford),
            10,
            16,
            &Calibration::default(),
        );
        ch.reset(170f64.to_radians(), 100.0);
        (ch, sample)
    }

    #[test]
    fn test_midpoint_uses_mean_energy_and_concentration() {
        let (ch, sample) = channel();
        let params = SimCalcParams {
            mean_conc_and_energy: true,
            ..SimCalcParams::default()
        };
        let v = cross_section_concentration(
            &ch,
            &sample,
            &params,
            DepthPosition::new(0.0, 0),
            DepthPosition::new(50.0, 0),
            (2000.0, 1990.0),
            (0.0, 0.0),
        );
        assert_relative_eq!(v, 0.75 * ch.cross_section(1995.0), max_relative = 1e-12);
    }

    #[test]
    fn test_sub_steps_average_over_gradient() {
        let (ch, sample) = channel();
        let params = SimCalcParams {
            cs_n_steps: 2,
            cs_n_stragg_steps: 0,
            ..SimCalcParams::default()
        };
        let v = cross_section_concentration(
            &ch,
            &sample,
            &params,
            DepthPosition::new(0.0, 0),
            DepthPosition::new(100.0, 0),
            (2000.0, 2000.0),
            (0.0, 0.0),
        );
        // Sub-step points at 50 and 100 tfu: concentrations 0.5 and 0.
        assert_relative_eq!(v, 0.25 * ch.cross_section(2000.0), max_relative = 1e-12);
    }
}
