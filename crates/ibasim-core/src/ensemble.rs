//! Ensemble outer loops: roughness averaging and dual scattering.
//!
//! # Roughness
//!
//! Each rough layer gets a discretised thickness distribution (a Gamma
//! distribution with mean equal to the nominal thickness and standard
//! deviation equal to the roughness amount). The spectrum is the weighted
//! sum of transport runs over every combination of layer thicknesses:
//!
//! | Rough layers | Runs |
//! |--------------|------|
//! | 0 | 1 (nominal sample) |
//! | $k$ with $n_1 \ldots n_k$ bins | $\prod n_i$ |
//!
//! # Dual scattering
//!
//! After the roughness ensemble the beam path is re-traced in coarse steps.
//! At each step a fraction of the beam is scattered into a grid of polar and
//! azimuthal directions, and each of those is transported to the detector as
//! a secondary run. The scattered fraction is removed from the primary
//! weight, to first order.

use std::f64::consts::PI;
use std::sync::Arc;

use ibasim_physics::cross_section::Andersen;
use ibasim_physics::kinematics::ReactionKind;
use ibasim_physics::{CrossSectionProvider, Nuclide};
use log::debug;
use statrs::distribution::{ContinuousCDF, Gamma};

use crate::error::SimError;
use crate::geometry;
use crate::sample::{DepthPosition, Sample};
use crate::simulation::Simulation;
use crate::stepper::{DepthStepper, StepOutcome};
use crate::transport::simulate;
use crate::units::{ABUNDANCE_THRESHOLD, MB_SR_TFU};
use crate::workspace::SpectrumWorkspace;

const DS_POLAR_MIN: f64 = 20.0 * PI / 180.0;
const DS_POLAR_MAX: f64 = PI;
/// Secondary runs are skipped unless the second scattering exceeds this.
const DS_SCATTER_MIN: f64 = 30.0 * PI / 180.0;
/// The dual-scattering trace stops this close to the back of the sample (tfu).
const DS_BACK_MARGIN: f64 = 0.01;

/// One point of a discretised thickness distribution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThicknessProbability {
    /// tfu
    pub thickness: f64,
    pub probability: f64,
}

/// Discretise a Gamma thickness distribution into `n` equal-width bins.
///
/// Bins cover `[max(0, t - 4σ), t + 5σ]`; probabilities come from CDF
/// differences, are placed at bin centres and normalised to one.
pub fn gamma_thickness_table(thickness: f64, sigma: f64, n: usize) -> Result<Vec<ThicknessProbability>, SimError> {
    if n == 0 {
        return Err(SimError::sanity("roughness needs at least one thickness bin"));
    }
    if !(thickness > 0.0 && sigma > 0.0) {
        return Ok(vec![ThicknessProbability {
            thickness,
            probability: 1.0,
        }]);
    }
    let shape = (thickness / sigma).powi(2);
    let rate = thickness / (sigma * sigma);
    let gamma = Gamma::new(shape, rate)
        .map_err(|e| SimError::sanity(format!("invalid roughness distribution: {e}")))?;

    let low = (thickness - 4.0 * sigma).max(0.0);
    let high = thickness + 5.0 * sigma;
    let width = (high - low) / n as f64;
    let mut table: Vec<ThicknessProbability> = (0..n)
        .map(|i| {
            let a = low + width * i as f64;
            ThicknessProbability {
                thickness: a + 0.5 * width,
                probability: gamma.cdf(a + width) - gamma.cdf(a),
            }
        })
        .collect();
    let total: f64 = table.iter().map(|p| p.probability).sum();
    if !(total > 0.0) {
        return Err(SimError::sanity("roughness distribution has no probability mass"));
    }
    for p in &mut table {
        p.probability /= total;
    }
    Ok(table)
}

/// Every combination of rough-layer thicknesses, indexed by a mixed-radix
/// counter.
#[derive(Debug, Clone)]
pub struct RoughnessEnsemble {
    layers: Vec<usize>,
    tables: Vec<Vec<ThicknessProbability>>,
    radix: Vec<usize>,
    len: usize,
}

impl RoughnessEnsemble {
    pub fn new(sample: &Sample) -> Result<Self, SimError> {
        let layers = sample.rough_layers();
        let tables = layers
            .iter()
            .map(|&i| {
                let layer = &sample.layers[i];
                gamma_thickness_table(layer.thickness(), layer.roughness.amount, layer.roughness.n)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut radix = Vec::with_capacity(tables.len());
        let mut len = 1usize;
        for t in &tables {
            radix.push(len);
            len = len.saturating_mul(t.len());
        }
        debug!("{} rough layers, {} ensemble members", layers.len(), len);
        Ok(Self {
            layers,
            tables,
            radix,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Weight of member `i`.
    pub fn weight(&self, i: usize) -> f64 {
        self.tables
            .iter()
            .zip(&self.radix)
            .map(|(t, r)| t[(i / r) % t.len()].probability)
            .product()
    }

    /// Write member `i` into `out` (starting from `base`) and return its
    /// weight.
    pub fn apply(&self, i: usize, base: &Sample, out: &mut Sample) -> f64 {
        out.clone_from(base);
        let mut weight = 1.0;
        for ((&layer, table), &radix) in self.layers.iter().zip(&self.tables).zip(&self.radix) {
            let p = table[(i / radix) % table.len()];
            weight *= p.probability;
            out.set_layer_thickness(layer, p.thickness);
        }
        weight
    }
}

/// Fraction of a beam of `beam` ions at `energy` scattered into each polar
/// bin while crossing `thick_step` tfu around `mid`.
///
/// Bin `i` is centred on `polars[i]` and is `polar_step` wide. Angles the
/// beam cannot reach on any sample nuclide get zero.
pub fn ds_polar_probabilities(
    beam: &Nuclide,
    sample: &Sample,
    mid: DepthPosition,
    energy: f64,
    thick_step: f64,
    polars: &[f64],
    polar_step: f64,
) -> Vec<f64> {
    polars
        .iter()
        .map(|&polar| {
            let cs_sum: f64 = sample
                .nuclides
                .iter()
                .enumerate()
                .map(|(i, target)| {
                    let c = sample.concentration(mid, i);
                    if c < ABUNDANCE_THRESHOLD {
                        return 0.0;
                    }
                    c * Andersen.cross_section(ReactionKind::Rbs, beam, target, polar, energy)
                })
                .sum();
            cs_sum * polar.sin() * MB_SR_TFU * thick_step * 2.0 * PI * polar_step
        })
        .collect()
}

/// Fully simulate one workspace: roughness ensemble, optional dual
/// scattering and the sum spectrum.
pub fn simulate_workspace(ws: &mut SpectrumWorkspace, sim: &Simulation) -> Result<(), SimError> {
    ws.prepare(sim)?;
    ws.histograms_reset();
    simulate_with_roughness(ws, sim)?;
    if ws.params.ds {
        let primary = simulate_dual_scattering(ws, sim);
        debug!("Dual scattering left a primary weight of {primary:.6}");
    }
    ws.calculate_sum();
    Ok(())
}

fn simulate_with_roughness(ws: &mut SpectrumWorkspace, sim: &Simulation) -> Result<(), SimError> {
    let base = Arc::clone(&ws.sample);
    let incident = ws.incident.clone();
    if base.rough_layers().is_empty() {
        simulate(ws, sim, &incident, base.seek(0.0), &base, 1.0);
        return Ok(());
    }
    let ensemble = RoughnessEnsemble::new(&base)?;
    let mut rough = Sample::clone(&base);
    for i in 0..ensemble.len() {
        let weight = ensemble.apply(i, &base, &mut rough);
        simulate(ws, sim, &incident, rough.seek(0.0), &rough, weight);
    }
    Ok(())
}

/// Add the dual-scattering runs to the workspace histograms and return the
/// primary beam weight left at the end of the trace.
fn simulate_dual_scattering(ws: &mut SpectrumWorkspace, sim: &Simulation) -> f64 {
    let trace = ws.params.ds_trace();
    let saved = std::mem::replace(&mut ws.params, trace.clone());

    let stepper = DepthStepper::new(sim.stopping.as_ref(), &trace);
    let sample = Arc::clone(&ws.sample);
    let thickness = sample.thickness();
    let resolution_variance = ws.detector.resolution_variance();
    let detector_dir = sim.detector_angles(&ws.detector);
    let n_polar = trace.ds_steps_polar.max(2);
    let n_azi = trace.ds_steps_azi.max(1);
    let polar_step = (DS_POLAR_MAX - DS_POLAR_MIN) / (n_polar - 1) as f64;
    let polars: Vec<f64> = (0..n_polar)
        .map(|i| DS_POLAR_MIN + polar_step * i as f64)
        .collect();

    let mut ion = ws.incident.clone();
    let mut depth = sample.seek(0.0);
    let mut p_sr = 1.0;
    while ion.energy >= ws.emin {
        let e_front = ion.energy;
        let budget = (resolution_variance + ion.variance)
            .sqrt()
            .max(trace.incident.min);
        let after = match stepper.step(&mut ion, &sample, depth, budget) {
            StepOutcome::Advanced(d) => d,
            StepOutcome::Stall => break,
        };
        let thick_step = (after.x - depth.x).abs();
        let mid = DepthPosition::new(0.5 * (depth.x + after.x), after.layer);
        let e_mean = 0.5 * (e_front + ion.energy);
        debug!(
            "DS step {:.3} to {:.3} tfu, E {:.1} to {:.1} keV, primary weight {:.6}",
            depth.x, after.x, e_front, ion.energy, p_sr
        );

        let p_polar = ds_polar_probabilities(&sim.beam, &sample, mid, e_mean, thick_step, &polars, polar_step);
        let mut p_sum = 0.0;
        for (&polar, &p_tot) in polars.iter().zip(&p_polar) {
            if !(p_tot > 0.0) {
                continue;
            }
            p_sum += p_tot;
            let p_azi = p_tot / n_azi as f64;
            for i_azi in 0..n_azi {
                let azi = 2.0 * PI * i_azi as f64 / n_azi as f64;
                let mut secondary = ion.clone();
                secondary.rotate(polar, azi);
                if geometry::angle_between(secondary.angles(), detector_dir) > DS_SCATTER_MIN {
                    simulate(ws, sim, &secondary, after, &sample, p_azi * p_sr);
                }
            }
        }
        p_sr -= p_sum * p_sr;
        if thickness - after.x < DS_BACK_MARGIN {
            break;
        }
        depth = after;
    }
    ws.params = saved;
    p_sr
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{LayerModel, SampleModel};
    use approx::assert_abs_diff_eq;
    use ibasim_physics::stopping::AnalyticStopping;

    fn nuclide(name: &str) -> Arc<Nuclide> {
        Arc::new(Nuclide::lookup(name).unwrap())
    }

    /// 2 MeV ⁴He on a gold film of `thickness` tfu, coarse DS grid.
    fn gold_film(thickness: f64) -> Simulation {
        let model = SampleModel::new(vec![nuclide("197Au")], vec![LayerModel::new(thickness, vec![1.0])]);
        let mut sim = Simulation::new(nuclide("4He"), 2000.0, model, Arc::new(AnalyticStopping));
        sim.params.ds = true;
        sim.params.ds_steps_polar = 3;
        sim.params.ds_steps_azi = 2;
        sim.add_auto_reactions(true, false);
        sim
    }

    fn primary_weight_after_trace(sim: &Simulation) -> f64 {
        let mut ws = SpectrumWorkspace::new(sim, 0).unwrap();
        ws.histograms_reset();
        simulate_dual_scattering(&mut ws, sim)
    }

    #[test]
    fn test_gamma_table_is_normalised_around_mean() {
        let table = gamma_thickness_table(1000.0, 100.0, 20).unwrap();
        assert_eq!(table.len(), 20);
        let total: f64 = table.iter().map(|p| p.probability).sum();
        assert_abs_diff_eq!(total, 1.0, epsilon = 1e-12);
        let mean: f64 = table.iter().map(|p| p.thickness * p.probability).sum();
        assert_abs_diff_eq!(mean, 1000.0, epsilon = 10.0);
        assert!(table.iter().all(|p| p.thickness > 0.0));
    }

    #[test]
    fn test_smooth_layer_has_single_entry() {
        let table = gamma_thickness_table(1000.0, 0.0, 20).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table[0].probability, 1.0);
    }

    #[test]
    fn test_zero_bins_rejected() {
        assert!(gamma_thickness_table(1000.0, 100.0, 0).is_err());
    }

    #[test]
    fn test_ds_skips_angles_beyond_kinematic_limit() {
        // ²⁸Si cannot scatter from ¹⁶O beyond asin(16/28) ≈ 34.8°.
        let model = SampleModel::new(vec![nuclide("16O")], vec![LayerModel::new(100.0, vec![1.0])]);
        let sample = Sample::from_model(&model).unwrap();
        let polars: Vec<f64> = [20.0f64, 30.0, 40.0, 90.0, 170.0].iter().map(|d| d.to_radians()).collect();
        let p = ds_polar_probabilities(
            &nuclide("28Si"),
            &sample,
            sample.seek(50.0),
            5000.0,
            10.0,
            &polars,
            10f64.to_radians(),
        );
        assert!(p[0] > 0.0 && p[1] > 0.0);
        assert_eq!(&p[2..], &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_ds_probability_scales_with_step_and_concentration() {
        let model = SampleModel::new(
            vec![nuclide("197Au"), nuclide("28Si")],
            vec![LayerModel::new(100.0, vec![1.0, 1.0])],
        );
        let sample = Sample::from_model(&model).unwrap();
        let he = nuclide("4He");
        let polars = [90f64.to_radians()];
        let step = 10f64.to_radians();
        let mid = sample.seek(50.0);
        let one = ds_polar_probabilities(&he, &sample, mid, 2000.0, 1.0, &polars, step)[0];
        let two = ds_polar_probabilities(&he, &sample, mid, 2000.0, 2.0, &polars, step)[0];
        assert!(one > 0.0);
        assert_abs_diff_eq!(two, 2.0 * one, epsilon = 1e-15);

        let au = Andersen.cross_section(ReactionKind::Rbs, &he, &sample.nuclides[0], polars[0], 2000.0);
        let si = Andersen.cross_section(ReactionKind::Rbs, &he, &sample.nuclides[1], polars[0], 2000.0);
        let expected = 0.5 * (au + si) * MB_SR_TFU * 2.0 * PI * step;
        assert_abs_diff_eq!(one, expected, epsilon = 1e-12 * expected);
    }

    #[test]
    fn test_ds_trace_removes_primary_weight() {
        let thin = primary_weight_after_trace(&gold_film(50.0));
        let thick = primary_weight_after_trace(&gold_film(100.0));
        assert!(thin < 1.0 && thin > 0.9, "primary weight {thin}");
        assert!(thick < thin, "{thick} >= {thin}");
    }

    #[test]
    fn test_ds_trace_restores_params() {
        let sim = gold_film(50.0);
        let mut ws = SpectrumWorkspace::new(&sim, 0).unwrap();
        let before = ws.params.clone();
        simulate_dual_scattering(&mut ws, &sim);
        assert_eq!(ws.params, before);
    }
}
