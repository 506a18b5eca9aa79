//! Layered sample description.
//!
//! [`SampleModel`] is the user-facing description: a list of nuclides and
//! layers with thicknesses and (possibly unnormalized) concentrations. It is
//! turned into a [`Sample`], the computational form with absolute layer
//! boundaries and normalized concentration profiles that the transport code
//! walks through with [`DepthPosition`] cursors.
//!
//! A layer may carry a linear concentration gradient: its concentrations are
//! interpolated between `concentrations` at the top and
//! `concentrations_end` at the bottom.

use std::sync::Arc;

use ibasim_physics::Nuclide;
use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::units::ABUNDANCE_THRESHOLD;

/// Thickness variation model of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoughnessModel {
    #[default]
    None,
    /// Gamma-distributed thickness.
    Gamma,
}

/// Layer roughness: model, standard deviation of thickness (tfu) and number
/// of thickness samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roughness {
    #[serde(default)]
    pub model: RoughnessModel,
    #[serde(default)]
    pub amount: f64,
    #[serde(default = "default_rough_n")]
    pub n: usize,
}

fn default_rough_n() -> usize {
    5
}

impl Default for Roughness {
    fn default() -> Self {
        Self {
            model: RoughnessModel::None,
            amount: 0.0,
            n: default_rough_n(),
        }
    }
}

impl Roughness {
    pub fn gamma(amount: f64, n: usize) -> Self {
        Self {
            model: RoughnessModel::Gamma,
            amount,
            n,
        }
    }

    pub fn is_rough(&self) -> bool {
        self.model != RoughnessModel::None && self.amount > 0.0
    }
}

fn one() -> f64 {
    1.0
}

/// One layer of a [`SampleModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerModel {
    /// tfu
    pub thickness: f64,
    /// Concentration of each sample nuclide at the top of the layer.
    pub concentrations: Vec<f64>,
    /// Concentrations at the bottom; `None` means a uniform layer.
    #[serde(default)]
    pub concentrations_end: Option<Vec<f64>>,
    #[serde(default)]
    pub roughness: Roughness,
    /// Multiplies the yield of every reaction in this layer.
    #[serde(default = "one")]
    pub yield_factor: f64,
    /// Linear change of the yield factor from top (0) to bottom (1).
    #[serde(default)]
    pub yield_slope: f64,
    /// Stopping scale factor.
    #[serde(default = "one")]
    pub bragg: f64,
    /// Straggling scale factor.
    #[serde(default = "one")]
    pub stragg: f64,
}

impl LayerModel {
    pub fn new(thickness: f64, concentrations: Vec<f64>) -> Self {
        Self {
            thickness,
            concentrations,
            concentrations_end: None,
            roughness: Roughness::default(),
            yield_factor: 1.0,
            yield_slope: 0.0,
            bragg: 1.0,
            stragg: 1.0,
        }
    }
}

/// User-facing sample description.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleModel {
    pub nuclides: Vec<Arc<Nuclide>>,
    pub layers: Vec<LayerModel>,
}

impl SampleModel {
    pub fn new(nuclides: Vec<Arc<Nuclide>>, layers: Vec<LayerModel>) -> Self {
        Self { nuclides, layers }
    }

    pub fn total_thickness(&self) -> f64 {
        self.layers.iter().map(|l| l.thickness).sum()
    }

    /// Index of `nuclide` in this sample.
    pub fn nuclide_index(&self, nuclide: &Nuclide) -> Option<usize> {
        self.nuclides.iter().position(|n| n.same_isotope(nuclide))
    }

    /// Check physical validity of every layer.
    pub fn sanity_check(&self) -> Result<(), SimError> {
        if self.nuclides.is_empty() {
            return Err(SimError::sanity("sample has no nuclides"));
        }
        if self.layers.is_empty() {
            return Err(SimError::sanity("sample has no layers"));
        }
        let n = self.nuclides.len();
        for (i, layer) in self.layers.iter().enumerate() {
            if !layer.thickness.is_finite() || layer.thickness < 0.0 {
                return Err(SimError::sanity(format!(
                    "layer {} thickness {} is not a non-negative number",
                    i + 1,
                    layer.thickness
                )));
            }
            check_concentrations(i, &layer.concentrations, n)?;
            if let Some(end) = &layer.concentrations_end {
                check_concentrations(i, end, n)?;
            }
            let r = &layer.roughness;
            if !r.amount.is_finite() || r.amount < 0.0 {
                return Err(SimError::sanity(format!(
                    "layer {} roughness {} is not a non-negative number",
                    i + 1,
                    r.amount
                )));
            }
            if r.is_rough() && !(1..=1000).contains(&r.n) {
                return Err(SimError::sanity(format!(
                    "layer {} roughness needs 1..=1000 thickness samples, got {}",
                    i + 1,
                    r.n
                )));
            }
            for (what, v) in [
                ("yield factor", layer.yield_factor),
                ("yield slope", layer.yield_slope),
                ("bragg", layer.bragg),
                ("stragg", layer.stragg),
            ] {
                if !v.is_finite() {
                    return Err(SimError::sanity(format!("layer {} {what} is {v}", i + 1)));
                }
            }
            let (top, bottom) = (layer.yield_factor, layer.yield_factor + layer.yield_slope);
            if top < 0.0 || bottom < 0.0 {
                return Err(SimError::sanity(format!(
                    "layer {} yield factor goes negative ({top} at top, {bottom} at bottom)",
                    i + 1
                )));
            }
            if layer.bragg <= 0.0 || layer.stragg < 0.0 {
                return Err(SimError::sanity(format!(
                    "layer {} stopping/straggling scale must be positive",
                    i + 1
                )));
            }
        }
        if self.total_thickness() <= 0.0 {
            return Err(SimError::sanity("sample has zero total thickness"));
        }
        Ok(())
    }

    /// Scale every concentration profile to sum to one.
    pub fn renormalize(&mut self) {
        for layer in &mut self.layers {
            normalize(&mut layer.concentrations);
            if let Some(end) = &mut layer.concentrations_end {
                normalize(end);
            }
        }
    }
}

fn check_concentrations(layer: usize, c: &[f64], n: usize) -> Result<(), SimError> {
    if c.len() != n {
        return Err(SimError::sanity(format!(
            "layer {} has {} concentrations for {} nuclides",
            layer + 1,
            c.len(),
            n
        )));
    }
    if c.iter().any(|v| !v.is_finite() || *v < 0.0) {
        return Err(SimError::sanity(format!(
            "layer {} has a negative or non-finite concentration",
            layer + 1
        )));
    }
    if c.iter().sum::<f64>() <= 0.0 {
        return Err(SimError::sanity(format!(
            "layer {} concentrations sum to zero",
            layer + 1
        )));
    }
    Ok(())
}

fn normalize(c: &mut [f64]) {
    let sum: f64 = c.iter().sum();
    if sum > 0.0 {
        c.iter_mut().for_each(|v| *v /= sum);
    }
}

/// Depth cursor: absolute depth (tfu) and the index of the layer it lies in.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DepthPosition {
    pub x: f64,
    pub layer: usize,
}

impl DepthPosition {
    pub fn new(x: f64, layer: usize) -> Self {
        Self { x, layer }
    }
}

/// One layer of a [`Sample`] with absolute boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleLayer {
    /// Depth of the top boundary (tfu).
    pub begin: f64,
    /// Depth of the bottom boundary (tfu).
    pub end: f64,
    pub conc_begin: Vec<f64>,
    pub conc_end: Vec<f64>,
    pub roughness: Roughness,
    pub yield_factor: f64,
    pub yield_slope: f64,
    pub bragg: f64,
    pub stragg: f64,
}

impl SampleLayer {
    pub fn thickness(&self) -> f64 {
        self.end - self.begin
    }
}

/// Computational sample: contiguous layers starting at depth zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub nuclides: Vec<Arc<Nuclide>>,
    pub layers: Vec<SampleLayer>,
}

impl Sample {
    /// Build from a validated model. Concentrations are normalized.
    pub fn from_model(model: &SampleModel) -> Result<Self, SimError> {
        model.sanity_check()?;
        let mut x = 0.0;
        let layers = model
            .layers
            .iter()
            .map(|l| {
                let mut conc_begin = l.concentrations.clone();
                let mut conc_end = l
                    .concentrations_end
                    .clone()
                    .unwrap_or_else(|| l.concentrations.clone());
                normalize(&mut conc_begin);
                normalize(&mut conc_end);
                let begin = x;
                x += l.thickness;
                SampleLayer {
                    begin,
                    end: x,
                    conc_begin,
                    conc_end,
                    roughness: l.roughness,
                    yield_factor: l.yield_factor,
                    yield_slope: l.yield_slope,
                    bragg: l.bragg,
                    stragg: l.stragg,
                }
            })
            .collect();
        Ok(Self {
            nuclides: model.nuclides.clone(),
            layers,
        })
    }

    pub fn thickness(&self) -> f64 {
        self.layers.last().map_or(0.0, |l| l.end)
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Cursor for depth `x`. Depths on a boundary belong to the upper layer.
    pub fn seek(&self, x: f64) -> DepthPosition {
        let layer = self
            .layers
            .iter()
            .position(|l| x <= l.end)
            .unwrap_or(self.layers.len().saturating_sub(1));
        DepthPosition { x, layer }
    }

    /// Concentration of nuclide `i` at `depth`.
    pub fn concentration(&self, depth: DepthPosition, i: usize) -> f64 {
        let layer = &self.layers[depth.layer];
        let (c0, c1) = (layer.conc_begin[i], layer.conc_end[i]);
        if c0 == c1 {
            return c0;
        }
        let t = layer.thickness();
        if t <= 0.0 {
            return c0;
        }
        let f = ((depth.x - layer.begin) / t).clamp(0.0, 1.0);
        c0 + (c1 - c0) * f
    }

    /// Yield scale factor at `depth`.
    pub fn yield_factor(&self, depth: DepthPosition) -> f64 {
        let layer = &self.layers[depth.layer];
        if layer.yield_slope == 0.0 || layer.thickness() <= 0.0 {
            return layer.yield_factor;
        }
        let f = ((depth.x - layer.begin) / layer.thickness()).clamp(0.0, 1.0);
        layer.yield_factor + layer.yield_slope * f
    }

    /// Depth below which nuclide `i` no longer occurs, zero if absent.
    pub fn isotope_max_depth(&self, i: usize) -> f64 {
        self.layers
            .iter()
            .rev()
            .find(|l| l.conc_begin[i] > ABUNDANCE_THRESHOLD || l.conc_end[i] > ABUNDANCE_THRESHOLD)
            .map_or(0.0, |l| l.end)
    }

    /// Indices of layers with an active roughness model.
    pub fn rough_layers(&self) -> Vec<usize> {
        self.layers
            .iter()
            .enumerate()
            .filter(|(_, l)| l.roughness.is_rough())
            .map(|(i, _)| i)
            .collect()
    }

    /// Change the thickness of layer `i`, moving every deeper boundary.
    pub fn set_layer_thickness(&mut self, i: usize, thickness: f64) {
        let delta = thickness - self.layers[i].thickness();
        self.layers[i].end += delta;
        for l in &mut self.layers[i + 1..] {
            l.begin += delta;
            l.end += delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn nuclides() -> Vec<Arc<Nuclide>> {
        ["28Si", "16O"]
            .iter()
            .map(|n| Arc::new(Nuclide::lookup(n).unwrap()))
            .collect()
    }

    fn model() -> SampleModel {
        let mut graded = LayerModel::new(200.0, vec![1.0, 0.0]);
        graded.concentrations_end = Some(vec![0.0, 1.0]);
        SampleModel::new(
            nuclides(),
            vec![LayerModel::new(100.0, vec![1.0, 2.0]), graded],
        )
    }

    #[test]
    fn test_boundaries_are_cumulative() {
        let s = Sample::from_model(&model()).unwrap();
        assert_eq!(s.layers[0].end, 100.0);
        assert_eq!(s.layers[1].begin, 100.0);
        assert_eq!(s.thickness(), 300.0);
    }

    #[test]
    fn test_concentrations_are_normalized() {
        let s = Sample::from_model(&model()).unwrap();
        let d = s.seek(50.0);
        assert_abs_diff_eq!(s.concentration(d, 0), 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s.concentration(d, 1), 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_graded_layer_interpolates() {
        let s = Sample::from_model(&model()).unwrap();
        let d = s.seek(150.0);
        assert_eq!(d.layer, 1);
        assert_abs_diff_eq!(s.concentration(d, 0), 0.75, epsilon = 1e-12);
        assert_abs_diff_eq!(s.concentration(d, 1), 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_seek_boundary_belongs_to_upper_layer() {
        let s = Sample::from_model(&model()).unwrap();
        assert_eq!(s.seek(0.0).layer, 0);
        assert_eq!(s.seek(100.0).layer, 0);
        assert_eq!(s.seek(100.5).layer, 1);
        assert_eq!(s.seek(1e9).layer, 1);
    }

    #[test]
    fn test_isotope_max_depth() {
        let mut m = model();
        m.layers.push(LayerModel::new(50.0, vec![0.0, 1.0]));
        let s = Sample::from_model(&m).unwrap();
        assert_eq!(s.isotope_max_depth(0), 300.0);
        assert_eq!(s.isotope_max_depth(1), 350.0);
    }

    #[test]
    fn test_sanity_check_rejects_bad_layers() {
        let mut m = model();
        m.layers[0].concentrations = vec![1.0];
        assert!(m.sanity_check().is_err());

        let mut m = model();
        m.layers[0].thickness = -1.0;
        assert!(m.sanity_check().is_err());

        let mut m = model();
        m.layers[1].concentrations = vec![0.0, 0.0];
        assert!(m.sanity_check().is_err());

        let mut m = model();
        m.layers[0].roughness = Roughness::gamma(10.0, 0);
        assert!(m.sanity_check().is_err());
    }

    #[test]
    fn test_negative_yield_factor_is_rejected() {
        let mut m = model();
        m.layers[0].yield_factor = -1.0;
        assert!(matches!(m.sanity_check(), Err(SimError::SanityCheckFailure(_))));

        // Positive at the top, negative at the bottom.
        let mut m = model();
        m.layers[1].yield_factor = 0.5;
        m.layers[1].yield_slope = -0.8;
        assert!(matches!(m.sanity_check(), Err(SimError::SanityCheckFailure(_))));

        let mut m = model();
        m.layers[1].yield_factor = 0.5;
        m.layers[1].yield_slope = -0.5;
        assert!(m.sanity_check().is_ok());
        let s = Sample::from_model(&m).unwrap();
        assert_abs_diff_eq!(s.yield_factor(s.seek(300.0)), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_renormalize_model() {
        let mut m = model();
        m.renormalize();
        assert_abs_diff_eq!(m.layers[0].concentrations[1], 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_set_layer_thickness_shifts_deeper_layers() {
        let mut s = Sample::from_model(&model()).unwrap();
        s.set_layer_thickness(0, 120.0);
        assert_eq!(s.layers[0].end, 120.0);
        assert_eq!(s.layers[1].begin, 120.0);
        assert_eq!(s.thickness(), 320.0);
    }
}
