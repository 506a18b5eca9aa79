//! Fit variables: named handles to numbers inside a [`Simulation`].
//!
//! [`FitParams::all`] enumerates everything that can be fitted for a given
//! simulation. Variables are then switched on by name with
//! [`FitParams::activate`].
//!
//! | Name | Quantity | Display unit |
//! |------|----------|--------------|
//! | `fluence` | Beam fluence | particles |
//! | `alpha` | Sample tilt | deg |
//! | `energy` | Beam energy | keV |
//! | `det{n}_solid` | Detector solid angle | msr |
//! | `det{n}_calib_slope`, `_offset`, `_resolution` | Calibration | keV |
//! | `thick{i}` | Layer thickness | tfu |
//! | `yield{i}`, `yield_slope{i}` | Yield correction | |
//! | `bragg{i}`, `stragg{i}` | Stopping and straggling scale | |
//! | `rough{i}` | Roughness amount | tfu |
//! | `conc{i}_{nuclide}` | Concentration | % |
//! | `channeling` | Deepest-layer yield factor | |
//!
//! Detector and layer numbers in names start from 1.

use std::f64::consts::PI;

use ibasim_core::Simulation;
use serde::Serialize;

use crate::error::FitError;

/// Concentrations below this get no fit variable.
const CONC_TOLERANCE: f64 = 1e-6;

/// Where a fit variable lives in a [`Simulation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamRef {
    Fluence,
    Alpha,
    BeamEnergy,
    DetectorSolid(usize),
    CalibSlope(usize),
    CalibOffset(usize),
    CalibResolution(usize),
    Thickness(usize),
    Yield(usize),
    YieldSlope(usize),
    Bragg(usize),
    Stragg(usize),
    Roughness(usize),
    /// Concentration of sample nuclide `nuclide` at the top of `layer`.
    Concentration { layer: usize, nuclide: usize },
    Channeling,
}

impl ParamRef {
    pub fn get(&self, sim: &Simulation) -> f64 {
        let layers = &sim.sample_model.layers;
        match *self {
            ParamRef::Fluence => sim.fluence,
            ParamRef::Alpha => sim.alpha,
            ParamRef::BeamEnergy => sim.beam_energy,
            ParamRef::DetectorSolid(d) => sim.detectors[d].solid,
            ParamRef::CalibSlope(d) => sim.detectors[d].calibration.slope,
            ParamRef::CalibOffset(d) => sim.detectors[d].calibration.offset,
            ParamRef::CalibResolution(d) => sim.detectors[d].calibration.resolution,
            ParamRef::Thickness(i) => layers[i].thickness,
            ParamRef::Yield(i) => layers[i].yield_factor,
            ParamRef::YieldSlope(i) => layers[i].yield_slope,
            ParamRef::Bragg(i) => layers[i].bragg,
            ParamRef::Stragg(i) => layers[i].stragg,
            ParamRef::Roughness(i) => layers[i].roughness.amount,
            ParamRef::Concentration { layer, nuclide } => layers[layer].concentrations[nuclide],
            ParamRef::Channeling => sim.channeling,
        }
    }

    pub fn set(&self, sim: &mut Simulation, value: f64) {
        let layers = &mut sim.sample_model.layers;
        match *self {
            ParamRef::Fluence => sim.fluence = value,
            ParamRef::Alpha => sim.alpha = value,
            ParamRef::BeamEnergy => sim.beam_energy = value,
            ParamRef::DetectorSolid(d) => sim.detectors[d].solid = value,
            ParamRef::CalibSlope(d) => sim.detectors[d].calibration.slope = value,
            ParamRef::CalibOffset(d) => sim.detectors[d].calibration.offset = value,
            ParamRef::CalibResolution(d) => sim.detectors[d].calibration.resolution = value,
            ParamRef::Thickness(i) => layers[i].thickness = value,
            ParamRef::Yield(i) => layers[i].yield_factor = value,
            ParamRef::YieldSlope(i) => layers[i].yield_slope = value,
            ParamRef::Bragg(i) => layers[i].bragg = value,
            ParamRef::Stragg(i) => layers[i].stragg = value,
            ParamRef::Roughness(i) => layers[i].roughness.amount = value,
            ParamRef::Concentration { layer, nuclide } => {
                let l = &mut layers[layer];
                // Uniform layers stay uniform.
                if let Some(end) = &mut l.concentrations_end {
                    if end[nuclide] == l.concentrations[nuclide] {
                        end[nuclide] = value;
                    }
                }
                l.concentrations[nuclide] = value;
            }
            ParamRef::Channeling => sim.channeling = value,
        }
    }

    /// The one detector this variable affects, `None` when it affects all.
    pub fn detector(&self) -> Option<usize> {
        match *self {
            ParamRef::DetectorSolid(d) | ParamRef::CalibSlope(d) | ParamRef::CalibOffset(d) | ParamRef::CalibResolution(d) => {
                Some(d)
            }
            _ => None,
        }
    }

    pub fn is_concentration(&self) -> bool {
        matches!(self, ParamRef::Concentration { .. })
    }
}

/// One named fit variable.
#[derive(Debug, Clone)]
pub struct FitVariable {
    pub name: String,
    pub unit: &'static str,
    /// Internal value per display unit.
    pub unit_factor: f64,
    pub target: ParamRef,
    pub active: bool,
    /// Value when the fit started. Restored when the fit fails.
    pub value_orig: f64,
    /// Value at the start of the current phase; solver coordinates are
    /// relative to it.
    pub value_phase: f64,
    /// Final value (after a successful fit).
    pub value_final: f64,
    /// One-sigma uncertainty (after a successful fit).
    pub err: f64,
}

impl FitVariable {
    fn new(name: impl Into<String>, unit: &'static str, unit_factor: f64, target: ParamRef) -> Self {
        Self {
            name: name.into(),
            unit,
            unit_factor,
            target,
            active: false,
            value_orig: 0.0,
            value_phase: 0.0,
            value_final: 0.0,
            err: 0.0,
        }
    }

    pub fn value(&self, sim: &Simulation) -> f64 {
        self.target.get(sim)
    }

    /// Value of one solver coordinate unit: the phase starting value, or one
    /// internal unit when the variable starts the phase at zero.
    pub fn scale(&self) -> f64 {
        if self.value_phase != 0.0 {
            self.value_phase
        } else {
            1.0
        }
    }

    /// Relative uncertainty in percent, zero when the value is zero.
    pub fn err_percent(&self) -> f64 {
        if self.value_final == 0.0 {
            0.0
        } else {
            100.0 * (self.err / self.value_final).abs()
        }
    }
}

/// Serialisable summary of a fitted variable in display units.
#[derive(Debug, Clone, Serialize)]
pub struct FittedValue {
    pub name: String,
    pub unit: String,
    pub value: f64,
    pub error: f64,
    pub value_orig: f64,
}

impl From<&FitVariable> for FittedValue {
    fn from(v: &FitVariable) -> Self {
        Self {
            name: v.name.clone(),
            unit: v.unit.to_string(),
            value: v.value_final / v.unit_factor,
            error: v.err / v.unit_factor,
            value_orig: v.value_orig / v.unit_factor,
        }
    }
}

/// Registry of every fittable quantity of one simulation.
#[derive(Debug, Clone, Default)]
pub struct FitParams {
    pub vars: Vec<FitVariable>,
}

impl FitParams {
    /// Enumerate every fittable quantity of `sim`.
    pub fn all(sim: &Simulation) -> Self {
        let mut vars = vec![
            FitVariable::new("fluence", "", 1.0, ParamRef::Fluence),
            FitVariable::new("alpha", "deg", PI / 180.0, ParamRef::Alpha),
            FitVariable::new("energy", "keV", 1.0, ParamRef::BeamEnergy),
        ];
        for d in 0..sim.detectors.len() {
            let prefix = format!("det{}_", d + 1);
            vars.push(FitVariable::new(format!("{prefix}solid"), "msr", 1e-3, ParamRef::DetectorSolid(d)));
            vars.push(FitVariable::new(format!("{prefix}calib_slope"), "keV", 1.0, ParamRef::CalibSlope(d)));
            vars.push(FitVariable::new(format!("{prefix}calib_offset"), "keV", 1.0, ParamRef::CalibOffset(d)));
            vars.push(FitVariable::new(
                format!("{prefix}calib_resolution"),
                "keV",
                1.0,
                ParamRef::CalibResolution(d),
            ));
        }
        let model = &sim.sample_model;
        for (i, layer) in model.layers.iter().enumerate() {
            let n = i + 1;
            if layer.thickness > 0.0 {
                vars.push(FitVariable::new(format!("thick{n}"), "tfu", 1.0, ParamRef::Thickness(i)));
            }
            vars.push(FitVariable::new(format!("yield{n}"), "", 1.0, ParamRef::Yield(i)));
            vars.push(FitVariable::new(format!("yield_slope{n}"), "", 1.0, ParamRef::YieldSlope(i)));
            vars.push(FitVariable::new(format!("bragg{n}"), "", 1.0, ParamRef::Bragg(i)));
            vars.push(FitVariable::new(format!("stragg{n}"), "", 1.0, ParamRef::Stragg(i)));
            if layer.roughness.is_rough() {
                vars.push(FitVariable::new(format!("rough{n}"), "tfu", 1.0, ParamRef::Roughness(i)));
            }
            for (j, nuclide) in model.nuclides.iter().enumerate() {
                if layer.concentrations[j] < CONC_TOLERANCE {
                    continue;
                }
                vars.push(FitVariable::new(
                    format!("conc{n}_{}", nuclide.name),
                    "%",
                    0.01,
                    ParamRef::Concentration { layer: i, nuclide: j },
                ));
            }
        }
        vars.push(FitVariable::new("channeling", "", 1.0, ParamRef::Channeling));
        Self { vars }
    }

    /// Activate variables by name. `calib` activates every calibration
    /// parameter of every detector. Returns the number of variables
    /// activated.
    pub fn activate<S: AsRef<str>>(&mut self, names: &[S]) -> Result<usize, FitError> {
        let mut count = 0;
        for name in names {
            let name = name.as_ref().trim();
            let matches: Vec<usize> = self
                .vars
                .iter()
                .enumerate()
                .filter(|(_, v)| v.name == name || (name == "calib" && v.name.contains("_calib_")))
                .map(|(i, _)| i)
                .collect();
            if matches.is_empty() {
                return Err(FitError::UnknownVariable(name.to_string()));
            }
            for i in matches {
                if !self.vars[i].active {
                    self.vars[i].active = true;
                    count += 1;
                }
            }
        }
        Ok(count)
    }

    /// Activate a comma-separated list of names.
    pub fn activate_list(&mut self, list: &str) -> Result<usize, FitError> {
        let names: Vec<&str> = list.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();
        self.activate(&names)
    }

    pub fn n_active(&self) -> usize {
        self.vars.iter().filter(|v| v.active).count()
    }

    /// Indices into `vars` of the active variables, in solver order.
    pub fn active_indices(&self) -> Vec<usize> {
        self.vars
            .iter()
            .enumerate()
            .filter(|(_, v)| v.active)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn find(&self, name: &str) -> Option<&FitVariable> {
        self.vars.iter().find(|v| v.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.iter().map(|v| v.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ibasim_core::{LayerModel, Roughness, SampleModel};
    use ibasim_physics::stopping::AnalyticStopping;
    use ibasim_physics::Nuclide;
    use std::sync::Arc;

    fn sim() -> Simulation {
        let au = Arc::new(Nuclide::lookup("197Au").unwrap());
        let si = Arc::new(Nuclide::lookup("28Si").unwrap());
        let mut top = LayerModel::new(100.0, vec![1.0, 0.0]);
        top.roughness = Roughness::gamma(10.0, 5);
        let model = SampleModel::new(vec![au, si], vec![top, LayerModel::new(1000.0, vec![0.0, 1.0])]);
        Simulation::new(
            Arc::new(Nuclide::lookup("4He").unwrap()),
            2000.0,
            model,
            Arc::new(AnalyticStopping),
        )
    }

    #[test]
    fn test_registry_names() {
        let p = FitParams::all(&sim());
        let names: Vec<&str> = p.names().collect();
        for expected in [
            "fluence",
            "alpha",
            "energy",
            "det1_solid",
            "det1_calib_slope",
            "det1_calib_offset",
            "det1_calib_resolution",
            "thick1",
            "rough1",
            "conc1_197Au",
            "conc2_28Si",
            "channeling",
        ] {
            assert!(names.contains(&expected), "{expected} missing");
        }
        assert!(!names.contains(&"rough2"));
        assert!(!names.contains(&"conc1_28Si"));
    }

    #[test]
    fn test_calib_alias_and_unknown_names() {
        let mut p = FitParams::all(&sim());
        assert_eq!(p.activate(&["calib"]).unwrap(), 3);
        assert_eq!(p.activate_list("fluence, thick1").unwrap(), 2);
        assert_eq!(p.n_active(), 5);
        assert!(matches!(p.activate(&["thick9"]), Err(FitError::UnknownVariable(_))));
    }

    #[test]
    fn test_get_set_round_trip() {
        let mut s = sim();
        let p = FitParams::all(&s);
        let thick = p.find("thick2").unwrap().target;
        thick.set(&mut s, 1234.0);
        assert_eq!(s.sample_model.layers[1].thickness, 1234.0);
        assert_eq!(thick.get(&s), 1234.0);

        let solid = p.find("det1_solid").unwrap();
        assert_eq!(solid.target.detector(), Some(0));
        assert_eq!(p.find("energy").unwrap().target.detector(), None);
    }
}
