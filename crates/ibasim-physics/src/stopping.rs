//! Stopping and energy-loss straggling models.
//!
//! A [`StoppingModel`] returns, per target nuclide, the electronic and
//! nuclear stopping cross sections (keV/tfu) and the energy-loss straggling
//! rate (keV²/tfu). The transport engine weights these by concentration to
//! obtain the rates of a mixture.
//!
//! ## Models
//!
//! | Model | Electronic | Straggling |
//! |-------|------------|------------|
//! | [`AnalyticStopping`] | Lindhard–Scharff / Bethe smooth minimum | Bohr |
//! | [`ConstantStopping`] | fixed value | fixed value |
//! | [`TabulatedStopping`] | spline per `(Z1, Z2)` | spline or Bohr |
//!
//! Nuclear stopping uses the ZBL universal potential, either the full fit or
//! a simplified single-term fit that is cheaper to evaluate.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::nuclide::Nuclide;
use crate::provider::PhysicsError;
use crate::spline::CubicSpline;

/// eV/tfu to keV/tfu.
const EV_TO_KEV: f64 = 1e-3;
/// Bohr straggling prefactor $4\pi e^4$ in keV²·tfu⁻¹.
const BOHR_CONST: f64 = 2.6058e-4;
/// Exponent of the smooth minimum joining low and high energy stopping.
const SMOOTH_MIN_POWER: f64 = 4.0;

/// Stopping and straggling rates of a medium at one energy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StoppingRates {
    /// Total stopping (keV/tfu).
    pub stopping: f64,
    /// Straggling (keV²/tfu).
    pub straggling: f64,
}

/// Nuclear stopping model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NuclearStopping {
    /// Full ZBL universal fit.
    #[default]
    Universal,
    /// Single-term ZBL fit.
    Simplified,
    /// Electronic stopping only.
    Off,
}

/// Provides per-nuclide stopping and straggling.
pub trait StoppingModel: Send + Sync {
    /// Human-readable model name.
    fn name(&self) -> &str;

    /// Electronic stopping cross section (keV/tfu).
    fn electronic(&self, ion: &Nuclide, target: &Nuclide, energy_kev: f64) -> f64;

    /// Energy-loss straggling (keV²/tfu).
    fn straggling(&self, ion: &Nuclide, target: &Nuclide, energy_kev: f64) -> f64;

    /// Nuclear stopping cross section (keV/tfu).
    fn nuclear(&self, ion: &Nuclide, target: &Nuclide, energy_kev: f64, mode: NuclearStopping) -> f64 {
        nuclear_stopping(ion, target, energy_kev, mode)
    }

    /// Total stopping and straggling at once.
    fn rates(&self, ion: &Nuclide, target: &Nuclide, energy_kev: f64, mode: NuclearStopping) -> StoppingRates {
        StoppingRates {
            stopping: self.electronic(ion, target, energy_kev)
                + self.nuclear(ion, target, energy_kev, mode),
            straggling: self.straggling(ion, target, energy_kev),
        }
    }
}

/// ZBL reduced energy $\varepsilon$ for `energy_kev` in the lab frame.
pub fn reduced_energy(ion: &Nuclide, target: &Nuclide, energy_kev: f64) -> f64 {
    let (z1, z2) = (ion.z as f64, target.z as f64);
    32.53 * target.mass * energy_kev
        / (z1 * z2 * (ion.mass + target.mass) * (z1.powf(0.23) + z2.powf(0.23)))
}

/// ZBL nuclear stopping (keV/tfu).
pub fn nuclear_stopping(ion: &Nuclide, target: &Nuclide, energy_kev: f64, mode: NuclearStopping) -> f64 {
    if energy_kev <= 0.0 || mode == NuclearStopping::Off {
        return 0.0;
    }
    let eps = reduced_energy(ion, target, energy_kev);
    let sn = match mode {
        NuclearStopping::Universal if eps <= 30.0 => {
            (1.0 + 1.1383 * eps).ln()
                / (2.0 * (eps + 0.01321 * eps.powf(0.21226) + 0.19593 * eps.sqrt()))
        }
        NuclearStopping::Universal => eps.ln() / (2.0 * eps),
        NuclearStopping::Simplified => {
            (1.0 + eps).ln() / (2.0 * (eps + 0.10718 * eps.powf(0.37544)))
        }
        NuclearStopping::Off => 0.0,
    };
    let (z1, z2) = (ion.z as f64, target.z as f64);
    let factor = 8.462 * z1 * z2 * ion.mass
        / ((ion.mass + target.mass) * (z1.powf(0.23) + z2.powf(0.23)));
    factor * sn * EV_TO_KEV
}

/// Bohr straggling (keV²/tfu), independent of energy.
pub fn bohr_straggling(ion: &Nuclide, target: &Nuclide) -> f64 {
    let z1 = ion.z as f64;
    BOHR_CONST * z1 * z1 * target.z as f64
}

/// Closed-form electronic stopping.
///
/// Joins the Lindhard–Scharff velocity-proportional regime
///
/// $$S_{LS} = \frac{1.212 Z_1^{7/6} Z_2}{(Z_1^{2/3} + Z_2^{2/3})^{3/2}} \sqrt{E/M_1}$$
///
/// and the Bethe regime
///
/// $$S_B = \frac{237.5 Z_1^2 Z_2 M_1}{E} \ln\frac{0.21944 E}{M_1 Z_2}$$
///
/// (both in eV/tfu) with a smooth minimum. Straggling is Bohr.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalyticStopping;

impl AnalyticStopping {
    fn lindhard_scharff(ion: &Nuclide, target: &Nuclide, energy_kev: f64) -> f64 {
        let (z1, z2) = (ion.z as f64, target.z as f64);
        1.212 * z1.powf(7.0 / 6.0) * z2
            / (z1.powf(2.0 / 3.0) + z2.powf(2.0 / 3.0)).powf(1.5)
            * (energy_kev / ion.mass).sqrt()
    }

    fn bethe(ion: &Nuclide, target: &Nuclide, energy_kev: f64) -> Option<f64> {
        let (z1, z2) = (ion.z as f64, target.z as f64);
        let log = (0.21944 * energy_kev / (ion.mass * z2)).ln();
        (log > 0.0).then(|| 237.5 * z1 * z1 * z2 * ion.mass / energy_kev * log)
    }
}

impl StoppingModel for AnalyticStopping {
    fn name(&self) -> &str {
        "analytic"
    }

    fn electronic(&self, ion: &Nuclide, target: &Nuclide, energy_kev: f64) -> f64 {
        if energy_kev <= 0.0 {
            return 0.0;
        }
        let low = Self::lindhard_scharff(ion, target, energy_kev);
        let s = match Self::bethe(ion, target, energy_kev) {
            Some(high) => {
                let p = SMOOTH_MIN_POWER;
                (low.powf(-p) + high.powf(-p)).powf(-1.0 / p)
            }
            None => low,
        };
        s * EV_TO_KEV
    }

    fn straggling(&self, ion: &Nuclide, target: &Nuclide, _energy_kev: f64) -> f64 {
        bohr_straggling(ion, target)
    }
}

/// Fixed stopping and straggling, independent of ion, target and energy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantStopping {
    /// keV/tfu
    pub stopping: f64,
    /// keV²/tfu
    pub straggling: f64,
}

impl StoppingModel for ConstantStopping {
    fn name(&self) -> &str {
        "constant"
    }

    fn electronic(&self, _ion: &Nuclide, _target: &Nuclide, energy_kev: f64) -> f64 {
        if energy_kev <= 0.0 {
            0.0
        } else {
            self.stopping
        }
    }

    fn straggling(&self, _ion: &Nuclide, _target: &Nuclide, _energy_kev: f64) -> f64 {
        self.straggling
    }

    fn nuclear(&self, _ion: &Nuclide, _target: &Nuclide, _energy_kev: f64, _mode: NuclearStopping) -> f64 {
        0.0
    }
}

/// Tabulated electronic stopping for one `(ion, target)` pair.
#[derive(Debug, Clone)]
pub struct StoppingTable {
    stopping: CubicSpline,
    straggling: Option<CubicSpline>,
}

impl StoppingTable {
    /// Build from energies (keV) and stopping values (keV/tfu).
    pub fn new(energies: Vec<f64>, stopping: Vec<f64>) -> Result<Self, PhysicsError> {
        if stopping.iter().any(|s| !s.is_finite() || *s < 0.0) {
            return Err(PhysicsError::InvalidTable(
                "stopping values must be finite and non-negative".into(),
            ));
        }
        Ok(Self {
            stopping: CubicSpline::new(energies, stopping)?,
            straggling: None,
        })
    }

    /// Attach tabulated straggling (keV²/tfu) on its own energy grid.
    pub fn with_straggling(mut self, energies: Vec<f64>, straggling: Vec<f64>) -> Result<Self, PhysicsError> {
        self.straggling = Some(CubicSpline::new(energies, straggling)?);
        Ok(self)
    }
}

/// Stopping from per-pair tables, with an optional model for pairs that
/// have no table.
///
/// Energies outside a table are clamped to its range.
#[derive(Clone, Default)]
pub struct TabulatedStopping {
    tables: HashMap<(u32, u32), StoppingTable>,
    fallback: Option<Arc<dyn StoppingModel>>,
}

impl TabulatedStopping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the table for ion charge `z1` in target element `z2`.
    pub fn insert(&mut self, z1: u32, z2: u32, table: StoppingTable) {
        self.tables.insert((z1, z2), table);
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn StoppingModel>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Whether every `(ion, target)` pair has a table or a fallback.
    pub fn covers(&self, ion: &Nuclide, targets: &[Nuclide]) -> Result<(), PhysicsError> {
        if self.fallback.is_some() {
            return Ok(());
        }
        match targets.iter().find(|t| !self.tables.contains_key(&(ion.z, t.z))) {
            Some(t) => Err(PhysicsError::InvalidTable(format!(
                "no stopping table for {} in {}",
                ion.name, t.name
            ))),
            None => Ok(()),
        }
    }
}

impl StoppingModel for TabulatedStopping {
    fn name(&self) -> &str {
        "tabulated"
    }

    fn electronic(&self, ion: &Nuclide, target: &Nuclide, energy_kev: f64) -> f64 {
        if energy_kev <= 0.0 {
            return 0.0;
        }
        match self.tables.get(&(ion.z, target.z)) {
            Some(t) => t.stopping.evaluate_clamped(energy_kev).max(0.0),
            None => self
                .fallback
                .as_ref()
                .map_or(0.0, |f| f.electronic(ion, target, energy_kev)),
        }
    }

    fn straggling(&self, ion: &Nuclide, target: &Nuclide, energy_kev: f64) -> f64 {
        match self.tables.get(&(ion.z, target.z)) {
            Some(StoppingTable {
                straggling: Some(s), ..
            }) => s.evaluate_clamped(energy_kev).max(0.0),
            Some(_) => bohr_straggling(ion, target),
            None => self
                .fallback
                .as_ref()
                .map_or_else(|| bohr_straggling(ion, target), |f| f.straggling(ion, target, energy_kev)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pair() -> (Nuclide, Nuclide) {
        (Nuclide::lookup("4He").unwrap(), Nuclide::lookup("28Si").unwrap())
    }

    #[test]
    fn test_analytic_stopping_is_positive_and_peaks() {
        let (he, si) = pair();
        let s: Vec<f64> = [50.0, 300.0, 800.0, 2000.0, 5000.0, 20000.0]
            .iter()
            .map(|&e| AnalyticStopping.electronic(&he, &si, e))
            .collect();
        assert!(s.iter().all(|&v| v > 0.0));
        // Rises at low energy, falls at high energy.
        assert!(s[1] > s[0]);
        assert!(s[5] < s[3]);
    }

    #[test]
    fn test_analytic_stopping_realistic_magnitude() {
        // He in Si near 2 MeV is a few tens of eV/tfu.
        let (he, si) = pair();
        let s = AnalyticStopping.electronic(&he, &si, 2000.0);
        assert!(s > 0.02 && s < 0.08, "S = {s} keV/tfu");
    }

    #[test]
    fn test_zero_energy_has_no_stopping() {
        let (he, si) = pair();
        assert_eq!(AnalyticStopping.electronic(&he, &si, 0.0), 0.0);
        assert_eq!(nuclear_stopping(&he, &si, 0.0, NuclearStopping::Universal), 0.0);
    }

    #[test]
    fn test_nuclear_stopping_small_at_mev_energies() {
        let (he, si) = pair();
        let sn = nuclear_stopping(&he, &si, 2000.0, NuclearStopping::Universal);
        let se = AnalyticStopping.electronic(&he, &si, 2000.0);
        assert!(sn > 0.0 && sn < 0.01 * se);
        let simple = nuclear_stopping(&he, &si, 2000.0, NuclearStopping::Simplified);
        assert_relative_eq!(simple, sn, max_relative = 0.3);
        assert_eq!(nuclear_stopping(&he, &si, 2000.0, NuclearStopping::Off), 0.0);
    }

    #[test]
    fn test_bohr_straggling_value() {
        let (he, si) = pair();
        assert_relative_eq!(AnalyticStopping.straggling(&he, &si, 1000.0), 2.6058e-4 * 4.0 * 14.0);
    }

    #[test]
    fn test_constant_stopping_ignores_nuclear() {
        let (he, si) = pair();
        let model = ConstantStopping { stopping: 0.05, straggling: 0.01 };
        let r = model.rates(&he, &si, 1234.0, NuclearStopping::Universal);
        assert_eq!(r.stopping, 0.05);
        assert_eq!(r.straggling, 0.01);
    }

    #[test]
    fn test_tabulated_stopping_with_fallback() {
        let (he, si) = pair();
        let au = Nuclide::lookup("197Au").unwrap();
        let table = StoppingTable::new(vec![100.0, 1000.0, 3000.0], vec![0.04, 0.06, 0.045]).unwrap();
        let mut model = TabulatedStopping::new();
        model.insert(2, 14, table);

        assert_relative_eq!(model.electronic(&he, &si, 1000.0), 0.06, epsilon = 1e-12);
        assert_relative_eq!(model.electronic(&he, &si, 10.0), 0.04, epsilon = 1e-12);
        assert!(model.covers(&he, &[si.clone(), au.clone()]).is_err());

        let model = model.with_fallback(Arc::new(AnalyticStopping));
        assert!(model.covers(&he, &[si, au.clone()]).is_ok());
        assert_relative_eq!(
            model.electronic(&he, &au, 2000.0),
            AnalyticStopping.electronic(&he, &au, 2000.0)
        );
    }
}
