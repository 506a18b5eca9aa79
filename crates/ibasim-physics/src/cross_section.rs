//! Differential cross sections for elastic reactions.
//!
//! All providers return lab-frame differential cross sections in mb/sr for
//! an incident energy in keV and a lab angle in radians. The angle is the
//! scattering angle for RBS and the recoil angle for ERD.
//!
//! ## Models
//!
//! - [`Rutherford`]: unscreened Coulomb scattering.
//! - [`Andersen`]: Rutherford with the Andersen electron-screening
//!   correction, which lowers the cross section at low energies.
//! - [`TabulatedCrossSection`]: measured $\sigma(E)$ at a fixed angle, with
//!   an optional fallback outside the table.
//!
//! [`CrossSectionRegistry`] maps a `(kind, incident, target)` triple to a
//! provider, falling back to a per-kind default.

use std::collections::HashMap;
use std::sync::Arc;

use crate::kinematics::{cm_angle, max_scattering_angle, ReactionKind};
use crate::nuclide::Nuclide;
use crate::spline::CubicSpline;

/// $(e^2/4)^2$ in mb·keV².
const RUTHERFORD_RBS_CONST: f64 = 1.295_9e6;
/// $(e^2/2)^2$ in mb·keV².
const RUTHERFORD_ERD_CONST: f64 = 5.183_7e6;
/// Andersen screening potential prefactor (keV).
const ANDERSEN_V1_CONST: f64 = 0.048_73;

/// Provides lab-frame differential cross sections.
pub trait CrossSectionProvider: Send + Sync {
    /// Human-readable model name.
    fn name(&self) -> &str;

    /// Differential cross section (mb/sr).
    ///
    /// # Arguments
    /// * `kind` - RBS or ERD.
    /// * `incident` - Incident ion.
    /// * `target` - Target nucleus.
    /// * `theta` - Lab angle of the detected particle (rad).
    /// * `energy_kev` - Incident energy at the reaction point.
    fn cross_section(
        &self,
        kind: ReactionKind,
        incident: &Nuclide,
        target: &Nuclide,
        theta: f64,
        energy_kev: f64,
    ) -> f64;
}

/// Unscreened Rutherford RBS cross section in the lab frame.
pub fn rutherford_rbs(z1: f64, z2: f64, m1: f64, m2: f64, theta: f64, energy_kev: f64) -> f64 {
    if energy_kev <= 0.0 {
        return 0.0;
    }
    if m1 >= m2 && theta > max_scattering_angle(m1, m2) {
        return 0.0;
    }
    let x = m1 / m2;
    let sin_t = theta.sin();
    let root = 1.0 - x * x * sin_t * sin_t;
    if root <= 0.0 || sin_t == 0.0 {
        return 0.0;
    }
    let root = root.sqrt();
    let z = z1 * z2 / energy_kev;
    let bracket = (root + theta.cos()).powi(2) / root;
    RUTHERFORD_RBS_CONST * z * z * 4.0 / sin_t.powi(4) * bracket
}

/// Unscreened Rutherford recoil cross section in the lab frame.
pub fn rutherford_erd(z1: f64, z2: f64, m1: f64, m2: f64, theta: f64, energy_kev: f64) -> f64 {
    let c = theta.cos();
    if energy_kev <= 0.0 || c <= 0.0 {
        return 0.0;
    }
    let z = z1 * z2 * (m1 + m2) / (m2 * energy_kev);
    RUTHERFORD_ERD_CONST * z * z / (c * c * c)
}

/// Andersen screening correction factor $F \le 1$.
///
/// $$F = \frac{(1 + V_1/2E_{cm})^2}{\left(1 + V_1/E_{cm} + \left[V_1 / (2E_{cm}\sin(\theta_{cm}/2))\right]^2\right)^2}$$
pub fn andersen_factor(z1: f64, z2: f64, m1: f64, m2: f64, theta_cm: f64, energy_kev: f64) -> f64 {
    let e_cm = energy_kev * m2 / (m1 + m2);
    if e_cm <= 0.0 {
        return 0.0;
    }
    let v1 = ANDERSEN_V1_CONST * z1 * z2 * (z1.powf(2.0 / 3.0) + z2.powf(2.0 / 3.0)).sqrt();
    let half = (theta_cm / 2.0).sin();
    if half == 0.0 {
        return 0.0;
    }
    let num = (1.0 + 0.5 * v1 / e_cm).powi(2);
    let den = (1.0 + v1 / e_cm + (v1 / (2.0 * e_cm * half)).powi(2)).powi(2);
    num / den
}

fn rutherford(kind: ReactionKind, incident: &Nuclide, target: &Nuclide, theta: f64, e: f64) -> f64 {
    let (z1, z2) = (incident.z as f64, target.z as f64);
    match kind {
        ReactionKind::Rbs => rutherford_rbs(z1, z2, incident.mass, target.mass, theta, e),
        ReactionKind::Erd => rutherford_erd(z1, z2, incident.mass, target.mass, theta, e),
    }
}

/// Unscreened Rutherford cross section.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rutherford;

impl CrossSectionProvider for Rutherford {
    fn name(&self) -> &str {
        "Rutherford"
    }

    fn cross_section(
        &self,
        kind: ReactionKind,
        incident: &Nuclide,
        target: &Nuclide,
        theta: f64,
        energy_kev: f64,
    ) -> f64 {
        rutherford(kind, incident, target, theta, energy_kev)
    }
}

/// Rutherford cross section with Andersen screening.
#[derive(Debug, Clone, Copy, Default)]
pub struct Andersen;

impl CrossSectionProvider for Andersen {
    fn name(&self) -> &str {
        "Andersen"
    }

    fn cross_section(
        &self,
        kind: ReactionKind,
        incident: &Nuclide,
        target: &Nuclide,
        theta: f64,
        energy_kev: f64,
    ) -> f64 {
        let sigma_r = rutherford(kind, incident, target, theta, energy_kev);
        if sigma_r == 0.0 {
            return 0.0;
        }
        let theta_cm = cm_angle(kind, incident.mass, target.mass, theta);
        sigma_r
            * andersen_factor(
                incident.z as f64,
                target.z as f64,
                incident.mass,
                target.mass,
                theta_cm,
                energy_kev,
            )
    }
}

/// Measured cross section as a function of energy.
///
/// Values are taken at the angle of the measurement regardless of the
/// requested angle. With `ratio_to_rutherford` the table holds
/// $\sigma/\sigma_R$ instead of absolute values.
pub struct TabulatedCrossSection {
    name: String,
    spline: CubicSpline,
    ratio_to_rutherford: bool,
    fallback: Option<Arc<dyn CrossSectionProvider>>,
}

impl TabulatedCrossSection {
    pub fn new(name: impl Into<String>, spline: CubicSpline, ratio_to_rutherford: bool) -> Self {
        Self {
            name: name.into(),
            spline,
            ratio_to_rutherford,
            fallback: None,
        }
    }

    /// Provider used outside the tabulated energy range. Without one the
    /// cross section is zero there.
    pub fn with_fallback(mut self, fallback: Arc<dyn CrossSectionProvider>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl CrossSectionProvider for TabulatedCrossSection {
    fn name(&self) -> &str {
        &self.name
    }

    fn cross_section(
        &self,
        kind: ReactionKind,
        incident: &Nuclide,
        target: &Nuclide,
        theta: f64,
        energy_kev: f64,
    ) -> f64 {
        let (lo, hi) = self.spline.domain();
        if energy_kev < lo || energy_kev > hi {
            return self.fallback.as_ref().map_or(0.0, |f| {
                f.cross_section(kind, incident, target, theta, energy_kev)
            });
        }
        let value = self.spline.evaluate(energy_kev).max(0.0);
        if self.ratio_to_rutherford {
            value * rutherford(kind, incident, target, theta, energy_kev)
        } else {
            value
        }
    }
}

/// Identifies one reaction for provider lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReactionKey {
    pub kind: ReactionKind,
    /// `(Z, A)` of the incident ion.
    pub incident: (u32, u32),
    /// `(Z, A)` of the target nucleus.
    pub target: (u32, u32),
}

impl ReactionKey {
    pub fn new(kind: ReactionKind, incident: &Nuclide, target: &Nuclide) -> Self {
        Self {
            kind,
            incident: (incident.z, incident.a),
            target: (target.z, target.a),
        }
    }
}

/// Maps reactions to cross-section providers.
#[derive(Clone)]
pub struct CrossSectionRegistry {
    rbs_default: Arc<dyn CrossSectionProvider>,
    erd_default: Arc<dyn CrossSectionProvider>,
    overrides: HashMap<ReactionKey, Arc<dyn CrossSectionProvider>>,
}

impl CrossSectionRegistry {
    pub fn new(
        rbs_default: Arc<dyn CrossSectionProvider>,
        erd_default: Arc<dyn CrossSectionProvider>,
    ) -> Self {
        Self {
            rbs_default,
            erd_default,
            overrides: HashMap::new(),
        }
    }

    /// Register a provider for one specific reaction.
    pub fn register(&mut self, key: ReactionKey, provider: Arc<dyn CrossSectionProvider>) {
        self.overrides.insert(key, provider);
    }

    /// Provider for `key`, or the default for its kind.
    pub fn resolve(&self, key: &ReactionKey) -> Arc<dyn CrossSectionProvider> {
        if let Some(p) = self.overrides.get(key) {
            return Arc::clone(p);
        }
        match key.kind {
            ReactionKind::Rbs => Arc::clone(&self.rbs_default),
            ReactionKind::Erd => Arc::clone(&self.erd_default),
        }
    }
}

impl Default for CrossSectionRegistry {
    /// Andersen-screened Rutherford for both RBS and ERD.
    fn default() -> Self {
        Self::new(Arc::new(Andersen), Arc::new(Andersen))
    }
}

impl std::fmt::Debug for CrossSectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossSectionRegistry")
            .field("rbs_default", &self.rbs_default.name())
            .field("erd_default", &self.erd_default.name())
            .field("overrides", &self.overrides.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn he() -> Nuclide {
        Nuclide::lookup("4He").unwrap()
    }

    #[test]
    fn test_rutherford_scales_with_inverse_energy_squared() {
        let au = Nuclide::lookup("197Au").unwrap();
        let theta = 165f64.to_radians();
        let s1 = Rutherford.cross_section(ReactionKind::Rbs, &he(), &au, theta, 1000.0);
        let s2 = Rutherford.cross_section(ReactionKind::Rbs, &he(), &au, theta, 2000.0);
        assert_relative_eq!(s1 / s2, 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rutherford_helium_on_gold_magnitude() {
        // He on Au at 2 MeV and 170 degrees is about 8.2 b/sr.
        let au = Nuclide::lookup("197Au").unwrap();
        let s = Rutherford.cross_section(ReactionKind::Rbs, &he(), &au, 170f64.to_radians(), 2000.0);
        assert!(s > 7500.0 && s < 9000.0, "sigma = {s}");
    }

    #[test]
    fn test_andersen_screening_reduces_cross_section() {
        let si = Nuclide::lookup("28Si").unwrap();
        let theta = 170f64.to_radians();
        for e in [100.0, 500.0, 2000.0] {
            let r = Rutherford.cross_section(ReactionKind::Rbs, &he(), &si, theta, e);
            let a = Andersen.cross_section(ReactionKind::Rbs, &he(), &si, theta, e);
            assert!(a < r && a > 0.9 * r, "E = {e}: {a} vs {r}");
        }
    }

    #[test]
    fn test_impossible_scattering_has_zero_cross_section() {
        let h = Nuclide::lookup("1H").unwrap();
        let s = Rutherford.cross_section(ReactionKind::Rbs, &he(), &h, 170f64.to_radians(), 2000.0);
        assert_eq!(s, 0.0);
        let r = Rutherford.cross_section(ReactionKind::Erd, &he(), &h, 100f64.to_radians(), 2000.0);
        assert_eq!(r, 0.0);
    }

    #[test]
    fn test_tabulated_ratio_and_fallback() {
        let si = Nuclide::lookup("28Si").unwrap();
        let theta = 170f64.to_radians();
        let spline = CubicSpline::from_pairs(&[(1000.0, 2.0), (2000.0, 2.0), (3000.0, 2.0)]).unwrap();
        let table = TabulatedCrossSection::new("ratio", spline, true).with_fallback(Arc::new(Rutherford));

        let r = Rutherford.cross_section(ReactionKind::Rbs, &he(), &si, theta, 1500.0);
        let t = table.cross_section(ReactionKind::Rbs, &he(), &si, theta, 1500.0);
        assert_relative_eq!(t, 2.0 * r, epsilon = 1e-9);

        let below = table.cross_section(ReactionKind::Rbs, &he(), &si, theta, 500.0);
        let r_below = Rutherford.cross_section(ReactionKind::Rbs, &he(), &si, theta, 500.0);
        assert_relative_eq!(below, r_below, epsilon = 1e-12);
    }

    #[test]
    fn test_registry_prefers_override() {
        let si = Nuclide::lookup("28Si").unwrap();
        let mut reg = CrossSectionRegistry::default();
        let key = ReactionKey::new(ReactionKind::Rbs, &he(), &si);
        assert_eq!(reg.resolve(&key).name(), "Andersen");
        reg.register(key, Arc::new(Rutherford));
        assert_eq!(reg.resolve(&key).name(), "Rutherford");
        let other = ReactionKey::new(ReactionKind::Erd, &he(), &si);
        assert_eq!(reg.resolve(&other).name(), "Andersen");
    }
}
