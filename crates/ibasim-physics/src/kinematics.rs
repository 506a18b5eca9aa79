//! Two-body elastic kinematics.
//!
//! For an incident ion of mass $M_1$ hitting a target nucleus $M_2$ at rest,
//! the backscattered ion leaving at lab angle $\theta$ carries
//!
//! $$K_{RBS} = \left[\frac{\sqrt{M_2^2 - M_1^2\sin^2\theta} + M_1\cos\theta}{M_1 + M_2}\right]^2$$
//!
//! of the incident energy, and a recoil detected at angle $\phi$ carries
//!
//! $$K_{ERD} = \frac{4 M_1 M_2 \cos^2\phi}{(M_1 + M_2)^2}.$$

use std::f64::consts::{FRAC_PI_2, PI};

use serde::{Deserialize, Serialize};

/// Kind of elastic reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReactionKind {
    /// Rutherford backscattering: the incident ion is detected.
    Rbs,
    /// Elastic recoil detection: the target nucleus is detected.
    Erd,
}

impl ReactionKind {
    pub fn label(&self) -> &'static str {
        match self {
            ReactionKind::Rbs => "RBS",
            ReactionKind::Erd => "ERD",
        }
    }
}

/// Largest lab angle at which `m1` can scatter off `m2`.
pub fn max_scattering_angle(m1: f64, m2: f64) -> f64 {
    if m1 < m2 {
        PI
    } else {
        (m2 / m1).asin()
    }
}

/// Kinematic factor for the incident ion scattered into lab angle `theta`.
///
/// Returns `None` when the scattering is kinematically impossible.
pub fn rbs_kinematic_factor(m1: f64, m2: f64, theta: f64) -> Option<f64> {
    let sin_t = theta.sin();
    let root = m2 * m2 - m1 * m1 * sin_t * sin_t;
    if root < 0.0 {
        return None;
    }
    if m1 >= m2 && theta > max_scattering_angle(m1, m2) {
        return None;
    }
    let k = (root.sqrt() + m1 * theta.cos()) / (m1 + m2);
    Some(k * k)
}

/// Kinematic factor for a recoil emitted at lab angle `theta`.
///
/// Recoils only travel forward, so `theta >= 90°` yields `None`.
pub fn erd_kinematic_factor(m1: f64, m2: f64, theta: f64) -> Option<f64> {
    if !(0.0..FRAC_PI_2).contains(&theta) {
        return None;
    }
    let c = theta.cos();
    Some(4.0 * m1 * m2 * c * c / ((m1 + m2) * (m1 + m2)))
}

/// Kinematic factor for the detected particle of a reaction.
pub fn kinematic_factor(kind: ReactionKind, m1: f64, m2: f64, theta: f64) -> Option<f64> {
    match kind {
        ReactionKind::Rbs => rbs_kinematic_factor(m1, m2, theta),
        ReactionKind::Erd => erd_kinematic_factor(m1, m2, theta),
    }
}

/// Centre-of-mass scattering angle for lab angle `theta`.
pub fn cm_angle(kind: ReactionKind, m1: f64, m2: f64, theta: f64) -> f64 {
    match kind {
        ReactionKind::Rbs => theta + ((m1 / m2) * theta.sin()).clamp(-1.0, 1.0).asin(),
        ReactionKind::Erd => PI - 2.0 * theta,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    const HE4: f64 = 4.002_603;
    const AU197: f64 = 196.966_570;
    const SI28: f64 = 27.976_927;

    #[test]
    fn test_rbs_factor_helium_on_gold() {
        let k = rbs_kinematic_factor(HE4, AU197, 170f64.to_radians()).unwrap();
        assert_relative_eq!(k, 0.9225, epsilon = 1e-3);
    }

    #[test]
    fn test_rbs_factor_head_on() {
        let k = rbs_kinematic_factor(HE4, SI28, PI).unwrap();
        let expected = ((SI28 - HE4) / (SI28 + HE4)).powi(2);
        assert_relative_eq!(k, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_heavy_projectile_cannot_backscatter() {
        assert!(rbs_kinematic_factor(SI28, HE4, 170f64.to_radians()).is_none());
        let limit = max_scattering_angle(SI28, HE4);
        assert!(rbs_kinematic_factor(SI28, HE4, 0.9 * limit).is_some());
    }

    #[test]
    fn test_erd_forward_only() {
        assert!(erd_kinematic_factor(HE4, 1.007_825, 100f64.to_radians()).is_none());
        let k = erd_kinematic_factor(HE4, 1.007_825, 30f64.to_radians()).unwrap();
        assert!(k > 0.0 && k < 1.0);
    }

    #[test]
    fn test_cm_angle_equal_masses_doubles() {
        let theta = 40f64.to_radians();
        assert_abs_diff_eq!(
            cm_angle(ReactionKind::Rbs, 1.0, 1.0, theta),
            2.0 * theta,
            epsilon = 1e-12
        );
    }
}
