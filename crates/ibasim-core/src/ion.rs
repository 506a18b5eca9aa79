//! Moving ion state.

use std::sync::Arc;

use ibasim_physics::Nuclide;

use crate::geometry;

/// An ion in flight: identity, energy, energy variance and direction in the
/// sample frame.
#[derive(Debug, Clone)]
pub struct IonState {
    pub nuclide: Arc<Nuclide>,
    /// keV
    pub energy: f64,
    /// Accumulated energy variance (keV²).
    pub variance: f64,
    theta: f64,
    phi: f64,
    cos_theta: f64,
    inverse_cos: f64,
}

impl IonState {
    /// A new ion travelling along $+z$.
    pub fn new(nuclide: Arc<Nuclide>, energy: f64, variance: f64) -> Self {
        Self {
            nuclide,
            energy,
            variance,
            theta: 0.0,
            phi: 0.0,
            cos_theta: 1.0,
            inverse_cos: 1.0,
        }
    }

    pub fn set_angle(&mut self, theta: f64, phi: f64) {
        self.theta = theta;
        self.phi = phi;
        self.cos_theta = theta.cos();
        self.inverse_cos = 1.0 / self.cos_theta;
    }

    /// Turn by `(theta, phi)` relative to the current direction.
    pub fn rotate(&mut self, theta: f64, phi: f64) {
        let (t, p) = geometry::rotate(theta, phi, self.theta, self.phi);
        self.set_angle(t, p);
    }

    pub fn theta(&self) -> f64 {
        self.theta
    }

    pub fn phi(&self) -> f64 {
        self.phi
    }

    pub fn angles(&self) -> (f64, f64) {
        (self.theta, self.phi)
    }

    pub fn cos_theta(&self) -> f64 {
        self.cos_theta
    }

    /// Path length per unit depth, signed: positive when moving deeper.
    pub fn inverse_cos(&self) -> f64 {
        self.inverse_cos
    }

    /// Whether the ion moves towards larger depth.
    pub fn is_inbound(&self) -> bool {
        self.cos_theta > 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn he() -> Arc<Nuclide> {
        Arc::new(Nuclide::lookup("4He").unwrap())
    }

    #[test]
    fn test_new_ion_moves_inward() {
        let ion = IonState::new(he(), 2000.0, 0.0);
        assert!(ion.is_inbound());
        assert_eq!(ion.inverse_cos(), 1.0);
    }

    #[test]
    fn test_backward_direction_is_outbound() {
        let mut ion = IonState::new(he(), 2000.0, 0.0);
        ion.set_angle(160f64.to_radians(), 0.0);
        assert!(!ion.is_inbound());
        assert_abs_diff_eq!(ion.inverse_cos(), 1.0 / 160f64.to_radians().cos(), epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_composes_with_current_direction() {
        let mut ion = IonState::new(he(), 2000.0, 0.0);
        ion.set_angle(0.2, 0.0);
        ion.rotate(0.3, 0.0);
        assert_abs_diff_eq!(ion.theta(), 0.5, epsilon = 1e-12);
    }
}
