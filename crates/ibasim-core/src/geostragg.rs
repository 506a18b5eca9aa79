//! Geometric straggling.
//!
//! A finite beam spot and detector opening make the exit angle $\beta$ vary
//! by $\Delta\beta$ around its nominal value. This changes both the
//! scattering angle (through $d\theta/d\beta$, and so the kinematic factor)
//! and the outgoing path length. The energy spread this causes is estimated
//! per brick by exiting two products with directions $\beta \pm \Delta\beta$
//! and taking half the energy difference as a FWHM:
//!
//! $$\sigma^2_{geo} = \left(\frac{E_+ - E_-}{2 \cdot 2.3548}\right)^2.$$
//!
//! Both transverse directions contribute, each with its own $\Delta\beta$.

use log::debug;

use crate::detector::Detector;
use crate::exit::ExitTransport;
use crate::geometry::{self, Transverse};
use crate::params::SimCalcParams;
use crate::reaction::ReactionChannel;
use crate::sample::DepthPosition;
use crate::simulation::Simulation;
use crate::units::{C_FWHM, GEOSTRAGG_EPSILON};

/// Detector distances below this (mm) count as unset.
const DISTANCE_MIN: f64 = 0.001;

/// Per-workspace geometric straggling inputs.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GeostraggVars {
    /// Exit angle spread (FWHM, rad) in the x–z plane.
    pub delta_x: f64,
    /// Exit angle spread (FWHM, rad) in the y–z plane.
    pub delta_y: f64,
    /// $d\theta/d\beta$.
    pub theta_deriv: f64,
}

impl GeostraggVars {
    /// All zero unless geometric straggling is enabled and the detector
    /// distance is known.
    pub fn new(sim: &Simulation, detector: &Detector, params: &SimCalcParams, incident: (f64, f64)) -> Self {
        if !params.geostragg || detector.distance < DISTANCE_MIN {
            return Self::default();
        }
        let vars = Self {
            delta_x: exit_angle_delta(sim, detector, params, Transverse::X),
            delta_y: exit_angle_delta(sim, detector, params, Transverse::Y),
            theta_deriv: scattering_angle_exit_deriv(sim, detector, incident),
        };
        debug!(
            "Geometric straggling: delta beta {:.4} deg (x), {:.4} deg (y), dtheta/dbeta = {:.6}",
            vars.delta_x.to_degrees(),
            vars.delta_y.to_degrees(),
            vars.theta_deriv
        );
        vars
    }

    pub fn is_enabled(&self) -> bool {
        self.delta_x > 0.0 || self.delta_y > 0.0
    }

    /// Geometric straggling variance (keV²) for a brick at `depth`, where
    /// `incident_energy` is the beam energy at the reaction point.
    pub fn brick_variance(
        &self,
        exit: &ExitTransport<'_>,
        channel: &ReactionChannel,
        depth: DepthPosition,
        incident_energy: f64,
    ) -> f64 {
        let mut variance = 0.0;
        for (delta, direction) in [(self.delta_x, Transverse::X), (self.delta_y, Transverse::Y)] {
            if delta > 0.0 {
                variance += geostragg(
                    exit,
                    channel,
                    depth,
                    incident_energy,
                    delta,
                    self.theta_deriv,
                    direction.azimuth(),
                );
            }
        }
        variance
    }
}

/// $d\theta/d\beta$ by finite difference of the detector polar angle.
///
/// The exit angle is $\pi$ minus the product polar angle, hence the sign
/// flip. Equals $-1$ in IBM geometry.
pub fn scattering_angle_exit_deriv(sim: &Simulation, detector: &Detector, incident: (f64, f64)) -> f64 {
    let nominal = geometry::to_frame(detector.theta, detector.phi, sim.alpha, sim.sample_phi);
    let shifted = geometry::to_frame(
        detector.theta + GEOSTRAGG_EPSILON,
        detector.phi,
        sim.alpha,
        sim.sample_phi,
    );
    let d_scatter = geometry::angle_between(incident, shifted) - geometry::angle_between(incident, nominal);
    let d_product = shifted.0 - nominal.0;
    if d_product == 0.0 {
        return -1.0;
    }
    -d_scatter / d_product
}

/// Spread (FWHM, rad) of the exit angle along `direction` caused by the beam
/// and detector apertures.
pub fn exit_angle_delta(sim: &Simulation, detector: &Detector, params: &SimCalcParams, direction: Transverse) -> f64 {
    if !params.geostragg || detector.distance < DISTANCE_MIN {
        return 0.0;
    }
    let sample_tilt = geometry::tilt_projection(sim.alpha, sim.sample_phi, direction);
    let detector_tilt =
        std::f64::consts::PI - geometry::tilt_projection(detector.theta, detector.phi, direction);
    let exit = detector_tilt - sample_tilt;
    let geo = (exit.cos() / sample_tilt.cos()).abs();
    let delta_beam = sim.beam_aperture.width_shape_product(direction) * geo / detector.distance;
    let delta_detector = detector.aperture.width_shape_product(direction) / detector.distance;
    delta_beam.hypot(delta_detector)
}

/// Variance (keV²) from exiting the channel's product at exit angles
/// $\beta \mp \Delta\beta$ in the plane with azimuth `azimuth`.
pub fn geostragg(
    exit: &ExitTransport<'_>,
    channel: &ReactionChannel,
    depth: DepthPosition,
    incident_energy: f64,
    delta_beta: f64,
    theta_deriv: f64,
    azimuth: f64,
) -> f64 {
    let mut energies = [0.0; 2];
    for (energy, sign) in energies.iter_mut().zip([-1.0, 1.0]) {
        let mut ion = channel.product.clone();
        ion.rotate(sign * delta_beta, azimuth);
        ion.energy = channel.product_energy(channel.theta - sign * delta_beta * theta_deriv, incident_energy);
        ion.variance = 0.0;
        exit.exit(&mut ion, depth);
        *energy = ion.energy;
    }
    let [e_plus, e_minus] = energies;
    ((e_plus - e_minus) / 2.0 / C_FWHM).powi(2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::Calibration;
    use crate::geometry::Aperture;
    use crate::reaction::Reaction;
    use crate::sample::{LayerModel, Sample, SampleModel};
    use crate::stepper::DepthStepper;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use ibasim_physics::cross_section::Rutherford;
    use ibasim_physics::stopping::ConstantStopping;
    use ibasim_physics::Nuclide;
    use std::sync::Arc;

    fn simulation() -> Simulation {
        let si = Arc::new(Nuclide::lookup("28Si").unwrap());
        let model = SampleModel::new(vec![si], vec![LayerModel::new(1000.0, vec![1.0])]);
        let mut sim = Simulation::new(
            Arc::new(Nuclide::lookup("4He").unwrap()),
            2000.0,
            model,
            Arc::new(ConstantStopping {
                stopping: 0.05,
                straggling: 0.0,
            }),
        );
        sim.detectors[0].theta = 170f64.to_radians();
        sim.detectors[0].distance = 100.0;
        sim.detectors[0].aperture = Aperture::rectangle(2.0, 4.0);
        sim.beam_aperture = Aperture::rectangle(1.0, 1.0);
        sim.params.geostragg = true;
        sim
    }

    #[test]
    fn test_ibm_derivative_is_minus_one() {
        let sim = simulation();
        let deriv = scattering_angle_exit_deriv(&sim, &sim.detectors[0], sim.incident_angles());
        assert_abs_diff_eq!(deriv, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_exit_angle_delta_combines_apertures() {
        let sim = simulation();
        let dx = exit_angle_delta(&sim, &sim.detectors[0], &sim.params, Transverse::X);
        let expected = (10f64.to_radians().cos() / 100.0).hypot(2.0 / 100.0);
        assert_relative_eq!(dx, expected, max_relative = 1e-9);
    }

    #[test]
    fn test_unset_distance_disables() {
        let mut sim = simulation();
        sim.detectors[0].distance = 0.0;
        let vars = GeostraggVars::new(&sim, &sim.detectors[0], &sim.params, sim.incident_angles());
        assert!(!vars.is_enabled());
        assert_eq!(exit_angle_delta(&sim, &sim.detectors[0], &sim.params, Transverse::X), 0.0);
    }

    #[test]
    fn test_surface_variance_from_kinematics_only() {
        let sim = simulation();
        let sample = Sample::from_model(&sim.sample_model).unwrap();
        let theta = sim.detectors[0].theta;
        let reaction = Reaction::rbs(Arc::clone(&sim.beam), Arc::clone(&sim.sample_model.nuclides[0]));
        let mut channel = ReactionChannel::new(
            reaction.clone(),
            Some(0),
            Arc::new(Rutherford),
            10,
            16,
            &Calibration::default(),
        );
        channel.reset(theta, 1000.0);
        channel.product.set_angle(theta, 0.0);

        let exit = ExitTransport {
            stepper: DepthStepper::new(sim.stopping.as_ref(), &sim.params).simple(),
            sample: &sample,
            foil: None,
            params: &sim.params,
            emin: sim.emin,
        };
        let delta = 0.01;
        let v = geostragg(&exit, &channel, DepthPosition::new(0.0, 0), 2000.0, delta, -1.0, 0.0);
        let k_plus = reaction.kinematic_factor(theta + delta).unwrap();
        let k_minus = reaction.kinematic_factor(theta - delta).unwrap();
        let expected = (2000.0 * (k_plus - k_minus) / 2.0 / C_FWHM).powi(2);
        assert_relative_eq!(v, expected, max_relative = 1e-9);
        assert!(v > 0.0);
    }
}
