//! Beam, sample and detector geometry.
//!
//! Directions are given as a polar angle $\theta$ from the $+z$ axis and an
//! azimuth $\phi$. In the lab frame the beam travels along $+z$; in the
//! sample frame $+z$ is the inward surface normal, so a direction with
//! $\cos\theta > 0$ moves deeper into the sample.
//!
//! The frame of a direction $(\theta, \phi)$ is the rotation
//! $M(\theta, \phi) = R_z(\phi) R_y(\theta)$ taking $\hat z$ onto it. A
//! sample tilted by $(\alpha, \phi_s)$ sees a lab vector $v$ as
//! $M(\alpha, \phi_s)^\mathsf{T} v$.

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};

/// Unit vector for polar angle `theta` and azimuth `phi`.
pub fn direction_vector(theta: f64, phi: f64) -> Vector3<f64> {
    let (st, ct) = theta.sin_cos();
    let (sp, cp) = phi.sin_cos();
    Vector3::new(st * cp, st * sp, ct)
}

/// Polar and azimuth angles of a (not necessarily unit) vector.
pub fn angles_of(v: &Vector3<f64>) -> (f64, f64) {
    let norm = v.norm();
    if norm == 0.0 {
        return (0.0, 0.0);
    }
    let theta = (v.z / norm).clamp(-1.0, 1.0).acos();
    let phi = v.y.atan2(v.x);
    (theta, phi)
}

/// Rotation taking $\hat z$ onto the direction `(theta, phi)`.
pub fn frame(theta: f64, phi: f64) -> Rotation3<f64> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), phi)
        * Rotation3::from_axis_angle(&Vector3::y_axis(), theta)
}

/// Direction `(theta2, phi2)` given relative to `(theta1, phi1)`, expressed
/// in the frame that `(theta1, phi1)` itself is expressed in.
pub fn rotate(theta2: f64, phi2: f64, theta1: f64, phi1: f64) -> (f64, f64) {
    angles_of(&(frame(theta1, phi1) * direction_vector(theta2, phi2)))
}

/// Express the direction `(theta, phi)` in the frame of a body tilted by
/// `(frame_theta, frame_phi)`.
pub fn to_frame(theta: f64, phi: f64, frame_theta: f64, frame_phi: f64) -> (f64, f64) {
    angles_of(&(frame(frame_theta, frame_phi).inverse() * direction_vector(theta, phi)))
}

/// Angle between two directions.
pub fn angle_between(a: (f64, f64), b: (f64, f64)) -> f64 {
    direction_vector(a.0, a.1)
        .dot(&direction_vector(b.0, b.1))
        .clamp(-1.0, 1.0)
        .acos()
}

/// In-plane direction used for geometric spread calculations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transverse {
    X,
    Y,
}

impl Transverse {
    /// Azimuth of the tilt plane.
    pub fn azimuth(&self) -> f64 {
        match self {
            Transverse::X => 0.0,
            Transverse::Y => std::f64::consts::FRAC_PI_2,
        }
    }
}

/// Projection of the tilt `(theta, phi)` onto the x–z or y–z plane.
pub fn tilt_projection(theta: f64, phi: f64, direction: Transverse) -> f64 {
    let v = direction_vector(theta, phi);
    match direction {
        Transverse::X => v.x.atan2(v.z),
        Transverse::Y => v.y.atan2(v.z),
    }
}

/// Shape of a beam spot or detector slit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApertureShape {
    #[default]
    None,
    Circle,
    Rectangle,
}

/// Beam or detector aperture (mm).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aperture {
    #[serde(default)]
    pub shape: ApertureShape,
    #[serde(default)]
    pub width: f64,
    #[serde(default)]
    pub height: f64,
}

impl Aperture {
    pub fn circle(diameter: f64) -> Self {
        Self {
            shape: ApertureShape::Circle,
            width: diameter,
            height: diameter,
        }
    }

    pub fn rectangle(width: f64, height: f64) -> Self {
        Self {
            shape: ApertureShape::Rectangle,
            width,
            height,
        }
    }

    /// Effective extent along `direction`, scaled by the FWHM-equivalent
    /// shape factor (1 for rectangles, 0.86 for circles).
    pub fn width_shape_product(&self, direction: Transverse) -> f64 {
        let extent = match direction {
            Transverse::X => self.width,
            Transverse::Y => self.height,
        };
        let factor = match self.shape {
            ApertureShape::None => 0.0,
            ApertureShape::Circle => 0.86,
            ApertureShape::Rectangle => 1.0,
        };
        extent * factor
    }
}
