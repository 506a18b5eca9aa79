//! Cubic spline interpolation for tabulated stopping and cross-section data.
//!
//! Stopping tables and measured cross sections are given at discrete
//! energies. A natural cubic spline gives a smooth $S(E)$ or $\sigma(E)$
//! between the knots so that the Runge–Kutta stepper does not see kinks at
//! table points.

use crate::provider::PhysicsError;

/// Natural cubic spline through a table of `(x, y)` knots.
#[derive(Debug, Clone)]
pub struct CubicSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    /// Second derivatives at each knot.
    y2s: Vec<f64>,
}

impl CubicSpline {
    /// Fit the spline through `xs` (strictly increasing) and `ys`.
    ///
    /// # Errors
    /// Returns [`PhysicsError::InvalidTable`] if the lengths differ, fewer
    /// than two points are given, or `xs` is not strictly increasing.
    pub fn new(xs: Vec<f64>, ys: Vec<f64>) -> Result<Self, PhysicsError> {
        if xs.len() != ys.len() {
            return Err(PhysicsError::InvalidTable(format!(
                "{} knots but {} values",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < 2 {
            return Err(PhysicsError::InvalidTable(
                "need at least 2 data points".into(),
            ));
        }
        if let Some(i) = (1..xs.len()).find(|&i| !(xs[i] > xs[i - 1])) {
            return Err(PhysicsError::InvalidTable(format!(
                "knots must be strictly increasing (index {i})"
            )));
        }

        let n = xs.len();
        let mut y2s = vec![0.0; n];
        let mut rhs = vec![0.0; n];

        // Natural boundary: y'' = 0 at both ends. Eliminate downwards...
        for i in 1..n - 1 {
            let (h_lo, h_hi) = (xs[i] - xs[i - 1], xs[i + 1] - xs[i]);
            let w = h_lo / (h_lo + h_hi);
            let pivot = w * y2s[i - 1] + 2.0;
            let curvature = (ys[i + 1] - ys[i]) / h_hi - (ys[i] - ys[i - 1]) / h_lo;
            y2s[i] = (w - 1.0) / pivot;
            rhs[i] = (6.0 * curvature / (h_lo + h_hi) - w * rhs[i - 1]) / pivot;
        }
        // ...then substitute back up.
        for i in (1..n - 1).rev() {
            y2s[i] = y2s[i] * y2s[i + 1] + rhs[i];
        }

        Ok(Self { xs, ys, y2s })
    }

    /// Build a spline from `(x, y)` pairs.
    pub fn from_pairs(pairs: &[(f64, f64)]) -> Result<Self, PhysicsError> {
        let (xs, ys) = pairs.iter().copied().unzip();
        Self::new(xs, ys)
    }

    /// Range of the knots, `(first, last)`.
    pub fn domain(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    /// Evaluate the spline at `x`.
    ///
    /// Outside the knot range the boundary polynomial is extrapolated.
    pub fn evaluate(&self, x: f64) -> f64 {
        let last = self.xs.len() - 1;
        let hi = self.xs.partition_point(|&k| k <= x).clamp(1, last);
        let lo = hi - 1;

        let h = self.xs[hi] - self.xs[lo];
        let t = (x - self.xs[lo]) / h;
        let s = 1.0 - t;
        let linear = s * self.ys[lo] + t * self.ys[hi];
        let cubic = (s.powi(3) - s) * self.y2s[lo] + (t.powi(3) - t) * self.y2s[hi];
        linear + cubic * h * h / 6.0
    }

    /// Evaluate with `x` clamped into the knot range.
    pub fn evaluate_clamped(&self, x: f64) -> f64 {
        let (lo, hi) = self.domain();
        self.evaluate(x.clamp(lo, hi))
    }
}
