//! Histograms and brick convolution.
//!
//! Consecutive bricks $j-1, j$ of a reaction bound a uniform energy box
//! $[E_j, E_{j-1}]$ carrying yield $Q_j$. Straggling and detector resolution
//! smear each edge with its own Gaussian, so the spectral density is
//!
//! $$\rho(E) = \frac{Q_j}{E_{j-1} - E_j}\left[\Phi\!\left(\frac{E - E_j}{\sigma_j}\right) - \Phi\!\left(\frac{E - E_{j-1}}{\sigma_{j-1}}\right)\right].$$
//!
//! Its integral over a channel is evaluated in closed form with
//! $G(u) = \int_{-\infty}^{u}\Phi(t/\sigma)\,dt = u\,\Phi(u/\sigma) + \sigma\varphi(u/\sigma)$,
//! and only channels within `sigmas_cutoff` standard deviations of the box
//! are visited.

use ndarray::Array1;
use statrs::function::erf::erfc;

use crate::detector::Calibration;
use crate::reaction::Brick;

/// Energy histogram with calibrated bin edges.
#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    calibration: Calibration,
    pub bins: Array1<f64>,
}

impl Histogram {
    pub fn new(n: usize, calibration: &Calibration) -> Self {
        Self {
            calibration: *calibration,
            bins: Array1::zeros(n),
        }
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// Replace the bin edges; counts are kept.
    pub fn set_calibration(&mut self, calibration: &Calibration) {
        self.calibration = *calibration;
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// `[low, high)` energy range of bin `i`.
    pub fn bin_range(&self, i: usize) -> (f64, f64) {
        (self.calibration.energy(i), self.calibration.energy(i + 1))
    }

    /// Bin containing `energy`, clamped into the histogram.
    pub fn bin_of(&self, energy: f64) -> usize {
        let c = &self.calibration;
        let i = ((energy - c.offset) / c.slope).floor();
        if i <= 0.0 || !i.is_finite() {
            0
        } else {
            (i as usize).min(self.len().saturating_sub(1))
        }
    }

    pub fn reset(&mut self) {
        self.bins.fill(0.0);
    }

    pub fn scale(&mut self, factor: f64) {
        self.bins *= factor;
    }

    pub fn sum(&self) -> f64 {
        self.bins.sum()
    }

    /// Add `other` bin by bin over the common length.
    pub fn add(&mut self, other: &Histogram) {
        let n = self.len().min(other.len());
        self.bins
            .slice_mut(ndarray::s![..n])
            .zip_mut_with(&other.bins.slice(ndarray::s![..n]), |a, b| *a += b);
    }
}

/// Standard normal CDF.
fn phi_cdf(z: f64) -> f64 {
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

fn phi_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Integral of the smeared step $\Phi(t/\sigma)$ from $-\infty$ to `u`.
fn smeared_ramp(u: f64, sigma: f64) -> f64 {
    if sigma <= 0.0 {
        return u.max(0.0);
    }
    let z = u / sigma;
    u * phi_cdf(z) + sigma * phi_pdf(z)
}

/// Fraction of a Gaussian-smeared point at `e` (sigma `s`) inside `[a, b)`.
fn point_fraction(a: f64, b: f64, e: f64, s: f64) -> f64 {
    if s <= 0.0 {
        return if e >= a && e < b { 1.0 } else { 0.0 };
    }
    phi_cdf((b - e) / s) - phi_cdf((a - e) / s)
}

/// Fraction of a smeared box `[e_low, e_high]` inside `[a, b)`.
pub fn box_fraction(a: f64, b: f64, e_low: f64, e_high: f64, s_low: f64, s_high: f64) -> f64 {
    let width = e_high - e_low;
    if width < 1e-9 {
        return point_fraction(a, b, 0.5 * (e_low + e_high), 0.5 * (s_low + s_high));
    }
    let low = smeared_ramp(b - e_low, s_low) - smeared_ramp(a - e_low, s_low);
    let high = smeared_ramp(b - e_high, s_high) - smeared_ramp(a - e_high, s_high);
    ((low - high) / width).max(0.0)
}

/// Set each brick's total broadening sigma from its straggling variance and
/// the detector resolution variance.
pub fn brick_sigmas(bricks: &mut [Brick], resolution_variance: f64) {
    for b in bricks {
        b.sigma = (resolution_variance + b.variance).max(0.0).sqrt();
    }
}

/// Add the bricks of one reaction into `histogram`, each yield scaled by
/// `scale` (fluence × solid angle × ensemble weight).
pub fn convolve_bricks(histogram: &mut Histogram, bricks: &[Brick], scale: f64, sigmas_cutoff: f64) {
    if histogram.is_empty() {
        return;
    }
    for pair in bricks.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        if cur.q <= 0.0 {
            continue;
        }
        let (e_low, s_low, e_high, s_high) = if cur.energy <= prev.energy {
            (cur.energy, cur.sigma, prev.energy, prev.sigma)
        } else {
            (prev.energy, prev.sigma, cur.energy, cur.sigma)
        };
        let window_low = e_low - sigmas_cutoff * s_low;
        let window_high = e_high + sigmas_cutoff * s_high;
        let first_energy = histogram.calibration.energy(0);
        let last_energy = histogram.calibration.energy(histogram.len());
        if window_high < first_energy || window_low >= last_energy {
            continue;
        }
        let counts = cur.q * scale;
        let lo = histogram.bin_of(window_low);
        let hi = histogram.bin_of(window_high);
        for i in lo..=hi {
            let (a, b) = histogram.bin_range(i);
            histogram.bins[i] += counts * box_fraction(a, b, e_low, e_high, s_low, s_high);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn calibration() -> Calibration {
        Calibration {
            slope: 1.0,
            offset: 0.0,
            resolution: 0.0,
        }
    }

    fn brick(energy: f64, sigma: f64, q: f64) -> Brick {
        Brick {
            energy,
            sigma,
            q,
            ..Brick::default()
        }
    }

    #[test]
    fn test_bin_lookup() {
        let h = Histogram::new(10, &calibration());
        assert_eq!(h.bin_of(-5.0), 0);
        assert_eq!(h.bin_of(3.7), 3);
        assert_eq!(h.bin_of(1e6), 9);
        assert_eq!(h.bin_range(4), (4.0, 5.0));
    }

    #[test]
    fn test_zero_width_zero_sigma_brick_lands_in_one_bin() {
        let mut h = Histogram::new(2000, &calibration());
        let bricks = [brick(1000.3, 0.0, 0.0), brick(1000.2, 0.0, 5.0)];
        convolve_bricks(&mut h, &bricks, 1.0, 4.0);
        assert_abs_diff_eq!(h.bins[1000], 5.0, epsilon = 1e-12);
        assert_abs_diff_eq!(h.sum(), 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_box_spreads_evenly_without_broadening() {
        let mut h = Histogram::new(100, &calibration());
        let bricks = [brick(50.0, 0.0, 0.0), brick(46.0, 0.0, 8.0)];
        convolve_bricks(&mut h, &bricks, 1.0, 4.0);
        for i in 46..50 {
            assert_abs_diff_eq!(h.bins[i], 2.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(h.sum(), 8.0, epsilon = 1e-12);
    }

    #[test]
    fn test_gaussian_broadening_conserves_counts() {
        let mut h = Histogram::new(200, &calibration());
        let bricks = [brick(110.0, 3.0, 0.0), brick(90.0, 4.0, 10.0)];
        convolve_bricks(&mut h, &bricks, 2.0, 6.0);
        assert_abs_diff_eq!(h.sum(), 20.0, epsilon = 1e-6);
        assert!(h.bins[70] > 0.0);
        assert_eq!(h.bins[50], 0.0);
    }

    #[test]
    fn test_point_source_gaussian_fractions() {
        let f = box_fraction(-1.0, 1.0, 0.0, 0.0, 1.0, 1.0);
        assert_abs_diff_eq!(f, 0.682_689_492, epsilon = 1e-8);
    }

    #[test]
    fn test_histogram_add_and_scale() {
        let mut a = Histogram::new(3, &calibration());
        let mut b = Histogram::new(3, &calibration());
        a.bins[0] = 1.0;
        b.bins[0] = 2.0;
        b.bins[2] = 4.0;
        a.add(&b);
        a.scale(0.5);
        assert_eq!(a.bins.to_vec(), vec![1.5, 0.0, 2.0]);
    }
}
