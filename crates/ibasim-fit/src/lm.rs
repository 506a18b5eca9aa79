//! Levenberg–Marquardt trust-region solver.
//!
//! Minimises $\|f(x)\|^2$ for a residual function $f: \mathbb{R}^p \to
//! \mathbb{R}^n$. Each trial step solves the damped normal equations
//!
//! $$(J^T J + \mu D^2)\,\delta = -J^T f,$$
//!
//! where $D$ holds the Marquardt scaling (running maximum of the Jacobian
//! column norms). Trial points are accepted when the gain ratio
//!
//! $$\rho = \frac{\|f(x)\|^2 - \|f(x+\delta)\|^2}{\|f(x)\|^2 - \|f(x) + J\delta\|^2}$$
//!
//! is positive. The damping follows Nielsen's update:
//!
//! | Outcome | $\mu$ | $\nu$ |
//! |---------|-------|-------|
//! | accepted | $\mu \cdot \max(1/3,\ 1 - (2\rho - 1)^3)$ | 2 |
//! | rejected | $\mu \cdot \nu$ | $2\nu$ |
//!
//! The Jacobian is a forward difference with step $h_j = \sqrt{\epsilon}\,|x_j|$
//! ($\sqrt{\epsilon}$ when $x_j = 0$).

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::error::FitError;

/// Why a residual evaluation is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    /// A trial point of the solver.
    Base,
    /// A finite-difference perturbation around the last accepted point.
    Jacobian,
}

/// A residual function.
pub trait Residuals {
    /// Evaluate $f(x)$ into `out` (length fixed by the problem).
    fn evaluate(&mut self, x: &DVector<f64>, kind: EvalKind, out: &mut DVector<f64>) -> Result<(), FitError>;
}

#[derive(Debug, Clone, Copy)]
pub struct LmConfig {
    pub mu_init: f64,
    /// Consecutive rejected trial steps before giving up.
    pub max_rejects: usize,
    pub fd_step: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            mu_init: 1e-3,
            max_rejects: 15,
            fd_step: f64::EPSILON.sqrt(),
        }
    }
}

/// Result of one solver iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterOutcome {
    Accepted,
    /// Every trial step was rejected; `x` is unchanged.
    NoProgress,
}

#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    config: LmConfig,
    x: DVector<f64>,
    f: DVector<f64>,
    jac: DMatrix<f64>,
    diag: DVector<f64>,
    dx: DVector<f64>,
    mu: f64,
    nu: f64,
}

impl LevenbergMarquardt {
    /// Evaluate the residuals and Jacobian at `x0`.
    ///
    /// # Arguments
    /// * `problem` - Residual function.
    /// * `x0` - Starting point.
    /// * `n` - Number of residuals.
    pub fn new<R: Residuals + ?Sized>(
        problem: &mut R,
        x0: DVector<f64>,
        n: usize,
        config: LmConfig,
    ) -> Result<Self, FitError> {
        let p = x0.len();
        let mut f = DVector::zeros(n);
        problem.evaluate(&x0, EvalKind::Base, &mut f)?;
        let jac = jacobian(problem, &x0, &f, config.fd_step)?;
        let diag = DVector::from_iterator(
            p,
            jac.column_iter().map(|c| {
                let norm = c.norm();
                if norm > 0.0 {
                    norm
                } else {
                    1.0
                }
            }),
        );
        Ok(Self {
            config,
            x: x0,
            f,
            jac,
            diag,
            dx: DVector::zeros(p),
            mu: config.mu_init,
            nu: 2.0,
        })
    }

    pub fn x(&self) -> &DVector<f64> {
        &self.x
    }

    /// Residuals at [`x`](Self::x).
    pub fn f(&self) -> &DVector<f64> {
        &self.f
    }

    /// Last accepted step.
    pub fn dx(&self) -> &DVector<f64> {
        &self.dx
    }

    pub fn jacobian(&self) -> &DMatrix<f64> {
        &self.jac
    }

    pub fn chisq(&self) -> f64 {
        self.f.norm_squared()
    }

    /// Take one accepted step, or report that none could be found.
    pub fn iterate<R: Residuals + ?Sized>(&mut self, problem: &mut R) -> Result<IterOutcome, FitError> {
        let g = self.jac.transpose() * &self.f;
        if g.iter().all(|v| *v == 0.0) {
            // Stationary point: nothing to improve.
            self.dx.fill(0.0);
            return Ok(IterOutcome::Accepted);
        }
        let a = self.jac.transpose() * &self.jac;
        let chisq = self.chisq();
        let mut f_trial = DVector::zeros(self.f.len());
        let mut rejects = 0;

        while rejects < self.config.max_rejects {
            let mut m = a.clone();
            for j in 0..m.nrows() {
                m[(j, j)] += self.mu * self.diag[j] * self.diag[j];
            }
            let Some(chol) = m.cholesky() else {
                self.reject();
                rejects += 1;
                continue;
            };
            let delta = chol.solve(&(-&g));
            let x_trial = &self.x + &delta;
            problem.evaluate(&x_trial, EvalKind::Base, &mut f_trial)?;

            let chisq_trial = f_trial.norm_squared();
            let predicted = (&self.f + &self.jac * &delta).norm_squared();
            let rho = if chisq_trial.is_finite() && chisq_trial < chisq && predicted < chisq {
                (chisq - chisq_trial) / (chisq - predicted)
            } else {
                -1.0
            };
            debug!(
                "LM trial: mu {:.3e}, chisq {:.6e} -> {:.6e}, rho {:.3}",
                self.mu, chisq, chisq_trial, rho
            );

            if rho > 0.0 {
                self.mu *= (1.0 - (2.0 * rho - 1.0).powi(3)).max(1.0 / 3.0);
                self.nu = 2.0;
                self.x = x_trial;
                std::mem::swap(&mut self.f, &mut f_trial);
                self.dx = delta;
                self.jac = jacobian(problem, &self.x, &self.f, self.config.fd_step)?;
                for (d, c) in self.diag.iter_mut().zip(self.jac.column_iter()) {
                    *d = d.max(c.norm());
                }
                return Ok(IterOutcome::Accepted);
            }
            self.reject();
            rejects += 1;
        }
        self.dx.fill(0.0);
        Ok(IterOutcome::NoProgress)
    }

    fn reject(&mut self) {
        self.mu *= self.nu;
        self.nu *= 2.0;
    }

    /// Reciprocal condition number of the Jacobian from its singular values.
    pub fn rcond(&self) -> f64 {
        let sv = self.jac.clone().svd(false, false).singular_values;
        let max = sv.max();
        let min = sv.min();
        if max > 0.0 {
            min / max
        } else {
            0.0
        }
    }

    /// Covariance $(J^T J)^{-1}$ via the SVD pseudo-inverse.
    pub fn covariance(&self) -> Result<DMatrix<f64>, FitError> {
        let a = self.jac.transpose() * &self.jac;
        let svd = a.svd(true, true);
        let tol = f64::EPSILON * svd.singular_values.max() * svd.singular_values.len() as f64;
        svd.pseudo_inverse(tol)
            .map_err(|e| FitError::Impossible(format!("covariance: {e}")))
    }
}

/// Forward-difference Jacobian of `problem` at `x`, with `f = f(x)`.
fn jacobian<R: Residuals + ?Sized>(
    problem: &mut R,
    x: &DVector<f64>,
    f: &DVector<f64>,
    fd_step: f64,
) -> Result<DMatrix<f64>, FitError> {
    let mut jac = DMatrix::zeros(f.len(), x.len());
    let mut f_step = DVector::zeros(f.len());
    let mut x_step = x.clone();
    for j in 0..x.len() {
        let h = if x[j] == 0.0 { fd_step } else { fd_step * x[j].abs() };
        x_step[j] = x[j] + h;
        problem.evaluate(&x_step, EvalKind::Jacobian, &mut f_step)?;
        x_step[j] = x[j];
        jac.set_column(j, &((&f_step - f) / h));
    }
    Ok(jac)
}

/// Correlation matrix from a covariance matrix.
pub fn correlation(cov: &DMatrix<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(cov.nrows(), cov.ncols(), |i, j| {
        let d = (cov[(i, i)] * cov[(j, j)]).sqrt();
        if d > 0.0 {
            cov[(i, j)] / d
        } else {
            0.0
        }
    })
}
