//! Fit progress statistics.

use std::fmt;

use serde::Serialize;

/// Fidelity phase of a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FitPhase {
    /// Relaxed calculation parameters, loose tolerances.
    Fast,
    /// The simulation's own calculation parameters, tight tolerances.
    Slow,
}

impl FitPhase {
    pub fn number(self) -> usize {
        match self {
            FitPhase::Fast => 1,
            FitPhase::Slow => 2,
        }
    }
}

/// How a successful fit phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FitStatus {
    /// Relative change of reduced chi-square below tolerance.
    SuccessChisq,
    /// Every parameter step below tolerance.
    SuccessDelta,
}

impl fmt::Display for FitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitStatus::SuccessChisq => write!(f, "chi squared change below tolerance"),
            FitStatus::SuccessDelta => write!(f, "step size below tolerance"),
        }
    }
}

/// Snapshot of fit progress, handed to the iteration callback.
#[derive(Debug, Clone, Serialize)]
pub struct FitStats {
    pub phase: FitPhase,
    pub iter: usize,
    /// Residual evaluations within the current iteration.
    pub iter_call: usize,
    /// Evaluations that ran at least one full simulation.
    pub n_evals: usize,
    pub n_evals_iter: usize,
    /// Evaluations served by rescaling histograms instead of simulating.
    pub n_speedup_evals: usize,
    pub n_speedup_evals_iter: usize,
    /// Residual blocks served from the cache.
    pub n_cache_hits: usize,
    /// Seconds spent in simulation.
    pub cputime_cumul: f64,
    pub cputime_iter: f64,
    /// Chi-square at the start of the phase.
    pub chisq0: f64,
    pub chisq: f64,
    pub chisq_dof: f64,
    /// Euclidean norm of the weighted residual vector.
    pub norm: f64,
    /// Reciprocal condition number of the Jacobian.
    pub rcond: f64,
}

impl FitStats {
    pub fn new(phase: FitPhase) -> Self {
        Self {
            phase,
            iter: 0,
            iter_call: 0,
            n_evals: 0,
            n_evals_iter: 0,
            n_speedup_evals: 0,
            n_speedup_evals_iter: 0,
            n_cache_hits: 0,
            cputime_cumul: 0.0,
            cputime_iter: 0.0,
            chisq0: 0.0,
            chisq: 0.0,
            chisq_dof: 0.0,
            norm: 0.0,
            rcond: 0.0,
        }
    }

    /// Start a new iteration.
    pub(crate) fn begin_iteration(&mut self, iter: usize) {
        self.iter = iter;
        self.iter_call = 0;
        self.n_evals_iter = 0;
        self.n_speedup_evals_iter = 0;
        self.cputime_iter = 0.0;
    }

    /// Fold the finished iteration into the cumulative counters.
    pub(crate) fn end_iteration(&mut self, chisq: f64, rcond: f64, dof: usize) {
        self.chisq = chisq;
        self.norm = chisq.sqrt();
        self.chisq_dof = chisq / dof.max(1) as f64;
        self.rcond = rcond;
        self.n_evals += self.n_evals_iter;
        self.n_speedup_evals += self.n_speedup_evals_iter;
        self.cputime_cumul += self.cputime_iter;
    }

    /// Column header matching the [`Display`](fmt::Display) row.
    pub fn header() -> &'static str {
        "iter |    cond(J)   |     |f(x)|     |   chisq/dof  | evaluations | fast eval | time cumul | time eval |"
    }
}

impl fmt::Display for FitStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cond = if self.rcond > 0.0 { 1.0 / self.rcond } else { f64::INFINITY };
        let per_eval_ms = if self.n_evals_iter > 0 {
            1000.0 * self.cputime_iter / self.n_evals_iter as f64
        } else {
            0.0
        };
        write!(
            f,
            "{:4} | {:12.7e} | {:14.8e} | {:12.7e} | {:11} | {:9} | {:10.3} | {:9.1} |",
            self.iter,
            cond,
            self.norm,
            self.chisq_dof,
            self.n_evals,
            self.n_speedup_evals,
            self.cputime_cumul,
            per_eval_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_iteration_accumulates() {
        let mut s = FitStats::new(FitPhase::Slow);
        s.begin_iteration(1);
        s.n_evals_iter = 3;
        s.cputime_iter = 0.5;
        s.end_iteration(200.0, 0.1, 100);
        assert_eq!(s.n_evals, 3);
        assert_relative_eq!(s.chisq_dof, 2.0);
        assert_relative_eq!(s.norm, 200f64.sqrt());

        s.begin_iteration(2);
        assert_eq!(s.n_evals_iter, 0);
        s.n_evals_iter = 2;
        s.end_iteration(100.0, 0.1, 100);
        assert_eq!(s.n_evals, 5);
        assert_relative_eq!(s.cputime_cumul, 0.5);
    }

    #[test]
    fn test_phase_order() {
        assert!(FitPhase::Fast < FitPhase::Slow);
        assert_eq!(FitPhase::Slow.number(), 2);
    }
}
