//! Channel ranges used for fitting.

use std::fmt;

use serde::Serialize;

use crate::error::FitError;

/// Inclusive channel range `[low, high]` of one detector's spectrum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Roi {
    /// Detector index (0-based).
    pub detector: usize,
    pub low: usize,
    pub high: usize,
}

impl Roi {
    pub fn new(detector: usize, low: usize, high: usize) -> Result<Self, FitError> {
        if low > high {
            return Err(FitError::InvalidRoi {
                input: format!("[{low}:{high}]"),
                reason: format!("{low} > {high}"),
            });
        }
        Ok(Self { detector, low, high })
    }

    /// Parse `"[low:high]"` for `detector`.
    pub fn parse(detector: usize, input: &str) -> Result<Self, FitError> {
        let invalid = |reason: &str| FitError::InvalidRoi {
            input: input.to_string(),
            reason: reason.to_string(),
        };
        let inner = input
            .trim()
            .strip_prefix('[')
            .ok_or_else(|| invalid("expected '['"))?
            .strip_suffix(']')
            .ok_or_else(|| invalid("expected ']' at the end"))?;
        let (low, high) = inner.split_once(':').ok_or_else(|| invalid("':' missing"))?;
        let low = low
            .trim()
            .parse::<usize>()
            .map_err(|e| invalid(&format!("low channel: {e}")))?;
        let high = high
            .trim()
            .parse::<usize>()
            .map_err(|e| invalid(&format!("high channel: {e}")))?;
        Self::new(detector, low, high).map_err(|_| invalid(&format!("{low} > {high}")))
    }

    /// Number of channels in the range.
    pub fn len(&self) -> usize {
        self.high - self.low + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn channels(&self) -> std::ops::RangeInclusive<usize> {
        self.low..=self.high
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.low, self.high)
    }
}

/// Sum of `spectrum` over `roi`, ignoring channels past the end.
pub fn roi_sum(spectrum: &[f64], roi: &Roi) -> f64 {
    spectrum
        .iter()
        .skip(roi.low)
        .take(roi.len())
        .sum()
}
