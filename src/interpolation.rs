use std::fmt;
use std::str::FromStr;

use crate::error::{AnalysisError, Result};

/// How to fill in values between samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpKind {
    #[default]
    Linear,
    /// Value of the closest sample; exactly midway picks the earlier one
    Nearest,
}

impl FromStr for InterpKind {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linear" => Ok(InterpKind::Linear),
            "nearest" => Ok(InterpKind::Nearest),
            other => Err(AnalysisError::config(format!(
                "Unknown interpolation kind '{}': expected 'linear' or 'nearest'",
                other
            ))),
        }
    }
}

impl fmt::Display for InterpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpKind::Linear => write!(f, "linear"),
            InterpKind::Nearest => write!(f, "nearest"),
        }
    }
}

/// Interpolates a sparsely sampled series onto arbitrary query positions.
///
/// * no samples: every query yields NaN
/// * one sample: every query yields that sample's value
/// * two or more: piecewise interpolation inside the sampled range, the first
///   and last value are held constant outside of it (no linear extrapolation)
#[derive(Debug, Clone)]
pub struct SeriesInterpolator {
    x: Vec<f64>,
    y: Vec<f64>,
    kind: InterpKind,
}

impl SeriesInterpolator {
    /// `x` has to be strictly increasing and of the same length as `y`.
    pub fn new(x: Vec<f64>, y: Vec<f64>, kind: InterpKind) -> Result<Self> {
        if x.len() != y.len() {
            return Err(AnalysisError::config(format!(
                "Interpolation input length mismatch: {} x values, {} y values",
                x.len(),
                y.len()
            )));
        }
        if x.windows(2).any(|w| !(w[0] < w[1])) {
            return Err(AnalysisError::config(
                "Interpolation x values must be strictly increasing",
            ));
        }
        Ok(Self { x, y, kind })
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Value at a single query position
    pub fn at(&self, q: f64) -> f64 {
        let n = self.x.len();
        match n {
            0 => f64::NAN,
            1 => self.y[0],
            _ => {
                if q.is_nan() {
                    return f64::NAN;
                }
                if q <= self.x[0] {
                    return self.y[0];
                }
                if q >= self.x[n - 1] {
                    return self.y[n - 1];
                }
                // x[i - 1] <= q < x[i]
                let i = self.x.partition_point(|&v| v <= q);
                let (x0, x1) = (self.x[i - 1], self.x[i]);
                let (y0, y1) = (self.y[i - 1], self.y[i]);
                match self.kind {
                    InterpKind::Linear => y0 + (y1 - y0) * (q - x0) / (x1 - x0),
                    InterpKind::Nearest => {
                        if q - x0 <= x1 - q {
                            y0
                        } else {
                            y1
                        }
                    }
                }
            }
        }
    }

    /// Values at all query positions
    pub fn interpolate(&self, queries: &[f64]) -> Vec<f64> {
        queries.iter().map(|&q| self.at(q)).collect()
    }
}
