//! Offline changepoint detection.
//!
//! Segmentation only needs something that turns a series into cut positions,
//! see [`ChangepointDetector`]. [`Pelt`] is the default implementation.

use std::fmt;
use std::str::FromStr;

use crate::error::{AnalysisError, Result};

/// Finds changepoints in a series.
///
/// Returned indices are strictly increasing and lie in `1..data.len()`; an
/// index `c` means a new segment starts with `data[c]`.
pub trait ChangepointDetector: Send + Sync {
    fn find_changepoints(&self, data: &[f64], penalty: f64) -> Result<Vec<usize>>;
}

/// Any `Fn(&[f64], f64) -> Vec<usize>` can be used as a detector
impl<F> ChangepointDetector for F
where
    F: Fn(&[f64], f64) -> Vec<usize> + Send + Sync,
{
    fn find_changepoints(&self, data: &[f64], penalty: f64) -> Result<Vec<usize>> {
        Ok(self(data, penalty))
    }
}

/// Segment cost function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CostModel {
    /// Sum of absolute deviations from the segment median
    L1,
    /// Sum of squared deviations from the segment mean
    #[default]
    L2,
}

impl FromStr for CostModel {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l1" => Ok(CostModel::L1),
            "l2" => Ok(CostModel::L2),
            other => Err(AnalysisError::config(format!(
                "Unknown cost model '{}': expected 'l1' or 'l2'",
                other
            ))),
        }
    }
}

impl fmt::Display for CostModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CostModel::L1 => write!(f, "l1"),
            CostModel::L2 => write!(f, "l2"),
        }
    }
}

struct SegmentCost<'a> {
    model: CostModel,
    data: &'a [f64],
    cum: Vec<f64>,
    cum_sq: Vec<f64>,
}

impl<'a> SegmentCost<'a> {
    fn new(model: CostModel, data: &'a [f64]) -> Self {
        let (mut cum, mut cum_sq) = (Vec::new(), Vec::new());
        if model == CostModel::L2 {
            cum.reserve(data.len() + 1);
            cum_sq.reserve(data.len() + 1);
            cum.push(0.0);
            cum_sq.push(0.0);
            for &v in data {
                cum.push(cum[cum.len() - 1] + v);
                cum_sq.push(cum_sq[cum_sq.len() - 1] + v * v);
            }
        }
        Self {
            model,
            data,
            cum,
            cum_sq,
        }
    }

    /// Cost of `data[start..end]`
    fn error(&self, start: usize, end: usize) -> f64 {
        match self.model {
            CostModel::L2 => {
                let s = self.cum[end] - self.cum[start];
                let sq = self.cum_sq[end] - self.cum_sq[start];
                sq - s * s / (end - start) as f64
            }
            CostModel::L1 => {
                let mut seg = self.data[start..end].to_vec();
                seg.sort_by(f64::total_cmp);
                let mid = seg.len() / 2;
                let med = if seg.len() % 2 == 1 {
                    seg[mid]
                } else {
                    0.5 * (seg[mid - 1] + seg[mid])
                };
                seg.iter().map(|v| (v - med).abs()).sum()
            }
        }
    }
}

/// Pruned exact linear time (PELT) changepoint search.
///
/// Minimizes the sum of segment costs plus `penalty` per segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Pelt {
    pub model: CostModel,
    /// Minimum number of data points per segment
    pub min_size: usize,
    /// Only consider every `jump`-th position as changepoint
    pub jump: usize,
    /// Give up after this many segment cost evaluations
    pub max_iterations: Option<usize>,
}

impl Default for Pelt {
    fn default() -> Self {
        Self {
            model: CostModel::L2,
            min_size: 1,
            jump: 1,
            max_iterations: None,
        }
    }
}

impl Pelt {
    pub fn new(model: CostModel, min_size: usize, jump: usize) -> Self {
        Self {
            model,
            min_size,
            jump,
            max_iterations: None,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }
}

impl ChangepointDetector for Pelt {
    fn find_changepoints(&self, data: &[f64], penalty: f64) -> Result<Vec<usize>> {
        let n = data.len();
        let min_size = self.min_size.max(1);
        let jump = self.jump.max(1);
        if n < min_size {
            return Ok(Vec::new());
        }

        let cost = SegmentCost::new(self.model, data);

        // Possible segment ends
        let mut ends: Vec<usize> = (0..n).step_by(jump).filter(|&k| k >= min_size).collect();
        ends.push(n);

        // total[t]: optimal penalized cost of data[..t]; last[t]: start of its last segment
        let mut total = vec![f64::INFINITY; n + 1];
        let mut last = vec![0usize; n + 1];
        total[0] = 0.0;

        let mut admissible: Vec<usize> = Vec::new();
        let mut evaluations = 0usize;

        for &end in &ends {
            let new_start = (end - min_size) / jump * jump;
            if admissible.last() != Some(&new_start) {
                admissible.push(new_start);
            }

            let mut best = f64::INFINITY;
            let mut best_start = 0;
            let mut losses = Vec::with_capacity(admissible.len());
            for &start in &admissible {
                if !total[start].is_finite() || end - start < min_size {
                    losses.push(f64::INFINITY);
                    continue;
                }
                evaluations += 1;
                if let Some(max) = self.max_iterations {
                    if evaluations > max {
                        return Err(AnalysisError::DetectorBudget(max));
                    }
                }
                let loss = total[start] + cost.error(start, end) + penalty;
                losses.push(loss);
                if loss < best {
                    best = loss;
                    best_start = start;
                }
            }

            total[end] = best;
            last[end] = best_start;

            // Prune starts which cannot become optimal any more
            let bound = best + penalty;
            let mut losses = losses.into_iter();
            admissible.retain(|_| losses.next().map_or(false, |l| l <= bound));
        }

        if !total[n].is_finite() {
            return Ok(Vec::new());
        }

        let mut changepoints = Vec::new();
        let mut t = n;
        while t > 0 {
            let start = last[t];
            if start > 0 {
                changepoints.push(start);
            }
            t = start;
        }
        changepoints.reverse();
        Ok(changepoints)
    }
}
