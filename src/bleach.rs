//! Acceptor single-step bleaching filter.
//!
//! After segmentation, a particle is accepted if it has at least two segments
//! and the median direct acceptor brightness of every segment but the first
//! is below a threshold, i.e. the acceptor bleached in a single step and did
//! not recover. Segments without any direct acceptor excitation frame have an
//! undefined (NaN) median, which never counts as bleached.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::error::{AnalysisError, Result};
use crate::excitation::ExcitationType;
use crate::segmentation::UNDEFINED_SEGMENT;
use crate::splitter::split_by_particle;
use crate::structure::{Observation, TrackTable};

/// Result of the bleach step test for one particle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// Single bleach step found. If the particle was truncated, `truncated_at`
    /// is the first removed frame.
    Accepted { truncated_at: Option<i64> },
    /// No single bleach step; all frames are removed
    Rejected,
    /// Segmentation was missing or undefined; all frames are removed
    Undefined,
}

impl StepOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, StepOutcome::Accepted { .. })
    }
}

/// Median; NaN for empty input or if any value is NaN
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        0.5 * (values[mid - 1] + values[mid])
    }
}

/// Median direct acceptor brightness per segment of one particle.
///
/// Returns the segment medians and the row indices where a new segment starts.
pub fn segment_medians(rows: &[Observation]) -> (Vec<f64>, Vec<usize>) {
    let bounds: Vec<usize> = (1..rows.len())
        .filter(|&i| rows[i].fret.a_seg != rows[i - 1].fret.a_seg)
        .collect();

    let mut medians = Vec::with_capacity(bounds.len() + 1);
    let mut start = 0;
    for end in bounds.iter().copied().chain(std::iter::once(rows.len())) {
        let mut acc: Vec<f64> = rows[start..end]
            .iter()
            .filter(|r| r.fret.exc_type == Some(ExcitationType::Acceptor))
            .map(|r| r.fret.a_mass.unwrap_or(f64::NAN))
            .collect();
        medians.push(median(&mut acc));
        start = end;
    }
    (medians, bounds)
}

/// Test one particle. Returns the outcome and the number of leading rows to keep.
pub fn classify_particle(
    rows: &[Observation],
    brightness_thresh: f64,
    truncate: bool,
) -> (StepOutcome, usize) {
    if rows.is_empty()
        || rows
            .iter()
            .any(|r| r.fret.a_seg.map_or(true, |s| s == UNDEFINED_SEGMENT))
    {
        return (StepOutcome::Undefined, 0);
    }

    let (medians, bounds) = segment_medians(rows);
    let single_step = medians.len() > 1 && medians[1..].iter().all(|&m| m < brightness_thresh);
    if !single_step {
        return (StepOutcome::Rejected, 0);
    }
    if truncate {
        let keep = bounds[0];
        (
            StepOutcome::Accepted {
                truncated_at: Some(rows[keep].frame),
            },
            keep,
        )
    } else {
        (StepOutcome::Accepted { truncated_at: None }, rows.len())
    }
}

/// Remove particles without a single acceptor bleach step, in place.
///
/// If `truncate` is set, only the frames before the bleach step are kept.
/// Returns the outcome for each particle in ascending particle order.
pub fn bleach_step_in_place(
    table: &mut TrackTable,
    brightness_thresh: f64,
    truncate: bool,
) -> Vec<(i64, StepOutcome)> {
    match bleach_step_in_place_with_cancel(table, brightness_thresh, truncate, || false) {
        Ok(outcomes) => outcomes,
        Err(e) => {
            warn!("Acceptor bleach step aborted: {}", e);
            Vec::new()
        }
    }
}

/// Like [`bleach_step_in_place`], polling `should_cancel` before each
/// particle. On cancellation the table is sorted but no rows are removed.
pub fn bleach_step_in_place_with_cancel<F>(
    table: &mut TrackTable,
    brightness_thresh: f64,
    truncate: bool,
    should_cancel: F,
) -> Result<Vec<(i64, StepOutcome)>>
where
    F: Fn() -> bool + Sync,
{
    table.sort();

    let cancelled = AtomicBool::new(false);
    let results: Vec<Option<(i64, StepOutcome, usize, usize)>> = split_by_particle(table.rows())
        .collect::<Vec<_>>()
        .into_par_iter()
        .map(|(p, rows)| {
            if cancelled.load(Ordering::Relaxed) || should_cancel() {
                cancelled.store(true, Ordering::Relaxed);
                return None;
            }
            let (outcome, keep) = classify_particle(rows, brightness_thresh, truncate);
            debug!("Particle {}: {:?}", p, outcome);
            Some((p, outcome, keep, rows.len()))
        })
        .collect();

    if cancelled.load(Ordering::Relaxed) {
        return Err(AnalysisError::Cancelled);
    }

    let mut mask = Vec::with_capacity(table.len());
    for &(_, _, keep, len) in results.iter().flatten() {
        mask.extend((0..len).map(|i| i < keep));
    }
    table.retain_mask(&mask);

    let outcomes: Vec<(i64, StepOutcome)> = results
        .into_iter()
        .flatten()
        .map(|(p, o, _, _)| (p, o))
        .collect();
    info!(
        "Acceptor bleach step: {} of {} particles accepted",
        outcomes.iter().filter(|(_, o)| o.is_accepted()).count(),
        outcomes.len()
    );
    Ok(outcomes)
}

/// Like [`bleach_step_in_place`], but returns the filtered table
pub fn bleach_step(
    table: &TrackTable,
    brightness_thresh: f64,
    truncate: bool,
) -> (TrackTable, Vec<(i64, StepOutcome)>) {
    let mut out = table.clone();
    let outcomes = bleach_step_in_place(&mut out, brightness_thresh, truncate);
    (out, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::excitation::ExcitationSchedule;

    /// Build a particle from (segment, direct acceptor brightness) per acceptor
    /// frame, using excitation "da". Donor frames take the segment of the
    /// following acceptor frame.
    fn particle(p: i64, acc: &[(i64, f64)]) -> Vec<Observation> {
        let sched = ExcitationSchedule::new("da").unwrap();
        let mut rows = Vec::new();
        for (i, &(seg, mass)) in acc.iter().enumerate() {
            for f in [2 * i as i64, 2 * i as i64 + 1] {
                let mut o = Observation::new(p, f, 100.0, 100.0);
                o.fret.exc_type = Some(sched.excitation_type_of(f));
                o.fret.a_mass = Some(mass);
                o.fret.a_seg = Some(seg);
                rows.push(o);
            }
        }
        rows
    }

    fn frames(t: &TrackTable, p: i64) -> Vec<i64> {
        t.rows().iter().filter(|r| r.particle == p).map(|r| r.frame).collect()
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&mut []).is_nan());
        assert!(median(&mut [1.0, f64::NAN]).is_nan());
    }

    #[test]
    fn test_single_step_accepted_and_truncated() {
        let rows = particle(
            0,
            &[(0, 1000.0), (0, 1000.0), (0, 1000.0), (1, 10.0), (1, 10.0), (2, 10.0)],
        );
        let (out, outcomes) = bleach_step(&TrackTable::new(rows), 500.0, true);
        assert_eq!(
            outcomes,
            vec![(0, StepOutcome::Accepted { truncated_at: Some(6) })]
        );
        assert_eq!(frames(&out, 0), vec![0, 1, 2, 3, 4, 5]);
        assert!(out.rows().iter().all(|r| r.fret.a_seg == Some(0)));
    }

    #[test]
    fn test_single_step_not_truncated() {
        let rows = particle(0, &[(0, 1000.0), (0, 1000.0), (1, 10.0), (2, 10.0)]);
        let (out, outcomes) = bleach_step(&TrackTable::new(rows), 500.0, false);
        assert_eq!(outcomes, vec![(0, StepOutcome::Accepted { truncated_at: None })]);
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_partial_bleach_rejected() {
        let mut rows = particle(0, &[(0, 1000.0), (0, 1000.0), (1, 600.0), (1, 600.0)]);
        rows.extend(particle(1, &[(0, 1000.0), (1, 10.0)]));
        let (out, outcomes) = bleach_step(&TrackTable::new(rows), 500.0, true);
        assert_eq!(outcomes[0], (0, StepOutcome::Rejected));
        assert!(outcomes[1].1.is_accepted());
        assert!(frames(&out, 0).is_empty());
        assert_eq!(frames(&out, 1), vec![0, 1]);
    }

    #[test]
    fn test_no_step_rejected() {
        let rows = particle(0, &[(0, 1000.0), (0, 10.0)]);
        let (out, outcomes) = bleach_step(&TrackTable::new(rows), 500.0, true);
        assert_eq!(outcomes, vec![(0, StepOutcome::Rejected)]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_recovery_rejected() {
        let rows = particle(0, &[(0, 1000.0), (1, 10.0), (2, 1000.0)]);
        let (_, outcomes) = bleach_step(&TrackTable::new(rows), 500.0, true);
        assert_eq!(outcomes, vec![(0, StepOutcome::Rejected)]);
    }

    #[test]
    fn test_segment_without_acceptor_frames_is_not_bleached() {
        let mut rows = particle(0, &[(0, 1000.0), (0, 1000.0), (2, 10.0)]);
        // frame 4 (donor excitation) forms segment 1 on its own
        rows[4].fret.a_seg = Some(1);
        let (medians, bounds) = segment_medians(&rows);
        assert_eq!(bounds, vec![4, 5]);
        assert_eq!(medians[0], 1000.0);
        assert!(medians[1].is_nan());
        assert_eq!(medians[2], 10.0);

        let (out, outcomes) = bleach_step(&TrackTable::new(rows), 500.0, true);
        assert_eq!(outcomes, vec![(0, StepOutcome::Rejected)]);
        assert!(out.is_empty());
    }

    #[test]
    fn test_bleach_step_cancel() {
        let mut t = TrackTable::new(particle(0, &[(0, 1000.0), (1, 10.0)]));
        let res = bleach_step_in_place_with_cancel(&mut t, 500.0, true, || true);
        assert!(matches!(res, Err(AnalysisError::Cancelled)));
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_undefined_segmentation() {
        let mut rows = particle(0, &[(0, 1000.0), (1, 10.0)]);
        for r in rows.iter_mut() {
            r.fret.a_seg = Some(UNDEFINED_SEGMENT);
        }
        rows.extend(particle(1, &[(0, 1000.0), (1, 10.0)]));
        rows[4].fret.a_seg = None;
        let (out, outcomes) = bleach_step(&TrackTable::new(rows), 500.0, true);
        assert_eq!(
            outcomes,
            vec![(0, StepOutcome::Undefined), (1, StepOutcome::Undefined)]
        );
        assert!(out.is_empty());
    }
}
