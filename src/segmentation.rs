//! Changepoint segmentation of the acceptor brightness trace.
//!
//! Changepoints are searched for in the direct acceptor excitation data only.
//! Segment numbers are then assigned to all frames of a particle: frames
//! between the last acceptor frame before a changepoint and the changepoint
//! itself already belong to the new segment, since the change happened
//! somewhere in between.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::changepoint::ChangepointDetector;
use crate::error::{AnalysisError, Result};
use crate::excitation::ExcitationType;
use crate::progress::particle_progress;
use crate::splitter::split_by_particle;
use crate::structure::{Observation, TrackTable};

/// Segment number of particles whose acceptor trace could not be segmented
pub const UNDEFINED_SEGMENT: i64 = -1;

/// Assign segment numbers to the frames of one particle.
///
/// `rows` must be sorted by frame and carry excitation types and `a_mass`
/// values (see [`crate::metrics::analyze`]).
pub fn segment_particle<D: ChangepointDetector + ?Sized>(
    rows: &[Observation],
    detector: &D,
    penalty: f64,
) -> Vec<i64> {
    let particle = rows.first().map_or(-1, |r| r.particle);
    let (acc_pos, acc_mass): (Vec<usize>, Vec<f64>) = rows
        .iter()
        .enumerate()
        .filter(|(_, r)| r.fret.exc_type == Some(ExcitationType::Acceptor))
        .map(|(i, r)| (i, r.fret.a_mass.unwrap_or(f64::NAN)))
        .unzip();

    if acc_mass.is_empty() {
        debug!("Particle {}: no direct acceptor excitation frames, not segmented", particle);
        return vec![UNDEFINED_SEGMENT; rows.len()];
    }
    if acc_mass.iter().any(|m| !m.is_finite()) {
        debug!("Particle {}: non-finite acceptor brightness, not segmented", particle);
        return vec![UNDEFINED_SEGMENT; rows.len()];
    }

    let changepoints = match detector.find_changepoints(&acc_mass, penalty) {
        Ok(cp) => cp,
        Err(e) => {
            warn!("Particle {}: changepoint detection failed: {}", particle, e);
            return vec![UNDEFINED_SEGMENT; rows.len()];
        }
    };
    if changepoints.iter().any(|&c| c > acc_mass.len()) {
        warn!(
            "Particle {}: changepoint out of range for {} acceptor frames: {:?}",
            particle,
            acc_mass.len(),
            changepoints
        );
        return vec![UNDEFINED_SEGMENT; rows.len()];
    }

    // Move each changepoint forward to right after the previous acceptor frame
    let mut bounds: Vec<usize> = changepoints
        .iter()
        .map(|&c| acc_pos[c.saturating_sub(1)] + 1)
        .collect();
    bounds.dedup();

    let mut segments = Vec::with_capacity(rows.len());
    let mut start = 0;
    for (id, end) in bounds.into_iter().chain(std::iter::once(rows.len())).enumerate() {
        segments.extend(std::iter::repeat(id as i64).take(end.saturating_sub(start)));
        start = start.max(end);
    }
    segments
}

/// Segment all particles in place, writing the `a_seg` value of every row.
///
/// `should_cancel` is polled before each particle. On cancellation the
/// table is sorted but its segment numbers are left as they were.
pub fn segment_in_place<D, F>(
    table: &mut TrackTable,
    detector: &D,
    penalty: f64,
    show_progress: bool,
    should_cancel: F,
) -> Result<()>
where
    D: ChangepointDetector + ?Sized,
    F: Fn() -> bool + Sync,
{
    table.sort();

    let particles: Vec<(i64, &[Observation])> = split_by_particle(table.rows()).collect();
    let pb = particle_progress(particles.len(), show_progress, "Segmenting acceptor brightness");
    let cancelled = AtomicBool::new(false);

    let segments: Vec<Option<Vec<i64>>> = particles
        .par_iter()
        .map(|(_, rows)| {
            if cancelled.load(Ordering::Relaxed) || should_cancel() {
                cancelled.store(true, Ordering::Relaxed);
                return None;
            }
            let seg = segment_particle(rows, detector, penalty);
            pb.inc(1);
            Some(seg)
        })
        .collect();

    if cancelled.load(Ordering::Relaxed) {
        pb.abandon_with_message("Segmentation cancelled");
        return Err(AnalysisError::Cancelled);
    }
    pb.finish_with_message("Segmentation complete");

    let n_particles = segments.len();
    let n_undefined = segments
        .iter()
        .flatten()
        .filter(|s| s.first() == Some(&UNDEFINED_SEGMENT))
        .count();
    let values = segments.into_iter().flatten().flatten();
    for (row, seg) in table.rows_mut().iter_mut().zip(values) {
        row.fret.a_seg = Some(seg);
    }

    info!(
        "Segmented {} particles ({} without valid acceptor data)",
        n_particles, n_undefined
    );
    Ok(())
}

/// Segment all particles, returning a new table
pub fn segment<D: ChangepointDetector + ?Sized>(
    table: &TrackTable,
    detector: &D,
    penalty: f64,
) -> Result<TrackTable> {
    let mut out = table.clone();
    segment_in_place(&mut out, detector, penalty, false, || false)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changepoint::Pelt;
    use crate::excitation::ExcitationSchedule;
    use crate::metrics::{analyze, AnalyzeOptions};

    /// Excitation "dda": acceptor frames 2, 5, 8, 11, ...
    fn particle(p: i64, a_mass: &[f64]) -> Vec<Observation> {
        let sched = ExcitationSchedule::new("dda").unwrap();
        let mut acc = a_mass.iter();
        (0..(3 * a_mass.len()) as i64)
            .map(|f| {
                let mut o = Observation::new(p, f, 10.0, 10.0);
                o.fret.exc_type = Some(sched.excitation_type_of(f));
                if o.fret.exc_type == Some(ExcitationType::Acceptor) {
                    o.acceptor_mass = *acc.next().unwrap();
                }
                o
            })
            .collect()
    }

    fn with_a_mass(rows: Vec<Observation>) -> TrackTable {
        let sched = ExcitationSchedule::new("dda").unwrap();
        analyze(&TrackTable::new(rows), &sched, &AnalyzeOptions::default())
    }

    fn fixed(cp: Vec<usize>) -> impl Fn(&[f64], f64) -> Vec<usize> + Send + Sync {
        move |_: &[f64], _: f64| cp.clone()
    }

    #[test]
    fn test_no_changepoints() {
        let t = with_a_mass(particle(0, &[5.0, 6.0, 5.0, 6.0]));
        let seg = segment_particle(t.rows(), &fixed(vec![]), 1.0);
        assert_eq!(seg, vec![0; 12]);
    }

    #[test]
    fn test_single_changepoint_boundary() {
        let t = with_a_mass(particle(0, &[5.0, 6.0, 5.0, 6.0]));
        // new segment starts with the third acceptor frame (frame 8)
        let seg = segment_particle(t.rows(), &fixed(vec![2]), 1.0);
        // boundary right after the second acceptor frame (frame 5)
        assert_eq!(seg, vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_changepoint_at_zero_is_clamped() {
        let t = with_a_mass(particle(0, &[5.0, 6.0]));
        let seg = segment_particle(t.rows(), &fixed(vec![0]), 1.0);
        assert_eq!(seg, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn test_pelt_segmentation() {
        let t = with_a_mass(particle(
            3,
            &[1000.0, 1000.0, 1000.0, 400.0, 400.0, 10.0, 10.0, 10.0],
        ));
        let seg = segment_particle(t.rows(), &Pelt::default(), 100.0);
        let mut expected = vec![0; 9];
        expected.extend([1; 6]);
        expected.extend([2; 9]);
        assert_eq!(seg, expected);
    }

    #[test]
    fn test_non_finite_acceptor_mass() {
        let mut rows = particle(0, &[5.0, f64::NAN, 5.0]);
        rows.extend(particle(1, &[5.0, 5.0, 1.0]));
        let t = with_a_mass(rows);
        let called = std::sync::atomic::AtomicUsize::new(0);
        let det = |_: &[f64], _: f64| {
            called.fetch_add(1, Ordering::SeqCst);
            vec![2]
        };
        let out = segment(&t, &det, 1.0).unwrap();
        let segs: Vec<i64> = out.rows().iter().map(|r| r.fret.a_seg.unwrap()).collect();
        assert_eq!(&segs[..9], &[UNDEFINED_SEGMENT; 9]);
        assert_eq!(&segs[9..], &[0, 0, 0, 0, 0, 0, 1, 1, 1]);
        // detector is not called for the particle with NaN data
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_detector_failure_is_per_particle() {
        let mut rows = particle(0, &[5.0; 30]);
        rows.extend(particle(1, &[5.0, 1.0]));
        let t = with_a_mass(rows);
        let det = Pelt::default().with_max_iterations(10);
        let out = segment(&t, &det, 1.0).unwrap();
        assert!(out.rows()[..90].iter().all(|r| r.fret.a_seg == Some(UNDEFINED_SEGMENT)));
        assert!(out.rows()[90..].iter().all(|r| r.fret.a_seg.unwrap() >= 0));
    }

    #[test]
    fn test_particle_without_acceptor_frames() {
        // particle 0 is only observed upon donor excitation
        let mut rows: Vec<Observation> = [0, 1, 3, 4]
            .iter()
            .map(|&f| Observation::new(0, f, 10.0, 10.0))
            .collect();
        rows.extend(particle(1, &[5.0, 5.0, 1.0]));
        let t = with_a_mass(rows);

        for cp in [vec![], vec![0usize]] {
            let out = segment(&t, &fixed(cp), 1.0).unwrap();
            let segs: Vec<i64> = out.rows().iter().map(|r| r.fret.a_seg.unwrap()).collect();
            assert_eq!(&segs[..4], &[UNDEFINED_SEGMENT; 4]);
            assert!(segs[4..].iter().all(|&s| s >= 0));
        }
    }

    #[test]
    fn test_out_of_range_changepoint() {
        let t = with_a_mass(particle(0, &[5.0, 6.0]));
        let seg = segment_particle(t.rows(), &fixed(vec![5]), 1.0);
        assert_eq!(seg, vec![UNDEFINED_SEGMENT; 6]);
    }

    #[test]
    fn test_cancel() {
        let mut rows = particle(0, &[5.0, 6.0]);
        rows.extend(particle(1, &[5.0, 6.0]));
        let mut t = with_a_mass(rows);
        let n_rows = t.len();
        let res = segment_in_place(&mut t, &fixed(vec![1]), 1.0, false, || true);
        assert!(matches!(res, Err(AnalysisError::Cancelled)));
        assert_eq!(t.len(), n_rows);
        assert!(t.rows().iter().all(|r| r.fret.a_seg.is_none()));
    }

    #[test]
    fn test_particle_order_independent() {
        let a = particle(0, &[1000.0, 1000.0, 10.0, 10.0]);
        let b = particle(1, &[500.0, 10.0, 10.0, 500.0]);
        let det = Pelt::default();
        let ab = segment(&with_a_mass([a.clone(), b].concat()), &det, 10.0).unwrap();
        let only_a = segment(&with_a_mass(a), &det, 10.0).unwrap();
        let segs = |t: &TrackTable, p: i64| -> Vec<i64> {
            t.rows()
                .iter()
                .filter(|r| r.particle == p)
                .map(|r| r.fret.a_seg.unwrap())
                .collect()
        };
        assert_eq!(segs(&ab, 0), segs(&only_a, 0));
    }
}
