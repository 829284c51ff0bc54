//! FRET efficiency, stoichiometry and related per-frame quantities.
//!
//! The stoichiometry is
//!
//! ```text
//! S = (F_DD + F_DA) / (F_DD + F_DA + F_AA)
//! ```
//!
//! where `F_DD`/`F_DA` are donor/acceptor brightness upon donor excitation and
//! `F_AA` is the acceptor brightness upon direct excitation. The latter is only
//! measured in acceptor excitation frames and therefore interpolated for all
//! other frames of a particle.

use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::error::{AnalysisError, Result};
use crate::excitation::{ExcitationSchedule, ExcitationType};
use crate::interpolation::{InterpKind, SeriesInterpolator};
use crate::splitter::split_by_particle;
use crate::structure::{FretData, Observation, TrackTable};

/// Options for [`analyze`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzeOptions {
    /// Use a total donor excitation brightness already present in the data
    /// instead of the sum of donor and acceptor brightness
    pub keep_d_mass: bool,
    /// Set efficiency, stoichiometry and total brightness to NaN for all
    /// frames which are not donor excitation frames
    pub invalid_nan: bool,
    /// Interpolation of the direct acceptor brightness
    pub a_mass_interp: InterpKind,
    /// Ignore direct acceptor excitation frames flagged with "has_neighbor"
    pub use_neighbor_flag: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            keep_d_mass: false,
            invalid_nan: true,
            a_mass_interp: InterpKind::Linear,
            use_neighbor_flag: true,
        }
    }
}

/// Set the excitation type of each row according to its frame number
pub fn flag_excitation_type(table: &mut TrackTable, schedule: &ExcitationSchedule) {
    for row in table.rows_mut() {
        row.fret.exc_type = Some(schedule.excitation_type_of(row.frame));
    }
}

/// Direct acceptor excitation samples `(frames, brightness)` of one particle.
///
/// Rows excluded by the "has_neighbor" flag are skipped if `use_neighbor_flag`
/// is set. Samples with NaN brightness are kept.
fn acceptor_samples(
    rows: &[Observation],
    schedule: &ExcitationSchedule,
    use_neighbor_flag: bool,
) -> (Vec<f64>, Vec<f64>) {
    rows.iter()
        .filter(|r| schedule.excitation_type_of(r.frame) == ExcitationType::Acceptor)
        .filter(|r| !(use_neighbor_flag && r.has_neighbor == Some(true)))
        .map(|r| (r.frame as f64, r.acceptor_mass))
        .unzip()
}

fn interpolate_samples(rows: &[Observation], x: Vec<f64>, y: Vec<f64>, kind: InterpKind) -> Vec<f64> {
    match SeriesInterpolator::new(x, y, kind) {
        Ok(interp) => rows.iter().map(|r| interp.at(r.frame as f64)).collect(),
        Err(e) => {
            warn!(
                "Particle {}: cannot interpolate acceptor brightness: {}",
                rows.first().map_or(-1, |r| r.particle),
                e
            );
            vec![f64::NAN; rows.len()]
        }
    }
}

/// Acceptor brightness upon direct excitation for every frame of one particle.
///
/// Rows must be sorted by frame. All values are NaN if the particle has no
/// usable direct acceptor excitation frame.
pub fn interpolate_acceptor_mass(
    rows: &[Observation],
    schedule: &ExcitationSchedule,
    kind: InterpKind,
    use_neighbor_flag: bool,
) -> Vec<f64> {
    let (x, y) = acceptor_samples(rows, schedule, use_neighbor_flag);
    interpolate_samples(rows, x, y, kind)
}

/// FRET values for the rows of one particle.
///
/// If the particle has no usable direct acceptor excitation frame (none at
/// all, or all of them flagged "has_neighbor"), the efficiency is NaN for
/// every frame. Usable frames with NaN brightness do not count as missing;
/// they only propagate NaN through the interpolated `a_mass`.
fn analyze_particle(
    rows: &[Observation],
    schedule: &ExcitationSchedule,
    options: &AnalyzeOptions,
) -> Vec<FretData> {
    let (x, y) = acceptor_samples(rows, schedule, options.use_neighbor_flag);
    let no_acceptor = x.is_empty();
    let a_mass = interpolate_samples(rows, x, y, options.a_mass_interp);

    rows.iter()
        .zip(a_mass)
        .map(|(row, a)| {
            let exc_type = schedule.excitation_type_of(row.frame);
            let sum = row.donor_mass + row.acceptor_mass;
            let mut d_mass = if options.keep_d_mass {
                row.fret.d_mass.unwrap_or(sum)
            } else {
                sum
            };
            // 0 / 0 and x / 0 give NaN and inf, respectively
            let mut eff = if no_acceptor {
                f64::NAN
            } else {
                row.acceptor_mass / d_mass
            };
            let mut stoi = d_mass / (d_mass + a);

            if options.invalid_nan && exc_type != ExcitationType::Donor {
                eff = f64::NAN;
                stoi = f64::NAN;
                d_mass = f64::NAN;
            }

            FretData {
                exc_type: Some(exc_type),
                d_mass: Some(d_mass),
                eff: Some(eff),
                stoi: Some(stoi),
                a_mass: Some(a),
                a_seg: row.fret.a_seg,
            }
        })
        .collect()
}

/// Compute FRET-related values in place.
///
/// The table is sorted by particle and frame, the excitation type is flagged
/// and the `d_mass`, `eff`, `stoi` and `a_mass` values are (over)written.
pub fn analyze_in_place(
    table: &mut TrackTable,
    schedule: &ExcitationSchedule,
    options: &AnalyzeOptions,
) {
    if let Err(e) = analyze_in_place_with_cancel(table, schedule, options, || false) {
        warn!("FRET analysis aborted: {}", e);
    }
}

/// Like [`analyze_in_place`], polling `should_cancel` before each particle.
///
/// On cancellation the table is sorted but its FRET values are left as they
/// were.
pub fn analyze_in_place_with_cancel<F>(
    table: &mut TrackTable,
    schedule: &ExcitationSchedule,
    options: &AnalyzeOptions,
    should_cancel: F,
) -> Result<()>
where
    F: Fn() -> bool + Sync,
{
    table.sort();

    let particles: Vec<(i64, &[Observation])> = split_by_particle(table.rows()).collect();
    let n_particles = particles.len();
    let cancelled = AtomicBool::new(false);

    let results: Vec<Option<Vec<FretData>>> = particles
        .par_iter()
        .map(|(p, rows)| {
            if cancelled.load(Ordering::Relaxed) || should_cancel() {
                cancelled.store(true, Ordering::Relaxed);
                return None;
            }
            let fret = analyze_particle(rows, schedule, options);
            debug!("Particle {}: analyzed {} frames", p, rows.len());
            Some(fret)
        })
        .collect();

    if cancelled.load(Ordering::Relaxed) {
        return Err(AnalysisError::Cancelled);
    }

    let values = results.into_iter().flatten().flatten();
    for (row, fret) in table.rows_mut().iter_mut().zip(values) {
        row.fret = fret;
    }

    info!(
        "Calculated FRET values for {} particles ({} localizations)",
        n_particles,
        table.len()
    );
    Ok(())
}

/// Compute FRET-related values, returning a new table.
///
/// `table` is left untouched; see [`analyze_in_place`] for details.
pub fn analyze(
    table: &TrackTable,
    schedule: &ExcitationSchedule,
    options: &AnalyzeOptions,
) -> TrackTable {
    let mut out = table.clone();
    analyze_in_place(&mut out, schedule, options);
    out
}
