//! Splitting of a track table into per-particle runs.
//!
//! The table has to be sorted by particle (and frame, see [`TrackTable::sort`]).
//! Sub-series are handed out as borrowed slices in ascending particle order,
//! so nothing is copied and only one run is inspected at a time.
//!
//! [`TrackTable::sort`]: crate::structure::TrackTable::sort

use crate::structure::Observation;

/// Iterator over `(particle, rows)` pairs of a sorted slice
#[derive(Debug, Clone)]
pub struct ParticleSplit<'a> {
    rest: &'a [Observation],
}

/// Split sorted rows into runs of equal particle number
pub fn split_by_particle(rows: &[Observation]) -> ParticleSplit<'_> {
    ParticleSplit { rest: rows }
}

fn run_length(rows: &[Observation]) -> usize {
    match rows.first() {
        Some(first) => rows
            .iter()
            .position(|r| r.particle != first.particle)
            .unwrap_or(rows.len()),
        None => 0,
    }
}

impl<'a> Iterator for ParticleSplit<'a> {
    type Item = (i64, &'a [Observation]);

    fn next(&mut self) -> Option<Self::Item> {
        let particle = self.rest.first()?.particle;
        let (run, rest) = self.rest.split_at(run_length(self.rest));
        self.rest = rest;
        Some((particle, run))
    }
}
