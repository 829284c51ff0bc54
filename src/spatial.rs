//! Spatial helpers for localization data: near-neighbor flags and filling in
//! frames where a tracked particle was not localized.

use std::collections::BTreeMap;

use log::info;

use crate::interpolation::{InterpKind, SeriesInterpolator};
use crate::splitter::split_by_particle;
use crate::structure::{Coordinate, Observation, TrackTable};

/// Flag localizations that have another localization closer than `radius` in
/// the same frame.
///
/// Rows without coordinates are flagged `false` and are nobody's neighbor.
pub fn has_near_neighbor(table: &mut TrackTable, radius: f64) {
    let mut by_frame: BTreeMap<i64, Vec<(usize, Coordinate)>> = BTreeMap::new();
    for (i, row) in table.rows().iter().enumerate() {
        if let Some(c) = row.coords {
            by_frame.entry(row.frame).or_default().push((i, c));
        }
    }

    let mut flags = vec![false; table.len()];
    for locs in by_frame.values() {
        for (a, (i, ci)) in locs.iter().enumerate() {
            for (j, cj) in &locs[a + 1..] {
                if ci.distance_to(cj) < radius {
                    flags[*i] = true;
                    flags[*j] = true;
                }
            }
        }
    }

    let n_flagged = flags.iter().filter(|&&f| f).count();
    for (row, flag) in table.rows_mut().iter_mut().zip(flags) {
        row.has_neighbor = Some(flag);
    }
    info!("{} of {} localizations have near neighbors", n_flagged, table.len());
}

/// Insert rows for frames in which a particle was not localized.
///
/// For each particle, every frame between its first and last one is present
/// afterwards. Inserted rows have `interp` set, linearly interpolated
/// coordinates (if the particle has any) and NaN brightness.
pub fn interpolate_coords(table: &TrackTable) -> TrackTable {
    let mut sorted = table.clone();
    sorted.sort();

    let mut out = Vec::with_capacity(sorted.len());
    let mut n_added = 0usize;
    for (particle, rows) in split_by_particle(sorted.rows()) {
        let (t, (xs, ys)): (Vec<f64>, (Vec<f64>, Vec<f64>)) = rows
            .iter()
            .filter_map(|r| r.coords.map(|c| (r.frame as f64, (c.x, c.y))))
            .unzip();
        // Frames are unique within a particle, so this only fails for duplicates
        let interp = match (
            SeriesInterpolator::new(t.clone(), xs, InterpKind::Linear),
            SeriesInterpolator::new(t, ys, InterpKind::Linear),
        ) {
            (Ok(ix), Ok(iy)) if !ix.is_empty() => Some((ix, iy)),
            _ => None,
        };

        let mut prev: Option<i64> = None;
        for row in rows {
            if let Some(p) = prev {
                for f in (p + 1)..row.frame {
                    let mut o = Observation::new(particle, f, f64::NAN, f64::NAN);
                    o.interp = true;
                    o.coords = interp
                        .as_ref()
                        .map(|(ix, iy)| Coordinate::new(ix.at(f as f64), iy.at(f as f64)));
                    out.push(o);
                    n_added += 1;
                }
            }
            out.push(row.clone());
            prev = Some(row.frame);
        }
    }

    info!("Interpolated {} missing localizations", n_added);
    TrackTable::new(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_near_neighbor() {
        let mut t = TrackTable::new(vec![
            Observation::new(0, 0, 0.0, 0.0).with_coords(0.0, 0.0),
            Observation::new(1, 0, 0.0, 0.0).with_coords(1.0, 1.0),
            Observation::new(2, 0, 0.0, 0.0).with_coords(10.0, 10.0),
            // same position, other frame
            Observation::new(3, 1, 0.0, 0.0).with_coords(1.0, 1.0),
            Observation::new(4, 0, 0.0, 0.0),
        ]);
        has_near_neighbor(&mut t, 2.0);
        let flags: Vec<bool> = t.rows().iter().map(|r| r.has_neighbor.unwrap()).collect();
        assert_eq!(flags, vec![true, true, false, false, false]);

        has_near_neighbor(&mut t, 1.0);
        assert!(t.rows().iter().all(|r| r.has_neighbor == Some(false)));
    }

    #[test]
    fn test_interpolate_coords() {
        let t = TrackTable::new(vec![
            Observation::new(0, 4, 1.0, 1.0).with_coords(4.0, 0.0),
            Observation::new(0, 1, 1.0, 1.0).with_coords(1.0, 3.0),
            Observation::new(1, 0, 1.0, 1.0),
            Observation::new(1, 2, 1.0, 1.0),
        ]);
        let out = interpolate_coords(&t);
        let keys: Vec<(i64, i64, bool)> = out
            .rows()
            .iter()
            .map(|r| (r.particle, r.frame, r.interp))
            .collect();
        assert_eq!(
            keys,
            vec![
                (0, 1, false),
                (0, 2, true),
                (0, 3, true),
                (0, 4, false),
                (1, 0, false),
                (1, 1, true),
                (1, 2, false)
            ]
        );
        assert_eq!(out.rows()[1].coords, Some(Coordinate::new(2.0, 2.0)));
        assert_eq!(out.rows()[2].coords, Some(Coordinate::new(3.0, 1.0)));
        assert!(out.rows()[1].donor_mass.is_nan());
        // particle without coordinates
        assert_eq!(out.rows()[5].coords, None);
    }

    #[test]
    fn test_interpolate_coords_no_gaps() {
        let t: TrackTable = (0..3)
            .map(|f| Observation::new(0, f, 1.0, 1.0).with_coords(0.0, 0.0))
            .collect();
        assert_eq!(interpolate_coords(&t), t);
    }
}
