use crate::excitation::ExcitationType;

/// 2D feature position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Calculate Euclidean distance to another coordinate
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// FRET-related values derived for a single localization.
///
/// `None` means the value has not been computed (or was not present in the
/// input); NaN means it was computed but is not defined for this frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FretData {
    pub exc_type: Option<ExcitationType>,
    /// Total brightness upon donor excitation
    pub d_mass: Option<f64>,
    /// Apparent FRET efficiency
    pub eff: Option<f64>,
    /// Stoichiometry
    pub stoi: Option<f64>,
    /// Acceptor brightness upon direct excitation, interpolated for other frames
    pub a_mass: Option<f64>,
    /// Acceptor brightness segment; -1 if segmentation was not possible
    pub a_seg: Option<i64>,
}

/// A single localization of a tracked particle
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub particle: i64,
    pub frame: i64,
    pub donor_mass: f64,
    pub acceptor_mass: f64,
    pub coords: Option<Coordinate>,
    pub has_neighbor: Option<bool>,
    /// Row was inserted by coordinate interpolation, not localized
    pub interp: bool,
    pub fret: FretData,
}

impl Observation {
    pub fn new(particle: i64, frame: i64, donor_mass: f64, acceptor_mass: f64) -> Self {
        Self {
            particle,
            frame,
            donor_mass,
            acceptor_mass,
            coords: None,
            has_neighbor: None,
            interp: false,
            fret: FretData::default(),
        }
    }

    pub fn with_coords(mut self, x: f64, y: f64) -> Self {
        self.coords = Some(Coordinate::new(x, y));
        self
    }

    pub fn with_neighbor(mut self, has_neighbor: bool) -> Self {
        self.has_neighbor = Some(has_neighbor);
        self
    }
}

/// Tracking data: one row per particle and frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TrackTable {
    rows: Vec<Observation>,
}

impl TrackTable {
    pub fn new(rows: Vec<Observation>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn rows(&self) -> &[Observation] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [Observation] {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Observation> {
        self.rows
    }

    pub fn push(&mut self, row: Observation) {
        self.rows.push(row);
    }

    /// Stable sort by particle number, then frame number
    pub fn sort(&mut self) {
        self.rows.sort_by_key(|r| (r.particle, r.frame));
    }

    pub fn is_sorted(&self) -> bool {
        self.rows
            .windows(2)
            .all(|w| (w[0].particle, w[0].frame) <= (w[1].particle, w[1].frame))
    }

    /// Distinct particle numbers in ascending order
    pub fn particles(&self) -> Vec<i64> {
        let mut p: Vec<i64> = self.rows.iter().map(|r| r.particle).collect();
        p.sort_unstable();
        p.dedup();
        p
    }

    /// Keep only rows where `mask` is `true`. `mask` must have one entry per row.
    pub fn retain_mask(&mut self, mask: &[bool]) {
        debug_assert_eq!(mask.len(), self.rows.len());
        let mut it = mask.iter();
        self.rows.retain(|_| it.next().copied().unwrap_or(false));
    }

    pub fn retain<F: FnMut(&Observation) -> bool>(&mut self, f: F) {
        self.rows.retain(f);
    }
}

impl From<Vec<Observation>> for TrackTable {
    fn from(rows: Vec<Observation>) -> Self {
        Self::new(rows)
    }
}

impl FromIterator<Observation> for TrackTable {
    fn from_iter<I: IntoIterator<Item = Observation>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordinate_distance() {
        let c1 = Coordinate::new(0.0, 0.0);
        let c2 = Coordinate::new(3.0, 4.0);
        assert_eq!(c1.distance_to(&c2), 5.0);
    }

    #[test]
    fn test_sort_and_particles() {
        let mut table = TrackTable::new(vec![
            Observation::new(2, 1, 0.0, 0.0),
            Observation::new(1, 3, 0.0, 0.0),
            Observation::new(2, 0, 0.0, 0.0),
            Observation::new(1, 0, 0.0, 0.0),
        ]);
        assert!(!table.is_sorted());
        table.sort();
        assert!(table.is_sorted());
        let keys: Vec<(i64, i64)> = table.rows().iter().map(|r| (r.particle, r.frame)).collect();
        assert_eq!(keys, vec![(1, 0), (1, 3), (2, 0), (2, 1)]);
        assert_eq!(table.particles(), vec![1, 2]);
    }

    #[test]
    fn test_retain_mask() {
        let mut table: TrackTable = (0..4).map(|f| Observation::new(0, f, 0.0, 0.0)).collect();
        table.retain_mask(&[true, false, false, true]);
        let frames: Vec<i64> = table.rows().iter().map(|r| r.frame).collect();
        assert_eq!(frames, vec![0, 3]);
    }
}
