use std::collections::BTreeSet;

use log::info;

use crate::bleach::{bleach_step_in_place, bleach_step_in_place_with_cancel, StepOutcome};
use crate::changepoint::{ChangepointDetector, Pelt};
use crate::error::Result;
use crate::excitation::{ExcitationSchedule, ExcitationType};
use crate::metrics::{
    analyze_in_place, analyze_in_place_with_cancel, flag_excitation_type, AnalyzeOptions,
};
use crate::query::{evaluate, filter_in_place, filter_particles_in_place};
use crate::segmentation::segment_in_place;
use crate::spatial;
use crate::structure::TrackTable;

/// Step-by-step smFRET analysis of tracking data.
///
/// The analyzer keeps the table it was created with and a working copy. All
/// steps operate on the working copy; [`FretAnalyzer::reset`] discards their
/// results.
#[derive(Debug, Clone)]
pub struct FretAnalyzer<D: ChangepointDetector = Pelt> {
    tracks: TrackTable,
    tracks_orig: TrackTable,
    schedule: ExcitationSchedule,
    detector: D,
    show_progress: bool,
}

impl FretAnalyzer<Pelt> {
    /// Create an analyzer using the default changepoint detector.
    ///
    /// `excitation_seq` is the excitation pattern, e.g. `"da"` or `"ddddda"`.
    pub fn new(tracks: TrackTable, excitation_seq: &str) -> Result<Self> {
        Self::with_detector(tracks, excitation_seq, Pelt::default())
    }
}

impl<D: ChangepointDetector> FretAnalyzer<D> {
    pub fn with_detector(tracks: TrackTable, excitation_seq: &str, detector: D) -> Result<Self> {
        let schedule = ExcitationSchedule::new(excitation_seq)?;
        let mut tracks = tracks;
        tracks.sort();
        Ok(Self {
            tracks_orig: tracks.clone(),
            tracks,
            schedule,
            detector,
            show_progress: false,
        })
    }

    /// Show a progress bar during segmentation
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    /// Working table
    pub fn tracks(&self) -> &TrackTable {
        &self.tracks
    }

    /// Table as passed to the constructor, sorted
    pub fn tracks_orig(&self) -> &TrackTable {
        &self.tracks_orig
    }

    pub fn into_tracks(self) -> TrackTable {
        self.tracks
    }

    pub fn schedule(&self) -> &ExcitationSchedule {
        &self.schedule
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    /// Positions within the excitation pattern using excitation type `t`
    pub fn excitation_frames(&self, t: ExcitationType) -> BTreeSet<usize> {
        self.schedule.frames_of(t)
    }

    pub fn flag_excitation_type(&mut self) {
        flag_excitation_type(&mut self.tracks, &self.schedule);
    }

    /// Calculate excitation types, FRET efficiency, stoichiometry and
    /// direct acceptor brightness
    pub fn analyze(&mut self, options: &AnalyzeOptions) {
        analyze_in_place(&mut self.tracks, &self.schedule, options);
    }

    /// Like [`FretAnalyzer::analyze`], polling `should_cancel` before each
    /// particle. On cancellation the FRET values are not changed.
    pub fn analyze_with_cancel<F>(&mut self, options: &AnalyzeOptions, should_cancel: F) -> Result<()>
    where
        F: Fn() -> bool + Sync,
    {
        analyze_in_place_with_cancel(&mut self.tracks, &self.schedule, options, should_cancel)
    }

    /// Segment the direct acceptor brightness of each particle.
    ///
    /// Requires [`FretAnalyzer::analyze`] to have been called.
    pub fn segment_a_mass(&mut self, penalty: f64) -> Result<()> {
        self.segment_a_mass_with_cancel(penalty, || false)
    }

    /// Like [`FretAnalyzer::segment_a_mass`], polling `should_cancel` before
    /// each particle. On cancellation the working table is not changed.
    pub fn segment_a_mass_with_cancel<F>(&mut self, penalty: f64, should_cancel: F) -> Result<()>
    where
        F: Fn() -> bool + Sync,
    {
        segment_in_place(
            &mut self.tracks,
            &self.detector,
            penalty,
            self.show_progress,
            should_cancel,
        )
    }

    /// Remove particles whose acceptor did not bleach in a single step.
    ///
    /// Requires [`FretAnalyzer::segment_a_mass`] to have been called. If
    /// `truncate` is set, frames from the bleach step on are removed as well.
    pub fn acceptor_bleach_step(
        &mut self,
        brightness_thresh: f64,
        truncate: bool,
    ) -> Vec<(i64, StepOutcome)> {
        bleach_step_in_place(&mut self.tracks, brightness_thresh, truncate)
    }

    /// Like [`FretAnalyzer::acceptor_bleach_step`], polling `should_cancel`
    /// before each particle. On cancellation no rows are removed.
    pub fn acceptor_bleach_step_with_cancel<F>(
        &mut self,
        brightness_thresh: f64,
        truncate: bool,
        should_cancel: F,
    ) -> Result<Vec<(i64, StepOutcome)>>
    where
        F: Fn() -> bool + Sync,
    {
        bleach_step_in_place_with_cancel(&mut self.tracks, brightness_thresh, truncate, should_cancel)
    }

    /// Evaluate `expr` for each row of the working table
    pub fn eval(&self, expr: &str) -> Result<Vec<bool>> {
        evaluate(&self.tracks, expr)
    }

    /// Keep only rows fulfilling `expr`
    pub fn query(&mut self, expr: &str) -> Result<()> {
        filter_in_place(&mut self.tracks, expr)
    }

    /// Keep only particles fulfilling `expr` in at least `min_count` frames
    /// (all but `|min_count|` frames if not positive)
    pub fn filter_particles(&mut self, expr: &str, min_count: i64) -> Result<()> {
        filter_particles_in_place(&mut self.tracks, expr, min_count)
    }

    pub fn has_near_neighbor(&mut self, radius: f64) {
        spatial::has_near_neighbor(&mut self.tracks, radius);
    }

    pub fn interpolate_coords(&mut self) {
        self.tracks = spatial::interpolate_coords(&self.tracks);
    }

    /// Undo all steps
    pub fn reset(&mut self) {
        self.tracks = self.tracks_orig.clone();
        info!("Reset to {} localizations", self.tracks.len());
    }
}
