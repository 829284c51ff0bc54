pub mod analyzer;
pub mod bleach;
pub mod changepoint;
pub mod error;
pub mod excitation;
pub mod interpolation;
pub mod metrics;
pub mod progress;
pub mod query;
pub mod segmentation;
pub mod spatial;
pub mod splitter;
pub mod structure;
pub mod tracks;

#[cfg(feature = "python")]
pub mod python_bindings;

// Re-export commonly used types and traits
pub use analyzer::FretAnalyzer;
pub use bleach::StepOutcome;
pub use changepoint::{ChangepointDetector, CostModel, Pelt};
pub use error::{AnalysisError, Result};
pub use excitation::{ExcitationSchedule, ExcitationType};
pub use interpolation::{InterpKind, SeriesInterpolator};
pub use metrics::AnalyzeOptions;
pub use structure::{Coordinate, FretData, Observation, TrackTable};
pub use tracks::{load_tracks_from_csv, save_tracks_to_csv};
