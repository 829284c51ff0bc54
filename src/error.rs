//! Error types for the smFRET analysis engine.

use thiserror::Error;

/// Unified error type for trajectory analysis operations.
///
/// Numeric singularities (division by zero, empty interpolation input) are
/// never reported here; they propagate as NaN/inf in the derived columns.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Invalid configuration, e.g. an empty excitation sequence
    #[error("Configuration error: {0}")]
    Config(String),

    /// A query referenced a column the track table does not provide
    #[error("Unknown column '{0}'")]
    UnknownColumn(String),

    /// Filter expression could not be parsed or evaluated
    #[error("Expression error in '{expr}': {message}")]
    Expression { expr: String, message: String },

    /// Changepoint detector gave up on a series
    #[error("Changepoint search exceeded its budget of {0} cost evaluations")]
    DetectorBudget(usize),

    /// The caller asked to abandon the remaining particles
    #[error("Operation cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl AnalysisError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        AnalysisError::Config(message.into())
    }

    /// Creates an expression error.
    pub fn expression(expr: impl Into<String>, message: impl Into<String>) -> Self {
        AnalysisError::Expression {
            expr: expr.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AnalysisError>;
