use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::{AnalysisError, Result};

/// Excitation condition of a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ExcitationType {
    /// Donor laser on ("d")
    Donor,
    /// Direct acceptor excitation ("a")
    Acceptor,
    /// Any other frame kind, e.g. "o" for no excitation. Ignored by the analysis.
    Other(char),
}

impl ExcitationType {
    /// Parse a single-character token. "d" is donor, "a" is acceptor,
    /// any other single character is an [`ExcitationType::Other`] frame.
    pub fn from_token(token: &str) -> Result<Self> {
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Ok(Self::from(c)),
            _ => Err(AnalysisError::config(format!(
                "Unknown excitation type token '{}': expected a single character",
                token
            ))),
        }
    }

    pub fn token(&self) -> char {
        match self {
            ExcitationType::Donor => 'd',
            ExcitationType::Acceptor => 'a',
            ExcitationType::Other(c) => *c,
        }
    }
}

impl From<char> for ExcitationType {
    fn from(c: char) -> Self {
        match c {
            'd' => ExcitationType::Donor,
            'a' => ExcitationType::Acceptor,
            other => ExcitationType::Other(other),
        }
    }
}

impl FromStr for ExcitationType {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_token(s)
    }
}

impl fmt::Display for ExcitationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Repeating excitation pattern.
///
/// Only the shortest repeating unit has to be given, i.e. "ddddaddddadddda"
/// is the same as "dddda". The type of frame `f` is `sequence[f mod len]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExcitationSchedule {
    sequence: Vec<ExcitationType>,
}

impl ExcitationSchedule {
    /// Build a schedule from a pattern string such as `"da"` or `"dddda"`.
    pub fn new(pattern: &str) -> Result<Self> {
        Self::from_types(pattern.chars().map(ExcitationType::from).collect())
    }

    /// Build a schedule from a list of single-character tokens.
    pub fn from_tokens<S: AsRef<str>>(tokens: &[S]) -> Result<Self> {
        let sequence = tokens
            .iter()
            .map(|t| ExcitationType::from_token(t.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Self::from_types(sequence)
    }

    pub fn from_types(sequence: Vec<ExcitationType>) -> Result<Self> {
        if sequence.is_empty() {
            return Err(AnalysisError::config("Excitation sequence must not be empty"));
        }
        Ok(Self { sequence })
    }

    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn sequence(&self) -> &[ExcitationType] {
        &self.sequence
    }

    /// Excitation type of a frame. Negative frame numbers wrap like positive ones.
    pub fn excitation_type_of(&self, frame: i64) -> ExcitationType {
        let idx = frame.rem_euclid(self.sequence.len() as i64) as usize;
        self.sequence[idx]
    }

    /// Frame numbers (modulo the sequence length) with the given excitation type.
    ///
    /// An excitation type that does not occur in the sequence yields an empty
    /// set, which is a perfectly valid answer.
    pub fn frames_of(&self, excitation: ExcitationType) -> BTreeSet<usize> {
        self.sequence
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == excitation)
            .map(|(i, _)| i)
            .collect()
    }

    /// Distinct excitation types in order of first appearance
    pub fn excitation_types(&self) -> Vec<ExcitationType> {
        let mut seen = Vec::new();
        for t in &self.sequence {
            if !seen.contains(t) {
                seen.push(*t);
            }
        }
        seen
    }
}

impl FromStr for ExcitationSchedule {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for ExcitationSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for t in &self.sequence {
            write!(f, "{}", t)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pattern_is_rejected() {
        assert!(matches!(
            ExcitationSchedule::new(""),
            Err(AnalysisError::Config(_))
        ));
        let none: [&str; 0] = [];
        assert!(ExcitationSchedule::from_tokens(&none).is_err());
    }

    #[test]
    fn test_multi_char_token_is_rejected() {
        assert!(ExcitationSchedule::from_tokens(&["d", "acc"]).is_err());
        assert!("".parse::<ExcitationType>().is_err());
    }

    #[test]
    fn test_excitation_type_is_periodic() {
        for pattern in ["d", "da", "dddda", "odda", "adxd"] {
            let sched = ExcitationSchedule::new(pattern).unwrap();
            let l = sched.len() as i64;
            for f in -12..40 {
                assert_eq!(sched.excitation_type_of(f), sched.excitation_type_of(f + l));
            }
        }
    }

    #[test]
    fn test_excitation_type_of() {
        let sched = ExcitationSchedule::new("dddda").unwrap();
        assert_eq!(sched.excitation_type_of(0), ExcitationType::Donor);
        assert_eq!(sched.excitation_type_of(4), ExcitationType::Acceptor);
        assert_eq!(sched.excitation_type_of(9), ExcitationType::Acceptor);
        assert_eq!(sched.excitation_type_of(10), ExcitationType::Donor);
        assert_eq!(sched.excitation_type_of(-1), ExcitationType::Acceptor);
    }

    #[test]
    fn test_frames_of() {
        let sched = ExcitationSchedule::from_tokens(&["o", "d", "d", "a"]).unwrap();
        assert_eq!(
            sched.frames_of(ExcitationType::Donor).into_iter().collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(
            sched.frames_of(ExcitationType::Acceptor).into_iter().collect::<Vec<_>>(),
            vec![3]
        );
        assert_eq!(
            sched.frames_of(ExcitationType::Other('o')).into_iter().collect::<Vec<_>>(),
            vec![0]
        );

        let donor_only = ExcitationSchedule::new("d").unwrap();
        assert!(donor_only.frames_of(ExcitationType::Acceptor).is_empty());
    }

    #[test]
    fn test_display_round_trip() {
        let sched: ExcitationSchedule = "odda".parse().unwrap();
        assert_eq!(sched.to_string(), "odda");
        assert_eq!(
            sched.excitation_types(),
            vec![
                ExcitationType::Other('o'),
                ExcitationType::Donor,
                ExcitationType::Acceptor
            ]
        );
    }
}
