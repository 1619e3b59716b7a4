// src/taxonomy.rs
//! Candidate label sets and the built-in taxonomies.
//!
//! Two independent sets exist: a 17-label advertising/noise taxonomy used for filtration and a
//! 12-label event-type taxonomy used to pick tolerances for similarity scoring.

use std::collections::HashSet;

/// Labels for the zero-shot noise filter. Indices `0..=4` are noise.
pub const FILTRATION_LABELS: [&str; 17] = [
    "other",
    "food",
    "advertisement",
    "spam",
    "promotion",
    "music concert",
    "exhibition",
    "festival",
    "conference",
    "calendar holiday",
    "sport event",
    "flashmob",
    "accident",
    "stroll walking",
    "wedding birthday",
    "private event",
    "public event",
];

pub const NOISE_INDICES: [usize; 5] = [0, 1, 2, 3, 4];

/// Event types used as post topics for similarity scoring.
pub const EVENT_LABELS: [&str; 12] = [
    "music concert",
    "exhibition",
    "festival",
    "conference",
    "calendar holiday",
    "sport event",
    "flashmob",
    "accident",
    "stroll walking",
    "wedding birthday",
    "private event",
    "public event",
];

pub const PRIVATE_EVENT_LABELS: [&str; 3] = ["stroll walking", "wedding birthday", "private event"];

pub const PUBLIC_EVENT: &str = "public event";
pub const PRIVATE_EVENT: &str = "private event";

/// Ground-truth labels of the validation set that mark a topic as advertising.
pub const ADVERTISING_LABELS: [&str; 6] = [
    "adv_event",
    "adv_other",
    "food",
    "other",
    "retrospective_event",
    "future_event",
];

/// `(label, days, meters)` tolerances for deciding whether two posts share an event.
pub const DEFAULT_TOLERANCES: [(&str, f64, f64); 12] = [
    // public
    ("music concert", 2.0, 100.0),
    ("exhibition", 90.0, 100.0),
    ("festival", 30.0, 400.0),
    ("conference", 10.0, 100.0),
    ("calendar holiday", 2.0, 10_000.0),
    ("sport event", 2.0, 1_000.0),
    ("flashmob", 2.0, 100.0),
    ("accident", 2.0, 200.0),
    ("public event", 7.0, 1_000.0),
    // private
    ("stroll walking", 2.0, 100.0),
    ("wedding birthday", 2.0, 50.0),
    ("private event", 2.0, 50.0),
];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum LabelSetError {
    #[error("candidate label set is empty")]
    Empty,
    #[error("duplicate candidate label `{0}`")]
    Duplicate(String),
    #[error("label index {index} out of range for {len} labels")]
    IndexOutOfRange { index: usize, len: usize },
}

/// Ordered, non-empty, duplicate-free list of candidate labels.
///
/// Order only matters as the tie-break between equal scores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateLabelSet {
    labels: Vec<String>,
}

impl CandidateLabelSet {
    pub fn new<I, S>(labels: I) -> Result<Self, LabelSetError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
        if labels.is_empty() {
            return Err(LabelSetError::Empty);
        }
        let mut seen = HashSet::with_capacity(labels.len());
        for l in &labels {
            if !seen.insert(l.as_str()) {
                return Err(LabelSetError::Duplicate(l.clone()));
            }
        }
        Ok(Self { labels })
    }

    pub fn filtration() -> Self {
        Self {
            labels: FILTRATION_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn events() -> Self {
        Self {
            labels: EVENT_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn position(&self, label: &str) -> Option<usize> {
        self.labels.iter().position(|l| l == label)
    }

    /// Check that every index points into the set.
    pub fn check_indices(&self, indices: &[usize]) -> Result<(), LabelSetError> {
        match indices.iter().find(|&&i| i >= self.labels.len()) {
            Some(&index) => Err(LabelSetError::IndexOutOfRange {
                index,
                len: self.labels.len(),
            }),
            None => Ok(()),
        }
    }
}
