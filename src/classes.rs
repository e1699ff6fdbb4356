//! Hazard class identifiers and per-window class scores.
//!
//! The class set is fixed when the configuration is loaded. Every class is
//! addressed by its index into the [`ClassRegistry`], so per-class state can
//! live in plain vectors instead of maps.

use serde::Serialize;
use std::fmt;

/// Index of a known class in the [`ClassRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClassId(pub usize);

impl ClassId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Ordered, immutable set of class labels known to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClassRegistry {
    labels: Vec<String>,
}

impl ClassRegistry {
    /// Builds a registry from labels in configuration order.
    ///
    /// Duplicate labels keep their first position.
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for label in labels {
            let label = label.into();
            if !unique.contains(&label) {
                unique.push(label);
            }
        }
        Self { labels: unique }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Looks up a class by its model label.
    pub fn id_of(&self, label: &str) -> Option<ClassId> {
        self.labels.iter().position(|l| l == label).map(ClassId)
    }

    /// Label for a class id, or `"unknown"` for an id from another registry.
    pub fn label(&self, id: ClassId) -> &str {
        self.labels
            .get(id.0)
            .map(String::as_str)
            .unwrap_or("unknown")
    }

    pub fn ids(&self) -> impl Iterator<Item = ClassId> + '_ {
        (0..self.labels.len()).map(ClassId)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Confidence for one class in one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassScore {
    pub class: ClassId,
    /// Probability in [0, 1].
    pub confidence: f32,
}

/// One score per known class, indexed by [`ClassId`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClassScores {
    scores: Vec<ClassScore>,
}

impl ClassScores {
    /// Wraps confidences given in registry order.
    pub fn from_confidences(confidences: Vec<f32>) -> Self {
        Self {
            scores: confidences
                .into_iter()
                .enumerate()
                .map(|(i, confidence)| ClassScore {
                    class: ClassId(i),
                    confidence,
                })
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn get(&self, class: ClassId) -> Option<f32> {
        self.scores.get(class.0).map(|s| s.confidence)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClassScore> {
        self.scores.iter()
    }

    /// Scores sorted by descending confidence.
    pub fn ranked(&self) -> Vec<ClassScore> {
        let mut ranked = self.scores.clone();
        ranked.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        ranked
    }

    /// Strongest class, if it reaches `floor`.
    pub fn top(&self, floor: f32) -> Option<ClassScore> {
        self.ranked()
            .into_iter()
            .next()
            .filter(|s| s.confidence >= floor)
    }
}
