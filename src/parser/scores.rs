//! Parsing of `Label: probability` blocks returned by the service.
//!
//! Epistemic foundation:
//! - B_i: Each line is a `label: value` pair (might not be)
//! - K_i: A bad line is dropped, the rest of the payload is kept
//! - K_i: Zero usable lines is a ParseFailure, never an empty success

use super::CategorySet;
use crate::models::{CategoryScore, ParseFailure};
use tracing::debug;

/// Category scores for one record, in parse order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategoryScores {
    scores: Vec<CategoryScore>,
}

impl CategoryScores {
    /// Parse a raw payload against a category set.
    ///
    /// Each non-empty line is split once on the first `": "`; the right side
    /// must parse as a finite `f64`. Lines failing either step are dropped.
    /// A well-formed line naming a label outside a closed set fails the whole
    /// payload.
    pub fn parse(payload: &str, categories: &CategorySet) -> Result<Self, ParseFailure> {
        let mut scores = Self::default();

        for (line_no, line) in payload.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some((label, value)) = line.split_once(": ") else {
                debug!(line = line_no + 1, content = %line, "Dropping line without separator");
                continue;
            };

            let probability = match value.trim().parse::<f64>() {
                Ok(p) if p.is_finite() => p,
                _ => {
                    debug!(line = line_no + 1, content = %line, "Dropping line with non-numeric value");
                    continue;
                }
            };

            let category = categories
                .canonicalize(label)
                .ok_or_else(|| ParseFailure::UnknownCategory(label.trim().to_string()))?;

            scores.insert(category, probability);
        }

        if scores.is_empty() {
            return Err(ParseFailure::Empty);
        }

        let total = scores.total();
        if (total - 1.0).abs() > 0.05 {
            debug!(total = total, "Probabilities do not sum to 1.0");
        }

        Ok(scores)
    }

    /// Insert a score; a repeated label keeps its first position.
    fn insert(&mut self, category: String, probability: f64) {
        match self.scores.iter_mut().find(|s| s.category == category) {
            Some(existing) => existing.probability = probability,
            None => self.scores.push(CategoryScore::new(category, probability)),
        }
    }

    /// Highest-probability entry; ties go to the first in parse order.
    pub fn select(&self) -> Option<&CategoryScore> {
        self.scores.iter().fold(None, |best, candidate| match best {
            Some(b) if b.probability >= candidate.probability => Some(b),
            _ => Some(candidate),
        })
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Sum of all probabilities.
    pub fn total(&self) -> f64 {
        self.scores.iter().map(|s| s.probability).sum()
    }
}
