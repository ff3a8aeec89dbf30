//! Record and result types for labelrun.
//!
//! K_i: These types represent the core data flow through the runner.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Input record to classify.
///
/// K_i: The index is 1-based and stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Ordinal index
    pub index: u64,

    /// Free text sent to the service
    pub text: String,

    /// Ground-truth label, if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Record {
    pub fn new(index: u64, text: impl Into<String>, label: Option<String>) -> Self {
        Self {
            index,
            text: text.into(),
            label,
        }
    }
}

/// Unparsed output of one classification call.
#[derive(Debug, Clone)]
pub struct RawClassification {
    /// Raw response text
    pub content: String,
    /// Model that answered
    pub model: String,
    /// Call duration
    pub duration: Duration,
}

impl RawClassification {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: String::new(),
            duration: Duration::ZERO,
        }
    }
}

/// A (category, probability) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryScore {
    pub category: String,
    pub probability: f64,
}

impl CategoryScore {
    pub fn new(category: impl Into<String>, probability: f64) -> Self {
        Self {
            category: category.into(),
            probability,
        }
    }
}

/// Persisted checkpoint row.
///
/// Column names match the checkpoint CSV: `order,text,Condition,Value,Flg`.
/// A `None` condition is the null category written for records whose
/// response could not be interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Record index
    pub order: u64,

    /// Original record text
    pub text: String,

    /// Selected category
    #[serde(rename = "Condition")]
    pub condition: Option<String>,

    /// Probability of the selected category
    #[serde(rename = "Value")]
    pub value: Option<f64>,

    /// Ground-truth label carried through from the record
    #[serde(rename = "Flg")]
    pub flg: Option<String>,
}

impl ClassificationResult {
    /// Build a result from a record and its selected score.
    pub fn from_selection(record: &Record, selected: Option<&CategoryScore>) -> Self {
        Self {
            order: record.index,
            text: record.text.clone(),
            condition: selected.map(|s| s.category.clone()),
            value: selected.map(|s| s.probability),
            flg: record.label.clone(),
        }
    }

    /// Whether this row carries the null category.
    pub fn is_sentinel(&self) -> bool {
        self.condition.is_none()
    }

    /// Whether the selected category matches the ground truth.
    ///
    /// `None` when either side is missing.
    pub fn is_match(&self) -> Option<bool> {
        match (&self.condition, &self.flg) {
            (Some(predicted), Some(truth)) => Some(predicted == truth),
            _ => None,
        }
    }
}
