//! In-memory view of everything classified so far.
//!
//! Epistemic foundation:
//! - K_i: At most one result per record index
//! - K_i: `size()` is exactly the number of persisted results
//! - K_i: State only grows; rows keep the order they were persisted in

use crate::models::ClassificationResult;
use std::collections::HashSet;
use tracing::warn;

/// Persisted classification results, in checkpoint order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckpointState {
    results: Vec<ClassificationResult>,
    indices: HashSet<u64>,
}

impl CheckpointState {
    /// Empty state, used on first run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a state from rows, keeping the first row for each index.
    pub fn from_results(rows: impl IntoIterator<Item = ClassificationResult>) -> Self {
        let mut state = Self::new();
        for row in rows {
            let order = row.order;
            if !state.push(row) {
                warn!(order = order, "Duplicate checkpoint row ignored");
            }
        }
        state
    }

    /// Add a row; returns false if the index is already present.
    pub(crate) fn push(&mut self, row: ClassificationResult) -> bool {
        if !self.indices.insert(row.order) {
            return false;
        }
        self.results.push(row);
        true
    }

    /// Number of persisted results.
    pub fn size(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Whether a record index already has a result.
    pub fn contains(&self, index: u64) -> bool {
        self.indices.contains(&index)
    }

    /// All results, in the order they were appended.
    pub fn results(&self) -> &[ClassificationResult] {
        &self.results
    }

    /// Look up the result for a record index.
    pub fn get(&self, index: u64) -> Option<&ClassificationResult> {
        if !self.contains(index) {
            return None;
        }
        self.results.iter().find(|r| r.order == index)
    }

}
