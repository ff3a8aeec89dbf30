//! Running accuracy over the checkpoint.
//!
//! A monitoring signal only: reported after every persisted batch, never
//! consulted by the runner's control flow.

use crate::checkpoint::CheckpointState;
use serde::Serialize;
use std::fmt;

/// Agreement between selected categories and ground truth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AccuracyReport {
    /// Rows in the checkpoint
    pub total: usize,
    /// Rows with both a label and a selected category
    pub compared: usize,
    /// Compared rows whose category equals the label
    pub matched: usize,
    /// Rows without ground truth
    pub unlabeled: usize,
    /// Labeled rows stored with the null category
    pub unclassified: usize,
}

impl AccuracyReport {
    /// Compute the report over the full checkpoint.
    pub fn from_state(state: &CheckpointState) -> Self {
        let mut report = Self {
            total: state.size(),
            ..Self::default()
        };

        for row in state.results() {
            // No ground truth wins over a sentinel category
            if row.flg.is_none() {
                report.unlabeled += 1;
            } else if row.is_sentinel() {
                report.unclassified += 1;
            } else {
                report.compared += 1;
                if row.is_match() == Some(true) {
                    report.matched += 1;
                }
            }
        }

        report
    }

    /// Matched / compared, `None` when nothing could be compared.
    pub fn proportion(&self) -> Option<f64> {
        (self.compared > 0).then(|| self.matched as f64 / self.compared as f64)
    }
}

impl fmt::Display for AccuracyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.proportion() {
            Some(p) => write!(
                f,
                "{:.4} ({}/{} compared, {} unlabeled, {} unclassified)",
                p, self.matched, self.compared, self.unlabeled, self.unclassified
            ),
            None => write!(
                f,
                "n/a (0 compared, {} unlabeled, {} unclassified)",
                self.unlabeled, self.unclassified
            ),
        }
    }
}
