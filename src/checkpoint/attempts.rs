//! Per-record failure accounting and dead-letter set.
//!
//! Epistemic foundation:
//! - K_i: A failed record leaves no checkpoint row, so it is offered again
//! - B_i: Some records fail every time (content rejected by the service)
//! - K_i: After `max_attempts` failures a record is dead-lettered and no
//!   longer offered; without a limit it is retried forever
//! - I^B: Ledger written with the same temp-then-rename pattern

use super::CheckpointState;
use super::store::sibling_path;
use crate::models::{LabelrunError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Failure history for one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Failed attempts so far
    pub attempts: u32,
    /// Last failure message
    pub last_error: String,
    /// Time of the last failure
    pub last_attempt_at: DateTime<Utc>,
    /// No longer offered to the service
    #[serde(default)]
    pub dead_lettered: bool,
}

/// Failure counters keyed by record index.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttemptLedger {
    #[serde(default)]
    records: BTreeMap<u64, AttemptRecord>,

    #[serde(skip)]
    path: Option<PathBuf>,
}

impl AttemptLedger {
    /// Ledger path that sits next to a checkpoint file.
    pub fn path_for(checkpoint_path: &Path) -> PathBuf {
        sibling_path(checkpoint_path, ".attempts.json")
    }

    /// Load the ledger from disk, or start empty.
    pub fn load(path: &Path) -> Result<Self> {
        let mut ledger = if path.exists() {
            let file = File::open(path)
                .map_err(|e| LabelrunError::checkpoint_io("opening attempt ledger", path, e))?;
            serde_json::from_reader::<_, Self>(BufReader::new(file)).map_err(|e| {
                LabelrunError::CheckpointFormat {
                    path: path.to_path_buf(),
                    message: format!("invalid attempt ledger: {e}"),
                }
            })?
        } else {
            Self::default()
        };
        ledger.path = Some(path.to_path_buf());
        Ok(ledger)
    }

    /// Persist the ledger (atomic write). No-op for a ledger not loaded from disk.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| LabelrunError::checkpoint_io("creating ledger dir", parent, e))?;
        }

        let temp_path = sibling_path(path, ".tmp");
        let file = File::create(&temp_path)
            .map_err(|e| LabelrunError::checkpoint_io("creating temp ledger", &temp_path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)
            .map_err(|e| LabelrunError::Internal(format!("Serializing attempt ledger: {e}")))?;
        writer
            .flush()
            .map_err(|e| LabelrunError::checkpoint_io("flushing temp ledger", &temp_path, e))?;

        fs::rename(&temp_path, path)
            .map_err(|e| LabelrunError::checkpoint_io("renaming attempt ledger", path, e))?;

        debug!(path = %path.display(), tracked = self.records.len(), "Attempt ledger saved");
        Ok(())
    }

    /// Record a failed attempt. Returns true if the record is now dead-lettered.
    pub fn record_failure(&mut self, index: u64, error: &str, limit: Option<u32>) -> bool {
        let entry = self.records.entry(index).or_insert_with(|| AttemptRecord {
            attempts: 0,
            last_error: String::new(),
            last_attempt_at: Utc::now(),
            dead_lettered: false,
        });
        entry.attempts += 1;
        entry.last_error = error.to_string();
        entry.last_attempt_at = Utc::now();

        if let Some(limit) = limit {
            if !entry.dead_lettered && entry.attempts >= limit {
                entry.dead_lettered = true;
                warn!(
                    index = index,
                    attempts = entry.attempts,
                    error = %error,
                    "Record dead-lettered after repeated failures"
                );
            }
        }
        entry.dead_lettered
    }

    /// Forget failures of records that now have a checkpoint row.
    ///
    /// Returns the number of entries dropped.
    pub fn prune(&mut self, checkpoint: &CheckpointState) -> usize {
        let before = self.records.len();
        self.records.retain(|index, _| !checkpoint.contains(*index));
        before - self.records.len()
    }

    /// Whether the record should no longer be offered.
    pub fn is_dead_lettered(&self, index: u64) -> bool {
        self.records.get(&index).is_some_and(|r| r.dead_lettered)
    }

    /// Failed attempts recorded for an index.
    pub fn attempts(&self, index: u64) -> u32 {
        self.records.get(&index).map_or(0, |r| r.attempts)
    }

    /// Dead-lettered indices, ascending.
    pub fn dead_letters(&self) -> impl Iterator<Item = (u64, &AttemptRecord)> {
        self.records
            .iter()
            .filter(|(_, r)| r.dead_lettered)
            .map(|(&i, r)| (i, r))
    }

    /// Number of dead-lettered records.
    pub fn dead_letter_count(&self) -> usize {
        self.records.values().filter(|r| r.dead_lettered).count()
    }

    /// Re-open dead-lettered records so the next run offers them again.
    pub fn release_dead_letters(&mut self) -> usize {
        let mut released = 0;
        for record in self.records.values_mut().filter(|r| r.dead_lettered) {
            record.dead_lettered = false;
            record.attempts = 0;
            released += 1;
        }
        released
    }
}
