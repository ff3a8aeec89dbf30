//! Durable checkpoint file.
//!
//! Epistemic foundation:
//! - K_i: Checkpoint file may not exist → empty state (first run)
//! - K_i: Every append reads the full file and rewrites it in full, prior
//!   rows first and unchanged, the new batch after them
//! - K_i: The rewrite goes to a temp file and is renamed into place, so a
//!   reader never sees a half-written batch
//! - I^B: Crash during write → previous generation kept in `.bak`

use super::CheckpointState;
use crate::models::{ClassificationResult, LabelrunError, Result};
use std::ffi::OsString;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// CSV-backed checkpoint with columns `order,text,Condition,Value,Flg`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    temp_path: PathBuf,
    backup_path: PathBuf,
}

/// `results.csv` → `results.csv<suffix>`
pub(crate) fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

impl CheckpointStore {
    /// Create a store for the given checkpoint path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            temp_path: sibling_path(&path, ".tmp"),
            backup_path: sibling_path(&path, ".bak"),
            path,
        }
    }

    /// Checkpoint file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read every persisted result, in file order.
    ///
    /// A missing file is an empty state, not an error.
    pub fn load(&self) -> Result<CheckpointState> {
        if !self.exists() {
            debug!(path = %self.path.display(), "No checkpoint yet, starting empty");
            return Ok(CheckpointState::new());
        }

        let mut reader = csv::Reader::from_path(&self.path).map_err(|e| self.csv_error("opening checkpoint", e))?;
        let mut rows = Vec::new();
        for row in reader.deserialize::<ClassificationResult>() {
            rows.push(row.map_err(|e| self.csv_error("reading checkpoint", e))?);
        }

        let state = CheckpointState::from_results(rows);
        debug!(path = %self.path.display(), rows = state.size(), "Checkpoint loaded");
        Ok(state)
    }

    /// Extend the checkpoint with a batch and return the refreshed state.
    ///
    /// The batch is written after the existing rows, so a late retry of a
    /// low index lands at the end. Rows for indices already present are
    /// skipped. An empty batch leaves
    /// the file untouched.
    pub fn append(&self, batch: Vec<ClassificationResult>) -> Result<CheckpointState> {
        let mut state = self.load()?;
        if batch.is_empty() {
            return Ok(state);
        }

        let prior = state.size();
        for row in batch {
            let order = row.order;
            if !state.push(row) {
                warn!(order = order, "Record already checkpointed, skipping duplicate result");
            }
        }
        self.write_all(&state)?;
        info!(
            path = %self.path.display(),
            appended = state.size() - prior,
            total = state.size(),
            "Checkpoint saved"
        );
        Ok(state)
    }

    /// Write the full state through a temp file and rename it into place.
    fn write_all(&self, state: &CheckpointState) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| LabelrunError::checkpoint_io("creating checkpoint dir", parent, e))?;
        }

        let file = File::create(&self.temp_path)
            .map_err(|e| LabelrunError::checkpoint_io("creating temp checkpoint", &self.temp_path, e))?;
        let mut writer = csv::Writer::from_writer(file);
        for row in state.results() {
            writer
                .serialize(row)
                .map_err(|e| self.csv_error("writing temp checkpoint", e))?;
        }
        let file = writer.into_inner().map_err(|e| {
            LabelrunError::checkpoint_io("flushing temp checkpoint", &self.temp_path, e.into_error())
        })?;
        file.sync_all()
            .map_err(|e| LabelrunError::checkpoint_io("syncing temp checkpoint", &self.temp_path, e))?;

        if self.exists() {
            fs::copy(&self.path, &self.backup_path)
                .map_err(|e| LabelrunError::checkpoint_io("backing up checkpoint", &self.backup_path, e))?;
        }

        fs::rename(&self.temp_path, &self.path)
            .map_err(|e| LabelrunError::checkpoint_io("renaming checkpoint", &self.path, e))?;

        Ok(())
    }

    fn csv_error(&self, context: &str, err: csv::Error) -> LabelrunError {
        if err.is_io_error() {
            match err.into_kind() {
                csv::ErrorKind::Io(source) => LabelrunError::checkpoint_io(context, &self.path, source),
                other => LabelrunError::CheckpointFormat {
                    path: self.path.clone(),
                    message: format!("{context}: {other:?}"),
                },
            }
        } else {
            LabelrunError::CheckpointFormat {
                path: self.path.clone(),
                message: format!("{context}: {err}"),
            }
        }
    }
}
