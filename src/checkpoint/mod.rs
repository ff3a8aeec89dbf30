//! Checkpoint module for resumable runs.
//!
//! Provides:
//! - `CheckpointState`: Results classified so far
//! - `CheckpointStore`: Load and full-rewrite append of the checkpoint CSV
//! - `AttemptLedger`: Failure counters and dead-letter set

mod attempts;
mod state;
mod store;

pub use attempts::*;
pub use state::*;
pub use store::*;
