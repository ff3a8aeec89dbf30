//! labelrun - Resumable, checkpointed text classification via an LLM endpoint.
//!
//! ## Architecture
//!
//! A single sequential runner drives every record through:
//! - **Client**: Sends the record text to an OpenAI-compatible endpoint
//! - **Parser**: Turns the `Label: probability` payload into scores
//! - **Checkpoint**: Persists each batch with an atomic full-file rewrite
//!
//! Each cycle classifies up to `batch_size` unprocessed records, appends
//! them to the checkpoint and reports running accuracy. Restarting after a
//! crash resumes from whatever the checkpoint holds.
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Network/API uncertainties (timeout, retry, dead letters)

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod parser;
pub mod pipeline;

// Re-exports for convenience
pub use checkpoint::{AttemptLedger, CheckpointState, CheckpointStore};
pub use client::{ClassificationService, LlmClassifier, LlmClient, RateLimiter};
pub use models::{ClassificationResult, Config, LabelrunError, Record, Result};
pub use parser::{CategoryScores, CategorySet};
pub use pipeline::{AccuracyReport, BatchRunner, Dataset, RunSummary, RunnerSettings, StopReason};
