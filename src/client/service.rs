//! The classification capability the batch runner depends on.
//!
//! K_i: The runner only ever asks "given a text, return raw text or fail".
//! B_i: Any failure below this seam is a per-record ServiceError.

use crate::client::LlmClient;
use crate::models::{RawClassification, ServiceError};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Something that can classify one record's text.
#[async_trait]
pub trait ClassificationService: Send + Sync {
    /// Return the raw structured answer for `text`.
    async fn classify(&self, text: &str) -> Result<RawClassification, ServiceError>;
}

/// Production service: system prompt + record text through an LLM endpoint.
pub struct LlmClassifier {
    client: Arc<LlmClient>,
    system_prompt: String,
}

impl LlmClassifier {
    pub fn new(client: Arc<LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            client,
            system_prompt: system_prompt.into(),
        }
    }
}

#[async_trait]
impl ClassificationService for LlmClassifier {
    async fn classify(&self, text: &str) -> Result<RawClassification, ServiceError> {
        let response = self
            .client
            .complete_with_system(&self.system_prompt, text)
            .await?;

        debug!(
            model = %response.model,
            tokens_in = response.input_tokens,
            tokens_out = response.output_tokens,
            duration_ms = response.duration.as_millis() as u64,
            "Classification received"
        );

        Ok(RawClassification {
            content: response.content,
            model: response.model,
            duration: response.duration,
        })
    }
}
