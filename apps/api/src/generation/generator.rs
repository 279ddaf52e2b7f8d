//! Content generation port and its LLM-backed implementation.

use async_trait::async_trait;
use tracing::debug;

use crate::errors::ExternalError;
use crate::generation::cover_letter::CoverLetterRequest;
use crate::generation::prompts::COVER_LETTER_SYSTEM;
use crate::llm_client::{LlmClient, LlmError};

/// Rough upper bound on tokens per character for the letter languages we see.
const TOKENS_PER_CHAR_NUM: usize = 2;
const MIN_MAX_TOKENS: u32 = 256;

/// Produces cover-letter text for one vacancy. Output is raw; callers pass it
/// through `finalize_letter` before submitting.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &CoverLetterRequest) -> Result<String, ExternalError>;
}

#[async_trait]
impl ContentGenerator for LlmClient {
    async fn generate(&self, request: &CoverLetterRequest) -> Result<String, ExternalError> {
        let max_tokens = max_tokens_for(request.max_length);
        debug!(
            vacancy = %request.vacancy_title,
            max_tokens,
            "Generating cover letter"
        );
        self.call_text(&request.to_prompt(), COVER_LETTER_SYSTEM, max_tokens)
            .await
            .map_err(ExternalError::from)
    }
}

fn max_tokens_for(max_length: usize) -> u32 {
    let budget = max_length.saturating_mul(TOKENS_PER_CHAR_NUM);
    u32::try_from(budget).unwrap_or(u32::MAX).max(MIN_MAX_TOKENS)
}

impl From<LlmError> for ExternalError {
    fn from(e: LlmError) -> Self {
        if e.is_retryable() {
            ExternalError::Transient {
                retry_after: e.retry_after(),
                message: e.to_string(),
            }
        } else {
            ExternalError::Rejected(e.to_string())
        }
    }
}
