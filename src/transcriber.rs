//! The remote transcription seam.
//!
//! [`RemoteTranscriber`] is the only thing the batch core needs from the
//! outside world: hand it one page image and a prompt pair, get text back.
//! [`crate::pipeline::llm::LlmTranscriber`] implements it over an
//! `edgequake-llm` provider; tests implement it with scripted fakes.

use crate::error::TranscribeError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The system/user prompt pair sent with every page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompts {
    /// Instructions describing the assistant's job.
    #[serde(default)]
    pub system_prompt: String,
    /// The per-page request that accompanies the image.
    #[serde(default)]
    pub user_prompt: String,
}

impl Prompts {
    pub fn new(system_prompt: impl Into<String>, user_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_prompt: user_prompt.into(),
        }
    }
}

/// A vision-capable completion service.
///
/// One instance is shared by every worker of a batch and called
/// concurrently, hence `Send + Sync`. Implementations that wrap a transport
/// which is not safe to share must serialise or pool connections themselves.
#[async_trait]
pub trait RemoteTranscriber: Send + Sync {
    /// Transcribe one page image.
    ///
    /// Returns the response text, or an error describing why this call
    /// failed. The batch retries failed calls; implementations should not
    /// retry internally.
    async fn transcribe(
        &self,
        image: &[u8],
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TranscribeError>;
}
