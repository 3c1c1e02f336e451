//! VLM interaction: a [`RemoteTranscriber`] backed by an `edgequake-llm` provider.
//!
//! This module turns one page image and a prompt pair into a single chat
//! completion. It is intentionally thin: retries, backoff and timeouts live
//! in [`crate::pipeline::worker`], so a call here is made exactly once and
//! any provider error is handed back as a [`TranscribeError`].
//!
//! ## Message Layout
//!
//! 1. **System message**: the assistant's system prompt (omitted when empty)
//! 2. **User message**: the page image (base64, `detail: high`) plus the
//!    user prompt as text
//!
//! The provider is created once per document and shared by every worker;
//! `edgequake-llm` providers are `Send + Sync` and pool their own HTTP
//! connections.

use crate::config::DocumentConfig;
use crate::error::{PdfAssistError, TranscribeError};
use crate::pipeline::{encode, postprocess};
use crate::transcriber::RemoteTranscriber;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Model used when the caller names a provider but no model.
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// [`RemoteTranscriber`] implementation over any vision-capable LLM provider.
pub struct LlmTranscriber {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    repair_formula_tags: bool,
}

impl LlmTranscriber {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &DocumentConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            repair_formula_tags: config.repair_formula_tags,
        }
    }

    /// Resolve the provider described by `config` and wrap it.
    pub fn from_config(config: &DocumentConfig) -> Result<Self, PdfAssistError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }
}

#[async_trait]
impl RemoteTranscriber for LlmTranscriber {
    async fn transcribe(
        &self,
        image: &[u8],
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TranscribeError> {
        let image_data = encode::encode_image(image).ok_or_else(|| {
            TranscribeError::InvalidRequest("page is not a PNG, JPEG, GIF or WebP image".into())
        })?;

        let mut messages = Vec::with_capacity(2);
        if !system_prompt.is_empty() {
            messages.push(ChatMessage::system(system_prompt));
        }
        messages.push(ChatMessage::user_with_images(user_prompt, vec![image_data]));

        let start = Instant::now();
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| TranscribeError::Api(e.to_string()))?;

        debug!(
            "{} input tokens, {} output tokens, {:?}",
            response.prompt_tokens,
            response.completion_tokens,
            start.elapsed()
        );

        Ok(postprocess::clean_response(
            &response.content,
            self.repair_formula_tags,
        ))
    }
}

/// Build `CompletionOptions` from the document config.
fn build_options(config: &DocumentConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: config.max_tokens,
        ..Default::default()
    }
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`): used as-is.
/// 2. **Named provider** (`config.provider_name`): created through
///    [`ProviderFactory::create_llm_provider`] with `config.model` (or
///    [`DEFAULT_MODEL`]); the factory reads the matching API key from the
///    environment.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`).
/// 4. **OpenAI key present**: OpenAI with `config.model` or [`DEFAULT_MODEL`].
/// 5. **Full auto-detection** ([`ProviderFactory::from_env`]).
pub fn resolve_provider(config: &DocumentConfig) -> Result<Arc<dyn LLMProvider>, PdfAssistError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_vision_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| PdfAssistError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or pass --provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_vision_provider(
    provider_name: &str,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, PdfAssistError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        PdfAssistError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}
