//! Configuration types for batch and document processing.
//!
//! [`BatchConfig`] controls the concurrent batch core (pool size, retries,
//! output shape). [`DocumentConfig`] wraps it with everything needed to go
//! from a PDF to page units and from page units to LLM calls. Both are built
//! through builders that validate on `build()`; nothing is persisted, every
//! run receives its configuration explicitly.

use crate::error::PdfAssistError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ── Batch configuration ──────────────────────────────────────────────────

/// Configuration of one batch run.
///
/// # Example
/// ```rust
/// use edgequake_pdf_assist::{BatchConfig, OutputShape};
///
/// let config = BatchConfig::builder()
///     .concurrency(4)
///     .max_retries(2)
///     .output_shape(OutputShape::PlainText)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of pages in flight at once. Default: 3.
    ///
    /// Each in-flight page holds one open request against the completion
    /// service. Lower this when the provider answers with rate-limit errors.
    pub concurrency: usize,

    /// Retries per page after the first failed call. Default: 3.
    ///
    /// A page whose calls always fail is attempted `max_retries + 1` times.
    pub max_retries: u32,

    /// Shape of the formatted output. Default: [`OutputShape::RichText`].
    pub output_shape: OutputShape,

    /// Backoff unit. Default: 1 s.
    ///
    /// The wait before retry `n` (1-based) is `retry_backoff * 2^n`, so the
    /// default sequence is 2 s, 4 s, 8 s, …
    pub retry_backoff: Duration,

    /// Optional wall-clock limit for a single transcription call. Default: none.
    ///
    /// When set, a call that exceeds it counts as a failed attempt and goes
    /// through the normal retry path.
    pub attempt_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_retries: 3,
            output_shape: OutputShape::default(),
            retry_backoff: Duration::from_secs(1),
            attempt_timeout: None,
        }
    }
}

impl BatchConfig {
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff_for(&self, retry: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(retry))
    }
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn output_shape(mut self, shape: OutputShape) -> Self {
        self.config.output_shape = shape;
        self
    }

    pub fn retry_backoff(mut self, unit: Duration) -> Self {
        self.config.retry_backoff = unit;
        self
    }

    pub fn attempt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.attempt_timeout = timeout;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, PdfAssistError> {
        let c = &self.config;
        if c.concurrency == 0 {
            return Err(PdfAssistError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.attempt_timeout == Some(Duration::ZERO) {
            return Err(PdfAssistError::InvalidConfig(
                "Attempt timeout must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Document configuration ───────────────────────────────────────────────

/// Configuration for processing a whole document end to end.
#[derive(Clone)]
pub struct DocumentConfig {
    /// Batch settings used once the pages are rendered.
    pub batch: BatchConfig,

    /// Rendering DPI used when rasterising each PDF page. Range: 72–600. Default: 300.
    pub dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 4000.
    ///
    /// Caps oversized pages (posters, plans) independently of DPI.
    pub max_rendered_pixels: u32,

    /// Page selection. Default: all pages.
    pub pages: PageSelection,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// LLM model identifier, e.g. "gpt-4o". If None, uses "gpt-4o".
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.7.
    pub temperature: f32,

    /// Maximum tokens the LLM may generate per page. Default: provider default.
    pub max_tokens: Option<usize>,

    /// Rewrite `\(…\)` / `\[…\]` math delimiters to `$…$` / `$$…$$`. Default: true.
    pub repair_formula_tags: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            dpi: 300,
            max_rendered_pixels: 4000,
            pages: PageSelection::default(),
            password: None,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.7,
            max_tokens: None,
            repair_formula_tags: true,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for DocumentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentConfig")
            .field("batch", &self.batch)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("pages", &self.pages)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("repair_formula_tags", &self.repair_formula_tags)
            .finish()
    }
}

impl DocumentConfig {
    pub fn builder() -> DocumentConfigBuilder {
        DocumentConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`DocumentConfig`].
#[derive(Debug)]
pub struct DocumentConfigBuilder {
    config: DocumentConfig,
}

impl DocumentConfigBuilder {
    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.config.batch = batch;
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: Option<usize>) -> Self {
        self.config.max_tokens = n.filter(|&n| n > 0);
        self
    }

    pub fn repair_formula_tags(mut self, v: bool) -> Self {
        self.config.repair_formula_tags = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DocumentConfig, PdfAssistError> {
        let c = &self.config;
        if c.dpi < 72 || c.dpi > 600 {
            return Err(PdfAssistError::InvalidConfig(format!(
                "DPI must be 72–600, got {}",
                c.dpi
            )));
        }
        if c.batch.concurrency == 0 {
            return Err(PdfAssistError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the assembled document is rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputShape {
    /// Markdown; failed pages become block quotes. (default)
    #[default]
    RichText,
    /// Plain text; failed pages become bannered blocks.
    PlainText,
}

impl OutputShape {
    /// File extension conventionally used for this shape.
    pub fn extension(self) -> &'static str {
        match self {
            OutputShape::RichText => "md",
            OutputShape::PlainText => "txt",
        }
    }
}

/// Specifies which pages of the PDF to process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// Process a single page (1-indexed).
    Single(usize),
    /// Process a contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Process specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}
