//! # edgequake-pdf-assist
//!
//! Run a vision language model over every page of a PDF (or a single image)
//! with an "assistant" prompt pair, and get one document back.
//!
//! ## Why this crate?
//!
//! Asking a VLM about a 40-page document means 40 independent requests, some
//! of which will hit rate limits or time out. This crate fans the pages out
//! to a bounded pool, retries each failed page with exponential backoff,
//! reports progress as pages complete, and reassembles the answers in page
//! order. A page that keeps failing is marked in the output instead of
//! sinking the whole document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Render     rasterise pages via pdfium (CPU-bound, spawn_blocking)
//!  ├─ 3. Schedule   ≤ concurrency pages in flight, progress events
//!  ├─ 4. Retry      per page: up to max_retries, waits of 2, 4, 8 … s
//!  ├─ 5. VLM        gpt-4o / claude / gemini / ollama via edgequake-llm
//!  └─ 6. Format     pages joined in order, failures marked
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_pdf_assist::{process_document, DocumentConfig, Prompts};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let prompts = Prompts::new("You are a meticulous editor.", "List the typos on this page.");
//!     let output = process_document("draft.pdf", &prompts, &DocumentConfig::default()).await?;
//!     println!("{}", output.text);
//!     eprintln!("{}/{} pages ok", output.stats.succeeded_pages, output.stats.total_pages);
//!     Ok(())
//! }
//! ```
//!
//! ## Bring your own transcriber
//!
//! The batch core only needs a [`RemoteTranscriber`]. Pages that are already
//! images can skip pdfium entirely:
//!
//! ```rust,no_run
//! use edgequake_pdf_assist::{
//!     BatchConfig, BatchScheduler, OutputShape, PageUnit, ProgressEvent, Prompts,
//!     RemoteTranscriber, ResultFormatter,
//! };
//! use std::sync::Arc;
//!
//! # async fn run(transcriber: Arc<dyn RemoteTranscriber>, pngs: Vec<Vec<u8>>) {
//! let config = BatchConfig::builder().concurrency(5).build().unwrap();
//! let scheduler = BatchScheduler::new(transcriber, config)
//!     .with_progress(Arc::new(|event: ProgressEvent| eprintln!("{}", event.message)));
//!
//! let result = scheduler.run(&PageUnit::from_sources(pngs), &Prompts::default()).await;
//! let text = ResultFormatter::new(OutputShape::PlainText).format(&result);
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf-assist` binary (clap + indicatif + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-pdf-assist = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assistant;
pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod page;
pub mod pipeline;
pub mod progress;
pub mod transcriber;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use assistant::Assistant;
pub use config::{
    BatchConfig, BatchConfigBuilder, DocumentConfig, DocumentConfigBuilder, OutputShape,
    PageSelection,
};
pub use convert::{
    default_output_path, load_units, process_bytes, process_document, process_document_with,
    process_sync, process_to_file, process_units,
};
pub use error::{AttemptError, PdfAssistError, TranscribeError};
pub use output::{BatchResult, BatchStats, DocumentOutput, Outcome};
pub use page::{PageSource, PageUnit};
pub use pipeline::format::ResultFormatter;
pub use pipeline::llm::LlmTranscriber;
pub use pipeline::scheduler::{BatchHandle, BatchScheduler, ProgressStream};
pub use pipeline::worker::RetryingWorker;
pub use progress::{
    NoopProgressSink, Progress, ProgressEvent, ProgressSink, SharedProgressSink,
};
pub use transcriber::{Prompts, RemoteTranscriber};
pub use tokio_util::sync::CancellationToken;
