//! Pipeline stages for document analysis.
//!
//! Each submodule implements one step. The batch core ([`worker`],
//! [`scheduler`], [`format`]) only knows about page units and the
//! [`crate::RemoteTranscriber`] trait; everything that touches PDFs or a real
//! LLM provider sits around it.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ render ──▶ scheduler ──▶ worker ──▶ llm ──▶ format
//! (URL/path) (pdfium)   (pool)       (retry)   (VLM)   (assemble)
//! ```
//!
//! 1. [`input`]: resolve the path or URL to a local PDF or image
//! 2. [`render`]: rasterise selected pages in `spawn_blocking`
//! 3. [`scheduler`]: run units through a bounded pool, report progress,
//!    honour cancellation
//! 4. [`worker`]: one unit, with exponential-backoff retries
//! 5. [`llm`] + [`encode`] + [`postprocess`]: the production transcriber
//! 6. [`format`]: join outcomes in page order, marking failed pages

pub mod encode;
pub mod format;
pub mod input;
pub mod llm;
pub mod postprocess;
pub mod render;
pub mod scheduler;
pub mod worker;
