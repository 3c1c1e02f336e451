//! Document-level entry points.
//!
//! These wrap the batch core with everything needed to go from a path or URL
//! to one formatted document: input resolution, rasterisation (or a single
//! image page), provider resolution, the batch run and formatting.
//!
//! Use [`process_units`] directly when the pages are already images and the
//! transcriber is your own.

use crate::config::{BatchConfig, DocumentConfig, OutputShape};
use crate::error::PdfAssistError;
use crate::output::{BatchStats, DocumentOutput};
use crate::page::{PageSource, PageUnit};
use crate::pipeline::format::ResultFormatter;
use crate::pipeline::input::{self, InputKind};
use crate::pipeline::llm::LlmTranscriber;
use crate::pipeline::render;
use crate::pipeline::scheduler::BatchScheduler;
use crate::progress::{NoopProgressSink, SharedProgressSink};
use crate::transcriber::{Prompts, RemoteTranscriber};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Analyse a PDF or image (local path or URL) with the given prompts.
///
/// # Returns
/// `Ok(DocumentOutput)` once every selected page has an outcome, even if
/// some pages failed (check `output.stats.failed_pages`).
///
/// # Errors
/// Only for problems that prevent the batch from starting: missing or
/// unsupported input, corrupt or encrypted PDF, pdfium not available,
/// provider not configured.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf_assist::{process_document, DocumentConfig, Prompts};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let prompts = Prompts::new(
///         "You are an accountant reviewing invoices.",
///         "Extract every line item on this page as a table.",
///     );
///     let output = process_document("invoices.pdf", &prompts, &DocumentConfig::default()).await?;
///     println!("{}", output.text);
///     Ok(())
/// }
/// ```
pub async fn process_document(
    input_str: impl AsRef<str>,
    prompts: &Prompts,
    config: &DocumentConfig,
) -> Result<DocumentOutput, PdfAssistError> {
    process_document_with(
        input_str,
        prompts,
        config,
        Arc::new(NoopProgressSink),
        CancellationToken::new(),
    )
    .await
}

/// [`process_document`] with a progress sink and a cancellation token.
pub async fn process_document_with(
    input_str: impl AsRef<str>,
    prompts: &Prompts,
    config: &DocumentConfig,
    sink: SharedProgressSink,
    cancel: CancellationToken,
) -> Result<DocumentOutput, PdfAssistError> {
    let input_str = input_str.as_ref();
    info!("Starting analysis: {}", input_str);

    let units = load_units(input_str, config).await?;
    let transcriber: Arc<dyn RemoteTranscriber> = Arc::new(LlmTranscriber::from_config(config)?);

    let scheduler = BatchScheduler::new(transcriber, config.batch.clone())
        .with_progress(sink)
        .with_cancellation(cancel);
    Ok(run_and_format(&scheduler, &units, prompts).await)
}

/// Turn the input into page units without calling any model.
///
/// A PDF yields one PNG unit per selected page; an image yields a single
/// unit with index 0.
pub async fn load_units(
    input_str: &str,
    config: &DocumentConfig,
) -> Result<Vec<PageUnit>, PdfAssistError> {
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    match resolved.kind() {
        InputKind::Pdf => render::render_pages(resolved.path(), config).await,
        InputKind::Image => {
            if config.pages.to_indices(1).is_empty() {
                return Err(PdfAssistError::NoPagesSelected { total: 1 });
            }
            // Read now: a downloaded image lives in a temp dir dropped on return.
            let bytes = PageSource::File(resolved.path().to_path_buf())
                .load()
                .await
                .map_err(|_| PdfAssistError::FileNotFound {
                    path: resolved.path().to_path_buf(),
                })?;
            Ok(vec![PageUnit::new(0, PageSource::Bytes(bytes))])
        }
    }
}

/// Run already-prepared units through the batch core and format the result.
pub async fn process_units(
    units: &[PageUnit],
    prompts: &Prompts,
    transcriber: Arc<dyn RemoteTranscriber>,
    config: &BatchConfig,
) -> DocumentOutput {
    let scheduler = BatchScheduler::new(transcriber, config.clone());
    run_and_format(&scheduler, units, prompts).await
}

async fn run_and_format(
    scheduler: &BatchScheduler,
    units: &[PageUnit],
    prompts: &Prompts,
) -> DocumentOutput {
    let start = Instant::now();
    let result = scheduler.run(units, prompts).await;
    let stats = result.stats(start.elapsed().as_millis() as u64);
    let text = ResultFormatter::new(scheduler.config().output_shape).format(&result);
    DocumentOutput {
        text,
        result,
        stats,
    }
}

/// Analyse a document and write the formatted text to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn process_to_file(
    input_str: impl AsRef<str>,
    output_path: impl AsRef<Path>,
    prompts: &Prompts,
    config: &DocumentConfig,
) -> Result<BatchStats, PdfAssistError> {
    let output = process_document(input_str, prompts, config).await?;
    write_output(output_path.as_ref(), &output.text).await?;
    Ok(output.stats)
}

/// Write `text` to `path` atomically, creating parent directories.
pub async fn write_output(path: &Path, text: &str) -> Result<(), PdfAssistError> {
    let write_failed = |source| PdfAssistError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(write_failed)?;
    }

    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    tokio::fs::write(&tmp_path, text)
        .await
        .map_err(write_failed)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_failed)
}

/// Synchronous wrapper around [`process_document`].
///
/// Creates a temporary tokio runtime internally.
pub fn process_sync(
    input_str: impl AsRef<str>,
    prompts: &Prompts,
    config: &DocumentConfig,
) -> Result<DocumentOutput, PdfAssistError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| PdfAssistError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(process_document(input_str, prompts, config))
}

/// Analyse an in-memory PDF or image.
///
/// The bytes are written to a managed [`tempfile`] that is removed on return.
pub async fn process_bytes(
    bytes: &[u8],
    prompts: &Prompts,
    config: &DocumentConfig,
) -> Result<DocumentOutput, PdfAssistError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| PdfAssistError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| PdfAssistError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    process_document(&path, prompts, config).await
}

/// Default output location: `<stem>_analysis.<ext>` next to a local input,
/// or in the working directory for a URL.
pub fn default_output_path(input_str: &str, shape: OutputShape) -> PathBuf {
    let (dir, stem) = if input::is_url(input_str) {
        let name = input_str
            .split(['?', '#'])
            .next()
            .and_then(|s| s.rsplit('/').next())
            .unwrap_or_default();
        (PathBuf::new(), stem_of(Path::new(name)))
    } else {
        let path = Path::new(input_str);
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        (dir, stem_of(path))
    };
    dir.join(format!("{stem}_analysis.{}", shape.extension()))
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}
