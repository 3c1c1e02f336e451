//! CLI binary for edgequake-pdf-assist.
//!
//! A thin shim over the library crate: maps flags to `DocumentConfig`,
//! resolves the prompt pair (flags or an assistant profile), runs the batch
//! on a background task and renders its progress stream.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdf_assist::{
    convert::write_output, default_output_path, process_document_with, Assistant, BatchConfig,
    CancellationToken, DocumentConfig, DocumentOutput, OutputShape, PageSelection, Progress,
    ProgressEvent, Prompts,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const SPINNER_TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Progress rendering ───────────────────────────────────────────────────────

/// Renders batch progress events on a single indicatif bar.
///
/// Starts as a spinner while the document is resolved and rendered, and
/// switches to a percentage bar on the first completion event.
struct ProgressView {
    bar: ProgressBar,
    started: bool,
}

impl ProgressView {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(SPINNER_TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Opening document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Self { bar, started: false }
    }

    fn activate_bar(&mut self) {
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}%  \
                 ⏱ {elapsed_precise}  {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(SPINNER_TICKS),
        );
        self.bar.set_prefix("Analysing");
        self.bar.reset_eta();
        self.started = true;
    }

    fn show(&mut self, event: ProgressEvent) {
        match event.percent {
            Progress::Percent(p) => {
                if !self.started {
                    self.activate_bar();
                }
                self.bar.set_position(p as u64);
                self.bar.set_message(event.message);
            }
            Progress::Indeterminate => {
                self.bar.println(format!("  {} {}", yellow("↻"), event.message));
            }
        }
    }

    fn note(&self, message: &str) {
        self.bar.println(format!("  {} {}", yellow("■"), message));
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ask a question about every page (stdout)
  pdf-assist report.pdf --user-prompt "Summarise this page in three bullets."

  # Use a saved assistant and write report_analysis.md next to the input
  pdf-assist report.pdf --assistant reviewer --save

  # Rename, clone or delete saved assistants
  pdf-assist --rename-assistant reviewer auditor
  pdf-assist --clone-assistant auditor "auditor - Copy"
  pdf-assist --delete-assistant "auditor - Copy"

  # Save the current prompts as an assistant profile
  pdf-assist --system-prompt "You review contracts." \
             --user-prompt "List the obligations on this page." \
             --save-assistant reviewer

  # Plain text, five pages at a time, 90 s limit per call
  pdf-assist scan.pdf --plain -c 5 --attempt-timeout 90 -o scan.txt

  # A single image or a URL
  pdf-assist whiteboard.jpg --user-prompt "Transcribe the diagram."
  pdf-assist https://arxiv.org/pdf/1706.03762 --pages 1-3

RETRIES:
  A failed call is retried up to --max-retries times, waiting 2, 4, 8 … s
  (multiplied by --backoff-ms / 1000). Pages that still fail are marked in
  the output; the rest of the document is unaffected. Ctrl-C stops starting
  new pages and keeps the results gathered so far; a second Ctrl-C quits.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Run a vision LLM assistant over every page of a PDF or image.
#[derive(Parser, Debug)]
#[command(
    name = "pdf-assist",
    version,
    about = "Run a vision LLM assistant over every page of a PDF or image",
    long_about = "Send every page of a PDF (or a single image) to a vision language model \
together with an assistant prompt pair, concurrently and with retries, and assemble the \
answers in page order. Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI and any \
OpenAI-compatible endpoint (Ollama, vLLM, LiteLLM, etc.).",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF/image path or HTTP/HTTPS URL.
    #[arg(required_unless_present_any = [
        "list_assistants",
        "save_assistant",
        "delete_assistant",
        "rename_assistant",
        "clone_assistant",
    ])]
    input: Option<String>,

    /// Write the result to this file instead of stdout.
    #[arg(short, long, env = "PDF_ASSIST_OUTPUT")]
    output: Option<PathBuf>,

    /// Write the result to `<input stem>_analysis.<md|txt>`.
    #[arg(long, conflicts_with = "output")]
    save: bool,

    // ── Prompts ──────────────────────────────────────────────────────────
    /// Assistant profile to load from the assistants directory.
    #[arg(short, long, env = "PDF_ASSIST_ASSISTANT")]
    assistant: Option<String>,

    /// Directory holding `<name>.json` assistant profiles.
    #[arg(long, env = "PDF_ASSIST_ASSISTANTS_DIR", default_value = "data/assistants")]
    assistants_dir: PathBuf,

    /// System prompt (overrides the assistant's).
    #[arg(long, env = "PDF_ASSIST_SYSTEM_PROMPT")]
    system_prompt: Option<String>,

    /// User prompt sent with each page (overrides the assistant's).
    #[arg(long, env = "PDF_ASSIST_USER_PROMPT")]
    user_prompt: Option<String>,

    /// List saved assistants and exit.
    #[arg(long)]
    list_assistants: bool,

    /// Save the resolved prompts as an assistant profile with this name.
    #[arg(long, value_name = "NAME")]
    save_assistant: Option<String>,

    /// Delete an assistant profile and exit.
    #[arg(long, value_name = "NAME")]
    delete_assistant: Option<String>,

    /// Rename an assistant profile and exit.
    #[arg(long, num_args = 2, value_names = ["FROM", "TO"])]
    rename_assistant: Option<Vec<String>>,

    /// Copy an assistant profile under a new name and exit.
    #[arg(long, num_args = 2, value_names = ["FROM", "TO"])]
    clone_assistant: Option<Vec<String>>,

    // ── Batch ────────────────────────────────────────────────────────────
    /// Pages processed at the same time.
    #[arg(short, long, env = "PDF_ASSIST_CONCURRENCY", default_value_t = 3,
          value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: u64,

    /// Retries per page after the first failed call.
    #[arg(long, env = "PDF_ASSIST_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Backoff unit in milliseconds; retry n waits unit × 2^n.
    #[arg(long, env = "PDF_ASSIST_BACKOFF_MS", default_value_t = 1000)]
    backoff_ms: u64,

    /// Per-call time limit in seconds (no limit when unset).
    #[arg(long, env = "PDF_ASSIST_ATTEMPT_TIMEOUT",
          value_parser = clap::value_parser!(u64).range(1..))]
    attempt_timeout: Option<u64>,

    /// Plain-text output instead of Markdown.
    #[arg(long, env = "PDF_ASSIST_PLAIN")]
    plain: bool,

    // ── Document ─────────────────────────────────────────────────────────
    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "PDF_ASSIST_PAGES", default_value = "all")]
    pages: String,

    /// Rendering DPI (72–600).
    #[arg(long, env = "PDF_ASSIST_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF_ASSIST_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF_ASSIST_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    // ── Model ────────────────────────────────────────────────────────────
    /// LLM model ID (default: gpt-4o).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "PDF_ASSIST_TEMPERATURE", default_value_t = 0.7)]
    temperature: f32,

    /// Max LLM output tokens per page (provider default when unset).
    #[arg(long, env = "PDF_ASSIST_MAX_TOKENS")]
    max_tokens: Option<usize>,

    /// Keep `\(…\)` / `\[…\]` math delimiters as returned by the model.
    #[arg(long)]
    no_formula_repair: bool,

    // ── Output ───────────────────────────────────────────────────────────
    /// Output structured JSON (DocumentOutput) instead of text.
    #[arg(long, env = "PDF_ASSIST_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "PDF_ASSIST_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF_ASSIST_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF_ASSIST_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are suppressed while the progress bar is active.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Assistant management ─────────────────────────────────────────────
    if cli.list_assistants {
        let names = Assistant::list(&cli.assistants_dir)
            .await
            .context("Failed to list assistants")?;
        if names.is_empty() && !cli.quiet {
            eprintln!("No assistants in {}", cli.assistants_dir.display());
        }
        for name in names {
            println!("{name}");
        }
        return Ok(());
    }
    if manage_assistants(&cli).await? {
        return Ok(());
    }

    let prompts = resolve_prompts(&cli).await?;

    if let Some(ref name) = cli.save_assistant {
        let path = Assistant::new(name.clone(), prompts.clone())
            .save_in(&cli.assistants_dir)
            .await
            .context("Failed to save assistant")?;
        if !cli.quiet {
            eprintln!("{} Saved assistant '{}' to {}", green("✔"), name, path.display());
        }
        if cli.input.is_none() {
            return Ok(());
        }
    }

    let input = cli
        .input
        .clone()
        .context("An input PDF, image or URL is required")?;
    let config = build_config(&cli)?;
    let shape = config.batch.output_shape;

    // ── Run the batch ────────────────────────────────────────────────────
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
    let cancel = CancellationToken::new();

    let task = {
        let input = input.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            process_document_with(&input, &prompts, &config, Arc::new(tx), cancel).await
        })
    };

    let mut view = show_progress.then(ProgressView::new);
    let mut events = UnboundedReceiverStream::new(rx);
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(event) => {
                    if let Some(ref mut view) = view {
                        view.show(event);
                    }
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => match interrupt(&cancel) {
                Interrupt::Quit => {
                    if let Some(ref view) = view {
                        view.finish();
                    }
                    eprintln!("{} Interrupted", red("✖"));
                    std::process::exit(130);
                }
                Interrupt::Cancel => match view {
                    Some(ref view) => view.note(CANCEL_NOTICE),
                    None if !cli.quiet => eprintln!("{CANCEL_NOTICE}"),
                    None => {}
                },
            },
        }
    }
    if let Some(ref view) = view {
        view.finish();
    }

    let output = task
        .await
        .context("Analysis task failed")?
        .context("Analysis failed")?;

    // ── Write results ────────────────────────────────────────────────────
    let target = match (&cli.output, cli.save) {
        (Some(path), _) => Some(path.clone()),
        (None, true) => Some(default_output_path(&input, shape)),
        (None, false) => None,
    };

    if cli.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        emit(target.as_ref(), &json).await?;
    } else {
        emit(target.as_ref(), &output.text).await?;
    }

    if !cli.quiet {
        print_summary(&output, target.as_ref());
    }

    Ok(())
}

const CANCEL_NOTICE: &str = "Cancelling: in-flight pages will finish (Ctrl-C again to quit)…";

#[derive(Debug, PartialEq, Eq)]
enum Interrupt {
    /// First Ctrl-C: stop dispatching and keep what is done.
    Cancel,
    /// Ctrl-C while already cancelling: exit without waiting.
    Quit,
}

fn interrupt(cancel: &CancellationToken) -> Interrupt {
    if cancel.is_cancelled() {
        Interrupt::Quit
    } else {
        cancel.cancel();
        Interrupt::Cancel
    }
}

/// Run `--delete-assistant`, `--rename-assistant` or `--clone-assistant`.
///
/// Returns `true` when one of them ran, after which the CLI exits.
async fn manage_assistants(cli: &Cli) -> Result<bool> {
    let dir = &cli.assistants_dir;
    let done = if let Some(ref name) = cli.delete_assistant {
        Assistant::delete(dir, name)
            .await
            .with_context(|| format!("Failed to delete assistant '{name}'"))?;
        format!("Deleted assistant '{name}'")
    } else if let Some([from, to]) = cli.rename_assistant.as_deref() {
        Assistant::rename(dir, from, to)
            .await
            .with_context(|| format!("Failed to rename assistant '{from}'"))?;
        format!("Renamed assistant '{from}' to '{to}'")
    } else if let Some([from, to]) = cli.clone_assistant.as_deref() {
        let path = Assistant::duplicate(dir, from, to)
            .await
            .with_context(|| format!("Failed to clone assistant '{from}'"))?;
        format!("Cloned assistant '{from}' to {}", path.display())
    } else {
        return Ok(false);
    };
    if !cli.quiet {
        eprintln!("{} {}", green("✔"), done);
    }
    Ok(true)
}

/// Start from the assistant profile (if any) and apply prompt overrides.
async fn resolve_prompts(cli: &Cli) -> Result<Prompts> {
    let mut prompts = match cli.assistant {
        Some(ref name) => {
            Assistant::find(&cli.assistants_dir, name)
                .await
                .with_context(|| format!("Failed to load assistant '{name}'"))?
                .prompts
        }
        None => Prompts::default(),
    };
    if let Some(ref s) = cli.system_prompt {
        prompts.system_prompt = s.clone();
    }
    if let Some(ref u) = cli.user_prompt {
        prompts.user_prompt = u.clone();
    }
    if prompts.user_prompt.trim().is_empty() && cli.save_assistant.is_none() {
        anyhow::bail!("No user prompt: pass --user-prompt or --assistant <NAME>");
    }
    Ok(prompts)
}

/// Map CLI args to `DocumentConfig`.
fn build_config(cli: &Cli) -> Result<DocumentConfig> {
    let batch = BatchConfig::builder()
        .concurrency(cli.concurrency as usize)
        .max_retries(cli.max_retries)
        .retry_backoff(Duration::from_millis(cli.backoff_ms))
        .attempt_timeout(cli.attempt_timeout.map(Duration::from_secs))
        .output_shape(if cli.plain {
            OutputShape::PlainText
        } else {
            OutputShape::RichText
        })
        .build()
        .context("Invalid batch configuration")?;

    let mut builder = DocumentConfig::builder()
        .batch(batch)
        .dpi(cli.dpi)
        .pages(parse_pages(&cli.pages)?)
        .temperature(cli.temperature)
        .max_tokens(cli.max_tokens)
        .repair_formula_tags(!cli.no_formula_repair)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref m) = cli.model {
        builder = builder.model(m.clone());
    }
    if let Some(ref p) = cli.provider {
        builder = builder.provider_name(p.clone());
    }
    if let Some(ref pw) = cli.password {
        builder = builder.password(pw.clone());
    }

    builder.build().context("Invalid configuration")
}

/// Write to `target`, or to stdout with a trailing newline.
async fn emit(target: Option<&PathBuf>, text: &str) -> Result<()> {
    match target {
        Some(path) => write_output(path, text)
            .await
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            if !text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}

fn print_summary(output: &DocumentOutput, target: Option<&PathBuf>) {
    let s = &output.stats;
    let mark = if s.failed_pages == 0 && s.skipped_pages == 0 {
        green("✔")
    } else if s.succeeded_pages == 0 {
        red("✘")
    } else {
        yellow("⚠")
    };
    let mut line = format!(
        "{}  {}/{} pages  {} calls  {}ms",
        mark,
        bold(&s.succeeded_pages.to_string()),
        s.total_pages,
        s.total_attempts,
        s.duration_ms,
    );
    if s.failed_pages > 0 {
        line.push_str(&format!("  ({} failed)", red(&s.failed_pages.to_string())));
    }
    if output.result.cancelled {
        line.push_str(&format!("  ({} skipped, cancelled)", s.skipped_pages));
    }
    if let Some(path) = target {
        line.push_str(&format!("  →  {}", bold(&path.display().to_string())));
    }
    eprintln!("{line}");

    for outcome in output.result.iter().filter(|o| !o.succeeded && o.attempts > 0) {
        let first = outcome.text.lines().next().unwrap_or_default();
        eprintln!("   {} page {}: {}", red("✗"), outcome.page_num(), dim(first));
    }
}

/// Parse `--pages` string into `PageSelection`.
fn parse_pages(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start
            .trim()
            .parse()
            .context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;

        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages = s
            .split(',')
            .map(|p| {
                let p = p.trim();
                match p.parse::<usize>() {
                    Ok(0) => anyhow::bail!("Pages are 1-indexed, minimum is 1 (got 0)"),
                    Ok(n) => Ok(n),
                    Err(_) => anyhow::bail!("Invalid page number: '{}'", p),
                }
            })
            .collect::<Result<Vec<_>>>()?;
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}
