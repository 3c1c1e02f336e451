//! Bounded concurrent dispatch of a batch of pages.
//!
//! ## Ordering
//!
//! Pages are dispatched through `buffer_unordered(concurrency)`: at most
//! `concurrency` workers are in flight, and a new page starts as soon as
//! one finishes. Outcomes therefore arrive in *completion* order. A single
//! collector owns the completion counter and the outcome list, so no lock is
//! needed; once the stream is drained the outcomes are sorted by page index.
//! That sort is the only ordering guarantee of the pipeline.
//!
//! ## Cancellation
//!
//! A [`CancellationToken`] stops further dispatch. Pages already in flight
//! finish their current attempt (see [`RetryingWorker::attempt`]); pages
//! never started are recorded as failed with zero attempts, so the result
//! still holds exactly one outcome per submitted page.

use crate::config::BatchConfig;
use crate::error::PdfAssistError;
use crate::output::{BatchResult, Outcome};
use crate::page::PageUnit;
use crate::pipeline::worker::RetryingWorker;
use crate::progress::{percent_complete, NoopProgressSink, ProgressEvent, SharedProgressSink};
use crate::transcriber::{Prompts, RemoteTranscriber};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Stream of progress events returned by [`BatchScheduler::spawn`].
pub type ProgressStream = UnboundedReceiverStream<ProgressEvent>;

/// Fans a batch of pages out to a bounded pool of retrying workers.
///
/// # Example
/// ```rust,no_run
/// use edgequake_pdf_assist::{BatchConfig, BatchScheduler, PageUnit, Prompts, RemoteTranscriber};
/// use std::sync::Arc;
///
/// # async fn run(transcriber: Arc<dyn RemoteTranscriber>, pages: Vec<Vec<u8>>) {
/// let scheduler = BatchScheduler::new(transcriber, BatchConfig::default());
/// let units = PageUnit::from_sources(pages);
/// let result = scheduler.run(&units, &Prompts::new("You are a careful reader.", "Summarise this page.")).await;
/// println!("{}/{} pages succeeded", result.succeeded_count(), result.len());
/// # }
/// ```
pub struct BatchScheduler {
    transcriber: Arc<dyn RemoteTranscriber>,
    config: BatchConfig,
    sink: SharedProgressSink,
    cancel: CancellationToken,
}

impl BatchScheduler {
    pub fn new(transcriber: Arc<dyn RemoteTranscriber>, config: BatchConfig) -> Self {
        Self {
            transcriber,
            config,
            sink: Arc::new(NoopProgressSink),
            cancel: CancellationToken::new(),
        }
    }

    /// Deliver progress events to `sink`.
    pub fn with_progress(mut self, sink: SharedProgressSink) -> Self {
        self.sink = sink;
        self
    }

    /// Bind the batch to an externally owned cancellation token.
    ///
    /// A token cannot be reset. Once it fires, every later [`run`] on this
    /// scheduler skips all of its pages, so give each batch a fresh token.
    ///
    /// [`run`]: BatchScheduler::run
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// A handle that cancels this scheduler's batches when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process every unit and return the outcomes in page order.
    ///
    /// Never fails: a page that exhausts its retries becomes a failed
    /// [`Outcome`] and the rest of the batch carries on. An empty `units`
    /// slice yields an empty result without emitting any progress event.
    ///
    /// [`BatchResult::cancelled`] is set only when cancellation changed the
    /// result: a page was skipped or a retry was withheld. A token that fires
    /// after the last page finished leaves it `false`.
    pub async fn run(&self, units: &[PageUnit], prompts: &Prompts) -> BatchResult {
        let total = units.len();
        if total == 0 {
            debug!("Empty batch, nothing to dispatch");
            return BatchResult::default();
        }

        let start = Instant::now();
        info!(
            "Dispatching {} pages ({} concurrent, {} retries each)",
            total, self.config.concurrency, self.config.max_retries
        );

        let worker = RetryingWorker::new(Arc::clone(&self.transcriber), self.config.clone())
            .with_progress(Arc::clone(&self.sink))
            .with_cancellation(self.cancel.clone());

        let jobs: Vec<_> = units
            .iter()
            .map(|unit| {
                let worker = &worker;
                let cancel = &self.cancel;
                async move {
                    if cancel.is_cancelled() {
                        let skipped = Outcome::failure(
                            unit.index(),
                            format!(
                                "Page {} was not processed: batch cancelled",
                                unit.page_num()
                            ),
                            0,
                        );
                        return (skipped, true);
                    }
                    debug!("Page {}: dispatched", unit.page_num());
                    worker.attempt_tracked(unit, prompts).await
                }
                .boxed()
            })
            .collect();
        let mut completions = stream::iter(jobs).buffer_unordered(self.config.concurrency);

        let mut outcomes = Vec::with_capacity(total);
        let mut cut_short = false;
        while let Some((outcome, interrupted)) = completions.next().await {
            cut_short |= interrupted;
            let done = outcomes.len() + 1;
            let message = if outcome.attempts == 0 {
                format!("Skipped page {}/{} (batch cancelled)", outcome.page_num(), total)
            } else {
                format!("Processed page {}/{}", outcome.page_num(), total)
            };
            self.sink
                .emit(ProgressEvent::percent(percent_complete(done, total), message));
            outcomes.push(outcome);
        }

        let result = BatchResult::from_outcomes(outcomes, cut_short);
        info!(
            "Batch complete: {}/{} pages succeeded in {}ms{}",
            result.succeeded_count(),
            total,
            start.elapsed().as_millis(),
            if result.cancelled { " (cancelled)" } else { "" }
        );
        result
    }

    /// Run the batch on a Tokio task and stream its progress.
    ///
    /// Progress events go to the returned handle's stream; any sink set with
    /// [`BatchScheduler::with_progress`] is replaced. The stream ends once
    /// the batch has finished.
    pub fn spawn(self, units: Vec<PageUnit>, prompts: Prompts) -> BatchHandle {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = self.cancel.clone();
        let scheduler = self.with_progress(Arc::new(tx));

        let task = tokio::spawn(async move { scheduler.run(&units, &prompts).await });

        BatchHandle {
            events: UnboundedReceiverStream::new(rx),
            task,
            cancel,
        }
    }
}

/// A batch running in the background.
pub struct BatchHandle {
    events: ProgressStream,
    task: JoinHandle<BatchResult>,
    cancel: CancellationToken,
}

impl BatchHandle {
    /// Progress events, in emission order.
    pub fn events(&mut self) -> &mut ProgressStream {
        &mut self.events
    }

    /// Stop dispatching new pages; in-flight pages finish their current attempt.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Split into the progress stream and the result task.
    pub fn into_parts(self) -> (ProgressStream, JoinHandle<BatchResult>) {
        (self.events, self.task)
    }

    /// Wait for the batch to finish, discarding unread progress events.
    pub async fn join(self) -> Result<BatchResult, PdfAssistError> {
        self.task
            .await
            .map_err(|e| PdfAssistError::Internal(format!("Batch task failed: {e}")))
    }
}
