//! Per-page retry loop around one [`RemoteTranscriber`] call.
//!
//! ## Retry Strategy
//!
//! Completion APIs fail transiently under concurrent load (429, 503, dropped
//! streams). A failed attempt is retried after `retry_backoff * 2^n` where
//! `n` is the 1-based retry number: with the default 1 s unit and 3 retries
//! the waits are 2 s → 4 s → 8 s. There is no jitter.
//!
//! Every failure takes the same path, whether the transcriber *reported* it
//! (returned `Err`) or it was *raised* around the call (the image could not
//! be loaded, the transcriber panicked, the optional per-attempt timeout
//! elapsed). The worker always returns an [`Outcome`]; nothing escapes to
//! the scheduler.

use crate::config::BatchConfig;
use crate::error::AttemptError;
use crate::output::Outcome;
use crate::page::PageUnit;
use crate::progress::{NoopProgressSink, ProgressEvent, SharedProgressSink};
use crate::transcriber::{Prompts, RemoteTranscriber};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs one page through the transcriber with bounded retries.
///
/// A worker holds no per-page state, so one instance serves a whole batch:
/// the scheduler calls [`RetryingWorker::attempt`] concurrently for each
/// page.
#[derive(Clone)]
pub struct RetryingWorker {
    transcriber: Arc<dyn RemoteTranscriber>,
    config: BatchConfig,
    sink: SharedProgressSink,
    cancel: CancellationToken,
}

impl RetryingWorker {
    pub fn new(transcriber: Arc<dyn RemoteTranscriber>, config: BatchConfig) -> Self {
        Self {
            transcriber,
            config,
            sink: Arc::new(NoopProgressSink),
            cancel: CancellationToken::new(),
        }
    }

    /// Send retry notices to `sink`.
    pub fn with_progress(mut self, sink: SharedProgressSink) -> Self {
        self.sink = sink;
        self
    }

    /// Stop retrying once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Process one page, retrying up to `config.max_retries` times.
    ///
    /// On cancellation the attempt in flight is allowed to finish; its
    /// result is kept if it succeeded, otherwise the page fails without
    /// further retries. A pending backoff is cut short.
    pub async fn attempt(&self, unit: &PageUnit, prompts: &Prompts) -> Outcome {
        self.attempt_tracked(unit, prompts).await.0
    }

    /// [`RetryingWorker::attempt`], also reporting whether cancellation
    /// withheld a retry or cut a backoff short.
    pub(crate) async fn attempt_tracked(
        &self,
        unit: &PageUnit,
        prompts: &Prompts,
    ) -> (Outcome, bool) {
        let page_num = unit.page_num();
        let max_retries = self.config.max_retries;
        let mut retries: u32 = 0;

        loop {
            let err = match self.call_once(unit, prompts).await {
                Ok(text) => {
                    debug!(
                        "Page {}: succeeded after {} attempt(s), {} chars",
                        page_num,
                        retries + 1,
                        text.len()
                    );
                    return (Outcome::success(unit.index(), text, retries + 1), false);
                }
                Err(e) => e,
            };

            retries += 1;
            warn!("Page {}: attempt {} failed — {}", page_num, retries, err);

            if retries > max_retries {
                return (Outcome::failure(unit.index(), err.to_string(), retries), false);
            }
            if self.cancel.is_cancelled() {
                info!("Page {}: batch cancelled, not retrying", page_num);
                return (Outcome::failure(unit.index(), err.to_string(), retries), true);
            }

            let message = if err.is_reported() {
                format!("Retrying page {page_num} (attempt {retries}/{max_retries})...")
            } else {
                format!("Error on page {page_num}, retrying (attempt {retries}/{max_retries})...")
            };
            self.sink.emit(ProgressEvent::indeterminate(message));

            let backoff = self.config.backoff_for(retries);
            debug!("Page {}: backing off {:?}", page_num, backoff);
            tokio::select! {
                _ = sleep(backoff) => {}
                _ = self.cancel.cancelled() => {
                    info!("Page {}: batch cancelled during backoff", page_num);
                    return (Outcome::failure(unit.index(), err.to_string(), retries), true);
                }
            }
        }
    }

    /// One transcription call, with every raised failure folded into
    /// [`AttemptError`].
    async fn call_once(&self, unit: &PageUnit, prompts: &Prompts) -> Result<String, AttemptError> {
        let image = unit
            .source()
            .load()
            .await
            .map_err(|e| AttemptError::Load(e.to_string()))?;

        let call = AssertUnwindSafe(self.transcriber.transcribe(
            &image,
            &prompts.system_prompt,
            &prompts.user_prompt,
        ))
        .catch_unwind();

        let result = match self.config.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| AttemptError::Timeout {
                    elapsed_ms: limit.as_millis() as u64,
                })?,
            None => call.await,
        };

        match result {
            Ok(response) => response.map_err(AttemptError::Remote),
            Err(panic) => Err(AttemptError::Panicked(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranscribeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails the first `failures` calls, then succeeds.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RemoteTranscriber for Flaky {
        async fn transcribe(
            &self,
            _image: &[u8],
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> Result<String, TranscribeError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(TranscribeError::Api(format!("HTTP 503 (call {})", n + 1)))
            } else {
                Ok("page text".into())
            }
        }
    }

    struct Panics;

    #[async_trait]
    impl RemoteTranscriber for Panics {
        async fn transcribe(
            &self,
            _image: &[u8],
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> Result<String, TranscribeError> {
            panic!("connection pool poisoned")
        }
    }

    struct Slow;

    #[async_trait]
    impl RemoteTranscriber for Slow {
        async fn transcribe(
            &self,
            _image: &[u8],
            _system_prompt: &str,
            _user_prompt: &str,
        ) -> Result<String, TranscribeError> {
            sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }
    }

    fn unit() -> PageUnit {
        PageUnit::new(4, vec![1u8, 2, 3])
    }

    fn config(max_retries: u32) -> BatchConfig {
        BatchConfig::builder().max_retries(max_retries).build().unwrap()
    }

    fn recording_sink() -> (SharedProgressSink, Arc<Mutex<Vec<ProgressEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = Arc::clone(&events);
        let sink: SharedProgressSink =
            Arc::new(move |e: ProgressEvent| events_clone.lock().unwrap().push(e));
        (sink, events)
    }

    #[tokio::test(start_paused = true)]
    async fn success_on_first_call_does_not_retry() {
        let t = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let worker = RetryingWorker::new(t.clone(), config(3));
        let outcome = worker.attempt(&unit(), &Prompts::default()).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.index, 4);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let t = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let (sink, events) = recording_sink();
        let worker = RetryingWorker::new(t, config(3)).with_progress(sink);
        let outcome = worker.attempt(&unit(), &Prompts::default()).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.text, "page text");
        assert_eq!(outcome.attempts, 3);

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "Retrying page 5 (attempt 1/3)...");
        assert_eq!(events[1].message, "Retrying page 5 (attempt 2/3)...");
        assert!(events.iter().all(|e| e.percent_value().is_none()));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_keep_last_error() {
        let t = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let worker = RetryingWorker::new(t.clone(), config(2));
        let outcome = worker.attempt(&unit(), &Prompts::default()).await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.text, "HTTP 503 (call 3)");
        assert_eq!(outcome.attempts, 3);
        assert_eq!(t.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_single_attempt() {
        let t = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let worker = RetryingWorker::new(t.clone(), config(0));
        let outcome = worker.attempt(&unit(), &Prompts::default()).await;

        assert!(!outcome.succeeded);
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn panic_is_caught_and_retried() {
        let (sink, events) = recording_sink();
        let worker = RetryingWorker::new(Arc::new(Panics), config(1)).with_progress(sink);
        let outcome = worker.attempt(&unit(), &Prompts::default()).await;

        assert!(!outcome.succeeded);
        assert!(outcome.text.contains("connection pool poisoned"));
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            events.lock().unwrap()[0].message,
            "Error on page 5, retrying (attempt 1/1)..."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn missing_image_is_a_failed_attempt() {
        let t = Arc::new(Flaky {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let worker = RetryingWorker::new(t.clone(), config(1));
        let missing = PageUnit::new(0, std::path::PathBuf::from("/no/such/page.png"));
        let outcome = worker.attempt(&missing, &Prompts::default()).await;

        assert!(!outcome.succeeded);
        assert!(outcome.text.starts_with("Failed to load page image"));
        assert_eq!(t.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_counts_as_failure() {
        let cfg = BatchConfig::builder()
            .max_retries(1)
            .attempt_timeout(Some(Duration::from_secs(5)))
            .build()
            .unwrap();
        let worker = RetryingWorker::new(Arc::new(Slow), cfg);
        let outcome = worker.attempt(&unit(), &Prompts::default()).await;

        assert!(!outcome.succeeded);
        assert_eq!(outcome.text, "Transcription timed out after 5000ms");
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_retries() {
        let t = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let token = CancellationToken::new();
        token.cancel();
        let worker = RetryingWorker::new(t.clone(), config(5)).with_cancellation(token);
        let (outcome, withheld) = worker.attempt_tracked(&unit(), &Prompts::default()).await;

        assert!(withheld);
        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(t.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_not_a_cancellation() {
        let t = Arc::new(Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let worker = RetryingWorker::new(t, config(1));
        let (outcome, withheld) = worker.attempt_tracked(&unit(), &Prompts::default()).await;

        assert!(!withheld);
        assert_eq!(outcome.attempts, 2);
    }

    #[test]
    fn panic_message_handles_both_payload_kinds() {
        let a: Box<dyn Any + Send> = Box::new("static");
        let b: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let c: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(a.as_ref()), "static");
        assert_eq!(panic_message(b.as_ref()), "owned");
        assert_eq!(panic_message(c.as_ref()), "unknown panic");
    }
}
