//! Integration tests for the batch core: scheduler, retrying worker and
//! formatter driven by a scripted transcriber.
//!
//! Every test runs on a paused Tokio clock, so backoffs of several seconds
//! complete instantly and elapsed times are exact.

use async_trait::async_trait;
use edgequake_pdf_assist::{
    BatchConfig, BatchScheduler, OutputShape, PageUnit, Progress, ProgressEvent, Prompts,
    RemoteTranscriber, ResultFormatter, SharedProgressSink, TranscribeError,
};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};

// ── Scripted transcriber ─────────────────────────────────────────────────

/// What one call for a given page does.
enum Step {
    Succeed(Duration),
    Fail(Duration),
    Panic,
}

type Script = Box<dyn Fn(u8, u32) -> Step + Send + Sync>;

/// Pages are single-byte images; the byte is the page index. The script
/// maps `(page byte, 1-based call number for that page)` to a [`Step`].
struct Scripted {
    script: Script,
    calls: Mutex<HashMap<u8, u32>>,
    call_log: Mutex<Vec<(u8, Instant)>>,
    completions: Mutex<Vec<u8>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Scripted {
    fn new(script: impl Fn(u8, u32) -> Step + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(HashMap::new()),
            call_log: Mutex::new(Vec::new()),
            completions: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn calls_for(&self, page: u8) -> u32 {
        self.calls.lock().unwrap().get(&page).copied().unwrap_or(0)
    }

    fn call_times(&self, page: u8) -> Vec<Instant> {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(p, _)| *p == page)
            .map(|(_, t)| *t)
            .collect()
    }
}

#[async_trait]
impl RemoteTranscriber for Scripted {
    async fn transcribe(
        &self,
        image: &[u8],
        _system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, TranscribeError> {
        let page = image[0];
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(page).or_insert(0);
            *n += 1;
            *n
        };
        self.call_log.lock().unwrap().push((page, Instant::now()));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let step = (self.script)(page, call);
        let result = match step {
            Step::Succeed(delay) => {
                sleep(delay).await;
                Ok(format!("{user_prompt} {}", page + 1))
            }
            Step::Fail(delay) => {
                sleep(delay).await;
                Err(TranscribeError::Api(format!("HTTP 503 on page {}", page + 1)))
            }
            Step::Panic => {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                panic!("decoder exploded on page {}", page + 1);
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completions.lock().unwrap().push(page);
        result
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn pages(n: u8) -> Vec<PageUnit> {
    PageUnit::from_sources((0..n).map(|i| vec![i]))
}

fn prompts() -> Prompts {
    Prompts::new("You read scanned pages.", "Page")
}

fn config(concurrency: usize, max_retries: u32) -> BatchConfig {
    BatchConfig::builder()
        .concurrency(concurrency)
        .max_retries(max_retries)
        .build()
        .unwrap()
}

fn recording_sink() -> (SharedProgressSink, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);
    let sink: SharedProgressSink =
        Arc::new(move |event: ProgressEvent| recorded.lock().unwrap().push(event));
    (sink, events)
}

// ── Ordering ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn outcomes_follow_page_order_when_completion_is_reversed() {
    let n = 6u8;
    let transcriber = Scripted::new(move |page, _| {
        Step::Succeed(Duration::from_millis(100 * (n - page) as u64))
    });
    let scheduler = BatchScheduler::new(transcriber.clone(), config(n as usize, 0));

    let result = scheduler.run(&pages(n), &prompts()).await;

    assert_eq!(*transcriber.completions.lock().unwrap(), vec![5, 4, 3, 2, 1, 0]);
    let texts: Vec<&str> = result.iter().map(|o| o.text.as_str()).collect();
    assert_eq!(texts, vec!["Page 1", "Page 2", "Page 3", "Page 4", "Page 5", "Page 6"]);
    assert!(result.iter().enumerate().all(|(i, o)| o.index == i));
}

// ── Failure isolation ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn failing_pages_do_not_affect_others() {
    for concurrency in [1, 2, 4, 8] {
        let transcriber = Scripted::new(|page, _| {
            if page == 1 || page == 4 {
                Step::Fail(Duration::from_millis(10))
            } else {
                Step::Succeed(Duration::from_millis(10))
            }
        });
        let scheduler = BatchScheduler::new(transcriber, config(concurrency, 1));

        let result = scheduler.run(&pages(6), &prompts()).await;

        assert_eq!(result.len(), 6, "concurrency {concurrency}");
        assert_eq!(result.failed_count(), 2, "concurrency {concurrency}");
        for outcome in result.iter() {
            let should_fail = outcome.index == 1 || outcome.index == 4;
            assert_eq!(outcome.succeeded, !should_fail, "page {}", outcome.page_num());
            if should_fail {
                assert!(outcome.text.contains("HTTP 503"));
            } else {
                assert_eq!(outcome.text, format!("Page {}", outcome.page_num()));
            }
        }
    }
}

// ── Retry bound and backoff ──────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn always_failing_page_is_called_max_retries_plus_one_times() {
    for max_retries in [0, 1, 3, 5] {
        let transcriber = Scripted::new(|_, _| Step::Fail(Duration::ZERO));
        let scheduler = BatchScheduler::new(transcriber.clone(), config(2, max_retries));

        let result = scheduler.run(&pages(1), &prompts()).await;

        assert_eq!(transcriber.calls_for(0), max_retries + 1);
        let outcome = &result.outcomes()[0];
        assert!(!outcome.succeeded);
        assert_eq!(outcome.attempts, max_retries + 1);
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_doubles_between_attempts() {
    let transcriber = Scripted::new(|_, _| Step::Fail(Duration::ZERO));
    let scheduler = BatchScheduler::new(transcriber.clone(), config(1, 3));

    scheduler.run(&pages(1), &prompts()).await;

    let times = transcriber.call_times(0);
    assert_eq!(times.len(), 4);
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(
        gaps,
        vec![
            Duration::from_secs(2),
            Duration::from_secs(4),
            Duration::from_secs(8)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn page_recovers_after_transient_failures() {
    let transcriber = Scripted::new(|_, call| {
        if call <= 2 {
            Step::Fail(Duration::ZERO)
        } else {
            Step::Succeed(Duration::ZERO)
        }
    });
    let (sink, events) = recording_sink();
    let scheduler = BatchScheduler::new(transcriber, config(1, 3)).with_progress(sink);

    let start = Instant::now();
    let result = scheduler.run(&pages(1), &prompts()).await;

    let outcome = &result.outcomes()[0];
    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(start.elapsed(), Duration::from_secs(2 + 4));

    let messages: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .map(|e| e.message.clone())
        .collect();
    assert_eq!(
        messages,
        vec![
            "Retrying page 1 (attempt 1/3)...",
            "Retrying page 1 (attempt 2/3)...",
            "Processed page 1/1",
        ]
    );
}

// ── Concurrency bound ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn never_more_than_concurrency_calls_in_flight() {
    for concurrency in [1, 3, 5] {
        let transcriber = Scripted::new(|page, _| {
            Step::Succeed(Duration::from_millis(50 + 10 * (page % 4) as u64))
        });
        let scheduler = BatchScheduler::new(transcriber.clone(), config(concurrency, 0));

        let result = scheduler.run(&pages(12), &prompts()).await;

        assert_eq!(result.succeeded_count(), 12);
        assert_eq!(
            transcriber.max_in_flight.load(Ordering::SeqCst),
            concurrency,
            "pool should fill up but never overflow"
        );
    }
}

// ── Empty batch ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn empty_batch_yields_empty_result_and_no_events() {
    let transcriber = Scripted::new(|_, _| Step::Succeed(Duration::ZERO));
    let (sink, events) = recording_sink();
    let scheduler = BatchScheduler::new(transcriber.clone(), config(3, 3)).with_progress(sink);

    let result = scheduler.run(&[], &prompts()).await;

    assert!(result.is_empty());
    assert!(!result.cancelled);
    assert!(events.lock().unwrap().is_empty());
    assert!(transcriber.call_log.lock().unwrap().is_empty());
    assert_eq!(ResultFormatter::new(OutputShape::RichText).format(&result), "");
    assert_eq!(ResultFormatter::new(OutputShape::PlainText).format(&result), "");
}

// ── Progress ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn progress_is_monotonic_and_ends_at_100() {
    let transcriber = Scripted::new(|page, call| {
        if page == 2 && call == 1 {
            Step::Fail(Duration::from_millis(5))
        } else {
            Step::Succeed(Duration::from_millis(10 * (7 - page) as u64))
        }
    });
    let (sink, events) = recording_sink();
    let scheduler = BatchScheduler::new(transcriber, config(3, 2)).with_progress(sink);

    scheduler.run(&pages(7), &prompts()).await;

    let events = events.lock().unwrap();
    let percents: Vec<u8> = events.iter().filter_map(|e| e.percent_value()).collect();
    assert_eq!(percents.len(), 7, "one completion event per page");
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert_eq!(percents.last(), Some(&100));
    assert_eq!(percents[0], 14);

    let retry_notices: Vec<&ProgressEvent> = events
        .iter()
        .filter(|e| e.percent == Progress::Indeterminate)
        .collect();
    assert_eq!(retry_notices.len(), 1);
    assert_eq!(retry_notices[0].message, "Retrying page 3 (attempt 1/2)...");
}

#[tokio::test(start_paused = true)]
async fn spawned_batch_streams_progress_until_done() {
    let transcriber = Scripted::new(|_, _| Step::Succeed(Duration::from_millis(20)));
    let scheduler = BatchScheduler::new(transcriber, config(2, 0));

    let handle = scheduler.spawn(pages(4), prompts());
    let (events, task) = handle.into_parts();
    let events: Vec<ProgressEvent> = events.collect().await;
    let result = task.await.unwrap();

    assert_eq!(result.succeeded_count(), 4);
    assert_eq!(events.len(), 4);
    assert_eq!(events.last().unwrap().percent, Progress::Percent(100));
    assert!(events
        .iter()
        .all(|e| e.message.starts_with("Processed page ") && e.message.ends_with("/4")));
}

// ── Formatting ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rich_text_marks_failed_third_page() {
    let transcriber = Scripted::new(|page, _| {
        if page == 2 {
            Step::Fail(Duration::ZERO)
        } else {
            Step::Succeed(Duration::ZERO)
        }
    });
    let scheduler = BatchScheduler::new(transcriber, config(3, 1));

    let result = scheduler.run(&pages(3), &prompts()).await;
    let text = ResultFormatter::new(OutputShape::RichText).format(&result);

    assert_eq!(
        text,
        "Page 1\n\nPage 2\n\n\
         > **Error processing page 3:**\n>\n> ```\n> HTTP 503 on page 3\n> ```"
    );

    let plain = ResultFormatter::new(OutputShape::PlainText).format(&result);
    assert!(plain.ends_with("--- Error processing page 3 ---\n\nHTTP 503 on page 3\n\n---"));
}

// ── Cancellation ─────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn cancellation_keeps_one_outcome_per_page() {
    let transcriber = Scripted::new(|_, _| Step::Succeed(Duration::from_secs(1)));
    let scheduler = BatchScheduler::new(transcriber.clone(), config(1, 3));

    let mut handle = scheduler.spawn(pages(5), prompts());
    let first = handle.events().next().await.expect("first page completes");
    assert_eq!(first.percent, Progress::Percent(20));
    handle.cancel();
    let result = handle.join().await.unwrap();

    assert!(result.cancelled);
    assert_eq!(result.len(), 5);
    assert!(result.iter().enumerate().all(|(i, o)| o.index == i));
    assert!(result.outcomes()[0].succeeded);

    let skipped: Vec<_> = result.iter().filter(|o| o.attempts == 0).collect();
    assert!(!skipped.is_empty());
    for o in &skipped {
        assert!(!o.succeeded);
        assert!(o.text.contains("batch cancelled"), "{}", o.text);
    }
    // Skipped pages form the tail: nothing is dispatched after the cancel.
    let first_skipped = skipped[0].index;
    assert!(result.iter().skip(first_skipped).all(|o| o.attempts == 0));
    assert_eq!(
        transcriber.call_log.lock().unwrap().len(),
        first_skipped,
        "skipped pages are never sent"
    );

    let stats = result.stats(0);
    assert_eq!(stats.skipped_pages, skipped.len());
    assert_eq!(stats.succeeded_pages + stats.skipped_pages, 5);
}

#[tokio::test(start_paused = true)]
async fn cancellation_cuts_backoff_short() {
    let transcriber = Scripted::new(|_, _| Step::Fail(Duration::ZERO));
    let scheduler = BatchScheduler::new(transcriber.clone(), config(1, 5));
    let token = scheduler.cancellation_token();

    let canceller = tokio::spawn(async move {
        sleep(Duration::from_secs(3)).await;
        token.cancel();
    });
    let start = Instant::now();
    let result = scheduler.run(&pages(1), &prompts()).await;
    canceller.await.unwrap();

    // Attempts at t=0 and t=2; cancelled during the 4 s wait.
    assert_eq!(start.elapsed(), Duration::from_secs(3));
    assert_eq!(transcriber.calls_for(0), 2);
    assert!(result.cancelled);
    assert_eq!(result.outcomes()[0].attempts, 2);
    assert!(result.outcomes()[0].text.contains("HTTP 503"));
}

// ── Raised failures ──────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn panicking_transcriber_only_fails_its_page() {
    let transcriber = Scripted::new(|page, _| {
        if page == 1 {
            Step::Panic
        } else {
            Step::Succeed(Duration::ZERO)
        }
    });
    let (sink, events) = recording_sink();
    let scheduler = BatchScheduler::new(transcriber.clone(), config(2, 1)).with_progress(sink);

    let result = scheduler.run(&pages(3), &prompts()).await;

    assert_eq!(result.succeeded_count(), 2);
    let failed = &result.outcomes()[1];
    assert!(!failed.succeeded);
    assert_eq!(failed.attempts, 2);
    assert!(failed.text.contains("decoder exploded on page 2"), "{}", failed.text);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| e.message == "Error on page 2, retrying (attempt 1/1)..."));
}

#[tokio::test(start_paused = true)]
async fn slow_call_times_out_and_is_retried() {
    let transcriber = Scripted::new(|_, call| {
        if call == 1 {
            Step::Succeed(Duration::from_secs(600))
        } else {
            Step::Succeed(Duration::from_millis(100))
        }
    });
    let config = BatchConfig::builder()
        .concurrency(1)
        .max_retries(2)
        .attempt_timeout(Some(Duration::from_secs(30)))
        .build()
        .unwrap();
    let scheduler = BatchScheduler::new(transcriber.clone(), config);

    let start = Instant::now();
    let result = scheduler.run(&pages(1), &prompts()).await;

    let outcome = &result.outcomes()[0];
    assert!(outcome.succeeded);
    assert_eq!(outcome.attempts, 2);
    assert_eq!(
        start.elapsed(),
        Duration::from_secs(30) + Duration::from_secs(2) + Duration::from_millis(100)
    );
}
