//! Progress events emitted while a batch runs.
//!
//! The scheduler and its workers push [`ProgressEvent`]s into a
//! [`ProgressSink`] supplied by the caller. The sink is the only channel
//! between the batch and whatever presents progress (a terminal bar, a
//! WebSocket, a log line); the batch knows nothing about the presentation.
//!
//! Three sinks are provided:
//!
//! * `tokio::sync::mpsc::UnboundedSender<ProgressEvent>`: forward events to
//!   a channel and consume them as a stream (this is what
//!   [`crate::BatchScheduler::spawn`] uses);
//! * any `Fn(ProgressEvent) + Send + Sync` closure;
//! * [`NoopProgressSink`] when nobody is listening.
//!
//! # Example
//!
//! ```rust
//! use edgequake_pdf_assist::{Progress, ProgressEvent, ProgressSink};
//!
//! let sink = |event: ProgressEvent| {
//!     if let Progress::Percent(p) = event.percent {
//!         eprintln!("{p:>3}% {}", event.message);
//!     }
//! };
//! sink.emit(ProgressEvent::percent(50, "Processed page 1/2"));
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Completion level carried by a [`ProgressEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Progress {
    /// Percentage of pages completed, `0..=100`.
    Percent(u8),
    /// No completion change (retry notices and other status messages).
    Indeterminate,
}

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: Progress,
    pub message: String,
}

impl ProgressEvent {
    /// A completion event; values above 100 are clamped.
    pub fn percent(percent: u8, message: impl Into<String>) -> Self {
        Self {
            percent: Progress::Percent(percent.min(100)),
            message: message.into(),
        }
    }

    /// A status message that does not move the completion level.
    pub fn indeterminate(message: impl Into<String>) -> Self {
        Self {
            percent: Progress::Indeterminate,
            message: message.into(),
        }
    }

    pub fn percent_value(&self) -> Option<u8> {
        match self.percent {
            Progress::Percent(p) => Some(p),
            Progress::Indeterminate => None,
        }
    }
}

/// Receives progress events from a running batch.
///
/// Workers run concurrently, so `emit` may be called from several tasks at
/// once. Implementations must protect shared mutable state with appropriate
/// synchronisation primitives.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event. The default when no sink is configured.
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // The receiver may have been dropped; progress is best effort.
        let _ = self.send(event);
    }
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn emit(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Shared handle to a sink, as stored in the scheduler.
pub type SharedProgressSink = Arc<dyn ProgressSink>;

/// `round(done * 100 / total)` using integer arithmetic.
///
/// `total == 0` yields 100: an empty batch is complete.
pub fn percent_complete(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let done = done.min(total);
    ((done * 200 + total) / (2 * total)) as u8
}
