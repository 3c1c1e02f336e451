//! Result types produced by a batch run.
//!
//! An [`Outcome`] is produced exactly once per submitted page; a
//! [`BatchResult`] holds all of them sorted by original page index. Both
//! serialise with serde so the CLI can emit them as JSON.

use serde::{Deserialize, Serialize};

/// The result of processing one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// 0-based index copied from the [`crate::PageUnit`].
    pub index: usize,
    /// Whether the transcriber eventually succeeded.
    pub succeeded: bool,
    /// Response text on success, last error description on failure.
    pub text: String,
    /// Number of transcription calls made for this page (0 when the page was
    /// never dispatched because the batch was cancelled).
    pub attempts: u32,
}

impl Outcome {
    pub fn success(index: usize, text: impl Into<String>, attempts: u32) -> Self {
        Self {
            index,
            succeeded: true,
            text: text.into(),
            attempts,
        }
    }

    pub fn failure(index: usize, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            index,
            succeeded: false,
            text: error.into(),
            attempts,
        }
    }

    /// 1-based page number.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }
}

/// All outcomes of a batch, sorted ascending by [`Outcome::index`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    outcomes: Vec<Outcome>,
    /// `true` when cancellation skipped a page or withheld a retry.
    pub cancelled: bool,
}

impl BatchResult {
    /// Build a result from outcomes in any order; they are sorted by index.
    pub fn from_outcomes(mut outcomes: Vec<Outcome>, cancelled: bool) -> Self {
        outcomes.sort_by_key(|o| o.index);
        Self {
            outcomes,
            cancelled,
        }
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    pub fn into_outcomes(self) -> Vec<Outcome> {
        self.outcomes
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Outcome> {
        self.outcomes.iter()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.len() - self.succeeded_count()
    }

    /// Aggregate counters for reporting.
    pub fn stats(&self, duration_ms: u64) -> BatchStats {
        let skipped = self.outcomes.iter().filter(|o| o.attempts == 0).count();
        BatchStats {
            total_pages: self.outcomes.len(),
            succeeded_pages: self.succeeded_count(),
            failed_pages: self.failed_count() - skipped,
            skipped_pages: skipped,
            total_attempts: self.outcomes.iter().map(|o| o.attempts as u64).sum(),
            duration_ms,
        }
    }
}

impl<'a> IntoIterator for &'a BatchResult {
    type Item = &'a Outcome;
    type IntoIter = std::slice::Iter<'a, Outcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}

/// Counters describing one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Pages submitted to the batch.
    pub total_pages: usize,
    /// Pages with a successful response.
    pub succeeded_pages: usize,
    /// Pages that failed after exhausting their retries.
    pub failed_pages: usize,
    /// Pages never dispatched because the batch was cancelled.
    pub skipped_pages: usize,
    /// Transcription calls made across all pages.
    pub total_attempts: u64,
    /// Wall-clock duration of the batch.
    pub duration_ms: u64,
}

/// Everything returned by [`crate::process_document`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentOutput {
    /// The formatted document (all pages, in order).
    pub text: String,
    /// Per-page outcomes, in page order.
    pub result: BatchResult,
    /// Run statistics.
    pub stats: BatchStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_outcomes_sorts_by_index() {
        let result = BatchResult::from_outcomes(
            vec![
                Outcome::success(2, "c", 1),
                Outcome::success(0, "a", 1),
                Outcome::failure(1, "boom", 3),
            ],
            false,
        );
        let order: Vec<usize> = result.iter().map(|o| o.index).collect();
        assert_eq!(order, vec![0, 1, 2]);
        assert_eq!(result.succeeded_count(), 2);
        assert_eq!(result.failed_count(), 1);
    }

    #[test]
    fn stats_separate_skipped_from_failed() {
        let result = BatchResult::from_outcomes(
            vec![
                Outcome::success(0, "a", 2),
                Outcome::failure(1, "HTTP 500", 4),
                Outcome::failure(2, "cancelled", 0),
            ],
            true,
        );
        let stats = result.stats(1234);
        assert_eq!(stats.total_pages, 3);
        assert_eq!(stats.succeeded_pages, 1);
        assert_eq!(stats.failed_pages, 1);
        assert_eq!(stats.skipped_pages, 1);
        assert_eq!(stats.total_attempts, 6);
        assert_eq!(stats.duration_ms, 1234);
    }

    #[test]
    fn batch_result_serialises_to_json() {
        let result = BatchResult::from_outcomes(vec![Outcome::success(0, "# Title", 1)], false);
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"succeeded\":true"));
        assert!(json.contains("\"cancelled\":false"));
    }
}
