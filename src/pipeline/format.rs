//! Assemble a [`BatchResult`] into one text document.
//!
//! Successful pages are copied verbatim. Failed pages become an error block
//! naming the 1-based page number and the error text, so a reader can tell
//! exactly which pages are missing and why. Blocks are joined with a blank
//! line.

use crate::config::OutputShape;
use crate::output::{BatchResult, Outcome};

/// Separator placed between consecutive page blocks.
pub const PAGE_SEPARATOR: &str = "\n\n";

/// Renders batch results in a given [`OutputShape`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultFormatter {
    shape: OutputShape,
}

impl ResultFormatter {
    pub fn new(shape: OutputShape) -> Self {
        Self { shape }
    }

    /// Format every outcome of `result`, in order.
    pub fn format(&self, result: &BatchResult) -> String {
        result
            .iter()
            .map(|outcome| self.format_outcome(outcome))
            .collect::<Vec<_>>()
            .join(PAGE_SEPARATOR)
    }

    fn format_outcome(&self, outcome: &Outcome) -> String {
        if outcome.succeeded {
            return outcome.text.clone();
        }
        match self.shape {
            OutputShape::RichText => rich_error_block(outcome.page_num(), &outcome.text),
            OutputShape::PlainText => plain_error_block(outcome.page_num(), &outcome.text),
        }
    }
}

/// Shorthand for `ResultFormatter::new(shape).format(result)`.
pub fn format(result: &BatchResult, shape: OutputShape) -> String {
    ResultFormatter::new(shape).format(result)
}

fn rich_error_block(page_num: usize, error: &str) -> String {
    let fence = "`".repeat(longest_backtick_run(error).max(2) + 1);
    let mut block = format!("> **Error processing page {page_num}:**\n>\n> {fence}\n");
    for line in error.lines() {
        block.push_str("> ");
        block.push_str(line);
        block.push('\n');
    }
    block.push_str("> ");
    block.push_str(&fence);
    block
}

/// A fence must be longer than any backtick run inside it.
fn longest_backtick_run(text: &str) -> usize {
    text.split(|c: char| c != '`').map(str::len).max().unwrap_or(0)
}

fn plain_error_block(page_num: usize, error: &str) -> String {
    format!("--- Error processing page {page_num} ---\n\n{error}\n\n---")
}
