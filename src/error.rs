//! Error types for the edgequake-pdf-assist library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`PdfAssistError`] is **fatal**: the document cannot be prepared at all
//!   (bad input file, wrong password, provider not configured). Returned as
//!   `Err(PdfAssistError)` from the top-level `process*` functions. The batch
//!   core itself never produces one.
//!
//! * [`TranscribeError`] is returned by a [`crate::RemoteTranscriber`]
//!   implementation when a single call fails.
//!
//! * [`AttemptError`] is **transient**: one attempt of one page failed. It
//!   never leaves the retrying worker; after the last retry its message
//!   becomes the text of a failed [`crate::Outcome`].

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the edgequake-pdf-assist library.
///
/// Page-level failures are stored in [`crate::Outcome`] rather than
/// propagated here.
#[derive(Debug, Error)]
pub enum PdfAssistError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Input file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is neither a PDF nor a supported image.
    #[error("Unsupported input '{path}': not a PDF or a PNG/JPEG/GIF/WebP image\nFirst bytes: {magic:?}")]
    UnsupportedInput { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// The page selection matched no page of the document.
    #[error("No page selected (document has {total} pages)")]
    NoPagesSelected { total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, place libpdfium next to the\n\
working directory, or install pdfium as a system library.\n"
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Assistant profiles ────────────────────────────────────────────────
    /// An assistant profile could not be read or parsed.
    #[error("Invalid assistant profile '{path}': {detail}")]
    InvalidAssistant { path: PathBuf, detail: String },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A failed call reported by a [`crate::RemoteTranscriber`].
#[derive(Debug, Clone, Error)]
pub enum TranscribeError {
    /// The completion service answered with an error.
    #[error("{0}")]
    Api(String),

    /// The request could not be built (e.g. image encoding failed).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Why a single attempt of a single page failed.
///
/// `Remote` is a failure the transcriber *reported*; the other variants are
/// failures *raised* around the call. Both kinds take the same retry path,
/// they only differ in the progress message shown to the user.
#[derive(Debug, Clone, Error)]
pub enum AttemptError {
    /// The transcriber returned an error.
    #[error("{0}")]
    Remote(#[from] TranscribeError),

    /// The page's image bytes could not be loaded.
    #[error("Failed to load page image: {0}")]
    Load(String),

    /// The transcriber panicked while handling the page.
    #[error("Transcriber panicked: {0}")]
    Panicked(String),

    /// The attempt exceeded the configured per-attempt timeout.
    #[error("Transcription timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },
}

impl AttemptError {
    /// `true` when the failure was reported by the transcriber itself.
    pub fn is_reported(&self) -> bool {
        matches!(self, AttemptError::Remote(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_pages_selected_display() {
        let e = PdfAssistError::NoPagesSelected { total: 4 };
        assert!(e.to_string().contains("4 pages"), "got: {e}");
    }

    #[test]
    fn remote_attempt_error_keeps_message() {
        let e: AttemptError = TranscribeError::Api("HTTP 503".into()).into();
        assert_eq!(e.to_string(), "HTTP 503");
        assert!(e.is_reported());
    }

    #[test]
    fn raised_attempt_errors_are_not_reported() {
        assert!(!AttemptError::Panicked("boom".into()).is_reported());
        assert!(!AttemptError::Timeout { elapsed_ms: 30_000 }.is_reported());
        assert!(!AttemptError::Load("missing".into()).is_reported());
    }

    #[test]
    fn timeout_display() {
        let e = AttemptError::Timeout { elapsed_ms: 5000 };
        assert!(e.to_string().contains("5000ms"));
    }

    #[test]
    fn unsupported_input_display() {
        let e = PdfAssistError::UnsupportedInput {
            path: PathBuf::from("/tmp/notes.docx"),
            magic: *b"PK\x03\x04",
        };
        assert!(e.to_string().contains("notes.docx"));
        assert!(e.to_string().contains("PNG/JPEG/GIF/WebP"));
    }
}
