//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! ## Why download to a temp file?
//!
//! pdfium requires a file-system path and cannot stream from a byte buffer.
//! Downloading to a `TempDir` gives it a path to open, and the directory is
//! removed when the `ResolvedInput` is dropped. The first bytes decide the
//! kind of document: `%PDF` goes to the rasteriser, a PNG/JPEG/GIF/WebP image
//! becomes a single page, anything else is rejected up front.

use crate::error::PdfAssistError;
use crate::pipeline::encode;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// What the resolved file contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    /// A single raster image, treated as a one-page document.
    Image,
}

/// The resolved input, either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local { path: PathBuf, kind: InputKind },
    /// Input was a URL; the body was written to a temp directory that lives
    /// as long as this value.
    Downloaded {
        path: PathBuf,
        kind: InputKind,
        _temp_dir: TempDir,
    },
}

impl ResolvedInput {
    /// Path of the local file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local { path, .. } => path,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    pub fn kind(&self) -> InputKind {
        match self {
            ResolvedInput::Local { kind, .. } | ResolvedInput::Downloaded { kind, .. } => *kind,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Classify a document by its leading bytes.
///
/// Returns `None` for anything that is neither a PDF nor a supported image.
pub fn detect_kind(head: &[u8]) -> Option<InputKind> {
    if head.starts_with(b"%PDF") {
        Some(InputKind::Pdf)
    } else if encode::sniff_mime(head).is_some() {
        Some(InputKind::Image)
    } else {
        None
    }
}

/// Resolve the input string to a local file.
///
/// URLs are downloaded to a temporary directory; local paths are checked for
/// existence and read permission.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, PdfAssistError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input).await
    }
}

async fn resolve_local(path_str: &str) -> Result<ResolvedInput, PdfAssistError> {
    let path = PathBuf::from(path_str);

    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PdfAssistError::PermissionDenied { path });
        }
        Err(_) => return Err(PdfAssistError::FileNotFound { path }),
    };

    let kind = classify(&path, &bytes)?;
    debug!("Resolved local {:?}: {}", kind, path.display());
    Ok(ResolvedInput::Local { path, kind })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, PdfAssistError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| PdfAssistError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            PdfAssistError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let temp_dir = TempDir::new().map_err(|e| PdfAssistError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));
    let kind = classify(&file_path, &bytes)?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| PdfAssistError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        kind,
        _temp_dir: temp_dir,
    })
}

fn classify(path: &Path, bytes: &[u8]) -> Result<InputKind, PdfAssistError> {
    detect_kind(bytes).ok_or_else(|| {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        PdfAssistError::UnsupportedInput {
            path: path.to_path_buf(),
            magic,
        }
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}
