//! Page units: one page image plus its position in the source document.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Where a page's image bytes live.
///
/// Rendered pages are kept in memory; single-image inputs and
/// caller-supplied image lists can stay on disk and are read on demand,
/// so a large batch does not hold every image in memory before dispatch.
#[derive(Clone)]
pub enum PageSource {
    /// Image bytes already in memory (PNG or JPEG).
    Bytes(Arc<[u8]>),
    /// Image file on disk, read each time the page is attempted.
    File(PathBuf),
}

impl PageSource {
    /// Convert the source to raw image bytes.
    pub async fn load(&self) -> std::io::Result<Arc<[u8]>> {
        match self {
            PageSource::Bytes(bytes) => Ok(Arc::clone(bytes)),
            PageSource::File(path) => Ok(tokio::fs::read(path).await?.into()),
        }
    }
}

impl fmt::Debug for PageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            PageSource::File(p) => write!(f, "File({})", p.display()),
        }
    }
}

impl From<Vec<u8>> for PageSource {
    fn from(bytes: Vec<u8>) -> Self {
        PageSource::Bytes(bytes.into())
    }
}

impl From<PathBuf> for PageSource {
    fn from(path: PathBuf) -> Self {
        PageSource::File(path)
    }
}

/// One page of a batch.
///
/// `index` is the 0-based position in the original document and is the only
/// key used to restore page order after concurrent processing.
#[derive(Debug, Clone)]
pub struct PageUnit {
    index: usize,
    source: PageSource,
}

impl PageUnit {
    pub fn new(index: usize, source: impl Into<PageSource>) -> Self {
        Self {
            index,
            source: source.into(),
        }
    }

    /// 0-based position in the original document.
    pub fn index(&self) -> usize {
        self.index
    }

    /// 1-based page number, as shown to users.
    pub fn page_num(&self) -> usize {
        self.index + 1
    }

    pub fn source(&self) -> &PageSource {
        &self.source
    }

    /// Build units from an ordered list of sources, numbering them `0..n`.
    pub fn from_sources<I, S>(sources: I) -> Vec<PageUnit>
    where
        I: IntoIterator<Item = S>,
        S: Into<PageSource>,
    {
        sources
            .into_iter()
            .enumerate()
            .map(|(index, source)| PageUnit::new(index, source))
            .collect()
    }
}
