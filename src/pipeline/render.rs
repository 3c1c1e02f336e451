//! PDF rasterisation: render selected pages to PNG page units via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which is
//! CPU-bound and not async-aware. `tokio::task::spawn_blocking` moves the
//! work onto the blocking pool so the Tokio workers that drive the LLM calls
//! never stall during rendering.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Page sizes vary wildly: an A0 poster at 300 DPI would be a
//! 10,000 × 14,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, keeping memory and upload size bounded.

use crate::config::DocumentConfig;
use crate::error::PdfAssistError;
use crate::page::PageUnit;
use image::ImageFormat;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PDF points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// Rasterise the selected pages of a PDF into PNG page units.
///
/// Units keep the page's 0-based position in the *document*, so a selection
/// of pages 3–4 yields units with indices 2 and 3.
pub async fn render_pages(
    pdf_path: &Path,
    config: &DocumentConfig,
) -> Result<Vec<PageUnit>, PdfAssistError> {
    let path = pdf_path.to_path_buf();
    let config = config.clone();

    tokio::task::spawn_blocking(move || render_pages_blocking(&path, &config))
        .await
        .map_err(|e| PdfAssistError::Internal(format!("Render task panicked: {}", e)))?
}

/// Blocking implementation of page rendering.
fn render_pages_blocking(
    pdf_path: &Path,
    config: &DocumentConfig,
) -> Result<Vec<PageUnit>, PdfAssistError> {
    let pdfium = bind_pdfium()?;
    let password = config.password.as_deref();

    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            if password.is_some() {
                PdfAssistError::WrongPassword {
                    path: pdf_path.to_path_buf(),
                }
            } else {
                PdfAssistError::PasswordRequired {
                    path: pdf_path.to_path_buf(),
                }
            }
        } else {
            PdfAssistError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    let indices = config.pages.to_indices(total_pages);
    if indices.is_empty() {
        return Err(PdfAssistError::NoPagesSelected { total: total_pages });
    }
    info!(
        "PDF loaded: {} pages, rendering {} at {} DPI",
        total_pages,
        indices.len(),
        config.dpi
    );

    let max_px = config.max_rendered_pixels as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(config.dpi as f32 / POINTS_PER_INCH)
        .set_maximum_width(max_px)
        .set_maximum_height(max_px);

    let mut units = Vec::with_capacity(indices.len());
    for idx in indices {
        let page = pages
            .get(idx as u16)
            .map_err(|e| PdfAssistError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            PdfAssistError::RasterisationFailed {
                page: idx + 1,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| PdfAssistError::RasterisationFailed {
                page: idx + 1,
                detail: format!("PNG encoding failed: {}", e),
            })?;

        debug!(
            "Rendered page {} → {}x{} px, {} bytes",
            idx + 1,
            image.width(),
            image.height(),
            png.len()
        );
        units.push(PageUnit::new(idx, png));
    }

    Ok(units)
}

/// Bind to pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the
/// system library.
fn bind_pdfium() -> Result<Pdfium, PdfAssistError> {
    let bindings = match std::env::var_os("PDFIUM_LIB_PATH") {
        Some(p) => Pdfium::bind_to_library(library_path(PathBuf::from(p))),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| PdfAssistError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

/// Accept either the library file itself or the directory containing it.
fn library_path(p: PathBuf) -> PathBuf {
    if p.is_dir() {
        Pdfium::pdfium_platform_library_name_at_path(&p)
    } else {
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_path_keeps_explicit_file() {
        let p = PathBuf::from("/opt/pdfium/lib/libpdfium.so");
        assert_eq!(library_path(p.clone()), p);
    }

    #[test]
    fn library_path_expands_directory() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = library_path(dir.path().to_path_buf());
        assert!(resolved.starts_with(dir.path()));
        assert_ne!(resolved, dir.path());
    }
}
