//! pdfium-backed [`PdfExtractor`].
//!
//! pdfium keeps thread-local state and blocks for the whole render, so the
//! work runs inside `tokio::task::spawn_blocking`, bounded by
//! `tokio::time::timeout`. Pages are rendered with the longest edge capped
//! at `max_rendered_pixels` and encoded as JPEG.
//!
//! A timed-out extraction is reported immediately; the blocking thread keeps
//! running until pdfium returns, and its output is discarded.

use super::encode::{encode_jpeg, EXTRACTED_EXTENSION};
use super::toolchain::LibrarySource;
use super::{PdfExtractor, RasterImage};
use crate::config::PipelineConfig;
use crate::error::ExtractionError;
use crate::progress::ProgressCallback;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Rasterises PDFs through the pdfium library.
#[derive(Debug, Clone)]
pub struct PdfiumExtractor {
    source: LibrarySource,
    max_pixels: u32,
    jpeg_quality: u8,
    timeout: Duration,
}

impl PdfiumExtractor {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            source: LibrarySource::resolve(config.pdfium_library_path.as_deref()),
            max_pixels: config.max_rendered_pixels,
            jpeg_quality: config.jpeg_quality,
            timeout: Duration::from_secs(config.extraction_timeout_secs),
        }
    }

    pub fn source(&self) -> &LibrarySource {
        &self.source
    }

    /// Check that pdfium can be loaded on this host.
    pub fn probe(&self) -> Result<(), ExtractionError> {
        self.source.bind().map(|_| ())
    }
}

#[async_trait]
impl PdfExtractor for PdfiumExtractor {
    async fn extract(
        &self,
        pdf: Vec<u8>,
        progress: ProgressCallback,
    ) -> Result<Vec<RasterImage>, ExtractionError> {
        let source = self.source.clone();
        let max_pixels = self.max_pixels;
        let quality = self.jpeg_quality;
        let size = pdf.len();

        info!("Extracting PDF ({} bytes) via {}", size, source);
        let task = tokio::task::spawn_blocking(move || {
            extract_blocking(&source, pdf, max_pixels, quality, &progress)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined
                .map_err(|e| ExtractionError::Internal(format!("Extraction task panicked: {e}")))?,
            Err(_) => {
                warn!("PDF extraction timed out after {:?}", self.timeout);
                Err(ExtractionError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Blocking implementation of page extraction.
fn extract_blocking(
    source: &LibrarySource,
    pdf: Vec<u8>,
    max_pixels: u32,
    quality: u8,
    progress: &ProgressCallback,
) -> Result<Vec<RasterImage>, ExtractionError> {
    let pdfium = source.bind()?;

    let document = pdfium.load_pdf_from_byte_vec(pdf, None).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            ExtractionError::Encrypted
        } else {
            ExtractionError::Corrupt(err_str)
        }
    })?;

    let pages = document.pages();
    let total = pages.len() as usize;
    if total == 0 {
        return Err(ExtractionError::NoPages);
    }
    info!("PDF loaded: {} pages", total);
    progress.on_extraction_start(total);

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut out = Vec::with_capacity(total);
    for (i, page) in pages.iter().enumerate() {
        let index = i + 1;
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| ExtractionError::Rasterisation {
                page: index,
                detail: format!("{:?}", e),
            })?;
        let image = bitmap.as_image();
        let bytes = encode_jpeg(&image, quality).map_err(|e| ExtractionError::Rasterisation {
            page: index,
            detail: e.to_string(),
        })?;
        debug!(
            "Rendered page {} → {}x{} px, {} bytes",
            index,
            image.width(),
            image.height(),
            bytes.len()
        );
        progress.on_page_extracted(index, total);
        out.push(RasterImage {
            index,
            width: image.width(),
            height: image.height(),
            bytes,
            extension: EXTRACTED_EXTENSION,
        });
    }

    Ok(out)
}
