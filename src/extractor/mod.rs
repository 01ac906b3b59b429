//! PDF extraction: turn one PDF into an ordered list of page images.
//!
//! The pipeline only sees the [`PdfExtractor`] trait. [`PdfiumExtractor`] is
//! the production implementation; tests substitute their own.

pub mod encode;
pub mod pdfium;
pub mod toolchain;

use crate::error::ExtractionError;
use crate::progress::ProgressCallback;
use async_trait::async_trait;

pub use pdfium::PdfiumExtractor;
pub use toolchain::LibrarySource;

/// One rasterised page.
#[derive(Clone, PartialEq, Eq)]
pub struct RasterImage {
    /// 1-based position in the source document.
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Encoded image bytes.
    pub bytes: Vec<u8>,
    /// File extension matching the encoding, e.g. `"jpg"`.
    pub extension: &'static str,
}

impl std::fmt::Debug for RasterImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterImage")
            .field("index", &self.index)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .field("extension", &self.extension)
            .finish()
    }
}

/// Converts a PDF into page images, one per page, in document order.
///
/// Implementations must either return every page or fail; partial results
/// are never returned. An empty result is reported as
/// [`ExtractionError::NoPages`].
#[async_trait]
pub trait PdfExtractor: Send + Sync {
    async fn extract(
        &self,
        pdf: Vec<u8>,
        progress: ProgressCallback,
    ) -> Result<Vec<RasterImage>, ExtractionError>;
}
