//! Configuration for the page pipeline and the access gateway.
//!
//! Every limit and knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. The ingestion pipeline, the extractor and the
//! gateway all read from the same value, so one config describes one
//! deployment.

use crate::error::YearbookError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;

/// Configuration shared by ingestion, extraction and access.
///
/// # Example
/// ```rust
/// use yearbook_pages::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .storage_root("/srv/yearbooks")
///     .max_image_bytes(10 * 1024 * 1024)
///     .extraction_timeout_secs(60)
///     .build()
///     .unwrap();
/// assert_eq!(config.extraction_timeout_secs, 60);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory all page blobs live under. Default: `uploads/yearbooks`.
    ///
    /// The gateway refuses any reference that would resolve outside it.
    pub storage_root: PathBuf,

    /// Per-file cap for raster images. Default: 20 MiB.
    pub max_image_bytes: u64,

    /// Per-file cap for PDFs. Default: 50 MiB.
    pub max_pdf_bytes: u64,

    /// Cap on the sum of all files in one submission. Default: 100 MiB.
    pub max_total_bytes: u64,

    /// Maximum number of files in one content upload. Default: 50.
    pub max_content_files: usize,

    /// Longest edge of an extracted page image in pixels. Default: 2000.
    ///
    /// Caps memory independent of the physical page size; an A3 scan at
    /// high DPI would otherwise allocate hundreds of megabytes per page.
    pub max_rendered_pixels: u32,

    /// JPEG quality for extracted pages (1–100). Default: 85.
    pub jpeg_quality: u8,

    /// Upper bound on one PDF extraction, in seconds. Default: 120.
    pub extraction_timeout_secs: u64,

    /// Explicit path to the pdfium shared library (file or directory).
    /// Falls back to `PDFIUM_LIB_PATH`, then the system library.
    pub pdfium_library_path: Option<PathBuf>,

    /// Accept PDFs tagged `front_cover`/`back_cover` in pdf mode and trim
    /// them to a single cover image. Default: false.
    pub allow_pdf_cover_upload: bool,

    /// `Cache-Control` value attached to served images.
    pub cache_control: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("uploads/yearbooks"),
            max_image_bytes: 20 * MIB,
            max_pdf_bytes: 50 * MIB,
            max_total_bytes: 100 * MIB,
            max_content_files: 50,
            max_rendered_pixels: 2000,
            jpeg_quality: 85,
            extraction_timeout_secs: 120,
            pdfium_library_path: None,
            allow_pdf_cover_upload: false,
            cache_control: "private, max-age=3600".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = root.into();
        self
    }

    pub fn max_image_bytes(mut self, n: u64) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn max_pdf_bytes(mut self, n: u64) -> Self {
        self.config.max_pdf_bytes = n;
        self
    }

    pub fn max_total_bytes(mut self, n: u64) -> Self {
        self.config.max_total_bytes = n;
        self
    }

    pub fn max_content_files(mut self, n: usize) -> Self {
        self.config.max_content_files = n;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q;
        self
    }

    pub fn extraction_timeout_secs(mut self, secs: u64) -> Self {
        self.config.extraction_timeout_secs = secs;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    pub fn allow_pdf_cover_upload(mut self, v: bool) -> Self {
        self.config.allow_pdf_cover_upload = v;
        self
    }

    pub fn cache_control(mut self, v: impl Into<String>) -> Self {
        self.config.cache_control = v.into();
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, YearbookError> {
        let c = &self.config;
        if c.max_image_bytes == 0 || c.max_pdf_bytes == 0 || c.max_total_bytes == 0 {
            return Err(YearbookError::InvalidConfig(
                "size limits must be greater than zero".into(),
            ));
        }
        if c.max_image_bytes > c.max_total_bytes || c.max_pdf_bytes > c.max_total_bytes {
            return Err(YearbookError::InvalidConfig(format!(
                "per-file limits ({} / {} bytes) cannot exceed the total limit ({} bytes)",
                c.max_image_bytes, c.max_pdf_bytes, c.max_total_bytes
            )));
        }
        if c.max_content_files == 0 {
            return Err(YearbookError::InvalidConfig(
                "max_content_files must be ≥ 1".into(),
            ));
        }
        if !(1..=100).contains(&c.jpeg_quality) {
            return Err(YearbookError::InvalidConfig(format!(
                "JPEG quality must be 1–100, got {}",
                c.jpeg_quality
            )));
        }
        if c.extraction_timeout_secs == 0 {
            return Err(YearbookError::InvalidConfig(
                "extraction timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
