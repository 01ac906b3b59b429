//! Shared fixtures for the integration tests.
//!
//! Nothing here needs pdfium: PDF extraction is replaced by
//! [`ScriptedExtractor`], which returns a fixed list of page images.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;
use yearbook_pages::error::StoreError;
use yearbook_pages::store::BlobReader;
use yearbook_pages::{
    BlobPath, BlobStore, ExtractionError, MemoryBlobStore, MemoryEntitlements, MemoryPageStore,
    PageStore, PdfExtractor, PipelineConfig, ProgressCallback, RasterImage, UploadFile,
    UploadType, Yearbook, YearbookService,
};

/// A tiny valid PNG with a distinguishing colour.
pub fn png(shade: u8) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, image::Rgb([shade, 0, 0])));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn png_upload(name: &str, shade: u8) -> UploadFile {
    UploadFile::new(name, "image/png", png(shade))
}

/// Bytes that pass the `%PDF` magic check. Only the scripted extractor
/// ever sees them.
pub fn pdf_upload(name: &str) -> UploadFile {
    UploadFile::new(name, "application/pdf", b"%PDF-1.7\n%fake\n".to_vec())
}

/// Page image whose bytes encode its 1-based index.
pub fn raster(index: usize) -> RasterImage {
    RasterImage {
        index,
        width: 2,
        height: 2,
        bytes: format!("page-{index}").into_bytes(),
        extension: "jpg",
    }
}

/// Extractor returning a fixed outcome, counting its calls.
pub struct ScriptedExtractor {
    outcome: Result<Vec<RasterImage>, ExtractionError>,
    pub calls: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn pages(n: usize) -> Arc<Self> {
        Arc::new(Self {
            outcome: Ok((1..=n).map(raster).collect()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(err: ExtractionError) -> Arc<Self> {
        Arc::new(Self {
            outcome: Err(err),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PdfExtractor for ScriptedExtractor {
    async fn extract(
        &self,
        _pdf: Vec<u8>,
        progress: ProgressCallback,
    ) -> Result<Vec<RasterImage>, ExtractionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let images = self.outcome.clone()?;
        progress.on_extraction_start(images.len());
        for img in &images {
            progress.on_page_extracted(img.index, images.len());
        }
        Ok(images)
    }
}

/// Blob store that fails the `n`-th `put` (1-based) and delegates the rest.
pub struct FlakyBlobStore {
    inner: MemoryBlobStore,
    fail_on: usize,
    puts: AtomicUsize,
}

impl FlakyBlobStore {
    pub fn failing_on(fail_on: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemoryBlobStore::new(),
            fail_on,
            puts: AtomicUsize::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn put(&self, path: &BlobPath, bytes: &[u8]) -> Result<(), StoreError> {
        let n = self.puts.fetch_add(1, Ordering::SeqCst) + 1;
        if n == self.fail_on {
            return Err(StoreError::Internal(format!("disk full writing {path}")));
        }
        self.inner.put(path, bytes).await
    }

    async fn open(&self, path: &BlobPath) -> Result<BlobReader, StoreError> {
        self.inner.open(path).await
    }

    async fn delete(&self, path: &BlobPath) -> Result<bool, StoreError> {
        self.inner.delete(path).await
    }

    async fn exists(&self, path: &BlobPath) -> Result<bool, StoreError> {
        self.inner.exists(path).await
    }
}

/// A service over in-memory collaborators, with handles kept for asserts.
pub struct Harness {
    pub service: YearbookService,
    pub store: Arc<MemoryPageStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub users: Arc<MemoryEntitlements>,
}

impl Harness {
    pub fn new(extractor: Arc<dyn PdfExtractor>) -> Self {
        Self::with(PipelineConfig::default(), extractor, Arc::new(MemoryBlobStore::new()))
    }

    pub fn with(
        config: PipelineConfig,
        extractor: Arc<dyn PdfExtractor>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let store = Arc::new(MemoryPageStore::new());
        let users = Arc::new(MemoryEntitlements::new());
        let service = YearbookService::new(
            config,
            store.clone(),
            blobs.clone(),
            users.clone(),
            extractor,
        );
        Self {
            service,
            store,
            blobs,
            users,
        }
    }

    /// A fresh yearbook in the given upload mode.
    pub async fn yearbook(&self, upload_type: UploadType) -> Yearbook {
        let mut yb = Yearbook::new(Uuid::new_v4(), 2024, "Class of 2024");
        yb.upload_type = upload_type;
        self.store.insert_yearbook(yb).await.unwrap()
    }

    /// Content page numbers in order, asserting they are exactly 1..=N.
    pub async fn assert_contiguous(&self, yearbook_id: Uuid) -> usize {
        let content = self
            .service
            .ordering()
            .content_pages(yearbook_id)
            .await
            .unwrap();
        let numbers: Vec<u32> = content.iter().map(|p| p.page_number).collect();
        let expected: Vec<u32> = (1..=content.len() as u32).collect();
        assert_eq!(numbers, expected, "content numbering has a gap or duplicate");
        content.len()
    }
}
