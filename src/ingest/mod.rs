//! Page ingestion pipeline.
//!
//! ## Pipeline stages
//!
//! ```text
//! files ──▶ validate ──▶ lock ──▶ [extract] ──▶ write blobs ──▶ create records
//!  (no I/O before this point)                         │
//!                                    failure ◀────────┘ rollback everything
//! ```
//!
//! Four request shapes exist, chosen by the yearbook's upload mode and the
//! declared role:
//!
//! | mode  | role    | effect                                                  |
//! |-------|---------|---------------------------------------------------------|
//! | image | cover   | replace the cover, old page and blob removed afterwards |
//! | image | content | append pages numbered `count + 1 ..`                    |
//! | pdf   | content | first image → front, last → back, middle → `1..n-2`     |
//! | pdf   | cover   | only with `allow_pdf_cover_upload`; trimmed to one image |
//!
//! Ingestion is all-or-nothing from the caller's point of view: every record
//! and blob a failed request created is removed before the error returns.

pub mod validate;

use crate::config::PipelineConfig;
use crate::error::{ExtractionError, YearbookError};
use crate::extractor::{PdfExtractor, RasterImage};
use crate::locks::YearbookLocks;
use crate::model::{CreatedPages, PageId, PageType, UploadFile, Yearbook, YearbookId, YearbookPage};
use crate::progress::{self, ProgressCallback};
use crate::reference::BlobPath;
use crate::store::{BlobStore, PageStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};
use validate::{validate_submission, ValidatedFile, ValidatedSubmission};

/// One ingestion request.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub yearbook_id: YearbookId,
    pub page_type: PageType,
    pub files: Vec<UploadFile>,
    /// Title for a single created page. Defaults to the role's name.
    pub title: Option<String>,
}

impl IngestRequest {
    pub fn new(yearbook_id: YearbookId, page_type: PageType, files: Vec<UploadFile>) -> Self {
        Self {
            yearbook_id,
            page_type,
            files,
            title: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

/// Summary returned to transports that only need counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PdfSummary {
    pub pages_created: usize,
    pub covers_auto_assigned: bool,
}

/// Artifacts created so far by one request, removed again on failure.
#[derive(Debug, Default)]
struct Rollback {
    pages: Vec<PageId>,
    blobs: Vec<BlobPath>,
}

impl Rollback {
    async fn run(self, store: &dyn PageStore, blobs: &dyn BlobStore) {
        if self.pages.is_empty() && self.blobs.is_empty() {
            return;
        }
        warn!(
            "Rolling back {} page record(s) and {} blob(s)",
            self.pages.len(),
            self.blobs.len()
        );
        for id in self.pages.iter().rev() {
            if let Err(e) = store.delete_page(*id).await {
                warn!("Rollback could not delete page {}: {}", id, e);
            }
        }
        for path in self.blobs.iter().rev() {
            if let Err(e) = blobs.delete(path).await {
                warn!("Rollback could not delete blob {}: {}", path, e);
            }
        }
    }
}

fn default_title(page_type: PageType, number: u32) -> String {
    match page_type {
        PageType::FrontCover => "Front Cover".to_string(),
        PageType::BackCover => "Back Cover".to_string(),
        PageType::Content => format!("Page {number}"),
    }
}

/// Validates uploads and turns them into page records.
pub struct IngestPipeline {
    store: Arc<dyn PageStore>,
    blobs: Arc<dyn BlobStore>,
    extractor: Arc<dyn PdfExtractor>,
    locks: Arc<YearbookLocks>,
    config: Arc<PipelineConfig>,
}

impl IngestPipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn PageStore>,
        blobs: Arc<dyn BlobStore>,
        extractor: Arc<dyn PdfExtractor>,
        locks: Arc<YearbookLocks>,
    ) -> Self {
        Self {
            store,
            blobs,
            extractor,
            locks,
            config,
        }
    }

    /// Ingest a submission without progress reporting.
    pub async fn ingest(&self, request: IngestRequest) -> Result<CreatedPages, YearbookError> {
        self.ingest_with_progress(request, progress::noop()).await
    }

    /// Ingest a submission, reporting progress to `progress`.
    pub async fn ingest_with_progress(
        &self,
        request: IngestRequest,
        progress: ProgressCallback,
    ) -> Result<CreatedPages, YearbookError> {
        let IngestRequest {
            yearbook_id,
            page_type,
            files,
            title,
        } = request;

        let yearbook = self
            .store
            .yearbook(yearbook_id)
            .await?
            .ok_or(YearbookError::YearbookNotFound(yearbook_id))?;

        let submission =
            validate_submission(&self.config, yearbook.upload_type, page_type, files)?;
        info!(
            "Ingesting {} file(s), {} bytes, as {} into yearbook {} ({} mode)",
            submission.files.len(),
            submission.total_bytes,
            page_type,
            yearbook_id,
            yearbook.upload_type
        );
        progress.on_ingest_start(submission.files.len());

        let result = match (submission.is_pdf(), page_type) {
            (true, PageType::Content) => self.ingest_pdf(&yearbook, submission, &progress).await,
            (true, _) => self.ingest_pdf_cover(&yearbook, submission, title, &progress).await,
            (false, PageType::Content) => {
                self.ingest_content(&yearbook, submission, title, &progress).await
            }
            (false, _) => self.ingest_cover(&yearbook, submission, title, &progress).await,
        };

        match &result {
            Ok(created) => {
                info!(
                    "Ingestion into yearbook {} created {} page(s)",
                    yearbook_id,
                    created.pages().len()
                );
                progress.on_ingest_complete(created.pages().len());
            }
            Err(e) => {
                warn!("Ingestion into yearbook {} failed: {}", yearbook_id, e);
                progress.on_ingest_error(&e.to_string());
            }
        }
        result
    }

    // ── Covers ───────────────────────────────────────────────────────────

    async fn ingest_cover(
        &self,
        yearbook: &Yearbook,
        submission: ValidatedSubmission,
        title: Option<String>,
        progress: &ProgressCallback,
    ) -> Result<CreatedPages, YearbookError> {
        let page_type = submission.page_type;
        let file = single(submission)?;
        let path = BlobPath::new_upload(file.kind.extension());

        let _guard = self.locks.cover(yearbook.id, page_type).await;
        let page = self
            .replace_cover(yearbook.id, page_type, path, &file.file.bytes, title)
            .await?;
        progress.on_page_stored(1, 1);
        Ok(CreatedPages::Single { page })
    }

    /// Trim a PDF uploaded for a cover role down to one image.
    ///
    /// A front cover keeps the first extracted page and a back cover the
    /// last one, mirroring the positional mapping of a content PDF where
    /// the last page becomes the back cover.
    async fn ingest_pdf_cover(
        &self,
        yearbook: &Yearbook,
        submission: ValidatedSubmission,
        title: Option<String>,
        progress: &ProgressCallback,
    ) -> Result<CreatedPages, YearbookError> {
        let page_type = submission.page_type;
        let file = single(submission)?;

        let _guard = self.locks.cover(yearbook.id, page_type).await;
        let mut images = self
            .extractor
            .extract(file.file.bytes, progress.clone())
            .await?;
        let total = images.len();
        // Front takes the first page, back the last; the rest is discarded.
        let image = match page_type {
            PageType::BackCover => images.pop(),
            _ => images.into_iter().next(),
        }
        .ok_or(ExtractionError::NoPages)?;
        debug!(
            "Trimmed {}-page PDF to page {} for the {}",
            total, image.index, page_type
        );

        let dir = BlobPath::new_extraction_dir();
        let path = BlobPath::extracted(&dir, image.index, image.extension);
        let page = self
            .replace_cover(yearbook.id, page_type, path, &image.bytes, title)
            .await?;
        progress.on_page_stored(1, 1);
        Ok(CreatedPages::Single { page })
    }

    /// Write the new blob, swap the record, then remove the old blob.
    ///
    /// Caller holds the cover lock for `page_type`.
    async fn replace_cover(
        &self,
        yearbook_id: YearbookId,
        page_type: PageType,
        path: BlobPath,
        bytes: &[u8],
        title: Option<String>,
    ) -> Result<YearbookPage, YearbookError> {
        self.blobs.put(&path, bytes).await?;

        let page = YearbookPage::new(
            yearbook_id,
            page_type,
            0,
            path.image_ref(),
            title.unwrap_or_else(|| default_title(page_type, 0)),
        );
        let old = match self.store.replace_cover(page.clone()).await {
            Ok(old) => old,
            Err(e) => {
                let rollback = Rollback {
                    pages: vec![],
                    blobs: vec![path],
                };
                rollback.run(self.store.as_ref(), self.blobs.as_ref()).await;
                return Err(e.into());
            }
        };

        if let Err(e) = self
            .store
            .set_cover_ref(yearbook_id, page_type, Some(page.image_ref.clone()))
            .await
        {
            warn!("Could not cache {} reference on yearbook {}: {}", page_type, yearbook_id, e);
        }

        if let Some(old) = old {
            info!("Replaced {} {} with {}", page_type, old.id, page.id);
            self.delete_blob_of(&old).await;
        } else {
            info!("Created {} {}", page_type, page.id);
        }
        Ok(page)
    }

    // ── Content ──────────────────────────────────────────────────────────

    async fn ingest_content(
        &self,
        yearbook: &Yearbook,
        submission: ValidatedSubmission,
        title: Option<String>,
        progress: &ProgressCallback,
    ) -> Result<CreatedPages, YearbookError> {
        let _guard = self.locks.numbering(yearbook.id).await;

        let existing = self.content_count(yearbook.id).await?;
        let total = submission.files.len();
        let single_title = if total == 1 { title } else { None };
        let mut rollback = Rollback::default();
        let mut created = Vec::with_capacity(total);

        for (i, file) in submission.files.iter().enumerate() {
            let number = existing + i as u32 + 1;
            let title = single_title
                .clone()
                .unwrap_or_else(|| default_title(PageType::Content, number));
            match self
                .store_content(yearbook.id, file, number, title, &mut rollback)
                .await
            {
                Ok(page) => {
                    progress.on_page_stored(i + 1, total);
                    created.push(page);
                }
                Err(e) => {
                    rollback.run(self.store.as_ref(), self.blobs.as_ref()).await;
                    return Err(e);
                }
            }
        }

        debug!(
            "Appended content pages {}..={} to yearbook {}",
            existing + 1,
            existing + total as u32,
            yearbook.id
        );
        Ok(if created.len() == 1 {
            CreatedPages::Single {
                page: created.remove(0),
            }
        } else {
            CreatedPages::Many { pages: created }
        })
    }

    async fn store_content(
        &self,
        yearbook_id: YearbookId,
        file: &ValidatedFile,
        number: u32,
        title: String,
        rollback: &mut Rollback,
    ) -> Result<YearbookPage, YearbookError> {
        let path = BlobPath::new_upload(file.kind.extension());
        self.blobs.put(&path, &file.file.bytes).await?;
        rollback.blobs.push(path.clone());

        let page = YearbookPage::new(yearbook_id, PageType::Content, number, path.image_ref(), title);
        let page = self.store.insert_page(page).await?;
        rollback.pages.push(page.id);
        Ok(page)
    }

    // ── PDF ──────────────────────────────────────────────────────────────

    async fn ingest_pdf(
        &self,
        yearbook: &Yearbook,
        submission: ValidatedSubmission,
        progress: &ProgressCallback,
    ) -> Result<CreatedPages, YearbookError> {
        let file = single(submission)?;
        let _guard = self.locks.all(yearbook.id).await;

        // Checked under the lock so two concurrent PDFs cannot both pass.
        if !self.store.pages(yearbook.id).await?.is_empty() {
            return Err(YearbookError::PdfAlreadyExists {
                yearbook_id: yearbook.id,
            });
        }

        let images = self
            .extractor
            .extract(file.file.bytes, progress.clone())
            .await?;
        if images.len() < 2 {
            return Err(YearbookError::Validation(format!(
                "a PDF uploaded as content needs at least 2 pages (front and back cover), got {}",
                images.len()
            )));
        }
        info!(
            "Extracted {} page(s) from '{}' for yearbook {}",
            images.len(),
            file.file.file_name,
            yearbook.id
        );

        let dir = BlobPath::new_extraction_dir();
        let mut rollback = Rollback::default();
        match self
            .store_pdf_pages(yearbook.id, &dir, &images, &mut rollback, progress)
            .await
        {
            Ok(pages) => Ok(CreatedPages::Pdf {
                pages_created: pages.len(),
                covers_auto_assigned: true,
                pages,
            }),
            Err(e) => {
                rollback.run(self.store.as_ref(), self.blobs.as_ref()).await;
                self.clear_cover_refs(yearbook.id).await;
                Err(e)
            }
        }
    }

    async fn store_pdf_pages(
        &self,
        yearbook_id: YearbookId,
        dir: &str,
        images: &[RasterImage],
        rollback: &mut Rollback,
        progress: &ProgressCallback,
    ) -> Result<Vec<YearbookPage>, YearbookError> {
        let last = images.len() - 1;
        let mut pages = Vec::with_capacity(images.len());

        for (pos, image) in images.iter().enumerate() {
            let (page_type, number) = match pos {
                0 => (PageType::FrontCover, 0),
                p if p == last => (PageType::BackCover, 0),
                p => (PageType::Content, p as u32),
            };
            let path = BlobPath::extracted(dir, image.index, image.extension);
            self.blobs.put(&path, &image.bytes).await?;
            rollback.blobs.push(path.clone());

            let page = YearbookPage::new(
                yearbook_id,
                page_type,
                number,
                path.image_ref(),
                default_title(page_type, number),
            );
            let page = self.store.insert_page(page).await?;
            rollback.pages.push(page.id);

            if page_type.is_cover() {
                self.store
                    .set_cover_ref(yearbook_id, page_type, Some(page.image_ref.clone()))
                    .await?;
            }
            progress.on_page_stored(pos + 1, images.len());
            pages.push(page);
        }
        Ok(pages)
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    async fn content_count(&self, yearbook_id: YearbookId) -> Result<u32, YearbookError> {
        let pages = self.store.pages(yearbook_id).await?;
        Ok(pages.iter().filter(|p| p.is_content()).count() as u32)
    }

    async fn clear_cover_refs(&self, yearbook_id: YearbookId) {
        for role in [PageType::FrontCover, PageType::BackCover] {
            if let Err(e) = self.store.set_cover_ref(yearbook_id, role, None).await {
                warn!("Could not clear {} reference on {}: {}", role, yearbook_id, e);
            }
        }
    }

    async fn delete_blob_of(&self, page: &YearbookPage) {
        match BlobPath::parse(&page.image_ref) {
            Ok(path) => {
                if let Err(e) = self.blobs.delete(&path).await {
                    warn!("Could not delete blob {} of page {}: {}", path, page.id, e);
                }
            }
            Err(e) => warn!("Page {} has an unusable image reference: {}", page.id, e),
        }
    }
}

fn single(submission: ValidatedSubmission) -> Result<ValidatedFile, YearbookError> {
    submission
        .files
        .into_iter()
        .next()
        .ok_or_else(|| YearbookError::Internal("validated submission has no file".into()))
}

impl PdfSummary {
    /// The counts of a PDF ingestion; `None` for image uploads.
    pub fn of(created: &CreatedPages) -> Option<Self> {
        match created {
            CreatedPages::Pdf {
                pages_created,
                covers_auto_assigned,
                ..
            } => Some(PdfSummary {
                pages_created: *pages_created,
                covers_auto_assigned: *covers_auto_assigned,
            }),
            _ => None,
        }
    }
}
