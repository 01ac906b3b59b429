//! Request/response entry points over one shared set of collaborators.
//!
//! [`YearbookService`] wires the pipeline, the ordering engine, the gateway,
//! setup and the table of contents to the same stores and the same lock
//! registry. A transport layer (HTTP handler, CLI) only needs this type.

use crate::config::PipelineConfig;
use crate::error::{AccessDenied, YearbookError};
use crate::extractor::{PdfExtractor, PdfiumExtractor};
use crate::gateway::{AccessGateway, ServedImage};
use crate::ingest::{IngestPipeline, IngestRequest};
use crate::locks::YearbookLocks;
use crate::model::{Caller, CreatedPages, PageId, PageType, YearbookId, YearbookPage};
use crate::ordering::{DeleteOutcome, OrderingEngine};
use crate::progress::ProgressCallback;
use crate::setup::YearbookSetup;
use crate::store::{BlobStore, EntitlementLookup, PageStore};
use crate::toc::TocService;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReorderRequest {
    pub page_id: PageId,
    pub new_page_number: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub page_a_id: PageId,
    pub page_b_id: PageId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    pub page_a: YearbookPage,
    pub page_b: YearbookPage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub page_id: PageId,
}

/// Confirmation of a delete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub deleted_page_id: PageId,
    pub page_type: PageType,
    /// Content pages renumbered to close the gap.
    pub shifted: usize,
}

impl From<DeleteOutcome> for DeleteResponse {
    fn from(o: DeleteOutcome) -> Self {
        Self {
            deleted_page_id: o.deleted.id,
            page_type: o.deleted.page_type,
            shifted: o.shifted,
        }
    }
}

/// The full system behind one set of collaborators.
pub struct YearbookService {
    config: Arc<PipelineConfig>,
    store: Arc<dyn PageStore>,
    ingest: IngestPipeline,
    ordering: OrderingEngine,
    gateway: AccessGateway,
    setup: YearbookSetup,
    toc: TocService,
}

impl YearbookService {
    pub fn new(
        config: PipelineConfig,
        store: Arc<dyn PageStore>,
        blobs: Arc<dyn BlobStore>,
        entitlements: Arc<dyn EntitlementLookup>,
        extractor: Arc<dyn PdfExtractor>,
    ) -> Self {
        let config = Arc::new(config);
        let locks = Arc::new(YearbookLocks::new());
        Self {
            ingest: IngestPipeline::new(
                config.clone(),
                store.clone(),
                blobs.clone(),
                extractor,
                locks.clone(),
            ),
            ordering: OrderingEngine::new(store.clone(), blobs.clone(), locks.clone()),
            gateway: AccessGateway::new(config.clone(), store.clone(), blobs, entitlements),
            setup: YearbookSetup::new(store.clone(), locks),
            toc: TocService::new(store.clone()),
            store,
            config,
        }
    }

    /// Same as [`new`](Self::new) with the pdfium extractor from `config`.
    pub fn with_pdfium(
        config: PipelineConfig,
        store: Arc<dyn PageStore>,
        blobs: Arc<dyn BlobStore>,
        entitlements: Arc<dyn EntitlementLookup>,
    ) -> Self {
        let extractor = Arc::new(PdfiumExtractor::new(&config));
        Self::new(config, store, blobs, entitlements, extractor)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn ordering(&self) -> &OrderingEngine {
        &self.ordering
    }

    pub fn gateway(&self) -> &AccessGateway {
        &self.gateway
    }

    pub fn setup(&self) -> &YearbookSetup {
        &self.setup
    }

    pub fn toc(&self) -> &TocService {
        &self.toc
    }

    // ── Entry points ─────────────────────────────────────────────────────

    pub async fn ingest(&self, request: IngestRequest) -> Result<CreatedPages, YearbookError> {
        self.ingest.ingest(request).await
    }

    pub async fn ingest_with_progress(
        &self,
        request: IngestRequest,
        progress: ProgressCallback,
    ) -> Result<CreatedPages, YearbookError> {
        self.ingest.ingest_with_progress(request, progress).await
    }

    pub async fn reorder(&self, request: ReorderRequest) -> Result<YearbookPage, YearbookError> {
        let yearbook_id = self.yearbook_of(request.page_id).await?;
        self.ordering
            .reorder(yearbook_id, request.page_id, request.new_page_number)
            .await
    }

    /// Both pages must belong to the same yearbook.
    pub async fn swap(&self, request: SwapRequest) -> Result<SwapResponse, YearbookError> {
        let yearbook_id = self.yearbook_of(request.page_a_id).await?;
        let (page_a, page_b) = self
            .ordering
            .swap(yearbook_id, request.page_a_id, request.page_b_id)
            .await?;
        Ok(SwapResponse { page_a, page_b })
    }

    pub async fn delete(&self, request: DeleteRequest) -> Result<DeleteResponse, YearbookError> {
        let yearbook_id = self.yearbook_of(request.page_id).await?;
        Ok(self
            .ordering
            .delete_page(yearbook_id, request.page_id)
            .await?
            .into())
    }

    pub async fn resolve(
        &self,
        reference: &str,
        caller: &Caller,
    ) -> Result<ServedImage, AccessDenied> {
        self.gateway.resolve(reference, caller).await
    }

    /// All pages of a yearbook: front cover, content in order, back cover.
    pub async fn pages(&self, yearbook_id: YearbookId) -> Result<Vec<YearbookPage>, YearbookError> {
        let content = self.ordering.content_pages(yearbook_id).await?;
        let all = self.store.pages(yearbook_id).await?;
        let cover = |role: PageType| all.iter().find(|p| p.page_type == role).cloned();
        Ok(cover(PageType::FrontCover)
            .into_iter()
            .chain(content)
            .chain(cover(PageType::BackCover))
            .collect())
    }

    async fn yearbook_of(&self, page_id: PageId) -> Result<YearbookId, YearbookError> {
        self.store
            .page(page_id)
            .await?
            .map(|p| p.yearbook_id)
            .ok_or(YearbookError::PageNotFound(page_id))
    }
}
