//! # yearbook-pages
//!
//! Paginated digital yearbooks: ingest uploaded images or a PDF into an
//! ordered, gap-free sequence of pages, keep that order intact through
//! reorder/swap/delete, and serve every page image through an entitlement
//! check.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Validate  count, type (magic bytes), per-file and total size
//!  ├─ 2. Extract   PDF → one JPEG per page via pdfium (spawn_blocking + timeout)
//!  ├─ 3. Store     blobs first, then page records; rollback on any failure
//!  └─ 4. Number    covers outside the sequence, content pages 1..N
//!
//! read
//!  │
//!  ├─ 1. Normalise reference (allow-listed segments only, no traversal)
//!  ├─ 2. Locate    page + yearbook
//!  └─ 3. Decide    front cover → super admin → owning school → purchase
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use yearbook_pages::{
//!     FsBlobStore, IngestRequest, MemoryEntitlements, MemoryPageStore, PageType,
//!     PipelineConfig, UploadFile, YearbookService,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::builder().storage_root("uploads/yearbooks").build()?;
//!     let service = YearbookService::with_pdfium(
//!         config.clone(),
//!         Arc::new(MemoryPageStore::new()),
//!         Arc::new(FsBlobStore::new(&config.storage_root)),
//!         Arc::new(MemoryEntitlements::new()),
//!     );
//!
//!     let school = uuid::Uuid::new_v4();
//!     let yb = service.setup().create_yearbook(school, 2024, "Class of 2024").await?;
//!     let cover = UploadFile::new("cover.png", "image/png", std::fs::read("cover.png")?);
//!     let created = service
//!         .ingest(IngestRequest::new(yb.id, PageType::FrontCover, vec![cover]))
//!         .await?;
//!     println!("{} page(s) created", created.pages().len());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `yearbook` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! yearbook-pages = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod extractor;
pub mod gateway;
pub mod ingest;
pub mod locks;
pub mod model;
pub mod ordering;
pub mod progress;
pub mod reference;
pub mod service;
pub mod setup;
pub mod store;
pub mod toc;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{AccessDenied, ErrorKind, ExtractionError, StoreError, YearbookError};
pub use extractor::{PdfExtractor, PdfiumExtractor, RasterImage};
pub use gateway::{AccessGateway, Decision, Grant, ServedImage};
pub use ingest::{IngestPipeline, IngestRequest, PdfSummary};
pub use model::{
    Caller, CreatedPages, Identity, Orientation, PageType, Role, TableOfContentsItem, UploadFile,
    UploadType, Yearbook, YearbookPage,
};
pub use ordering::{BatchOutcome, DeleteOutcome, Direction, Edit, OrderingEngine};
pub use progress::{IngestProgressCallback, NoopProgressCallback, ProgressCallback};
pub use reference::BlobPath;
pub use service::{
    DeleteRequest, DeleteResponse, ReorderRequest, SwapRequest, SwapResponse, YearbookService,
};
pub use setup::{Configure, YearbookSetup};
pub use store::{
    BlobStore, EntitlementLookup, FsBlobStore, MemoryBlobStore, MemoryEntitlements,
    MemoryPageStore, PageStore, Snapshot, UserRecord,
};
pub use toc::{TocService, TocUpdate};
