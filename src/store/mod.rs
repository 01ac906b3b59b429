//! Collaborator seams: the page store, the blob store and the entitlement
//! lookup.
//!
//! The pipeline, the ordering engine and the gateway only ever talk to these
//! traits, so a deployment can back them with a database, S3 or a session
//! service. The reference implementations in [`memory`] and [`blob`] are
//! complete enough for the CLI and for tests.
//!
//! ## Constraints a `PageStore` must enforce
//!
//! * at most one `front_cover` and one `back_cover` per yearbook
//! * `(yearbook_id, page_number)` unique among `content` pages
//! * one yearbook per `(school_id, year)`
//!
//! Implementations check them on every single write and answer with
//! [`StoreError::UniqueViolation`]. The ordering engine relies on that: it
//! schedules renumbering writes so that no intermediate state collides.

pub mod blob;
pub mod memory;

use crate::error::StoreError;
use crate::model::{
    EntitlementSet, Identity, PageId, PageType, SchoolId, TableOfContentsItem, TocItemId, UserId, Yearbook,
    YearbookId, YearbookPage,
};
use crate::reference::BlobPath;
use async_trait::async_trait;

pub use blob::{BlobReader, ByteStream, FsBlobStore, MemoryBlobStore};
pub use memory::{MemoryEntitlements, MemoryPageStore, Snapshot, UserRecord};

/// Persisted yearbooks, pages and table-of-contents items.
#[async_trait]
pub trait PageStore: Send + Sync {
    // ── Yearbooks ────────────────────────────────────────────────────────
    async fn yearbook(&self, id: YearbookId) -> Result<Option<Yearbook>, StoreError>;

    async fn yearbook_by_school_year(
        &self,
        school_id: SchoolId,
        year: i32,
    ) -> Result<Option<Yearbook>, StoreError>;

    async fn insert_yearbook(&self, yearbook: Yearbook) -> Result<Yearbook, StoreError>;

    async fn update_yearbook(&self, yearbook: Yearbook) -> Result<Yearbook, StoreError>;

    /// Set or clear one cached cover reference without touching the rest of
    /// the record, so front and back cover writers never overwrite each other.
    async fn set_cover_ref(
        &self,
        yearbook_id: YearbookId,
        page_type: PageType,
        image_ref: Option<String>,
    ) -> Result<(), StoreError>;

    // ── Pages ────────────────────────────────────────────────────────────
    /// All pages of a yearbook, covers included, in no particular order.
    async fn pages(&self, yearbook_id: YearbookId) -> Result<Vec<YearbookPage>, StoreError>;

    async fn page(&self, id: PageId) -> Result<Option<YearbookPage>, StoreError>;

    /// The page whose stored `image_ref` equals `image_ref`.
    async fn page_by_image_ref(&self, image_ref: &str)
        -> Result<Option<YearbookPage>, StoreError>;

    async fn insert_page(&self, page: YearbookPage) -> Result<YearbookPage, StoreError>;

    /// Atomically install `page` as its yearbook's cover of the same role,
    /// returning the cover it displaced. Readers never observe zero covers.
    async fn replace_cover(&self, page: YearbookPage)
        -> Result<Option<YearbookPage>, StoreError>;

    async fn delete_page(&self, id: PageId) -> Result<Option<YearbookPage>, StoreError>;

    /// Single-row ordering primitive: set one content page's number.
    async fn set_page_number(&self, id: PageId, number: u32) -> Result<YearbookPage, StoreError>;

    // ── Table of contents ────────────────────────────────────────────────
    async fn toc_items(
        &self,
        yearbook_id: YearbookId,
    ) -> Result<Vec<TableOfContentsItem>, StoreError>;

    async fn toc_item(&self, id: TocItemId) -> Result<Option<TableOfContentsItem>, StoreError>;

    async fn upsert_toc_item(
        &self,
        item: TableOfContentsItem,
    ) -> Result<TableOfContentsItem, StoreError>;

    async fn delete_toc_item(&self, id: TocItemId) -> Result<bool, StoreError>;
}

/// Durable page image storage keyed by [`BlobPath`].
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write `bytes` durably; the blob is either fully present or absent.
    async fn put(&self, path: &BlobPath, bytes: &[u8]) -> Result<(), StoreError>;

    /// Open a blob for streaming. Missing blobs are [`StoreError::NotFound`].
    async fn open(&self, path: &BlobPath) -> Result<BlobReader, StoreError>;

    /// Remove a blob, returning whether it existed. Emptied extraction
    /// directories are removed as well.
    async fn delete(&self, path: &BlobPath) -> Result<bool, StoreError>;

    async fn exists(&self, path: &BlobPath) -> Result<bool, StoreError>;
}

/// User and entitlement lookup owned by the (external) account system.
#[async_trait]
pub trait EntitlementLookup: Send + Sync {
    /// Resolve a user id to the identity the gateway reasons about.
    async fn identity(&self, user_id: UserId) -> Result<Option<Identity>, StoreError>;

    /// Yearbooks the subject has purchased.
    async fn entitlements(&self, subject_id: UserId) -> Result<EntitlementSet, StoreError>;

    async fn has_purchased(
        &self,
        subject_id: UserId,
        school_id: SchoolId,
        year: i32,
    ) -> Result<bool, StoreError> {
        Ok(self.entitlements(subject_id).await?.covers(school_id, year))
    }
}
