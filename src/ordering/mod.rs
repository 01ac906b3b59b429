//! Ordering engine: reorder, swap, move, delete and renumber content pages.
//!
//! Every operation follows the same three steps under the yearbook's
//! numbering lock:
//!
//! 1. load the content pages in their current order
//! 2. apply the edit to an in-memory copy of that order, validating it
//! 3. delete removed pages, then schedule and write the new numbers with
//!    [`plan::schedule`] so no intermediate state holds a duplicate
//!
//! Single operations are one-edit batches. [`OrderingEngine::apply_batch`]
//! accepts a staged list of edits and commits all of them or none.
//!
//! Covers never take part. Deleting a cover is a direct delete under the
//! cover lock with no renumbering.

pub mod plan;

use crate::error::YearbookError;
use crate::locks::YearbookLocks;
use crate::model::{sort_content, PageId, PageType, YearbookId, YearbookPage};
use crate::reference::BlobPath;
use crate::store::{BlobStore, PageStore};
use plan::{schedule, Write};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Neighbour to swap with in [`OrderingEngine::move_adjacent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Left,
    Right,
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Direction::Left),
            "right" => Ok(Direction::Right),
            other => Err(format!("invalid direction '{other}': must be 'left' or 'right'")),
        }
    }
}

/// One staged edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Edit {
    #[serde(rename_all = "camelCase")]
    Reorder { page_id: PageId, new_page_number: u32 },
    #[serde(rename_all = "camelCase")]
    Swap { page_a_id: PageId, page_b_id: PageId },
    #[serde(rename_all = "camelCase")]
    Move { page_id: PageId, direction: Direction },
    #[serde(rename_all = "camelCase")]
    Delete { page_id: PageId },
}

/// Result of deleting one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOutcome {
    pub deleted: YearbookPage,
    /// Content pages whose number was decremented to close the gap.
    pub shifted: usize,
}

/// Result of a committed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub deleted: Vec<YearbookPage>,
    /// Content pages in their final order.
    pub pages: Vec<YearbookPage>,
    /// Surviving pages whose number changed.
    pub changed: Vec<PageId>,
    /// Number of single-page writes issued, parking writes included.
    pub writes: usize,
}

/// Why an edit failed against the simulated order.
enum SimError {
    Unknown(PageId),
    Cover(PageId, PageType),
    AlreadyDeleted(PageId),
    InvalidNumber { requested: u32, max: u32 },
}

/// Content order of one yearbook, edited in memory before any write.
struct Simulation {
    order: Vec<PageId>,
    covers: HashMap<PageId, PageType>,
    deleted: Vec<PageId>,
}

impl Simulation {
    fn new(content: &[YearbookPage], covers: &[YearbookPage]) -> Self {
        Self {
            order: content.iter().map(|p| p.id).collect(),
            covers: covers.iter().map(|p| (p.id, p.page_type)).collect(),
            deleted: Vec::new(),
        }
    }

    fn index_of(&self, id: PageId) -> Result<usize, SimError> {
        if let Some(i) = self.order.iter().position(|p| *p == id) {
            return Ok(i);
        }
        if let Some(t) = self.covers.get(&id) {
            return Err(SimError::Cover(id, *t));
        }
        if self.deleted.contains(&id) {
            return Err(SimError::AlreadyDeleted(id));
        }
        Err(SimError::Unknown(id))
    }

    fn apply(&mut self, edit: &Edit) -> Result<(), SimError> {
        match *edit {
            Edit::Reorder {
                page_id,
                new_page_number,
            } => {
                let from = self.index_of(page_id)?;
                let max = self.order.len() as u32;
                if new_page_number < 1 || new_page_number > max {
                    return Err(SimError::InvalidNumber {
                        requested: new_page_number,
                        max,
                    });
                }
                let id = self.order.remove(from);
                self.order.insert(new_page_number as usize - 1, id);
            }
            Edit::Swap {
                page_a_id,
                page_b_id,
            } => {
                let a = self.index_of(page_a_id)?;
                let b = self.index_of(page_b_id)?;
                self.order.swap(a, b);
            }
            Edit::Move { page_id, direction } => {
                let i = self.index_of(page_id)?;
                let neighbour = match direction {
                    Direction::Left => i.checked_sub(1),
                    Direction::Right => Some(i + 1).filter(|j| *j < self.order.len()),
                };
                if let Some(j) = neighbour {
                    self.order.swap(i, j);
                }
            }
            Edit::Delete { page_id } => {
                let i = self.index_of(page_id)?;
                self.deleted.push(self.order.remove(i));
            }
        }
        Ok(())
    }
}

/// Per-yearbook ordering operations over the page store.
pub struct OrderingEngine {
    store: Arc<dyn PageStore>,
    blobs: Arc<dyn BlobStore>,
    locks: Arc<YearbookLocks>,
}

impl OrderingEngine {
    pub fn new(
        store: Arc<dyn PageStore>,
        blobs: Arc<dyn BlobStore>,
        locks: Arc<YearbookLocks>,
    ) -> Self {
        Self {
            store,
            blobs,
            locks,
        }
    }

    /// Content pages of a yearbook in page-number order.
    pub async fn content_pages(
        &self,
        yearbook_id: YearbookId,
    ) -> Result<Vec<YearbookPage>, YearbookError> {
        Ok(self.load(yearbook_id).await?.0)
    }

    /// Move a page to `new_page_number`, shifting the pages in between.
    pub async fn reorder(
        &self,
        yearbook_id: YearbookId,
        page_id: PageId,
        new_page_number: u32,
    ) -> Result<YearbookPage, YearbookError> {
        let outcome = self
            .apply_batch(
                yearbook_id,
                &[Edit::Reorder {
                    page_id,
                    new_page_number,
                }],
            )
            .await?;
        find(&outcome.pages, page_id)
    }

    /// Exchange the numbers of two content pages.
    pub async fn swap(
        &self,
        yearbook_id: YearbookId,
        page_a_id: PageId,
        page_b_id: PageId,
    ) -> Result<(YearbookPage, YearbookPage), YearbookError> {
        let outcome = self
            .apply_batch(
                yearbook_id,
                &[Edit::Swap {
                    page_a_id,
                    page_b_id,
                }],
            )
            .await?;
        Ok((find(&outcome.pages, page_a_id)?, find(&outcome.pages, page_b_id)?))
    }

    /// Swap with the neighbour on `direction`; a no-op at either end.
    /// Returns the pages whose number changed.
    pub async fn move_adjacent(
        &self,
        yearbook_id: YearbookId,
        page_id: PageId,
        direction: Direction,
    ) -> Result<Vec<YearbookPage>, YearbookError> {
        let outcome = self
            .apply_batch(yearbook_id, &[Edit::Move { page_id, direction }])
            .await?;
        Ok(outcome
            .pages
            .into_iter()
            .filter(|p| outcome.changed.contains(&p.id))
            .collect())
    }

    /// Delete a page. Content pages close the gap behind them; covers are
    /// removed directly.
    pub async fn delete_page(
        &self,
        yearbook_id: YearbookId,
        page_id: PageId,
    ) -> Result<DeleteOutcome, YearbookError> {
        let page = self
            .store
            .page(page_id)
            .await?
            .ok_or(YearbookError::PageNotFound(page_id))?;
        if page.yearbook_id != yearbook_id {
            return Err(YearbookError::PageNotInYearbook {
                page_id,
                yearbook_id,
            });
        }
        if page.page_type.is_cover() {
            return self.delete_cover(page).await;
        }

        let outcome = self
            .apply_batch(yearbook_id, &[Edit::Delete { page_id }])
            .await?;
        let deleted = outcome
            .deleted
            .into_iter()
            .next()
            .ok_or(YearbookError::PageNotFound(page_id))?;
        Ok(DeleteOutcome {
            deleted,
            shifted: outcome.changed.len(),
        })
    }

    /// Re-assign `1..N` in current relative order. Returns the number of
    /// pages rewritten; zero when already contiguous.
    pub async fn renumber(&self, yearbook_id: YearbookId) -> Result<usize, YearbookError> {
        let _guard = self.locks.numbering(yearbook_id).await;
        let (content, _) = self.load(yearbook_id).await?;
        let order: Vec<PageId> = content.iter().map(|p| p.id).collect();
        let writes = self.write_order(yearbook_id, &content, &order).await?;
        if writes > 0 {
            info!("Renumbered {} page(s) in yearbook {}", writes, yearbook_id);
        }
        Ok(writes)
    }

    /// Validate every edit against a simulated order, then commit them all
    /// under one acquisition of the numbering lock. Nothing is written if any
    /// edit is invalid.
    pub async fn apply_batch(
        &self,
        yearbook_id: YearbookId,
        edits: &[Edit],
    ) -> Result<BatchOutcome, YearbookError> {
        let _guard = self.locks.numbering(yearbook_id).await;
        let (content, covers) = self.load(yearbook_id).await?;

        let mut sim = Simulation::new(&content, &covers);
        for edit in edits {
            if let Err(e) = sim.apply(edit) {
                return Err(self.explain(yearbook_id, e).await);
            }
        }
        debug!(
            "Batch of {} edit(s) on yearbook {}: {} deletion(s)",
            edits.len(),
            yearbook_id,
            sim.deleted.len()
        );

        let by_id: HashMap<PageId, &YearbookPage> = content.iter().map(|p| (p.id, p)).collect();
        let mut deleted = Vec::with_capacity(sim.deleted.len());
        for id in &sim.deleted {
            if let Some(page) = self.store.delete_page(*id).await? {
                info!(
                    "Deleted content page {} (number {}) from yearbook {}",
                    page.id, page.page_number, yearbook_id
                );
                self.delete_blob_of(&page).await;
                deleted.push(page);
            }
        }

        let remaining: Vec<YearbookPage> = sim
            .order
            .iter()
            .filter_map(|id| by_id.get(id).map(|p| (*p).clone()))
            .collect();
        let writes = self.write_order(yearbook_id, &remaining, &sim.order).await?;

        let (pages, _) = self.load(yearbook_id).await?;
        let changed = pages
            .iter()
            .filter(|p| by_id.get(&p.id).is_some_and(|old| old.page_number != p.page_number))
            .map(|p| p.id)
            .collect();
        Ok(BatchOutcome {
            deleted,
            pages,
            changed,
            writes,
        })
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Content pages sorted, and covers.
    async fn load(
        &self,
        yearbook_id: YearbookId,
    ) -> Result<(Vec<YearbookPage>, Vec<YearbookPage>), YearbookError> {
        if self.store.yearbook(yearbook_id).await?.is_none() {
            return Err(YearbookError::YearbookNotFound(yearbook_id));
        }
        let (mut content, covers): (Vec<_>, Vec<_>) = self
            .store
            .pages(yearbook_id)
            .await?
            .into_iter()
            .partition(|p| p.is_content());
        sort_content(&mut content);
        Ok((content, covers))
    }

    /// Give `order[i]` number `i + 1`. Caller holds the numbering lock.
    async fn write_order(
        &self,
        yearbook_id: YearbookId,
        pages: &[YearbookPage],
        order: &[PageId],
    ) -> Result<usize, YearbookError> {
        let current: Vec<(PageId, u32)> = pages.iter().map(|p| (p.id, p.page_number)).collect();
        let target: HashMap<PageId, u32> = order
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i as u32 + 1))
            .collect();
        let writes = schedule(&current, &target);
        if writes.is_empty() {
            return Ok(0);
        }
        debug!(
            "Write plan for yearbook {}: {}",
            yearbook_id,
            writes
                .iter()
                .map(|w| format!("{}→{}", w.page_id, w.number))
                .collect::<Vec<_>>()
                .join(", ")
        );

        if let Err(e) = self.apply_writes(&writes).await {
            error!(
                "Write plan for yearbook {} failed midway: {}; restoring contiguity",
                yearbook_id, e
            );
            self.repair(yearbook_id).await;
            return Err(e);
        }
        Ok(writes.len())
    }

    async fn apply_writes(&self, writes: &[Write]) -> Result<(), YearbookError> {
        for w in writes {
            self.store.set_page_number(w.page_id, w.number).await?;
        }
        Ok(())
    }

    /// Best-effort renumbering after a failed plan. Caller holds the lock.
    async fn repair(&self, yearbook_id: YearbookId) {
        let content = match self.load(yearbook_id).await {
            Ok((content, _)) => content,
            Err(e) => {
                warn!("Repair of yearbook {} could not load pages: {}", yearbook_id, e);
                return;
            }
        };
        let current: Vec<(PageId, u32)> =
            content.iter().map(|p| (p.id, p.page_number)).collect();
        let target: HashMap<PageId, u32> = content
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id, i as u32 + 1))
            .collect();
        if let Err(e) = self.apply_writes(&schedule(&current, &target)).await {
            warn!("Repair of yearbook {} failed: {}", yearbook_id, e);
        }
    }

    async fn delete_cover(&self, page: YearbookPage) -> Result<DeleteOutcome, YearbookError> {
        let _guard = self.locks.cover(page.yearbook_id, page.page_type).await;
        let deleted = self
            .store
            .delete_page(page.id)
            .await?
            .ok_or(YearbookError::PageNotFound(page.id))?;
        if let Err(e) = self
            .store
            .set_cover_ref(deleted.yearbook_id, deleted.page_type, None)
            .await
        {
            warn!(
                "Could not clear {} reference on yearbook {}: {}",
                deleted.page_type, deleted.yearbook_id, e
            );
        }
        self.delete_blob_of(&deleted).await;
        info!(
            "Deleted {} {} from yearbook {}",
            deleted.page_type, deleted.id, deleted.yearbook_id
        );
        Ok(DeleteOutcome { deleted, shifted: 0 })
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

    async fn explain(&self, yearbook_id: YearbookId, e: SimError) -> YearbookError {
        match e {
            SimError::Cover(page_id, page_type) => YearbookError::NotAContentPage { page_id, page_type },
            SimError::AlreadyDeleted(page_id) => YearbookError::PageNotFound(page_id),
            SimError::InvalidNumber { requested, max } => {
                YearbookError::InvalidPageNumber { requested, max }
            }
            SimError::Unknown(page_id) => match self.store.page(page_id).await {
                Ok(Some(_)) => YearbookError::PageNotInYearbook {
                    page_id,
                    yearbook_id,
                },
                Ok(None) => YearbookError::PageNotFound(page_id),
                Err(e) => e.into(),
            },
        }
    }
}

fn find(pages: &[YearbookPage], id: PageId) -> Result<YearbookPage, YearbookError> {
    pages
        .iter()
        .find(|p| p.id == id)
        .cloned()
        .ok_or(YearbookError::PageNotFound(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Yearbook;
    use crate::store::{MemoryBlobStore, MemoryPageStore};
    use uuid::Uuid;

    struct Fixture {
        engine: OrderingEngine,
        store: Arc<MemoryPageStore>,
        yearbook: YearbookId,
        pages: Vec<PageId>,
    }

    async fn fixture(n: u32) -> Fixture {
        let store = Arc::new(MemoryPageStore::new());
        let yb = store
            .insert_yearbook(Yearbook::new(Uuid::new_v4(), 2024, "Y"))
            .await
            .unwrap();
        let mut pages = Vec::new();
        for i in 1..=n {
            let p = YearbookPage::new(
                yb.id,
                PageType::Content,
                i,
                format!("p{i}-{}.png", Uuid::new_v4().simple()),
                "",
            );
            pages.push(store.insert_page(p).await.unwrap().id);
        }
        let engine = OrderingEngine::new(
            store.clone(),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(YearbookLocks::new()),
        );
        Fixture {
            engine,
            store,
            yearbook: yb.id,
            pages,
        }
    }

    async fn numbers(f: &Fixture) -> Vec<u32> {
        let mut out = Vec::new();
        for id in &f.pages {
            out.push(f.store.page(*id).await.unwrap().map_or(0, |p| p.page_number));
        }
        out
    }

    #[tokio::test]
    async fn reorder_moves_toward_front() {
        let f = fixture(5).await;
        let moved = f.engine.reorder(f.yearbook, f.pages[4], 2).await.unwrap();
        assert_eq!(moved.page_number, 2);
        assert_eq!(numbers(&f).await, vec![1, 3, 4, 5, 2]);
    }

    #[tokio::test]
    async fn reorder_out_of_range_is_rejected() {
        let f = fixture(3).await;
        for bad in [0, 4] {
            let err = f.engine.reorder(f.yearbook, f.pages[0], bad).await.unwrap_err();
            assert!(matches!(err, YearbookError::InvalidPageNumber { max: 3, .. }));
        }
        assert_eq!(numbers(&f).await, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn move_adjacent_is_noop_at_boundary() {
        let f = fixture(3).await;
        let changed = f
            .engine
            .move_adjacent(f.yearbook, f.pages[0], Direction::Left)
            .await
            .unwrap();
        assert!(changed.is_empty());
        let changed = f
            .engine
            .move_adjacent(f.yearbook, f.pages[0], Direction::Right)
            .await
            .unwrap();
        assert_eq!(changed.len(), 2);
        assert_eq!(numbers(&f).await, vec![2, 1, 3]);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let f = fixture(4).await;
        let err = f
            .engine
            .apply_batch(
                f.yearbook,
                &[
                    Edit::Delete { page_id: f.pages[0] },
                    Edit::Reorder {
                        page_id: f.pages[1],
                        new_page_number: 4,
                    },
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, YearbookError::InvalidPageNumber { requested: 4, max: 3 }));
        assert_eq!(numbers(&f).await, vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn unknown_and_foreign_pages_are_distinguished() {
        let f = fixture(2).await;
        let other = fixture(1).await;
        let foreign = other.pages[0];

        let err = f.engine.swap(f.yearbook, f.pages[0], Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, YearbookError::PageNotFound(_)));

        // Same store needed for the foreign check; copy the page over.
        let page = other.store.page(foreign).await.unwrap().unwrap();
        let yb = other.store.yearbook(page.yearbook_id).await.unwrap().unwrap();
        f.store.insert_yearbook(yb).await.unwrap();
        f.store.insert_page(page).await.unwrap();
        let err = f.engine.swap(f.yearbook, f.pages[0], foreign).await.unwrap_err();
        assert!(matches!(err, YearbookError::PageNotInYearbook { .. }));
    }
}
