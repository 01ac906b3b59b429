//! Per-yearbook write locks.
//!
//! Every write that touches a yearbook's content numbering holds that
//! yearbook's numbering lock for its whole read-compute-write span, and every
//! cover write holds the lock of its `(yearbook, role)` slot. Reads never
//! take a lock.
//!
//! Acquisition order is fixed: numbering, then front cover, then back cover.
//! PDF ingestion is the only operation that holds more than one.

use crate::model::{PageType, YearbookId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Slot {
    Numbering,
    FrontCover,
    BackCover,
}

impl Slot {
    fn for_cover(page_type: PageType) -> Option<Slot> {
        match page_type {
            PageType::FrontCover => Some(Slot::FrontCover),
            PageType::BackCover => Some(Slot::BackCover),
            PageType::Content => None,
        }
    }
}

/// Held while a write is in progress; released on drop.
#[derive(Debug)]
pub struct YearbookGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

/// Registry of async mutexes keyed by yearbook and slot.
///
/// Entries nobody holds or waits on are dropped on the next acquisition, so
/// the map only grows with the number of yearbooks being written to at once.
#[derive(Debug, Default)]
pub struct YearbookLocks {
    slots: Mutex<HashMap<(YearbookId, Slot), Arc<AsyncMutex<()>>>>,
}

impl YearbookLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, yearbook_id: YearbookId, slot: Slot) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock();
        // Guards and waiters hold a clone; a lone map reference is idle.
        slots.retain(|_, mutex| Arc::strong_count(mutex) > 1);
        slots
            .entry((yearbook_id, slot))
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().len()
    }

    async fn acquire(&self, yearbook_id: YearbookId, slots: &[Slot]) -> YearbookGuard {
        let mut guards = Vec::with_capacity(slots.len());
        for slot in slots {
            guards.push(self.slot(yearbook_id, *slot).lock_owned().await);
        }
        YearbookGuard { _guards: guards }
    }

    /// Lock for content appends, reorders, swaps, moves and deletes.
    pub async fn numbering(&self, yearbook_id: YearbookId) -> YearbookGuard {
        self.acquire(yearbook_id, &[Slot::Numbering]).await
    }

    /// Lock for one cover role. Content pages fall back to the numbering lock.
    pub async fn cover(&self, yearbook_id: YearbookId, page_type: PageType) -> YearbookGuard {
        match Slot::for_cover(page_type) {
            Some(slot) => self.acquire(yearbook_id, &[slot]).await,
            None => self.numbering(yearbook_id).await,
        }
    }

    /// Every lock of the yearbook, in acquisition order.
    pub async fn all(&self, yearbook_id: YearbookId) -> YearbookGuard {
        self.acquire(
            yearbook_id,
            &[Slot::Numbering, Slot::FrontCover, Slot::BackCover],
        )
        .await
    }
}
