//! In-memory [`PageStore`] and [`EntitlementLookup`].
//!
//! Both keep their state behind a `parking_lot::RwLock` and can be dumped to
//! and restored from a serde snapshot, which is how the CLI persists state
//! between invocations.

use super::{EntitlementLookup, PageStore};
use crate::error::StoreError;
use crate::model::{
    EntitlementSet, Identity, PageId, PageType, SchoolId, TableOfContentsItem, TocItemId, UserId,
    Yearbook, YearbookId, YearbookPage,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default)]
struct State {
    yearbooks: HashMap<YearbookId, Yearbook>,
    pages: HashMap<PageId, YearbookPage>,
    by_ref: HashMap<String, PageId>,
    toc: HashMap<TocItemId, TableOfContentsItem>,
}

impl State {
    fn cover(&self, yearbook_id: YearbookId, page_type: PageType) -> Option<&YearbookPage> {
        self.pages
            .values()
            .find(|p| p.yearbook_id == yearbook_id && p.page_type == page_type)
    }

    fn content_at(&self, yearbook_id: YearbookId, number: u32) -> Option<&YearbookPage> {
        self.pages
            .values()
            .find(|p| p.yearbook_id == yearbook_id && p.is_content() && p.page_number == number)
    }

    fn check_insertable(&self, page: &YearbookPage) -> Result<(), StoreError> {
        if !self.yearbooks.contains_key(&page.yearbook_id) {
            return Err(StoreError::NotFound(format!("yearbook {}", page.yearbook_id)));
        }
        if self.pages.contains_key(&page.id) {
            return Err(StoreError::UniqueViolation(format!("page id {}", page.id)));
        }
        if self.by_ref.contains_key(&page.image_ref) {
            return Err(StoreError::UniqueViolation(format!(
                "image reference {}",
                page.image_ref
            )));
        }
        if page.is_content() {
            if page.page_number == 0 {
                return Err(StoreError::UniqueViolation(
                    "content page number 0 is reserved for covers".into(),
                ));
            }
            if let Some(other) = self.content_at(page.yearbook_id, page.page_number) {
                return Err(StoreError::UniqueViolation(format!(
                    "content page number {} already held by {}",
                    page.page_number, other.id
                )));
            }
        }
        Ok(())
    }

    fn insert(&mut self, page: YearbookPage) {
        self.by_ref.insert(page.image_ref.clone(), page.id);
        self.pages.insert(page.id, page);
    }

    fn remove(&mut self, id: PageId) -> Option<YearbookPage> {
        let page = self.pages.remove(&id)?;
        self.by_ref.remove(&page.image_ref);
        Some(page)
    }
}

/// Serialisable image of a [`MemoryPageStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub yearbooks: Vec<Yearbook>,
    pub pages: Vec<YearbookPage>,
    #[serde(default)]
    pub table_of_contents: Vec<TableOfContentsItem>,
}

/// Page store held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryPageStore {
    state: RwLock<State>,
}

impl MemoryPageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from a snapshot, re-checking every constraint.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        let store = Self::new();
        {
            let mut state = store.state.write();
            for yb in snapshot.yearbooks {
                state.yearbooks.insert(yb.id, yb);
            }
            for page in snapshot.pages {
                if page.page_type.is_cover() && state.cover(page.yearbook_id, page.page_type).is_some()
                {
                    return Err(StoreError::Snapshot(format!(
                        "duplicate {} in yearbook {}",
                        page.page_type, page.yearbook_id
                    )));
                }
                state
                    .check_insertable(&page)
                    .map_err(|e| StoreError::Snapshot(e.to_string()))?;
                state.insert(page);
            }
            for item in snapshot.table_of_contents {
                state.toc.insert(item.id, item);
            }
        }
        Ok(store)
    }

    pub fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        let mut yearbooks: Vec<_> = state.yearbooks.values().cloned().collect();
        yearbooks.sort_by_key(|y| (y.school_id, y.year));
        let mut pages: Vec<_> = state.pages.values().cloned().collect();
        pages.sort_by_key(|p| (p.yearbook_id, p.page_type.as_str(), p.page_number));
        let mut table_of_contents: Vec<_> = state.toc.values().cloned().collect();
        table_of_contents.sort_by_key(|t| (t.yearbook_id, t.page_number));
        Snapshot {
            yearbooks,
            pages,
            table_of_contents,
        }
    }

    /// Load a JSON snapshot; a missing file yields an empty store.
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Snapshot(format!("{}: {e}", path.display())))?;
                debug!(
                    "Loaded snapshot {}: {} yearbooks, {} pages",
                    path.display(),
                    snapshot.yearbooks.len(),
                    snapshot.pages.len()
                );
                Self::from_snapshot(snapshot)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write the snapshot atomically (temp file + rename).
    pub async fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&self.snapshot())
            .map_err(|e| StoreError::Snapshot(e.to_string()))?;
        write_atomic(path, &json).await
    }
}

pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_name);
    tokio::fs::write(&tmp_path, bytes).await.map_err(io_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err)
}

#[async_trait]
impl PageStore for MemoryPageStore {
    async fn yearbook(&self, id: YearbookId) -> Result<Option<Yearbook>, StoreError> {
        Ok(self.state.read().yearbooks.get(&id).cloned())
    }

    async fn yearbook_by_school_year(
        &self,
        school_id: SchoolId,
        year: i32,
    ) -> Result<Option<Yearbook>, StoreError> {
        Ok(self
            .state
            .read()
            .yearbooks
            .values()
            .find(|y| y.school_id == school_id && y.year == year)
            .cloned())
    }

    async fn insert_yearbook(&self, yearbook: Yearbook) -> Result<Yearbook, StoreError> {
        let mut state = self.state.write();
        if state
            .yearbooks
            .values()
            .any(|y| y.school_id == yearbook.school_id && y.year == yearbook.year)
        {
            return Err(StoreError::UniqueViolation(format!(
                "yearbook for school {} year {}",
                yearbook.school_id, yearbook.year
            )));
        }
        state.yearbooks.insert(yearbook.id, yearbook.clone());
        Ok(yearbook)
    }

    async fn update_yearbook(&self, yearbook: Yearbook) -> Result<Yearbook, StoreError> {
        let mut state = self.state.write();
        match state.yearbooks.get_mut(&yearbook.id) {
            Some(slot) => {
                *slot = yearbook.clone();
                Ok(yearbook)
            }
            None => Err(StoreError::NotFound(format!("yearbook {}", yearbook.id))),
        }
    }

    async fn set_cover_ref(
        &self,
        yearbook_id: YearbookId,
        page_type: PageType,
        image_ref: Option<String>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let yb = state
            .yearbooks
            .get_mut(&yearbook_id)
            .ok_or_else(|| StoreError::NotFound(format!("yearbook {yearbook_id}")))?;
        match page_type {
            PageType::FrontCover => yb.front_cover_ref = image_ref,
            PageType::BackCover => yb.back_cover_ref = image_ref,
            PageType::Content => {
                return Err(StoreError::Internal(
                    "content pages have no cached reference".into(),
                ))
            }
        }
        Ok(())
    }

    async fn pages(&self, yearbook_id: YearbookId) -> Result<Vec<YearbookPage>, StoreError> {
        Ok(self
            .state
            .read()
            .pages
            .values()
            .filter(|p| p.yearbook_id == yearbook_id)
            .cloned()
            .collect())
    }

    async fn page(&self, id: PageId) -> Result<Option<YearbookPage>, StoreError> {
        Ok(self.state.read().pages.get(&id).cloned())
    }

    async fn page_by_image_ref(
        &self,
        image_ref: &str,
    ) -> Result<Option<YearbookPage>, StoreError> {
        let state = self.state.read();
        Ok(state
            .by_ref
            .get(image_ref)
            .and_then(|id| state.pages.get(id))
            .cloned())
    }

    async fn insert_page(&self, page: YearbookPage) -> Result<YearbookPage, StoreError> {
        let mut state = self.state.write();
        state.check_insertable(&page)?;
        if page.page_type.is_cover() {
            if let Some(existing) = state.cover(page.yearbook_id, page.page_type) {
                return Err(StoreError::UniqueViolation(format!(
                    "{} already held by {}",
                    page.page_type, existing.id
                )));
            }
        }
        state.insert(page.clone());
        Ok(page)
    }

    async fn replace_cover(
        &self,
        page: YearbookPage,
    ) -> Result<Option<YearbookPage>, StoreError> {
        if !page.page_type.is_cover() {
            return Err(StoreError::Internal(format!(
                "replace_cover called with a {} page",
                page.page_type
            )));
        }
        let mut state = self.state.write();
        state.check_insertable(&page)?;
        let old_id = state.cover(page.yearbook_id, page.page_type).map(|p| p.id);
        let old = old_id.and_then(|id| state.remove(id));
        state.insert(page);
        Ok(old)
    }

    async fn delete_page(&self, id: PageId) -> Result<Option<YearbookPage>, StoreError> {
        Ok(self.state.write().remove(id))
    }

    async fn set_page_number(&self, id: PageId, number: u32) -> Result<YearbookPage, StoreError> {
        let mut state = self.state.write();
        let (yearbook_id, is_content) = match state.pages.get(&id) {
            Some(p) => (p.yearbook_id, p.is_content()),
            None => return Err(StoreError::NotFound(format!("page {id}"))),
        };
        if !is_content {
            return Err(StoreError::Internal(format!(
                "page {id} is a cover and carries no page number"
            )));
        }
        if number == 0 {
            return Err(StoreError::UniqueViolation(
                "content page number 0 is reserved for covers".into(),
            ));
        }
        if let Some(other) = state.content_at(yearbook_id, number) {
            if other.id != id {
                return Err(StoreError::UniqueViolation(format!(
                    "content page number {number} already held by {}",
                    other.id
                )));
            }
        }
        let page = state
            .pages
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("page {id}")))?;
        page.page_number = number;
        Ok(page.clone())
    }

    async fn toc_items(
        &self,
        yearbook_id: YearbookId,
    ) -> Result<Vec<TableOfContentsItem>, StoreError> {
        Ok(self
            .state
            .read()
            .toc
            .values()
            .filter(|t| t.yearbook_id == yearbook_id)
            .cloned()
            .collect())
    }

    async fn toc_item(&self, id: TocItemId) -> Result<Option<TableOfContentsItem>, StoreError> {
        Ok(self.state.read().toc.get(&id).cloned())
    }

    async fn upsert_toc_item(
        &self,
        item: TableOfContentsItem,
    ) -> Result<TableOfContentsItem, StoreError> {
        let mut state = self.state.write();
        if !state.yearbooks.contains_key(&item.yearbook_id) {
            return Err(StoreError::NotFound(format!("yearbook {}", item.yearbook_id)));
        }
        state.toc.insert(item.id, item.clone());
        Ok(item)
    }

    async fn delete_toc_item(&self, id: TocItemId) -> Result<bool, StoreError> {
        Ok(self.state.write().toc.remove(&id).is_some())
    }
}

/// One known user: who they are and what they bought.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub identity: Identity,
    #[serde(default)]
    pub purchased: Vec<(SchoolId, i32)>,
}

/// Entitlement table held in memory.
#[derive(Debug, Default)]
pub struct MemoryEntitlements {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl MemoryEntitlements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<UserRecord>) -> Self {
        let users = records
            .into_iter()
            .map(|r| (r.identity.subject_id, r))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    pub fn records(&self) -> Vec<UserRecord> {
        let mut records: Vec<_> = self.users.read().values().cloned().collect();
        records.sort_by_key(|r| r.identity.subject_id);
        records
    }

    /// Register or replace a user's identity, keeping their purchases.
    pub fn register(&self, identity: Identity) {
        let mut users = self.users.write();
        let purchased = users
            .remove(&identity.subject_id)
            .map(|r| r.purchased)
            .unwrap_or_default();
        users.insert(
            identity.subject_id,
            UserRecord {
                identity,
                purchased,
            },
        );
    }

    /// Record a purchase. Returns false when the user is unknown.
    pub fn grant(&self, subject_id: UserId, school_id: SchoolId, year: i32) -> bool {
        let mut users = self.users.write();
        match users.get_mut(&subject_id) {
            Some(record) => {
                if !record.purchased.contains(&(school_id, year)) {
                    record.purchased.push((school_id, year));
                }
                true
            }
            None => false,
        }
    }

    pub fn revoke(&self, subject_id: UserId, school_id: SchoolId, year: i32) -> bool {
        let mut users = self.users.write();
        match users.get_mut(&subject_id) {
            Some(record) => {
                let before = record.purchased.len();
                record.purchased.retain(|p| *p != (school_id, year));
                before != record.purchased.len()
            }
            None => false,
        }
    }
}

#[async_trait]
impl EntitlementLookup for MemoryEntitlements {
    async fn identity(&self, user_id: UserId) -> Result<Option<Identity>, StoreError> {
        Ok(self.users.read().get(&user_id).map(|r| r.identity.clone()))
    }

    async fn entitlements(&self, subject_id: UserId) -> Result<EntitlementSet, StoreError> {
        Ok(self
            .users
            .read()
            .get(&subject_id)
            .map(|r| EntitlementSet {
                purchased: r.purchased.iter().copied().collect(),
            })
            .unwrap_or_default())
    }
}
