//! Table of contents.
//!
//! Items point at content page numbers but are descriptive only. Page
//! mutations never rewrite them; [`TocService::dangling`] reports items whose
//! number no longer exists.

use crate::error::YearbookError;
use crate::model::{TableOfContentsItem, TocItemId, YearbookId};
use crate::store::PageStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Fields to change on an existing item. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TocUpdate {
    pub title: Option<String>,
    pub page_number: Option<u32>,
    /// `Some(None)` clears the description.
    pub description: Option<Option<String>>,
}

pub struct TocService {
    store: Arc<dyn PageStore>,
}

impl TocService {
    pub fn new(store: Arc<dyn PageStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        yearbook_id: YearbookId,
        title: &str,
        page_number: u32,
        description: Option<String>,
    ) -> Result<TableOfContentsItem, YearbookError> {
        self.require_yearbook(yearbook_id).await?;
        let item = TableOfContentsItem {
            id: Uuid::new_v4(),
            yearbook_id,
            title: check_title(title)?,
            page_number: check_number(page_number)?,
            description: description.filter(|d| !d.trim().is_empty()),
        };
        debug!("Adding TOC item '{}' → page {}", item.title, item.page_number);
        Ok(self.store.upsert_toc_item(item).await?)
    }

    pub async fn update(
        &self,
        id: TocItemId,
        update: TocUpdate,
    ) -> Result<TableOfContentsItem, YearbookError> {
        let mut item = self
            .store
            .toc_item(id)
            .await?
            .ok_or(YearbookError::TocItemNotFound(id))?;
        if let Some(title) = update.title {
            item.title = check_title(&title)?;
        }
        if let Some(n) = update.page_number {
            item.page_number = check_number(n)?;
        }
        if let Some(description) = update.description {
            item.description = description.filter(|d| !d.trim().is_empty());
        }
        Ok(self.store.upsert_toc_item(item).await?)
    }

    pub async fn delete(&self, id: TocItemId) -> Result<(), YearbookError> {
        if self.store.delete_toc_item(id).await? {
            Ok(())
        } else {
            Err(YearbookError::TocItemNotFound(id))
        }
    }

    /// Items ordered by page number, then title.
    pub async fn list(
        &self,
        yearbook_id: YearbookId,
    ) -> Result<Vec<TableOfContentsItem>, YearbookError> {
        self.require_yearbook(yearbook_id).await?;
        let mut items = self.store.toc_items(yearbook_id).await?;
        items.sort_by(|a, b| {
            a.page_number
                .cmp(&b.page_number)
                .then_with(|| a.title.cmp(&b.title))
        });
        Ok(items)
    }

    /// Items pointing past the last content page.
    pub async fn dangling(
        &self,
        yearbook_id: YearbookId,
    ) -> Result<Vec<TableOfContentsItem>, YearbookError> {
        let items = self.list(yearbook_id).await?;
        let content = self
            .store
            .pages(yearbook_id)
            .await?
            .iter()
            .filter(|p| p.is_content())
            .count() as u32;
        Ok(items.into_iter().filter(|i| i.page_number > content).collect())
    }

    async fn require_yearbook(&self, yearbook_id: YearbookId) -> Result<(), YearbookError> {
        match self.store.yearbook(yearbook_id).await? {
            Some(_) => Ok(()),
            None => Err(YearbookError::YearbookNotFound(yearbook_id)),
        }
    }
}

fn check_title(title: &str) -> Result<String, YearbookError> {
    let t = title.trim();
    if t.is_empty() {
        return Err(YearbookError::Validation("TOC title cannot be empty".into()));
    }
    Ok(t.to_string())
}

fn check_number(n: u32) -> Result<u32, YearbookError> {
    if n == 0 {
        return Err(YearbookError::Validation(
            "TOC page number must be at least 1".into(),
        ));
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PageType, Yearbook, YearbookPage};
    use crate::store::MemoryPageStore;

    async fn setup() -> (TocService, Arc<MemoryPageStore>, YearbookId) {
        let store = Arc::new(MemoryPageStore::new());
        let yb = store
            .insert_yearbook(Yearbook::new(Uuid::new_v4(), 2022, "Y"))
            .await
            .unwrap();
        (TocService::new(store.clone()), store, yb.id)
    }

    #[tokio::test]
    async fn crud_and_ordering() {
        let (toc, _, yb) = setup().await;
        let b = toc.create(yb, "Sports", 5, None).await.unwrap();
        toc.create(yb, "Clubs", 2, Some("All clubs".into())).await.unwrap();
        let titles: Vec<_> = toc.list(yb).await.unwrap().into_iter().map(|i| i.title).collect();
        assert_eq!(titles, vec!["Clubs", "Sports"]);

        let updated = toc
            .update(
                b.id,
                TocUpdate {
                    page_number: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.page_number, 1);
        toc.delete(b.id).await.unwrap();
        assert!(matches!(
            toc.delete(b.id).await.unwrap_err(),
            YearbookError::TocItemNotFound(_)
        ));
    }

    #[tokio::test]
    async fn rejects_empty_title_and_page_zero() {
        let (toc, _, yb) = setup().await;
        assert!(toc.create(yb, "  ", 1, None).await.is_err());
        assert!(toc.create(yb, "x", 0, None).await.is_err());
    }

    #[tokio::test]
    async fn dangling_lists_items_past_the_end() {
        let (toc, store, yb) = setup().await;
        store
            .insert_page(YearbookPage::new(yb, PageType::Content, 1, "a.png", ""))
            .await
            .unwrap();
        toc.create(yb, "Intro", 1, None).await.unwrap();
        toc.create(yb, "Gone", 2, None).await.unwrap();
        let dangling = toc.dangling(yb).await.unwrap();
        assert_eq!(dangling.len(), 1);
        assert_eq!(dangling[0].title, "Gone");
    }
}
