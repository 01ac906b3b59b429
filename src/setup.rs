//! Yearbook lifecycle: create, configure and publish.

use crate::error::{StoreError, YearbookError};
use crate::locks::YearbookLocks;
use crate::model::{Orientation, PageType, SchoolId, UploadType, Yearbook, YearbookId};
use crate::store::PageStore;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::info;

/// Accepted yearbook years.
pub const YEAR_RANGE: RangeInclusive<i32> = 1900..=2100;

/// Settings to change. `None` leaves a field as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configure {
    pub title: Option<String>,
    pub orientation: Option<Orientation>,
    pub upload_type: Option<UploadType>,
    /// Mark the yearbook initialised, fixing its upload type.
    pub initialized: Option<bool>,
    pub price: Option<u64>,
}

pub struct YearbookSetup {
    store: Arc<dyn PageStore>,
    locks: Arc<YearbookLocks>,
}

impl YearbookSetup {
    pub fn new(store: Arc<dyn PageStore>, locks: Arc<YearbookLocks>) -> Self {
        Self { store, locks }
    }

    pub async fn create_yearbook(
        &self,
        school_id: SchoolId,
        year: i32,
        title: &str,
    ) -> Result<Yearbook, YearbookError> {
        if !YEAR_RANGE.contains(&year) {
            return Err(YearbookError::Validation(format!(
                "year {year} is outside {}..={}",
                YEAR_RANGE.start(),
                YEAR_RANGE.end()
            )));
        }
        let title = title.trim();
        if title.is_empty() {
            return Err(YearbookError::Validation("title cannot be empty".into()));
        }
        let yearbook = Yearbook::new(school_id, year, title);
        match self.store.insert_yearbook(yearbook).await {
            Ok(yb) => {
                info!("Created yearbook {} for school {} ({})", yb.id, school_id, year);
                Ok(yb)
            }
            Err(StoreError::UniqueViolation(_)) => Err(YearbookError::Validation(format!(
                "school {school_id} already has a yearbook for {year}"
            ))),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get(&self, yearbook_id: YearbookId) -> Result<Yearbook, YearbookError> {
        self.store
            .yearbook(yearbook_id)
            .await?
            .ok_or(YearbookError::YearbookNotFound(yearbook_id))
    }

    /// Change settings. Once initialised, the upload type is fixed.
    pub async fn configure(
        &self,
        yearbook_id: YearbookId,
        changes: Configure,
    ) -> Result<Yearbook, YearbookError> {
        let _guard = self.locks.all(yearbook_id).await;
        let mut yb = self.get(yearbook_id).await?;

        if let Some(upload_type) = changes.upload_type {
            if yb.is_initialized && upload_type != yb.upload_type {
                return Err(YearbookError::UploadTypeLocked {
                    yearbook_id,
                    current: yb.upload_type,
                });
            }
            yb.upload_type = upload_type;
        }
        if let Some(title) = changes.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(YearbookError::Validation("title cannot be empty".into()));
            }
            yb.title = title.to_string();
        }
        if let Some(orientation) = changes.orientation {
            yb.orientation = orientation;
        }
        if let Some(price) = changes.price {
            yb.price = Some(price);
        }
        if let Some(initialized) = changes.initialized {
            if yb.is_initialized && !initialized {
                return Err(YearbookError::Validation(
                    "an initialised yearbook cannot be reset".into(),
                ));
            }
            yb.is_initialized = initialized;
        }

        let yb = self.store.update_yearbook(yb).await?;
        info!(
            "Configured yearbook {}: {} mode, initialised={}",
            yb.id, yb.upload_type, yb.is_initialized
        );
        Ok(yb)
    }

    /// Publish or unpublish. Publishing needs both covers.
    pub async fn set_published(
        &self,
        yearbook_id: YearbookId,
        published: bool,
    ) -> Result<Yearbook, YearbookError> {
        let _guard = self.locks.all(yearbook_id).await;
        let mut yb = self.get(yearbook_id).await?;
        if published {
            let pages = self.store.pages(yearbook_id).await?;
            let missing: Vec<&str> = [PageType::FrontCover, PageType::BackCover]
                .into_iter()
                .filter(|role| !pages.iter().any(|p| p.page_type == *role))
                .map(|role| role.as_str())
                .collect();
            if !missing.is_empty() {
                return Err(YearbookError::Validation(format!(
                    "cannot publish without {}",
                    missing.join(" and ")
                )));
            }
        }
        yb.is_published = published;
        let yb = self.store.update_yearbook(yb).await?;
        info!("Yearbook {} published={}", yb.id, yb.is_published);
        Ok(yb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::model::YearbookPage;
    use crate::store::MemoryPageStore;
    use uuid::Uuid;

    fn setup() -> (YearbookSetup, Arc<MemoryPageStore>) {
        let store = Arc::new(MemoryPageStore::new());
        (
            YearbookSetup::new(store.clone(), Arc::new(YearbookLocks::new())),
            store,
        )
    }

    #[tokio::test]
    async fn year_range_and_uniqueness() {
        let (setup, _) = setup();
        let school = Uuid::new_v4();
        assert!(setup.create_yearbook(school, 1899, "Old").await.is_err());
        setup.create_yearbook(school, 2024, "Class of 2024").await.unwrap();
        let err = setup.create_yearbook(school, 2024, "Again").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn upload_type_locks_after_initialisation() {
        let (setup, _) = setup();
        let yb = setup.create_yearbook(Uuid::new_v4(), 2020, "Y").await.unwrap();
        let yb = setup
            .configure(
                yb.id,
                Configure {
                    upload_type: Some(UploadType::Pdf),
                    initialized: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(yb.upload_type, UploadType::Pdf);

        let err = setup
            .configure(
                yb.id,
                Configure {
                    upload_type: Some(UploadType::Image),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, YearbookError::UploadTypeLocked { .. }));
    }

    #[tokio::test]
    async fn publishing_requires_both_covers() {
        let (setup, store) = setup();
        let yb = setup.create_yearbook(Uuid::new_v4(), 2021, "Y").await.unwrap();
        let err = setup.set_published(yb.id, true).await.unwrap_err();
        assert!(err.to_string().contains("front_cover and back_cover"));

        for (role, r) in [(PageType::FrontCover, "f.png"), (PageType::BackCover, "b.png")] {
            store
                .insert_page(YearbookPage::new(yb.id, role, 0, r, ""))
                .await
                .unwrap();
        }
        assert!(setup.set_published(yb.id, true).await.unwrap().is_published);
        assert!(!setup.set_published(yb.id, false).await.unwrap().is_published);
    }
}
