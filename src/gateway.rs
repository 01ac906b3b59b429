//! Access gateway: decide whether a caller may read a page image, then
//! stream it.
//!
//! ## Decision procedure
//!
//! 1. normalise the reference ([`BlobPath::parse`]); traversal and anything
//!    outside the allow-list is refused before any lookup
//! 2. find the owning page and yearbook, otherwise `NotFound`
//! 3. front cover → granted to everyone
//! 4. `super_admin` → granted
//! 5. `school` whose school owns the yearbook → granted, drafts included
//! 6. `viewer` → granted with a matching purchase, else `PurchaseRequired`
//! 7. anonymous → `AuthenticationRequired`; anyone else → `Forbidden`
//!
//! Steps 3–6 short-circuit in that order.

use crate::config::PipelineConfig;
use crate::error::AccessDenied;
use crate::model::{Caller, PageId, PageType, Role, UserId, Yearbook, YearbookPage};
use crate::reference::BlobPath;
use crate::store::{BlobStore, ByteStream, EntitlementLookup, PageStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Why access was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grant {
    PublicFrontCover,
    SuperAdmin,
    SchoolOwner,
    Purchased,
}

/// A granted decision, before any bytes are read.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub path: BlobPath,
    pub page: YearbookPage,
    pub grant: Grant,
}

/// An image ready to be sent.
pub struct ServedImage {
    pub page_id: PageId,
    pub grant: Grant,
    pub content_type: &'static str,
    pub cache_control: String,
    pub length: u64,
    pub body: ByteStream,
}

impl std::fmt::Debug for ServedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServedImage")
            .field("page_id", &self.page_id)
            .field("grant", &self.grant)
            .field("content_type", &self.content_type)
            .field("cache_control", &self.cache_control)
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Resolves image references against caller identity and entitlements.
pub struct AccessGateway {
    store: Arc<dyn PageStore>,
    blobs: Arc<dyn BlobStore>,
    entitlements: Arc<dyn EntitlementLookup>,
    config: Arc<PipelineConfig>,
}

impl AccessGateway {
    pub fn new(
        config: Arc<PipelineConfig>,
        store: Arc<dyn PageStore>,
        blobs: Arc<dyn BlobStore>,
        entitlements: Arc<dyn EntitlementLookup>,
    ) -> Self {
        Self {
            store,
            blobs,
            entitlements,
            config,
        }
    }

    /// Turn an optional user id into a caller. Unknown ids are anonymous.
    pub async fn caller_for(&self, user_id: Option<UserId>) -> Result<Caller, AccessDenied> {
        match user_id {
            None => Ok(Caller::Anonymous),
            Some(id) => Ok(self
                .entitlements
                .identity(id)
                .await?
                .map(Caller::Authenticated)
                .unwrap_or(Caller::Anonymous)),
        }
    }

    /// Decide and open the image for `reference`.
    pub async fn resolve(
        &self,
        reference: &str,
        caller: &Caller,
    ) -> Result<ServedImage, AccessDenied> {
        let decision = self.decide(reference, caller).await?;
        let reader = self.blobs.open(&decision.path).await?;
        Ok(ServedImage {
            page_id: decision.page.id,
            grant: decision.grant,
            content_type: decision.path.content_type(),
            cache_control: self.config.cache_control.clone(),
            length: reader.length,
            body: reader.stream,
        })
    }

    /// Run the decision procedure without reading the blob.
    pub async fn decide(&self, reference: &str, caller: &Caller) -> Result<Decision, AccessDenied> {
        let result = self.decide_inner(reference, caller).await;
        match &result {
            Ok(d) => info!(
                "Granted {} ({}) as {:?}",
                d.path,
                d.page.page_type,
                d.grant
            ),
            Err(e) => info!("Denied image request: {} ({})", e.reason(), caller_label(caller)),
        }
        result
    }

    async fn decide_inner(
        &self,
        reference: &str,
        caller: &Caller,
    ) -> Result<Decision, AccessDenied> {
        // Step 1 runs before anything touches a store.
        let path = BlobPath::parse(reference)?;
        path.resolve_under(&self.config.storage_root)?;

        let page = self
            .store
            .page_by_image_ref(&path.image_ref())
            .await?
            .ok_or(AccessDenied::NotFound)?;
        let yearbook = self
            .store
            .yearbook(page.yearbook_id)
            .await?
            .ok_or(AccessDenied::NotFound)?;

        let grant = self.authorize(&page, &yearbook, caller).await?;
        debug!("Page {} of yearbook {} granted via {:?}", page.id, yearbook.id, grant);
        Ok(Decision { path, page, grant })
    }

    async fn authorize(
        &self,
        page: &YearbookPage,
        yearbook: &Yearbook,
        caller: &Caller,
    ) -> Result<Grant, AccessDenied> {
        if page.page_type == PageType::FrontCover {
            return Ok(Grant::PublicFrontCover);
        }
        let identity = match caller.identity() {
            Some(id) => id,
            None => return Err(AccessDenied::AuthenticationRequired),
        };
        match identity.role {
            Role::SuperAdmin => Ok(Grant::SuperAdmin),
            Role::School if identity.school_id == Some(yearbook.school_id) => {
                Ok(Grant::SchoolOwner)
            }
            Role::Viewer => {
                let purchased = self
                    .entitlements
                    .has_purchased(identity.subject_id, yearbook.school_id, yearbook.year)
                    .await?;
                if purchased {
                    Ok(Grant::Purchased)
                } else {
                    Err(AccessDenied::PurchaseRequired)
                }
            }
            Role::School => Err(AccessDenied::Forbidden),
        }
    }
}

fn caller_label(caller: &Caller) -> String {
    match caller.identity() {
        None => "anonymous".to_string(),
        Some(id) => format!("{:?} {}", id.role, id.subject_id),
    }
}
