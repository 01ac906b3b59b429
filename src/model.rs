//! Data model shared by the pipeline, the ordering engine and the gateway.
//!
//! Records serialise in camelCase so they can be handed to a JSON transport
//! unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

pub type YearbookId = Uuid;
pub type PageId = Uuid;
pub type SchoolId = Uuid;
pub type UserId = Uuid;
pub type TocItemId = Uuid;

/// Page number stored for covers; covers sit outside the content sequence.
pub const COVER_PAGE_NUMBER: u32 = 0;

/// Role of a page within its yearbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    FrontCover,
    BackCover,
    Content,
}

impl PageType {
    pub fn is_cover(&self) -> bool {
        !matches!(self, PageType::Content)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::FrontCover => "front_cover",
            PageType::BackCover => "back_cover",
            PageType::Content => "content",
        }
    }
}

impl fmt::Display for PageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "front_cover" | "front" => Ok(PageType::FrontCover),
            "back_cover" | "back" => Ok(PageType::BackCover),
            "content" => Ok(PageType::Content),
            other => Err(format!(
                "unknown page type '{other}' (expected front_cover, back_cover or content)"
            )),
        }
    }
}

/// How pages reach a yearbook. Fixed once the yearbook is initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadType {
    #[default]
    Image,
    Pdf,
}

impl fmt::Display for UploadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UploadType::Image => "image",
            UploadType::Pdf => "pdf",
        })
    }
}

impl std::str::FromStr for UploadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(UploadType::Image),
            "pdf" => Ok(UploadType::Pdf),
            other => Err(format!("invalid upload type '{other}': must be 'image' or 'pdf'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Portrait,
    Landscape,
}

impl std::str::FromStr for Orientation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "portrait" => Ok(Orientation::Portrait),
            "landscape" => Ok(Orientation::Landscape),
            other => Err(format!(
                "invalid orientation '{other}': must be 'portrait' or 'landscape'"
            )),
        }
    }
}

/// One yearbook per `(school_id, year)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Yearbook {
    pub id: YearbookId,
    pub school_id: SchoolId,
    pub year: i32,
    pub title: String,
    pub is_published: bool,
    pub is_initialized: bool,
    pub orientation: Orientation,
    pub upload_type: UploadType,
    /// Price in minor currency units. Pricing itself is managed elsewhere.
    pub price: Option<u64>,
    /// Cached cover references so readers need not scan pages.
    pub front_cover_ref: Option<String>,
    pub back_cover_ref: Option<String>,
}

impl Yearbook {
    pub fn new(school_id: SchoolId, year: i32, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            school_id,
            year,
            title: title.into(),
            is_published: false,
            is_initialized: false,
            orientation: Orientation::default(),
            upload_type: UploadType::default(),
            price: None,
            front_cover_ref: None,
            back_cover_ref: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearbookPage {
    pub id: PageId,
    pub yearbook_id: YearbookId,
    pub page_type: PageType,
    /// `1..=N` for content pages, [`COVER_PAGE_NUMBER`] for covers.
    pub page_number: u32,
    pub image_ref: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

impl YearbookPage {
    pub fn new(
        yearbook_id: YearbookId,
        page_type: PageType,
        page_number: u32,
        image_ref: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        let page_number = if page_type.is_cover() {
            COVER_PAGE_NUMBER
        } else {
            page_number
        };
        Self {
            id: Uuid::new_v4(),
            yearbook_id,
            page_type,
            page_number,
            image_ref: image_ref.into(),
            title: title.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_content(&self) -> bool {
        self.page_type == PageType::Content
    }
}

/// Descriptive pointer into the content sequence. Never authoritative over
/// page order and not rewritten when pages move.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableOfContentsItem {
    pub id: TocItemId,
    pub yearbook_id: YearbookId,
    pub title: String,
    pub page_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Caller roles known to the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    School,
    Viewer,
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super_admin" => Ok(Role::SuperAdmin),
            "school" => Ok(Role::School),
            "viewer" => Ok(Role::Viewer),
            other => Err(format!(
                "unknown role '{other}' (expected super_admin, school or viewer)"
            )),
        }
    }
}

/// An authenticated principal, as issued by the (external) session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub subject_id: UserId,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<SchoolId>,
}

/// Who is asking the gateway for an image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Caller {
    Anonymous,
    Authenticated(Identity),
}

impl Caller {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Caller::Anonymous => None,
            Caller::Authenticated(id) => Some(id),
        }
    }
}

impl From<Identity> for Caller {
    fn from(id: Identity) -> Self {
        Caller::Authenticated(id)
    }
}

/// Result of the user/entitlement lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSet {
    /// `(school_id, year)` pairs the subject has purchased.
    pub purchased: HashSet<(SchoolId, i32)>,
}

impl EntitlementSet {
    pub fn covers(&self, school_id: SchoolId, year: i32) -> bool {
        self.purchased.contains(&(school_id, year))
    }
}

/// A file submitted for ingestion.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub file_name: String,
    /// MIME type declared by the client.
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    /// Lower-cased extension of the original file name, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("file_name", &self.file_name)
            .field("content_type", &self.content_type)
            .field("bytes", &format_args!("<{} bytes>", self.bytes.len()))
            .finish()
    }
}

/// What an ingestion request produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreatedPages {
    /// A single image upload (cover or one content page).
    Single { page: YearbookPage },
    /// A multi-file content upload.
    Many { pages: Vec<YearbookPage> },
    /// A PDF ingestion.
    #[serde(rename_all = "camelCase")]
    Pdf {
        pages_created: usize,
        covers_auto_assigned: bool,
        pages: Vec<YearbookPage>,
    },
}

impl CreatedPages {
    pub fn pages(&self) -> &[YearbookPage] {
        match self {
            CreatedPages::Single { page } => std::slice::from_ref(page),
            CreatedPages::Many { pages } | CreatedPages::Pdf { pages, .. } => pages,
        }
    }
}

/// Sort content pages by number, breaking ties by creation time then id so
/// the order is total even for a store that lost its constraints.
pub fn sort_content(pages: &mut [YearbookPage]) {
    pages.sort_by(|a, b| {
        a.page_number
            .cmp(&b.page_number)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn covers_always_get_sentinel_number() {
        let p = YearbookPage::new(Uuid::nil(), PageType::BackCover, 7, "/x", "Back");
        assert_eq!(p.page_number, COVER_PAGE_NUMBER);
        let c = YearbookPage::new(Uuid::nil(), PageType::Content, 7, "/y", "Page 7");
        assert_eq!(c.page_number, 7);
    }

    #[test]
    fn page_type_parses_and_serialises() {
        assert_eq!("front_cover".parse::<PageType>().unwrap(), PageType::FrontCover);
        assert!("cover".parse::<PageType>().is_err());
        assert_eq!(
            serde_json::to_string(&PageType::BackCover).unwrap(),
            "\"back_cover\""
        );
    }

    #[test]
    fn created_pages_pdf_summary_is_camel_case() {
        let summary = CreatedPages::Pdf {
            pages_created: 4,
            covers_auto_assigned: true,
            pages: vec![],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["pagesCreated"], 4);
        assert_eq!(json["coversAutoAssigned"], true);
    }

    #[test]
    fn upload_file_debug_hides_bytes() {
        let f = UploadFile::new("a.png", "image/png", vec![0u8; 1024]);
        let dbg = format!("{f:?}");
        assert!(dbg.contains("<1024 bytes>"));
        assert_eq!(f.extension().as_deref(), Some("png"));
    }
}
