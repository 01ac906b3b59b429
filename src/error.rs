//! Error types for the yearbook-pages library.
//!
//! Four error types mirror the four places a request can fail:
//!
//! * [`YearbookError`]: an ingestion, ordering, setup or table-of-contents
//!   request was rejected or could not complete. Every variant maps to a
//!   machine-readable [`ErrorKind`] so transports can answer with a stable
//!   code instead of parsing messages.
//!
//! * [`ExtractionError`]: the PDF extractor failed. Kept separate so the
//!   pipeline can tell "the host has no rendering toolchain" apart from "this
//!   document is broken" and phrase an actionable message.
//!
//! * [`StoreError`]: a collaborator (page store, blob store, entitlement
//!   lookup) failed. Converted into [`YearbookError::Storage`] or
//!   [`AccessDenied::Storage`] at the request boundary.
//!
//! * [`AccessDenied`]: the access gateway refused to serve an image.
//!
//! Nothing here is fatal to the process: every error is scoped to the single
//! request that produced it.

use crate::model::{PageId, PageType, TocItemId, UploadType, YearbookId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Machine-readable error code carried by every [`YearbookError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    PdfAlreadyExists,
    InvalidFileType,
    FileTooLarge,
    TotalSizeExceeded,
    InvalidFileCount,
    ExtractionFailed,
    InvalidPageNumber,
    NotFound,
    Consistency,
    Validation,
    Storage,
    InvalidConfig,
    Internal,
}

impl ErrorKind {
    /// The wire code, e.g. `"PDF_ALREADY_EXISTS"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::PdfAlreadyExists => "PDF_ALREADY_EXISTS",
            ErrorKind::InvalidFileType => "INVALID_FILE_TYPE",
            ErrorKind::FileTooLarge => "FILE_TOO_LARGE",
            ErrorKind::TotalSizeExceeded => "TOTAL_SIZE_EXCEEDED",
            ErrorKind::InvalidFileCount => "INVALID_FILE_COUNT",
            ErrorKind::ExtractionFailed => "EXTRACTION_FAILED",
            ErrorKind::InvalidPageNumber => "INVALID_PAGE_NUMBER",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Consistency => "CONSISTENCY",
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Storage => "STORAGE",
            ErrorKind::InvalidConfig => "INVALID_CONFIG",
            ErrorKind::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All request-level errors returned by ingestion, ordering, setup and TOC
/// operations.
#[derive(Debug, Error)]
pub enum YearbookError {
    // ── Validation errors (no side effects) ──────────────────────────────
    /// A PDF was already ingested into this yearbook.
    #[error(
        "A PDF has already been uploaded for yearbook {yearbook_id}.\n\
Delete all existing pages before uploading a new PDF."
    )]
    PdfAlreadyExists { yearbook_id: YearbookId },

    /// The file type does not match the yearbook's upload mode or the role.
    #[error("File '{file_name}' is not accepted here: {reason}")]
    InvalidFileType { file_name: String, reason: String },

    /// A single file exceeds the per-file cap.
    #[error("File '{file_name}' is too large: {size} bytes (limit {limit} bytes)")]
    FileTooLarge {
        file_name: String,
        size: u64,
        limit: u64,
    },

    /// The submission as a whole exceeds the aggregate cap.
    #[error("Upload size limit exceeded: {total} bytes in total (limit {limit} bytes)")]
    TotalSizeExceeded { total: u64, limit: u64 },

    /// Wrong number of files for the declared role.
    #[error("{role} uploads take {expected}, got {count} file(s)")]
    InvalidFileCount {
        role: PageType,
        expected: String,
        count: usize,
    },

    /// Target page number is outside `1..=max`.
    #[error("Invalid page number {requested}: yearbook has {max} content page(s)")]
    InvalidPageNumber { requested: u32, max: u32 },

    /// Generic input validation failure (bad year, empty title, locked upload mode …).
    #[error("Validation failed: {0}")]
    Validation(String),

    // ── Extraction errors ────────────────────────────────────────────────
    /// The PDF could not be turned into page images.
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    // ── Not found ────────────────────────────────────────────────────────
    #[error("Yearbook {0} not found")]
    YearbookNotFound(YearbookId),

    #[error("Page {0} not found")]
    PageNotFound(PageId),

    #[error("Table of contents item {0} not found")]
    TocItemNotFound(TocItemId),

    // ── Consistency errors ───────────────────────────────────────────────
    /// A page referenced by an ordering request belongs to another yearbook.
    #[error("Page {page_id} does not belong to yearbook {yearbook_id}")]
    PageNotInYearbook {
        page_id: PageId,
        yearbook_id: YearbookId,
    },

    /// An ordering operation referenced a cover page.
    #[error("Page {page_id} is a {page_type} and has no content page number")]
    NotAContentPage { page_id: PageId, page_type: PageType },

    /// The upload type of an initialised yearbook cannot change.
    #[error("Yearbook {yearbook_id} is initialised for {current} uploads")]
    UploadTypeLocked {
        yearbook_id: YearbookId,
        current: UploadType,
    },

    // ── Storage errors ───────────────────────────────────────────────────
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    // ── Config errors ────────────────────────────────────────────────────
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ────────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl YearbookError {
    /// Machine-readable code for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            YearbookError::PdfAlreadyExists { .. } => ErrorKind::PdfAlreadyExists,
            YearbookError::InvalidFileType { .. } => ErrorKind::InvalidFileType,
            YearbookError::FileTooLarge { .. } => ErrorKind::FileTooLarge,
            YearbookError::TotalSizeExceeded { .. } => ErrorKind::TotalSizeExceeded,
            YearbookError::InvalidFileCount { .. } => ErrorKind::InvalidFileCount,
            YearbookError::InvalidPageNumber { .. } => ErrorKind::InvalidPageNumber,
            YearbookError::Validation(_) | YearbookError::UploadTypeLocked { .. } => {
                ErrorKind::Validation
            }
            YearbookError::Extraction(_) => ErrorKind::ExtractionFailed,
            YearbookError::YearbookNotFound(_)
            | YearbookError::PageNotFound(_)
            | YearbookError::TocItemNotFound(_) => ErrorKind::NotFound,
            YearbookError::PageNotInYearbook { .. } | YearbookError::NotAContentPage { .. } => {
                ErrorKind::Consistency
            }
            YearbookError::Storage(StoreError::NotFound(_)) => ErrorKind::NotFound,
            YearbookError::Storage(_) => ErrorKind::Storage,
            YearbookError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            YearbookError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for rejections raised before any side effect took place.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::PdfAlreadyExists
                | ErrorKind::InvalidFileType
                | ErrorKind::FileTooLarge
                | ErrorKind::TotalSizeExceeded
                | ErrorKind::InvalidFileCount
                | ErrorKind::InvalidPageNumber
                | ErrorKind::Validation
        )
    }
}

/// Failure of the PDF extractor.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum ExtractionError {
    /// The document is password protected.
    #[error(
        "The PDF is encrypted and cannot be processed.\n\
Remove the password protection or upload individual images instead."
    )]
    Encrypted,

    /// The document parsed but has zero pages.
    #[error("The PDF contains no pages")]
    NoPages,

    /// Header/trailer/xref is broken.
    #[error("The PDF is corrupt: {0}\nTry re-exporting it, or upload individual images instead.")]
    Corrupt(String),

    /// The host has no PDF rendering toolchain.
    #[error(
        "PDF processing is not available on this server: {0}\n\n\
Upload individual images instead, or install PDFium and set PDFIUM_LIB_PATH=/path/to/libpdfium."
    )]
    ToolchainUnavailable(String),

    /// Extraction did not finish within the configured bound.
    #[error("PDF extraction timed out after {secs}s\nUpload individual images or a smaller PDF instead.")]
    Timeout { secs: u64 },

    /// A single page could not be rasterised or encoded.
    #[error("Rasterisation failed for page {page}: {detail}")]
    Rasterisation { page: usize, detail: String },

    #[error("Extraction internal error: {0}")]
    Internal(String),
}

impl ExtractionError {
    /// True when the failure is environmental rather than caused by the document.
    pub fn is_toolchain_missing(&self) -> bool {
        matches!(self, ExtractionError::ToolchainUnavailable(_))
    }
}

/// Failure of an external collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    /// A write would break a uniqueness constraint, e.g. two content pages
    /// sharing `(yearbook_id, page_number)`.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("blob I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("store internal error: {0}")]
    Internal(String),
}

/// Why the access gateway refused to serve an image.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessDenied {
    /// The reference failed normalisation (traversal, bad segment, escape).
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// No page owns the reference, or its blob is gone.
    #[error("Image not found")]
    NotFound,

    /// An anonymous caller asked for a non-public page.
    #[error("Authentication required to access this image")]
    AuthenticationRequired,

    /// A viewer without a matching purchase.
    #[error("You must purchase this yearbook to access its pages")]
    PurchaseRequired,

    #[error("Access denied")]
    Forbidden,

    /// The store failed while deciding.
    #[error("Failed to serve image: {0}")]
    Storage(String),
}

impl AccessDenied {
    /// HTTP-equivalent status code.
    pub fn status_code(&self) -> u16 {
        match self {
            AccessDenied::InvalidReference(_)
            | AccessDenied::PurchaseRequired
            | AccessDenied::Forbidden => 403,
            AccessDenied::AuthenticationRequired => 401,
            AccessDenied::NotFound => 404,
            AccessDenied::Storage(_) => 500,
        }
    }

    /// Machine-readable reason code.
    pub fn reason(&self) -> &'static str {
        match self {
            AccessDenied::InvalidReference(_) => "INVALID_REFERENCE",
            AccessDenied::NotFound => "NOT_FOUND",
            AccessDenied::AuthenticationRequired => "AUTHENTICATION_REQUIRED",
            AccessDenied::PurchaseRequired => "PURCHASE_REQUIRED",
            AccessDenied::Forbidden => "FORBIDDEN",
            AccessDenied::Storage(_) => "STORAGE",
        }
    }
}

impl From<StoreError> for AccessDenied {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => AccessDenied::NotFound,
            other => AccessDenied::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn pdf_already_exists_kind_and_message() {
        let e = YearbookError::PdfAlreadyExists {
            yearbook_id: Uuid::nil(),
        };
        assert_eq!(e.kind(), ErrorKind::PdfAlreadyExists);
        assert_eq!(e.kind().as_str(), "PDF_ALREADY_EXISTS");
        assert!(e.is_validation());
        assert!(e.to_string().contains("Delete all existing pages"));
    }

    #[test]
    fn extraction_maps_to_extraction_failed() {
        let e: YearbookError = ExtractionError::ToolchainUnavailable("no libpdfium".into()).into();
        assert_eq!(e.kind(), ErrorKind::ExtractionFailed);
        assert!(!e.is_validation());
        let msg = e.to_string();
        assert!(msg.contains("individual images"), "got: {msg}");
    }

    #[test]
    fn error_kind_serialises_screaming_snake() {
        let json = serde_json::to_string(&ErrorKind::TotalSizeExceeded).unwrap();
        assert_eq!(json, "\"TOTAL_SIZE_EXCEEDED\"");
    }

    #[test]
    fn store_not_found_is_not_found_kind() {
        let e = YearbookError::Storage(StoreError::NotFound("page".into()));
        assert_eq!(e.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn access_denied_status_codes() {
        assert_eq!(AccessDenied::PurchaseRequired.status_code(), 403);
        assert_eq!(AccessDenied::Forbidden.status_code(), 403);
        assert_eq!(AccessDenied::AuthenticationRequired.status_code(), 401);
        assert_eq!(AccessDenied::NotFound.status_code(), 404);
        assert_ne!(
            AccessDenied::PurchaseRequired.reason(),
            AccessDenied::Forbidden.reason()
        );
    }
}
