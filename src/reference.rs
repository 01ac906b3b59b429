//! Image references and the storage-relative blob paths behind them.
//!
//! Pages store an opaque reference such as
//! `/api/secure-image/yearbooks/pdf_pages_<id>/page_3.jpg`. Callers hand the
//! same string back to the gateway, so it is untrusted input: [`BlobPath::parse`]
//! is the single place where a reference becomes a path, and it only accepts
//! at most one directory segment matching the extraction-directory pattern
//! followed by one file-name segment matching the file pattern. Anything
//! else, including every form of `..`, is rejected before any lookup.

use crate::error::AccessDenied;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

/// URL prefix under which page images are published.
pub const SECURE_IMAGE_PREFIX: &str = "/api/secure-image/yearbooks/";

/// Prefix of directories holding pages extracted from one PDF.
pub const EXTRACTION_DIR_PREFIX: &str = "pdf_pages_";

static RE_DIR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^pdf_pages_(?:[0-9a-f]{32}|[0-9]{1,20})$").unwrap());

static RE_FILE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,127}$").unwrap());

/// Percent-encoded forms of `.`, `/` and `\`.
static RE_ENCODED_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)%(2e|2f|5c)").unwrap());

/// A validated, storage-relative location of one page image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlobPath {
    dir: Option<String>,
    file: String,
}

impl BlobPath {
    /// Normalise an untrusted reference.
    ///
    /// Accepts `/api/secure-image/yearbooks/<file>`,
    /// `/api/secure-image/yearbooks/<dir>/<file>` and the bare `<file>` /
    /// `<dir>/<file>` forms.
    pub fn parse(raw: &str) -> Result<Self, AccessDenied> {
        let invalid = |why: &str| AccessDenied::InvalidReference(why.to_string());

        if raw.is_empty() {
            return Err(invalid("empty reference"));
        }
        if raw.contains("..") || raw.contains('\\') || raw.contains('\0') {
            return Err(invalid("traversal segment"));
        }
        if RE_ENCODED_SEPARATOR.is_match(raw) {
            return Err(invalid("encoded path separator"));
        }

        let rel = match raw.strip_prefix(SECURE_IMAGE_PREFIX) {
            Some(rest) => rest,
            None if raw.starts_with('/') => return Err(invalid("absolute path")),
            None => raw,
        };

        let segments: Vec<&str> = rel.split('/').collect();
        match segments.as_slice() {
            [file] => Self::from_parts(None, file),
            [dir, file] => Self::from_parts(Some(dir), file),
            _ => Err(invalid("too many path segments")),
        }
    }

    fn from_parts(dir: Option<&str>, file: &str) -> Result<Self, AccessDenied> {
        if let Some(d) = dir {
            if !RE_DIR.is_match(d) {
                return Err(AccessDenied::InvalidReference(format!(
                    "directory '{d}' is not an extraction directory"
                )));
            }
        }
        if !RE_FILE.is_match(file) {
            return Err(AccessDenied::InvalidReference(format!(
                "file name '{file}' is not allowed"
            )));
        }
        Ok(Self {
            dir: dir.map(str::to_string),
            file: file.to_string(),
        })
    }

    /// A fresh name for a directly uploaded image.
    pub fn new_upload(extension: &str) -> Self {
        let suffix = Uuid::new_v4().as_u128() as u32;
        Self {
            dir: None,
            file: format!(
                "yearbook-page-{}-{suffix}.{extension}",
                Utc::now().timestamp_millis()
            ),
        }
    }

    /// A fresh directory name for the pages of one PDF.
    pub fn new_extraction_dir() -> String {
        format!("{EXTRACTION_DIR_PREFIX}{}", Uuid::new_v4().simple())
    }

    /// Location of the `n`-th (1-based) page extracted into `dir`.
    pub fn extracted(dir: &str, n: usize, extension: &str) -> Self {
        Self {
            dir: Some(dir.to_string()),
            file: format!("page_{n}.{extension}"),
        }
    }

    pub fn dir(&self) -> Option<&str> {
        self.dir.as_deref()
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    /// The reference stored on the page record.
    pub fn image_ref(&self) -> String {
        format!("{SECURE_IMAGE_PREFIX}{self}")
    }

    /// Path relative to the storage root.
    pub fn relative(&self) -> PathBuf {
        match &self.dir {
            Some(d) => Path::new(d).join(&self.file),
            None => PathBuf::from(&self.file),
        }
    }

    /// Join onto `root`, refusing anything that would leave it.
    pub fn resolve_under(&self, root: &Path) -> Result<PathBuf, AccessDenied> {
        let rel = self.relative();
        if !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(AccessDenied::InvalidReference(
                "reference escapes the storage root".into(),
            ));
        }
        let full = root.join(rel);
        if !full.starts_with(root) {
            return Err(AccessDenied::InvalidReference(
                "reference escapes the storage root".into(),
            ));
        }
        Ok(full)
    }

    /// Content type derived from the file extension.
    pub fn content_type(&self) -> &'static str {
        let ext = Path::new(&self.file)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("jpg") | Some("jpeg") => "image/jpeg",
            Some("png") => "image/png",
            Some("gif") => "image/gif",
            Some("webp") => "image/webp",
            _ => "application/octet-stream",
        }
    }
}

impl fmt::Display for BlobPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dir {
            Some(d) => write!(f, "{d}/{}", self.file),
            None => f.write_str(&self.file),
        }
    }
}
