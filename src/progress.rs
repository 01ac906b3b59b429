//! Progress-callback trait for ingestion events.
//!
//! Pass an [`Arc<dyn IngestProgressCallback>`] to
//! [`crate::ingest::IngestPipeline::ingest_with_progress`] to receive events
//! while a submission is validated, extracted and stored. The CLI forwards
//! them to an `indicatif` progress bar.
//!
//! # Example
//!
//! ```rust
//! use yearbook_pages::IngestProgressCallback;
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     stored: AtomicUsize,
//! }
//!
//! impl IngestProgressCallback for CountingCallback {
//!     fn on_page_stored(&self, index: usize, total: usize) {
//!         let done = self.stored.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("stored {index}/{total} ({done} so far)");
//!     }
//! }
//!
//! let cb: Arc<dyn IngestProgressCallback> = Arc::new(CountingCallback {
//!     stored: AtomicUsize::new(0),
//! });
//! cb.on_page_stored(1, 3);
//! ```

use std::sync::Arc;

/// Called by the ingestion pipeline as it works through a submission.
///
/// All methods have default no-op implementations. The extraction callbacks
/// fire from a blocking worker thread, so implementations must be
/// `Send + Sync`.
pub trait IngestProgressCallback: Send + Sync {
    /// Validation passed and `total_files` files will be processed.
    fn on_ingest_start(&self, total_files: usize) {
        let _ = total_files;
    }

    /// A PDF of `total_pages` pages is about to be rasterised.
    fn on_extraction_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Page `index` (1-based) was rasterised and encoded.
    fn on_page_extracted(&self, index: usize, total_pages: usize) {
        let _ = (index, total_pages);
    }

    /// Image `index` (1-based) was written and its page record created.
    fn on_page_stored(&self, index: usize, total: usize) {
        let _ = (index, total);
    }

    /// The request finished; `pages_created` records were committed.
    fn on_ingest_complete(&self, pages_created: usize) {
        let _ = pages_created;
    }

    /// The request failed and everything it created was rolled back.
    fn on_ingest_error(&self, error: &str) {
        let _ = error;
    }
}

/// A no-op implementation used when no callback is supplied.
pub struct NoopProgressCallback;

impl IngestProgressCallback for NoopProgressCallback {}

/// Shared handle to a progress callback.
pub type ProgressCallback = Arc<dyn IngestProgressCallback>;

pub(crate) fn noop() -> ProgressCallback {
    Arc::new(NoopProgressCallback)
}
