//! Ingestion scenarios run against in-memory collaborators.

mod common;

use common::{pdf_upload, png_upload, FlakyBlobStore, Harness, ScriptedExtractor};
use std::sync::Arc;
use yearbook_pages::{
    BlobPath, BlobStore, CreatedPages, ErrorKind, ExtractionError, IngestRequest, MemoryBlobStore,
    PageStore, PageType, PdfSummary, PipelineConfig, UploadFile, UploadType, YearbookError,
};

async fn blob_bytes(blobs: &dyn BlobStore, image_ref: &str) -> Vec<u8> {
    let path = BlobPath::parse(image_ref).unwrap();
    blobs.open(&path).await.unwrap().read_all().await.unwrap()
}

// ── Covers ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn cover_upload_replaces_the_previous_cover() {
    let h = Harness::new(ScriptedExtractor::pages(0));
    let yb = h.yearbook(UploadType::Image).await;

    let first = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::FrontCover, vec![png_upload("a.png", 10)]))
        .await
        .unwrap();
    let first = first.pages()[0].clone();
    assert_eq!(first.page_number, 0);
    assert_eq!(first.title, "Front Cover");

    let second = h
        .service
        .ingest(
            IngestRequest::new(yb.id, PageType::FrontCover, vec![png_upload("b.png", 20)])
                .with_title("New cover"),
        )
        .await
        .unwrap();
    let second = second.pages()[0].clone();

    let covers: Vec<_> = h
        .store
        .pages(yb.id)
        .await
        .unwrap()
        .into_iter()
        .filter(|p| p.page_type == PageType::FrontCover)
        .collect();
    assert_eq!(covers.len(), 1);
    assert_eq!(covers[0].id, second.id);
    assert_eq!(covers[0].title, "New cover");

    // The old blob is gone, the cached reference points at the new one.
    let old_path = BlobPath::parse(&first.image_ref).unwrap();
    assert!(!h.blobs.exists(&old_path).await.unwrap());
    let yb = h.store.yearbook(yb.id).await.unwrap().unwrap();
    assert_eq!(yb.front_cover_ref.as_deref(), Some(second.image_ref.as_str()));
    assert_eq!(blob_bytes(h.blobs.as_ref(), &second.image_ref).await, common::png(20));
}

#[tokio::test]
async fn covers_do_not_touch_content_numbering() {
    let h = Harness::new(ScriptedExtractor::pages(0));
    let yb = h.yearbook(UploadType::Image).await;
    h.service
        .ingest(IngestRequest::new(
            yb.id,
            PageType::Content,
            vec![png_upload("1.png", 1), png_upload("2.png", 2)],
        ))
        .await
        .unwrap();
    h.service
        .ingest(IngestRequest::new(yb.id, PageType::BackCover, vec![png_upload("b.png", 3)]))
        .await
        .unwrap();
    assert_eq!(h.assert_contiguous(yb.id).await, 2);
}

#[tokio::test]
async fn cover_takes_exactly_one_file() {
    let h = Harness::new(ScriptedExtractor::pages(0));
    let yb = h.yearbook(UploadType::Image).await;
    let err = h
        .service
        .ingest(IngestRequest::new(
            yb.id,
            PageType::BackCover,
            vec![png_upload("a.png", 1), png_upload("b.png", 2)],
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFileCount);
    assert!(h.store.pages(yb.id).await.unwrap().is_empty());
}

// ── Content images ───────────────────────────────────────────────────────────

#[tokio::test]
async fn content_pages_append_after_existing_ones() {
    let h = Harness::new(ScriptedExtractor::pages(0));
    let yb = h.yearbook(UploadType::Image).await;

    let one = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![png_upload("a.png", 1)]))
        .await
        .unwrap();
    assert!(matches!(one, CreatedPages::Single { .. }));

    let many = h
        .service
        .ingest(IngestRequest::new(
            yb.id,
            PageType::Content,
            vec![png_upload("b.png", 2), png_upload("c.png", 3)],
        ))
        .await
        .unwrap();
    let numbers: Vec<u32> = many.pages().iter().map(|p| p.page_number).collect();
    assert_eq!(numbers, vec![2, 3]);
    assert_eq!(many.pages()[1].title, "Page 3");
    assert_eq!(h.assert_contiguous(yb.id).await, 3);
}

#[tokio::test]
async fn image_mode_rejects_pdf_and_disguised_files() {
    let h = Harness::new(ScriptedExtractor::pages(3));
    let yb = h.yearbook(UploadType::Image).await;

    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![pdf_upload("book.pdf")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFileType);

    let text = UploadFile::new("notes.png", "image/png", b"just some text".to_vec());
    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![text]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFileType);
    assert!(h.store.pages(yb.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn size_limits_are_enforced_before_any_write() {
    let blobs = Arc::new(MemoryBlobStore::new());
    let config = PipelineConfig::builder()
        .max_image_bytes(100)
        .max_pdf_bytes(150)
        .max_total_bytes(150)
        .build()
        .unwrap();
    let h = Harness::with(config, ScriptedExtractor::pages(0), blobs.clone());
    let yb = h.yearbook(UploadType::Image).await;

    let mut big = png_upload("big.png", 1);
    big.bytes.resize(101, 0);
    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![big]))
        .await
        .unwrap_err();
    assert!(matches!(err, YearbookError::FileTooLarge { size: 101, limit: 100, .. }));

    let mut a = png_upload("a.png", 1);
    let mut b = png_upload("b.png", 2);
    a.bytes.resize(80, 0);
    b.bytes.resize(80, 0);
    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![a, b]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TotalSizeExceeded);
    assert!(err.is_validation());
    assert!(blobs.is_empty());
}

#[tokio::test]
async fn failed_content_upload_leaves_nothing_behind() {
    let blobs = FlakyBlobStore::failing_on(3);
    let h = Harness::with(PipelineConfig::default(), ScriptedExtractor::pages(0), blobs.clone());
    let yb = h.yearbook(UploadType::Image).await;

    let files = (1..=4).map(|i| png_upload(&format!("{i}.png"), i)).collect();
    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, files))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
    assert!(h.store.pages(yb.id).await.unwrap().is_empty());
    assert_eq!(blobs.len(), 0);
}

// ── PDF ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn pdf_maps_first_and_last_pages_to_covers() {
    let h = Harness::new(ScriptedExtractor::pages(4));
    let yb = h.yearbook(UploadType::Pdf).await;

    let created = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![pdf_upload("book.pdf")]))
        .await
        .unwrap();
    let summary = PdfSummary::of(&created).unwrap();
    assert_eq!(summary.pages_created, 4);
    assert!(summary.covers_auto_assigned);

    let pages = h.service.pages(yb.id).await.unwrap();
    let layout: Vec<(PageType, u32)> = pages.iter().map(|p| (p.page_type, p.page_number)).collect();
    assert_eq!(
        layout,
        vec![
            (PageType::FrontCover, 0),
            (PageType::Content, 1),
            (PageType::Content, 2),
            (PageType::BackCover, 0),
        ]
    );

    // Blob contents follow source page order.
    let bodies = [
        blob_bytes(h.blobs.as_ref(), &pages[0].image_ref).await,
        blob_bytes(h.blobs.as_ref(), &pages[1].image_ref).await,
        blob_bytes(h.blobs.as_ref(), &pages[3].image_ref).await,
    ];
    assert_eq!(bodies[0], b"page-1");
    assert_eq!(bodies[1], b"page-2");
    assert_eq!(bodies[2], b"page-4");

    let yb = h.store.yearbook(yb.id).await.unwrap().unwrap();
    assert_eq!(yb.front_cover_ref.as_deref(), Some(pages[0].image_ref.as_str()));
    assert_eq!(yb.back_cover_ref.as_deref(), Some(pages[3].image_ref.as_str()));
    assert!(pages[0].image_ref.contains("/pdf_pages_"));
}

#[tokio::test]
async fn two_page_pdf_yields_only_covers() {
    let h = Harness::new(ScriptedExtractor::pages(2));
    let yb = h.yearbook(UploadType::Pdf).await;
    h.service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![pdf_upload("b.pdf")]))
        .await
        .unwrap();
    assert_eq!(h.assert_contiguous(yb.id).await, 0);
    assert_eq!(h.store.pages(yb.id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn second_pdf_is_rejected_without_extraction() {
    let extractor = ScriptedExtractor::pages(3);
    let h = Harness::new(extractor.clone());
    let yb = h.yearbook(UploadType::Pdf).await;

    h.service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![pdf_upload("a.pdf")]))
        .await
        .unwrap();
    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![pdf_upload("b.pdf")]))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PdfAlreadyExists);
    assert_eq!(extractor.call_count(), 1);
    assert_eq!(h.store.pages(yb.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn extraction_failure_creates_no_pages() {
    let h = Harness::new(ScriptedExtractor::failing(ExtractionError::Encrypted));
    let yb = h.yearbook(UploadType::Pdf).await;
    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![pdf_upload("locked.pdf")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ExtractionFailed);
    assert!(err.to_string().contains("upload individual images"));
    assert!(h.store.pages(yb.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn pdf_failure_midway_rolls_back_pages_blobs_and_cover_refs() {
    let blobs = FlakyBlobStore::failing_on(3);
    let h = Harness::with(PipelineConfig::default(), ScriptedExtractor::pages(4), blobs.clone());
    let yb = h.yearbook(UploadType::Pdf).await;

    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![pdf_upload("a.pdf")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);

    assert!(h.store.pages(yb.id).await.unwrap().is_empty());
    assert_eq!(blobs.len(), 0);
    let yb = h.store.yearbook(yb.id).await.unwrap().unwrap();
    assert_eq!(yb.front_cover_ref, None);
    assert_eq!(yb.back_cover_ref, None);
}

#[tokio::test]
async fn pdf_mode_rejects_images_and_cover_pdfs_by_default() {
    let h = Harness::new(ScriptedExtractor::pages(3));
    let yb = h.yearbook(UploadType::Pdf).await;

    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![png_upload("a.png", 1)]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFileType);

    let err = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::FrontCover, vec![pdf_upload("c.pdf")]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidFileType);
}

#[tokio::test]
async fn cover_pdf_is_trimmed_when_allowed() {
    let config = PipelineConfig::builder()
        .allow_pdf_cover_upload(true)
        .build()
        .unwrap();
    let h = Harness::with(
        config,
        ScriptedExtractor::pages(3),
        Arc::new(MemoryBlobStore::new()),
    );
    let yb = h.yearbook(UploadType::Pdf).await;

    let back = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::BackCover, vec![pdf_upload("b.pdf")]))
        .await
        .unwrap();
    let back = &back.pages()[0];
    assert_eq!(back.page_type, PageType::BackCover);
    assert_eq!(blob_bytes(h.blobs.as_ref(), &back.image_ref).await, b"page-3");
    assert_eq!(h.store.pages(yb.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_yearbook_is_not_found() {
    let h = Harness::new(ScriptedExtractor::pages(0));
    let err = h
        .service
        .ingest(IngestRequest::new(
            uuid::Uuid::new_v4(),
            PageType::Content,
            vec![png_upload("a.png", 1)],
        ))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
