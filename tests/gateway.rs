//! Access decisions and byte streaming, over a filesystem blob store.

mod common;

use common::{pdf_upload, png_upload, Harness, ScriptedExtractor};
use futures::StreamExt;
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;
use yearbook_pages::{
    AccessDenied, Caller, FsBlobStore, Grant, Identity, IngestRequest, PageType, PipelineConfig,
    Role, UploadType, YearbookPage,
};

struct Fixture {
    h: Harness,
    _dir: TempDir,
    school: Uuid,
    year: i32,
    front: YearbookPage,
    content: YearbookPage,
    back: YearbookPage,
}

/// A PDF-mode yearbook of three pages stored on disk.
async fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = PipelineConfig::builder()
        .storage_root(dir.path())
        .build()
        .unwrap();
    let blobs = Arc::new(FsBlobStore::new(dir.path()));
    let h = Harness::with(config, ScriptedExtractor::pages(3), blobs);
    let yb = h.yearbook(UploadType::Pdf).await;
    let created = h
        .service
        .ingest(IngestRequest::new(yb.id, PageType::Content, vec![pdf_upload("book.pdf")]))
        .await
        .unwrap();
    let pages = created.pages().to_vec();
    Fixture {
        school: yb.school_id,
        year: yb.year,
        front: pages[0].clone(),
        content: pages[1].clone(),
        back: pages[2].clone(),
        h,
        _dir: dir,
    }
}

fn register(f: &Fixture, role: Role, school_id: Option<Uuid>) -> Caller {
    let identity = Identity {
        subject_id: Uuid::new_v4(),
        role,
        school_id,
    };
    f.h.users.register(identity.clone());
    Caller::Authenticated(identity)
}

async fn body(f: &Fixture, reference: &str, caller: &Caller) -> Result<(Grant, Vec<u8>), AccessDenied> {
    let image = f.h.service.resolve(reference, caller).await?;
    let mut bytes = Vec::new();
    let mut stream = image.body;
    while let Some(chunk) = stream.next().await {
        bytes.extend(chunk.unwrap());
    }
    assert_eq!(bytes.len() as u64, image.length);
    Ok((image.grant, bytes))
}

#[tokio::test]
async fn front_cover_is_public() {
    let f = fixture().await;
    let (grant, bytes) = body(&f, &f.front.image_ref, &Caller::Anonymous).await.unwrap();
    assert_eq!(grant, Grant::PublicFrontCover);
    assert_eq!(bytes, b"page-1");
}

#[tokio::test]
async fn served_image_carries_headers() {
    let f = fixture().await;
    let image = f
        .h
        .service
        .resolve(&f.front.image_ref, &Caller::Anonymous)
        .await
        .unwrap();
    assert_eq!(image.content_type, "image/jpeg");
    assert_eq!(image.cache_control, "private, max-age=3600");
    assert_eq!(image.page_id, f.front.id);
}

#[tokio::test]
async fn anonymous_callers_must_authenticate_for_other_pages() {
    let f = fixture().await;
    for page in [&f.content, &f.back] {
        let err = body(&f, &page.image_ref, &Caller::Anonymous).await.unwrap_err();
        assert_eq!(err, AccessDenied::AuthenticationRequired);
        assert_eq!(err.status_code(), 401);
    }
}

#[tokio::test]
async fn viewer_needs_a_matching_purchase() {
    let f = fixture().await;
    let viewer = register(&f, Role::Viewer, None);
    let subject = viewer.identity().unwrap().subject_id;

    let err = body(&f, &f.content.image_ref, &viewer).await.unwrap_err();
    assert_eq!(err, AccessDenied::PurchaseRequired);
    assert_eq!(err.status_code(), 403);

    // Same school, other year: still nothing.
    assert!(f.h.users.grant(subject, f.school, f.year - 1));
    let err = body(&f, &f.content.image_ref, &viewer).await.unwrap_err();
    assert_eq!(err, AccessDenied::PurchaseRequired);

    assert!(f.h.users.grant(subject, f.school, f.year));
    let (grant, bytes) = body(&f, &f.content.image_ref, &viewer).await.unwrap();
    assert_eq!(grant, Grant::Purchased);
    assert_eq!(bytes, b"page-2");
}

#[tokio::test]
async fn owning_school_sees_drafts_and_others_do_not() {
    let f = fixture().await;
    let owner = register(&f, Role::School, Some(f.school));
    let other = register(&f, Role::School, Some(Uuid::new_v4()));

    let (grant, _) = body(&f, &f.back.image_ref, &owner).await.unwrap();
    assert_eq!(grant, Grant::SchoolOwner);

    let err = body(&f, &f.back.image_ref, &other).await.unwrap_err();
    assert_eq!(err, AccessDenied::Forbidden);
}

#[tokio::test]
async fn super_admin_sees_everything() {
    let f = fixture().await;
    let admin = register(&f, Role::SuperAdmin, None);
    for page in [&f.front, &f.content, &f.back] {
        let (grant, _) = body(&f, &page.image_ref, &admin).await.unwrap();
        let expected = if page.page_type == PageType::FrontCover {
            Grant::PublicFrontCover
        } else {
            Grant::SuperAdmin
        };
        assert_eq!(grant, expected);
    }
}

#[tokio::test]
async fn bare_storage_relative_references_resolve() {
    let f = fixture().await;
    let admin = register(&f, Role::SuperAdmin, None);
    let bare = f
        .content
        .image_ref
        .trim_start_matches("/api/secure-image/yearbooks/")
        .to_string();
    assert!(bare.starts_with("pdf_pages_"));
    let (_, bytes) = body(&f, &bare, &admin).await.unwrap();
    assert_eq!(bytes, b"page-2");
}

#[tokio::test]
async fn traversal_is_refused_even_for_admins() {
    let f = fixture().await;
    let admin = register(&f, Role::SuperAdmin, None);
    for reference in [
        "/api/secure-image/yearbooks/../../etc/passwd",
        "../secret.jpg",
        "pdf_pages_0123456789abcdef0123456789abcdef/../../x.jpg",
        "/etc/passwd",
        "some_dir/page_1.jpg",
    ] {
        let err = body(&f, reference, &admin).await.unwrap_err();
        assert!(
            matches!(err, AccessDenied::InvalidReference(_)),
            "{reference} gave {err:?}"
        );
        assert_eq!(err.status_code(), 403);
    }
}

#[tokio::test]
async fn deleted_page_is_not_found() {
    let f = fixture().await;
    let admin = register(&f, Role::SuperAdmin, None);
    f.h.service
        .delete(yearbook_pages::DeleteRequest {
            page_id: f.content.id,
        })
        .await
        .unwrap();
    let err = body(&f, &f.content.image_ref, &admin).await.unwrap_err();
    assert_eq!(err, AccessDenied::NotFound);
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn replaced_cover_stops_resolving() {
    let f = fixture().await;
    let yb = f.h.yearbook(UploadType::Image).await;
    let upload = |shade| IngestRequest::new(yb.id, PageType::FrontCover, vec![png_upload("c.png", shade)]);

    let old = f.h.service.ingest(upload(1)).await.unwrap().pages()[0].clone();
    let new = f.h.service.ingest(upload(2)).await.unwrap().pages()[0].clone();

    let err = body(&f, &old.image_ref, &Caller::Anonymous).await.unwrap_err();
    assert_eq!(err, AccessDenied::NotFound);
    let (_, bytes) = body(&f, &new.image_ref, &Caller::Anonymous).await.unwrap();
    assert_eq!(bytes, common::png(2));
}

#[tokio::test]
async fn unknown_user_ids_resolve_as_anonymous() {
    let f = fixture().await;
    let caller = f.h.service.gateway().caller_for(Some(Uuid::new_v4())).await.unwrap();
    assert_eq!(caller, Caller::Anonymous);
    let err = body(&f, &f.content.image_ref, &caller).await.unwrap_err();
    assert_eq!(err, AccessDenied::AuthenticationRequired);
}
