//! Post Tests
//!
//! Covers uploading (validation, image detection, blob and document writes)
//! and owner-only deletion.

mod common;

use axum::http::StatusCode;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{post_body, user, TestApp, UPLOAD_MAX_BYTES};
use galleri::domain::post::FeedQuery;
use galleri::infra::storage::{object_key, object_url, parse_endpoint};
use serde_json::{json, Value};
use std::io::Cursor;
use uuid::Uuid;

fn png() -> Vec<u8> {
    let mut bytes = Vec::new();
    image::RgbImage::new(2, 2)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

fn upload_request(image: &[u8], caption: &str, hashtags: &str) -> Value {
    json!({
        "image_base64": STANDARD.encode(image),
        "caption": caption,
        "description": "  golden hour  ",
        "hashtags": hashtags,
    })
}

// ===========================================================================
// Upload
// ===========================================================================

#[tokio::test]
async fn upload_stores_image_and_document() {
    let owner = user("owner");
    let app = TestApp::signed_in(&owner);

    let resp = app
        .post_json("/v1/posts", upload_request(&png(), " Beach day ", "sea, sun"))
        .await;
    assert_eq!(resp.status, StatusCode::CREATED);
    let body = resp.json();
    assert_eq!(body["caption"], "Beach day");
    assert_eq!(body["description"], "golden hour");
    assert_eq!(body["hashtags"], "#sea,#sun");
    assert_eq!(body["owner_id"], json!(owner.id));
    assert_eq!(body["owner_email"], owner.email);
    assert_eq!(body["like_count"], 0);
    assert_eq!(body["comments"], json!([]));

    let keys = app.blobs.keys();
    assert_eq!(keys.len(), 1);
    let prefix = format!("images/{}/", owner.id);
    assert!(keys[0].starts_with(&prefix));
    assert!(keys[0].ends_with(".png"));
    let millis = &keys[0][prefix.len()..keys[0].len() - ".png".len()];
    assert!(millis.parse::<u64>().is_ok());
    assert_eq!(app.blobs.content_type(&keys[0]).as_deref(), Some("image/png"));

    let post_id: Uuid = body["id"].as_str().unwrap().parse().unwrap();
    let stored = app.documents.body(post_id).unwrap();
    assert_eq!(stored["url"], body["url"]);
    assert_eq!(stored["likes"], json!([]));
    assert_eq!(stored["comments"], json!([]));

    // The new post reaches the lists through the feed, like any other.
    app.sync(FeedQuery::Gallery { owner_id: owner.id }).await;
    assert_eq!(app.get("/v1/gallery").await.json()["items"][0]["id"], json!(post_id));
}

#[tokio::test]
async fn upload_validation() {
    let app = TestApp::signed_in(&user("owner"));
    let cases = [
        (upload_request(&[], "caption", "#tag"), "no image selected"),
        (
            upload_request(&vec![0u8; UPLOAD_MAX_BYTES + 1], "caption", "#tag"),
            "image exceeds 65536 bytes",
        ),
        (
            upload_request(b"definitely not an image", "caption", "#tag"),
            "unsupported image format",
        ),
        (upload_request(&png(), "   ", "#tag"), "caption is required"),
        (
            upload_request(&png(), &"a".repeat(2201), "#tag"),
            "caption must be at most 2200 characters",
        ),
        (upload_request(&png(), "caption", " , "), "hashtags cannot be empty"),
    ];

    for (request, message) in cases {
        let resp = app.post_json("/v1/posts", request).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{}", message);
        assert_eq!(resp.error_message(), message);
    }

    assert!(app.blobs.keys().is_empty());
}

#[tokio::test]
async fn upload_rejects_invalid_base64() {
    let app = TestApp::signed_in(&user("owner"));

    let resp = app
        .post_json(
            "/v1/posts",
            json!({ "image_base64": "%%%", "caption": "c", "hashtags": "#t" }),
        )
        .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.error_message(), "image must be base64 encoded");
}

#[tokio::test]
async fn upload_rejects_a_second_concurrent_upload() {
    let app = TestApp::signed_in(&user("owner"));
    let _running = app.state.upload_lock.lock().await;

    let resp = app
        .post_json("/v1/posts", upload_request(&png(), "caption", "#tag"))
        .await;
    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.error_message(), "an upload is already in progress");
}

#[tokio::test]
async fn upload_without_blob_store_creates_nothing() {
    let app = TestApp::signed_in(&user("owner"));
    app.blobs.fail_puts(true);

    let resp = app
        .post_json("/v1/posts", upload_request(&png(), "caption", "#tag"))
        .await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);

    let snapshot = app.state.feed().load(&FeedQuery::Discover).await.unwrap();
    assert!(snapshot.posts.is_empty());
}

#[tokio::test]
async fn failed_document_create_removes_the_stored_image() {
    let app = TestApp::signed_in(&user("owner"));
    app.documents.fail_creates(true);

    let resp = app
        .post_json("/v1/posts", upload_request(&png(), "caption", "#tag"))
        .await;
    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);

    assert!(app.blobs.keys().is_empty());
    app.documents.fail_creates(false);
    let snapshot = app.state.feed().load(&FeedQuery::Discover).await.unwrap();
    assert!(snapshot.posts.is_empty());
}

#[tokio::test]
async fn upload_requires_a_viewer() {
    let app = TestApp::signed_out();

    let resp = app
        .post_json("/v1/posts", upload_request(&png(), "caption", "#tag"))
        .await;
    assert_eq!(resp.status, StatusCode::UNAUTHORIZED);
}

// ===========================================================================
// Delete
// ===========================================================================

#[tokio::test]
async fn owner_deletes_post_document_and_image() {
    let owner = user("owner");
    let app = TestApp::signed_in(&owner);
    let url = app.blobs.insert("images/owner/1.png");
    let mut body = post_body(&owner, "caption", "#sea");
    body["url"] = json!(url);
    let post_id = app.seed_body(body);
    app.sync_discover().await;
    app.state.store.open_view(post_id).unwrap();

    let resp = app.delete(&format!("/v1/posts/{}", post_id)).await;
    assert_eq!(resp.status, StatusCode::NO_CONTENT);

    assert!(!app.documents.contains(post_id));
    assert!(app.blobs.keys().is_empty());
    assert!(app.state.store.post(post_id).is_none());
    assert!(app.state.store.selected().is_none());
    assert!(app.state.store.posts(&FeedQuery::Discover).is_empty());
}

#[tokio::test]
async fn only_the_owner_can_delete() {
    let app = TestApp::signed_in(&user("stranger"));
    let post_id = app.seed_post(&user("owner"), "#sea");
    app.sync_discover().await;

    let resp = app.delete(&format!("/v1/posts/{}", post_id)).await;
    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.error_message(), "only the owner can delete this post");
    assert!(app.documents.contains(post_id));
    assert!(app.state.store.post(post_id).is_some());
}

#[tokio::test]
async fn delete_missing_post() {
    let app = TestApp::signed_in(&user("owner"));

    let resp = app.delete(&format!("/v1/posts/{}", Uuid::new_v4())).await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    assert_eq!(resp.error_message(), "post not found");
}

// ===========================================================================
// Blob URLs
// ===========================================================================

#[test]
fn object_urls_round_trip_through_the_key() {
    let base = parse_endpoint("localhost:9000").unwrap();
    let url = object_url(&base, "galleri", "images/abc/1700000000000.png").unwrap();

    assert_eq!(url, "http://localhost:9000/galleri/images/abc/1700000000000.png");
    assert_eq!(
        object_key(&url, "galleri").unwrap(),
        "images/abc/1700000000000.png"
    );
}

#[test]
fn foreign_urls_are_rejected() {
    assert!(object_key("https://cdn.example.com/other/images/a.png", "galleri").is_err());
    assert!(object_key("https://cdn.example.com/galleri", "galleri").is_err());
}
