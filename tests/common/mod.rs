#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use futures::channel::mpsc as stream_channel;
use futures::stream::{BoxStream, StreamExt};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio::sync::watch;
use tower::ServiceExt;
use uuid::Uuid;

use galleri::app::notify::MutationFailure;
use galleri::app::store::StoreEvent;
use galleri::domain::post::{FeedQuery, Post};
use galleri::domain::user::Viewer;
use galleri::infra::documents::{
    ChangeNotice, ChangeOp, DocumentRef, DocumentStore, FieldMutation, RawDocument,
    RemoteMutationSink, POSTS_COLLECTION,
};
use galleri::infra::storage::BlobStore;
use galleri::AppState;

pub const UPLOAD_MAX_BYTES: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// In-memory document store
// ---------------------------------------------------------------------------

/// Document store that keeps everything in memory. Mutations can be held at
/// a gate and made to fail, so tests can look at the optimistic state before
/// the remote answers.
pub struct MemoryDocumentStore {
    documents: Mutex<Vec<(&'static str, RawDocument)>>,
    watchers: Mutex<Vec<stream_channel::UnboundedSender<Result<ChangeNotice>>>>,
    mutations: Mutex<Vec<(DocumentRef, FieldMutation)>>,
    gate: watch::Sender<bool>,
    fail_mutations: AtomicBool,
    fail_queries: AtomicBool,
    fail_creates: AtomicBool,
    watch_calls: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(false);
        Self {
            documents: Mutex::new(Vec::new()),
            watchers: Mutex::new(Vec::new()),
            mutations: Mutex::new(Vec::new()),
            gate,
            fail_mutations: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
            fail_creates: AtomicBool::new(false),
            watch_calls: AtomicUsize::new(0),
        }
    }

    /// Mutations wait until `release` is called.
    pub fn hold(&self) {
        self.gate.send_replace(true);
    }

    pub fn release(&self) {
        self.gate.send_replace(false);
    }

    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn fail_creates(&self, fail: bool) {
        self.fail_creates.store(fail, Ordering::SeqCst);
    }

    pub fn watch_calls(&self) -> usize {
        self.watch_calls.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> Vec<(DocumentRef, FieldMutation)> {
        self.mutations.lock().unwrap().clone()
    }

    /// Stores a raw body as-is, the way an older client would have written it.
    pub fn insert(&self, body: Value, created_at: OffsetDateTime) -> Uuid {
        let id = Uuid::new_v4();
        self.documents.lock().unwrap().push((
            POSTS_COLLECTION,
            RawDocument {
                id,
                body,
                created_at,
            },
        ));
        self.notify(ChangeNotice {
            collection: POSTS_COLLECTION.to_string(),
            id,
            op: ChangeOp::Insert,
        });
        id
    }

    pub fn body(&self, id: Uuid) -> Option<Value> {
        self.documents
            .lock()
            .unwrap()
            .iter()
            .find(|(_, document)| document.id == id)
            .map(|(_, document)| document.body.clone())
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.body(id).is_some()
    }

    pub fn notify(&self, notice: ChangeNotice) {
        self.watchers
            .lock()
            .unwrap()
            .retain(|tx| tx.unbounded_send(Ok(notice.clone())).is_ok());
    }

    /// Ends every open change stream, as a dropped connection would.
    pub fn end_watches(&self) {
        self.watchers.lock().unwrap().clear();
    }

    fn changed(&self, collection: &str, id: Uuid, op: ChangeOp) {
        self.notify(ChangeNotice {
            collection: collection.to_string(),
            id,
            op,
        });
    }
}

fn same_element(stored: &Value, removed: &Value) -> bool {
    if stored == removed {
        return true;
    }
    match (stored.as_object(), removed.as_object()) {
        (Some(stored_object), Some(removed_object)) => stored_object
            .get("id")
            .map_or(false, |id| Some(id) == removed_object.get("id")),
        _ => false,
    }
}

#[async_trait]
impl RemoteMutationSink for MemoryDocumentStore {
    async fn mutate(&self, document: DocumentRef, mutation: FieldMutation) -> Result<()> {
        let mut gate = self.gate.subscribe();
        gate.wait_for(|held| !*held)
            .await
            .map_err(|_| anyhow!("gate closed"))?;

        self.mutations
            .lock()
            .unwrap()
            .push((document, mutation.clone()));

        if self.fail_mutations.load(Ordering::SeqCst) {
            return Err(anyhow!("remote unavailable"));
        }

        {
            let mut documents = self.documents.lock().unwrap();
            let (_, stored) = documents
                .iter_mut()
                .find(|(collection, stored)| {
                    *collection == document.collection && stored.id == document.id
                })
                .ok_or_else(|| anyhow!("document {} not found", document.id))?;

            let body = stored
                .body
                .as_object_mut()
                .ok_or_else(|| anyhow!("document body is not an object"))?;
            let array = body
                .entry(mutation.field())
                .or_insert_with(|| json!([]))
                .as_array_mut()
                .ok_or_else(|| anyhow!("{} is not an array", mutation.field()))?;

            match &mutation {
                FieldMutation::AddToSet { value, .. } => {
                    if !array.contains(value) {
                        array.push(value.clone());
                    }
                }
                FieldMutation::RemoveFromSet { field, value } => {
                    let before = array.len();
                    array.retain(|element| !same_element(element, value));
                    if array.len() == before {
                        return Err(anyhow!("{} holds no matching element", field));
                    }
                }
                FieldMutation::Append { value, .. } => array.push(value.clone()),
            }
        }

        self.changed(document.collection, document.id, ChangeOp::Update);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn create(&self, collection: &'static str, body: Value) -> Result<RawDocument> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(anyhow!("insert rejected"));
        }

        let document = RawDocument {
            id: Uuid::new_v4(),
            body,
            created_at: OffsetDateTime::now_utc(),
        };
        self.documents
            .lock()
            .unwrap()
            .push((collection, document.clone()));
        self.changed(collection, document.id, ChangeOp::Insert);
        Ok(document)
    }

    async fn get(&self, document: DocumentRef) -> Result<Option<RawDocument>> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .iter()
            .find(|(collection, stored)| {
                *collection == document.collection && stored.id == document.id
            })
            .map(|(_, stored)| stored.clone()))
    }

    async fn delete(&self, document: DocumentRef) -> Result<bool> {
        let removed = {
            let mut documents = self.documents.lock().unwrap();
            let before = documents.len();
            documents.retain(|(collection, stored)| {
                !(*collection == document.collection && stored.id == document.id)
            });
            documents.len() != before
        };
        if removed {
            self.changed(document.collection, document.id, ChangeOp::Delete);
        }
        Ok(removed)
    }

    async fn query(&self, query: &FeedQuery) -> Result<Vec<RawDocument>> {
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(anyhow!("query failed"));
        }

        let mut matching: Vec<RawDocument> = self
            .documents
            .lock()
            .unwrap()
            .iter()
            .filter(|(collection, _)| *collection == POSTS_COLLECTION)
            .filter(|(_, stored)| match query {
                FeedQuery::Discover => true,
                FeedQuery::Gallery { owner_id } => {
                    stored.body["user_id"].as_str() == Some(owner_id.to_string().as_str())
                }
            })
            .map(|(_, stored)| stored.clone())
            .collect();
        // Newest first; later inserts win ties.
        matching.reverse();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching)
    }

    async fn watch(&self) -> Result<BoxStream<'static, Result<ChangeNotice>>> {
        self.watch_calls.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = stream_channel::unbounded();
        self.watchers.lock().unwrap().push(tx);
        Ok(rx.boxed())
    }
}

// ---------------------------------------------------------------------------
// In-memory blob store
// ---------------------------------------------------------------------------

pub const BLOB_URL_PREFIX: &str = "memory://blobs/";

pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, (String, Bytes)>>,
    fail_puts: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
            fail_puts: AtomicBool::new(false),
        }
    }

    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    pub fn keys(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    pub fn content_type(&self, key: &str) -> Option<String> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .map(|(content_type, _)| content_type.clone())
    }

    pub fn insert(&self, key: &str) -> String {
        self.blobs.lock().unwrap().insert(
            key.to_string(),
            ("image/png".to_string(), Bytes::from_static(b"png")),
        );
        format!("{}{}", BLOB_URL_PREFIX, key)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, content_type: &str, bytes: Bytes) -> Result<String> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(anyhow!("blob store unavailable"));
        }
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), (content_type.to_string(), bytes));
        Ok(format!("{}{}", BLOB_URL_PREFIX, key))
    }

    async fn delete_url(&self, url: &str) -> Result<()> {
        let key = url
            .strip_prefix(BLOB_URL_PREFIX)
            .ok_or_else(|| anyhow!("unknown blob url {}", url))?;
        self.blobs.lock().unwrap().remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// TestApp: one session per test
// ---------------------------------------------------------------------------

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub documents: Arc<MemoryDocumentStore>,
    pub blobs: Arc<MemoryBlobStore>,
}

pub struct TestResponse {
    pub status: StatusCode,
    body_bytes: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body_bytes).unwrap_or(Value::Null)
    }

    pub fn error_message(&self) -> String {
        self.json()["error"].as_str().unwrap_or("").to_string()
    }
}

pub fn user(name: &str) -> Viewer {
    Viewer::new(Uuid::new_v4(), format!("{}@example.com", name))
}

/// A post document as the upload flow writes it.
pub fn post_body(owner: &Viewer, caption: &str, hashtags: &str) -> Value {
    json!({
        "url": format!("{}images/{}/{}.png", BLOB_URL_PREFIX, owner.id, Uuid::new_v4()),
        "user_id": owner.id,
        "user_email": owner.email,
        "caption": caption,
        "description": "",
        "hashtags": hashtags,
        "created_at": OffsetDateTime::now_utc().format(&Rfc3339).unwrap(),
        "likes": [],
        "comments": [],
    })
}

impl TestApp {
    /// A session signed in as `viewer`.
    pub fn signed_in(viewer: &Viewer) -> Self {
        Self::with_viewer(Some(viewer.clone()))
    }

    pub fn signed_out() -> Self {
        Self::with_viewer(None)
    }

    fn with_viewer(viewer: Option<Viewer>) -> Self {
        let documents = Arc::new(MemoryDocumentStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let state = AppState::new(
            documents.clone(),
            documents.clone(),
            blobs.clone(),
            viewer,
            UPLOAD_MAX_BYTES,
        );
        let router = galleri::http::router(state.clone());

        TestApp {
            router,
            state,
            documents,
            blobs,
        }
    }

    // ------------------------------------------------------------------
    // Data helpers
    // ------------------------------------------------------------------

    pub fn seed_post(&self, owner: &Viewer, hashtags: &str) -> Uuid {
        self.documents.insert(
            post_body(owner, "A photo", hashtags),
            OffsetDateTime::now_utc(),
        )
    }

    pub fn seed_body(&self, body: Value) -> Uuid {
        self.documents.insert(body, OffsetDateTime::now_utc())
    }

    /// Loads `query` once and applies the snapshot, like one tick of the
    /// feed sync job.
    pub async fn sync(&self, query: FeedQuery) {
        let snapshot = self
            .state
            .feed()
            .load(&query)
            .await
            .expect("feed load failed");
        self.state.store.apply_snapshot(snapshot);
    }

    pub async fn sync_discover(&self) {
        self.sync(FeedQuery::Discover).await;
    }

    pub fn post(&self, post_id: Uuid) -> Post {
        self.state.store.post(post_id).expect("post not loaded")
    }

    // ------------------------------------------------------------------
    // Low-level request helper
    // ------------------------------------------------------------------
    pub async fn request(&self, method: Method, path: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder()
            .method(method)
            .uri(path)
            .header("host", "localhost");

        let request = if let Some(body) = body {
            builder
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap()
        } else {
            builder.body(Body::empty()).unwrap()
        };

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("oneshot failed");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to collect body")
            .to_bytes();

        TestResponse { status, body_bytes }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: Value) -> TestResponse {
        self.request(Method::POST, path, Some(body)).await
    }

    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request(Method::POST, path, None).await
    }

    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request(Method::DELETE, path, None).await
    }
}

// ---------------------------------------------------------------------------
// Channel helpers
// ---------------------------------------------------------------------------

/// Everything already queued on a store subscription.
pub fn drain_events(events: &mut tokio::sync::mpsc::UnboundedReceiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

pub fn drain_failures(
    failures: &mut tokio::sync::mpsc::UnboundedReceiver<MutationFailure>,
) -> Vec<MutationFailure> {
    let mut drained = Vec::new();
    while let Ok(failure) = failures.try_recv() {
        drained.push(failure);
    }
    drained
}

/// Polls `condition` until it holds or a second has passed.
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
