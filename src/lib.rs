pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;
pub mod jobs;

use std::sync::Arc;
use tokio::sync::Mutex;

use crate::app::engagement::EngagementService;
use crate::app::feed::FeedService;
use crate::app::notify::FailureNotifier;
use crate::app::optimistic::OptimisticMutator;
use crate::app::posts::PostService;
use crate::app::store::LocalStateStore;
use crate::domain::user::Viewer;
use crate::infra::documents::{DocumentStore, RemoteMutationSink};
use crate::infra::storage::BlobStore;

#[derive(Clone)]
pub struct AppState {
    pub store: LocalStateStore,
    pub failures: FailureNotifier,
    pub sink: Arc<dyn RemoteMutationSink>,
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub viewer: Option<Viewer>,
    pub upload_max_bytes: usize,
    pub upload_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(
        sink: Arc<dyn RemoteMutationSink>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        viewer: Option<Viewer>,
        upload_max_bytes: usize,
    ) -> Self {
        Self {
            store: LocalStateStore::new(),
            failures: FailureNotifier::new(),
            sink,
            documents,
            blobs,
            viewer,
            upload_max_bytes,
            upload_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn engagement(&self) -> EngagementService {
        let mutator = OptimisticMutator::new(self.store.clone(), self.failures.clone());
        EngagementService::new(mutator, self.sink.clone())
    }

    pub fn feed(&self) -> FeedService {
        FeedService::new(self.documents.clone())
    }

    pub fn posts(&self) -> PostService {
        PostService::new(
            self.documents.clone(),
            self.blobs.clone(),
            self.store.clone(),
            self.upload_max_bytes,
            self.upload_lock.clone(),
        )
    }
}
