//! Seams to the remote collaborators: document store, object store, job
//! backend, locator fetching and the environment's file-save mechanism.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use shared::{
    domain::TransformKind,
    protocol::{CollectionSnapshot, ObjectMetadata, TransformJobRequest, TransformJobResponse},
};
use url::Url;

pub type SnapshotStream = BoxStream<'static, Result<CollectionSnapshot>>;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Creates a document with a store-assigned id and returns that id.
    async fn create(&self, collection: &str, data: Value) -> Result<String>;
    async fn get(&self, path: &str) -> Result<Option<Value>>;
    async fn set(&self, path: &str, data: Value) -> Result<()>;
    /// Merges `fields` into an existing document.
    async fn update(&self, path: &str, fields: Value) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
    /// Live view of a collection. The stream yields the full current set on
    /// every change and only ends when dropped or when the connection fails.
    async fn subscribe(&self, collection: &str) -> Result<SnapshotStream>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn write(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()>;
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn delete(&self, path: &str) -> Result<()>;
    /// Generates a time-bound download locator. Locators are never stored.
    async fn locator(&self, path: &str) -> Result<Url>;
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMetadata>>;
}

#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn call(
        &self,
        kind: TransformKind,
        request: &TransformJobRequest,
    ) -> Result<TransformJobResponse>;
}

#[async_trait]
pub trait BlobFetcher: Send + Sync {
    async fn fetch(&self, locator: &Url) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait FileSaver: Send + Sync {
    async fn save(&self, file_name: &str, content_type: &str, bytes: Vec<u8>) -> Result<()>;
}

pub struct MissingJobBackend;

#[async_trait]
impl JobBackend for MissingJobBackend {
    async fn call(
        &self,
        kind: TransformKind,
        _request: &TransformJobRequest,
    ) -> Result<TransformJobResponse> {
        Err(anyhow!("job backend unavailable for {kind} jobs"))
    }
}

pub struct MissingBlobFetcher;

#[async_trait]
impl BlobFetcher for MissingBlobFetcher {
    async fn fetch(&self, locator: &Url) -> Result<Vec<u8>> {
        Err(anyhow!("no blob fetcher configured for {locator}"))
    }
}

pub struct MissingFileSaver;

#[async_trait]
impl FileSaver for MissingFileSaver {
    async fn save(&self, file_name: &str, _content_type: &str, _bytes: Vec<u8>) -> Result<()> {
        Err(anyhow!("no file saver configured for {file_name}"))
    }
}

/// The set of collaborators one session talks to.
#[derive(Clone)]
pub struct Backends {
    pub documents: Arc<dyn DocumentStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub jobs: Arc<dyn JobBackend>,
    pub fetcher: Arc<dyn BlobFetcher>,
    pub saver: Arc<dyn FileSaver>,
}

impl Backends {
    pub fn new(documents: Arc<dyn DocumentStore>, objects: Arc<dyn ObjectStore>) -> Self {
        Self {
            documents,
            objects,
            jobs: Arc::new(MissingJobBackend),
            fetcher: Arc::new(MissingBlobFetcher),
            saver: Arc::new(MissingFileSaver),
        }
    }

    pub fn with_jobs(mut self, jobs: Arc<dyn JobBackend>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn BlobFetcher>) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_saver(mut self, saver: Arc<dyn FileSaver>) -> Self {
        self.saver = saver;
        self
    }
}
