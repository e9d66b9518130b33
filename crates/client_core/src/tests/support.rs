//! In-memory collaborators shared by the unit tests.

use std::{
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use shared::{
    domain::{AuthenticatedUser, FileId, TransformKind, UserId},
    protocol::{
        ChangeKind, CollectionSnapshot, Document, DocumentChange, ObjectMetadata,
        TransformJobRequest, TransformJobResponse,
    },
};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;
use uuid::Uuid;

use crate::{
    events::{Notification, NotificationSurface},
    library::{FileLibrary, LibraryView},
    paths::blob_path,
    remote::{
        Backends, BlobFetcher, DocumentStore, FileSaver, JobBackend, ObjectStore, SnapshotStream,
    },
};

pub const WAIT: Duration = Duration::from_secs(5);

pub fn test_user() -> AuthenticatedUser {
    AuthenticatedUser {
        user_id: UserId::new("alice"),
        display_name: "Alice".to_string(),
        email: "alice@example.com".to_string(),
    }
}

fn split_path(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}

type Subscriber = (String, mpsc::UnboundedSender<Result<CollectionSnapshot>>);

#[derive(Default)]
struct DocumentsState {
    docs: Vec<(String, Value)>,
    subscribers: Vec<Subscriber>,
    failing: HashSet<&'static str>,
    calls: HashMap<&'static str, u32>,
}

impl DocumentsState {
    fn snapshot(&self, collection: &str, changes: Vec<DocumentChange>) -> CollectionSnapshot {
        let documents = self
            .docs
            .iter()
            .filter_map(|(path, data)| {
                let (parent, id) = split_path(path);
                (parent == collection).then(|| Document {
                    id: id.to_string(),
                    data: data.clone(),
                })
            })
            .collect();
        CollectionSnapshot { documents, changes }
    }

    fn publish(&mut self, path: &str, kind: ChangeKind) {
        let (collection, id) = split_path(path);
        let change = DocumentChange {
            kind,
            id: id.to_string(),
        };
        let snapshot = self.snapshot(collection, vec![change]);
        self.subscribers.retain(|(subscribed, tx)| {
            subscribed != collection || tx.send(Ok(snapshot.clone())).is_ok()
        });
    }

    fn enter(&mut self, op: &'static str) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if self.failing.contains(op) {
            return Err(anyhow!("document store {op} unavailable"));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDocuments {
    state: Mutex<DocumentsState>,
}

impl InMemoryDocuments {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn fail(&self, op: &'static str) {
        self.state.lock().await.failing.insert(op);
    }

    pub async fn recover(&self, op: &'static str) {
        self.state.lock().await.failing.remove(op);
    }

    pub async fn calls(&self, op: &'static str) -> u32 {
        self.state.lock().await.calls.get(op).copied().unwrap_or(0)
    }

    pub async fn document(&self, path: &str) -> Option<Value> {
        let guard = self.state.lock().await;
        guard
            .docs
            .iter()
            .find(|(stored, _)| stored == path)
            .map(|(_, data)| data.clone())
    }

    pub async fn collection(&self, collection: &str) -> Vec<Document> {
        self.state.lock().await.snapshot(collection, Vec::new()).documents
    }

    /// Writes a document without going through the trait, as another device
    /// or a server-side function would.
    pub async fn put_raw(&self, path: &str, data: Value) {
        let mut guard = self.state.lock().await;
        let kind = match guard.docs.iter_mut().find(|(stored, _)| stored == path) {
            Some((_, existing)) => {
                *existing = data;
                ChangeKind::Modified
            }
            None => {
                guard.docs.push((path.to_string(), data));
                ChangeKind::Added
            }
        };
        guard.publish(path, kind);
    }

    pub async fn push_error(&self, collection: &str, message: &str) {
        let guard = self.state.lock().await;
        for (subscribed, tx) in &guard.subscribers {
            if subscribed == collection {
                let _ = tx.send(Err(anyhow!(message.to_string())));
            }
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        let mut guard = self.state.lock().await;
        guard.subscribers.retain(|(_, tx)| !tx.is_closed());
        guard.subscribers.len()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocuments {
    async fn create(&self, collection: &str, data: Value) -> Result<String> {
        tokio::task::yield_now().await;
        let mut guard = self.state.lock().await;
        guard.enter("create")?;
        let id = Uuid::new_v4().simple().to_string();
        let path = format!("{collection}/{id}");
        guard.docs.push((path.clone(), data));
        guard.publish(&path, ChangeKind::Added);
        Ok(id)
    }

    async fn get(&self, path: &str) -> Result<Option<Value>> {
        tokio::task::yield_now().await;
        let mut guard = self.state.lock().await;
        guard.enter("get")?;
        Ok(guard
            .docs
            .iter()
            .find(|(stored, _)| stored == path)
            .map(|(_, data)| data.clone()))
    }

    async fn set(&self, path: &str, data: Value) -> Result<()> {
        tokio::task::yield_now().await;
        let mut guard = self.state.lock().await;
        guard.enter("set")?;
        let kind = match guard.docs.iter_mut().find(|(stored, _)| stored == path) {
            Some((_, existing)) => {
                *existing = data;
                ChangeKind::Modified
            }
            None => {
                guard.docs.push((path.to_string(), data));
                ChangeKind::Added
            }
        };
        guard.publish(path, kind);
        Ok(())
    }

    async fn update(&self, path: &str, fields: Value) -> Result<()> {
        tokio::task::yield_now().await;
        let mut guard = self.state.lock().await;
        guard.enter("update")?;
        let Some((_, existing)) = guard.docs.iter_mut().find(|(stored, _)| stored == path) else {
            return Err(anyhow!("no document at {path}"));
        };
        if let (Some(target), Some(source)) = (existing.as_object_mut(), fields.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        guard.publish(path, ChangeKind::Modified);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let mut guard = self.state.lock().await;
        guard.enter("delete")?;
        let before = guard.docs.len();
        guard.docs.retain(|(stored, _)| stored != path);
        if guard.docs.len() != before {
            guard.publish(path, ChangeKind::Removed);
        }
        Ok(())
    }

    async fn subscribe(&self, collection: &str) -> Result<SnapshotStream> {
        let mut guard = self.state.lock().await;
        guard.enter("subscribe")?;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(guard.snapshot(collection, Vec::new())));
        guard.subscribers.push((collection.to_string(), tx));
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[derive(Default)]
struct ObjectsState {
    objects: BTreeMap<String, (Vec<u8>, String)>,
    failing: HashSet<&'static str>,
    failing_locators: HashSet<String>,
    locator_calls: HashMap<String, u32>,
    locator_delays: HashMap<String, Duration>,
}

#[derive(Default)]
pub struct InMemoryObjects {
    state: Mutex<ObjectsState>,
}

impl InMemoryObjects {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn fail(&self, op: &'static str) {
        self.state.lock().await.failing.insert(op);
    }

    pub async fn fail_locator(&self, path: &str) {
        self.state
            .lock()
            .await
            .failing_locators
            .insert(path.to_string());
    }

    pub async fn delay_locator(&self, path: &str, delay: Duration) {
        self.state
            .lock()
            .await
            .locator_delays
            .insert(path.to_string(), delay);
    }

    pub async fn locator_calls(&self, path: &str) -> u32 {
        self.state
            .lock()
            .await
            .locator_calls
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub async fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .await
            .objects
            .get(path)
            .map(|(bytes, _)| bytes.clone())
    }

    pub async fn put_raw(&self, path: &str, bytes: &[u8], content_type: &str) {
        self.state
            .lock()
            .await
            .objects
            .insert(path.to_string(), (bytes.to_vec(), content_type.to_string()));
    }

    pub async fn paths_under(&self, prefix: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .objects
            .keys()
            .filter(|path| path.starts_with(prefix))
            .cloned()
            .collect()
    }
}

fn check(failing: &HashSet<&'static str>, op: &'static str) -> Result<()> {
    if failing.contains(op) {
        return Err(anyhow!("object store {op} unavailable"));
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for InMemoryObjects {
    async fn write(&self, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let mut guard = self.state.lock().await;
        check(&guard.failing, "write")?;
        guard
            .objects
            .insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::task::yield_now().await;
        let guard = self.state.lock().await;
        check(&guard.failing, "read")?;
        guard
            .objects
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| anyhow!("no object at {path}"))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        tokio::task::yield_now().await;
        let mut guard = self.state.lock().await;
        check(&guard.failing, "delete")?;
        guard.objects.remove(path);
        Ok(())
    }

    async fn locator(&self, path: &str) -> Result<Url> {
        let delay = {
            let mut guard = self.state.lock().await;
            *guard.locator_calls.entry(path.to_string()).or_default() += 1;
            guard.locator_delays.get(path).copied()
        };
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
        let guard = self.state.lock().await;
        check(&guard.failing, "locator")?;
        if guard.failing_locators.contains(path) {
            return Err(anyhow!("locator for {path} unavailable"));
        }
        if !guard.objects.contains_key(path) {
            return Err(anyhow!("no object at {path}"));
        }
        Ok(Url::parse(&format!("https://blobs.test/{path}?token=signed"))?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMetadata>> {
        tokio::task::yield_now().await;
        let guard = self.state.lock().await;
        check(&guard.failing, "list")?;
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        Ok(guard
            .objects
            .iter()
            .filter(|(path, _)| path.starts_with(&prefix))
            .map(|(path, (bytes, content_type))| ObjectMetadata {
                path: path.clone(),
                content_type: Some(content_type.clone()),
                size_bytes: bytes.len() as u64,
                updated_at: None,
            })
            .collect())
    }
}

/// Reads locators minted by [`InMemoryObjects`] back out of the same store.
pub struct ObjectsFetcher(pub Arc<InMemoryObjects>);

#[async_trait]
impl BlobFetcher for ObjectsFetcher {
    async fn fetch(&self, locator: &Url) -> Result<Vec<u8>> {
        let path = locator.path().trim_start_matches('/');
        self.0.read(path).await
    }
}

#[derive(Default)]
pub struct RecordingSaver {
    pub saved: Mutex<Vec<(String, String, Vec<u8>)>>,
}

#[async_trait]
impl FileSaver for RecordingSaver {
    async fn save(&self, file_name: &str, content_type: &str, bytes: Vec<u8>) -> Result<()> {
        self.saved
            .lock()
            .await
            .push((file_name.to_string(), content_type.to_string(), bytes));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    pub seen: StdMutex<Vec<Notification>>,
}

impl RecordingSurface {
    pub fn titles(&self) -> Vec<String> {
        self.seen
            .lock()
            .expect("surface lock")
            .iter()
            .map(|notification| notification.title.clone())
            .collect()
    }
}

impl NotificationSurface for RecordingSurface {
    fn notify(&self, notification: &Notification) {
        self.seen
            .lock()
            .expect("surface lock")
            .push(notification.clone());
    }
}

/// Job backend double. When wired to stores it behaves like the real job
/// function and writes the produced file into the user's library.
pub struct FakeJobs {
    pub requests: Mutex<Vec<(TransformKind, TransformJobRequest)>>,
    scripted: Mutex<VecDeque<Result<TransformJobResponse, String>>>,
    producer: Option<(Arc<InMemoryDocuments>, Arc<InMemoryObjects>, UserId)>,
    delay: Option<Duration>,
}

impl FakeJobs {
    pub fn scripted(responses: Vec<Result<&str, &str>>) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            scripted: Mutex::new(
                responses
                    .into_iter()
                    .map(|response| {
                        response
                            .map(|id| TransformJobResponse {
                                new_doc: FileId::new(id),
                            })
                            .map_err(str::to_string)
                    })
                    .collect(),
            ),
            producer: None,
            delay: None,
        }
    }

    pub fn producing(
        documents: Arc<InMemoryDocuments>,
        objects: Arc<InMemoryObjects>,
        user_id: UserId,
    ) -> Self {
        let mut jobs = Self::scripted(Vec::new());
        jobs.producer = Some((documents, objects, user_id));
        jobs
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl JobBackend for FakeJobs {
    async fn call(
        &self,
        kind: TransformKind,
        request: &TransformJobRequest,
    ) -> Result<TransformJobResponse> {
        self.requests.lock().await.push((kind, request.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some((documents, objects, user_id)) = &self.producer {
            let id = Uuid::new_v4().simple().to_string();
            let file_id = FileId::new(id.clone());
            objects
                .put_raw(&blob_path(user_id, &file_id), b"transformed", "image/png")
                .await;
            documents
                .put_raw(
                    &format!("users/{user_id}/uploads/{id}"),
                    json!({ "fileName": format!("{kind}.png"), "type": "image/png", "uploaded": true }),
                )
                .await;
            return Ok(TransformJobResponse { new_doc: file_id });
        }
        match self.scripted.lock().await.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("no scripted response")),
        }
    }
}

pub struct Fixture {
    pub documents: Arc<InMemoryDocuments>,
    pub objects: Arc<InMemoryObjects>,
    pub saver: Arc<RecordingSaver>,
    pub backends: Backends,
}

impl Fixture {
    pub fn new() -> Self {
        let documents = InMemoryDocuments::new();
        let objects = InMemoryObjects::new();
        let saver = Arc::new(RecordingSaver::default());
        let backends = Backends::new(documents.clone(), objects.clone())
            .with_fetcher(Arc::new(ObjectsFetcher(objects.clone())))
            .with_saver(saver.clone());
        Self {
            documents,
            objects,
            saver,
            backends,
        }
    }
}

/// Waits until the library view satisfies `accept`.
pub async fn wait_for_view(
    library: &FileLibrary,
    accept: impl Fn(&LibraryView) -> bool,
) -> LibraryView {
    let mut view = library.subscribe_view();
    let wait = async {
        loop {
            let current = view.borrow_and_update().clone();
            if accept(&current) {
                return current;
            }
            view.changed().await.expect("library view closed");
        }
    };
    tokio::time::timeout(WAIT, wait)
        .await
        .expect("library view never reached the expected state")
}
