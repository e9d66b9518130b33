use std::{sync::Arc, time::Duration};

use anyhow::Context;
use serde::Serialize;
use serde_json::json;
use shared::{
    domain::{FileId, UserId},
    protocol::{FileRecord, NewFileRecord},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::{ClientError, UploadStage},
    events::{ClientEvent, EventBus},
    feed::{FeedState, RecordFeed},
    locator::{LocatorCache, LocatorKey, LocatorResolver},
    paths::{blob_path, record_path, uploads_collection},
    remote::Backends,
    session::SessionIdentity,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryEntry {
    pub id: FileId,
    pub file_name: String,
    pub uploaded: bool,
    pub content_type: String,
    pub size: Option<(u32, u32)>,
    pub url: Option<Url>,
}

impl LibraryEntry {
    pub fn is_available(&self) -> bool {
        self.uploaded && self.url.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LibraryView {
    pub entries: Vec<LibraryEntry>,
}

impl LibraryView {
    pub fn get(&self, file_id: &FileId) -> Option<&LibraryEntry> {
        self.entries.iter().find(|entry| &entry.id == file_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builds the view from the latest feed snapshot and resolver cache. Order
/// follows the snapshot; a url is attached only for uploaded records whose
/// current `(id, uploaded)` key has a resolved locator.
pub fn merge_view(records: &[FileRecord], locators: &LocatorCache) -> LibraryView {
    let entries = records
        .iter()
        .map(|record| {
            let url = if record.uploaded {
                locators.get(&LocatorKey::of(record)).cloned()
            } else {
                None
            };
            LibraryEntry {
                id: record.id.clone(),
                file_name: record.file_name.clone(),
                uploaded: record.uploaded,
                content_type: record.content_type.clone(),
                size: record.size(),
                url,
            }
        })
        .collect();
    LibraryView { entries }
}

pub struct FileLibrary {
    identity: Arc<SessionIdentity>,
    backends: Backends,
    events: EventBus,
    feed: RecordFeed,
    resolver: Arc<LocatorResolver>,
    view: watch::Receiver<LibraryView>,
    merge_task: JoinHandle<()>,
}

impl FileLibrary {
    /// Subscribes to the user's records and starts keeping the view current.
    pub async fn open(
        identity: Arc<SessionIdentity>,
        backends: Backends,
        events: EventBus,
    ) -> Result<Self, ClientError> {
        let user_id = identity.user_id()?.clone();
        let feed = match RecordFeed::subscribe(
            Arc::clone(&backends.documents),
            &user_id,
            events.clone(),
        )
        .await
        {
            Ok(feed) => feed,
            Err(source) => {
                let err = ClientError::remote("record subscription", source);
                events.notify(err.notification_title(), err.to_string());
                return Err(err);
            }
        };

        let resolver = Arc::new(LocatorResolver::new(
            Arc::clone(&backends.objects),
            user_id,
        ));
        let (view_tx, view_rx) = watch::channel(LibraryView::default());
        let merge_task = tokio::spawn(run_merge_loop(
            feed.watch(),
            Arc::clone(&resolver),
            view_tx,
            events.clone(),
        ));

        Ok(Self {
            identity,
            backends,
            events,
            feed,
            resolver,
            view: view_rx,
            merge_task,
        })
    }

    pub fn view(&self) -> LibraryView {
        self.view.borrow().clone()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<LibraryView> {
        self.view.clone()
    }

    pub fn feed_state(&self) -> FeedState {
        self.feed.snapshot()
    }

    pub fn resolver(&self) -> &LocatorResolver {
        &self.resolver
    }

    /// Registers, stores and then publishes a file. On failure the error
    /// carries the last stage that completed; a registered-but-not-available
    /// record is left in place for the caller to retry or delete.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        content_type: &str,
    ) -> Result<FileId, ClientError> {
        let user_id = self.identity.user_id()?.clone();
        let result = store_file(
            &self.backends,
            &self.events,
            &user_id,
            bytes,
            file_name,
            content_type,
        )
        .await;
        if let Err(err) = &result {
            if err.is_transient() {
                self.events.notify(err.notification_title(), err.to_string());
            }
        }
        result
    }

    /// Removes blob and record concurrently. Both removals are always
    /// attempted and neither is rolled back when the other fails.
    pub async fn delete(&self, file_id: &FileId) -> Result<(), ClientError> {
        let user_id = self.identity.user_id()?.clone();
        let blob = blob_path(&user_id, file_id);
        let record = record_path(&user_id, file_id);
        let (blob_result, record_result) = tokio::join!(
            self.backends.objects.delete(&blob),
            self.backends.documents.delete(&record)
        );

        if blob_result.is_ok() && record_result.is_ok() {
            info!(user_id = %user_id, file_id = %file_id, "library: file deleted");
            return Ok(());
        }

        let err = ClientError::Delete {
            file_id: file_id.clone(),
            blob_error: blob_result.err().map(|err| format!("{err:#}")),
            record_error: record_result.err().map(|err| format!("{err:#}")),
        };
        self.events.notify(err.notification_title(), err.to_string());
        Err(err)
    }

    /// Fetches the file's bytes through a freshly resolved locator and hands
    /// them to the file saver. Returns `false` when the id is not in the
    /// current view or its bytes have not been uploaded yet.
    pub async fn download(&self, file_id: &FileId) -> Result<bool, ClientError> {
        let user_id = self.identity.user_id()?.clone();
        let Some(entry) = self.view().get(file_id).cloned() else {
            debug!(file_id = %file_id, "library: download ignored for unknown file");
            return Ok(false);
        };
        if !entry.uploaded {
            debug!(file_id = %file_id, "library: download ignored while upload is pending");
            return Ok(false);
        }

        let result = async {
            let path = blob_path(&user_id, file_id);
            let locator = self
                .backends
                .objects
                .locator(&path)
                .await
                .with_context(|| format!("failed to resolve locator for {path}"))?;
            let bytes = self
                .backends
                .fetcher
                .fetch(&locator)
                .await
                .context("failed to fetch file bytes")?;
            let size = bytes.len();
            self.backends
                .saver
                .save(&entry.file_name, &entry.content_type, bytes)
                .await
                .with_context(|| format!("failed to save {}", entry.file_name))?;
            Ok::<usize, anyhow::Error>(size)
        }
        .await;

        match result {
            Ok(size) => {
                info!(file_id = %file_id, size_bytes = size, "library: file downloaded");
                Ok(true)
            }
            Err(source) => {
                let err = ClientError::remote("download", source);
                self.events.notify(err.notification_title(), err.to_string());
                Err(err)
            }
        }
    }

    /// Waits until `file_id` is in the view as uploaded with a resolved url.
    pub async fn wait_for_available(
        &self,
        file_id: &FileId,
        timeout: Duration,
    ) -> Result<LibraryEntry, ClientError> {
        let mut view = self.view.clone();
        let wait = async {
            loop {
                let found = {
                    let current = view.borrow_and_update();
                    current
                        .get(file_id)
                        .filter(|entry| entry.is_available())
                        .cloned()
                };
                if let Some(entry) = found {
                    return Ok(entry);
                }
                if view.changed().await.is_err() {
                    return Err(ClientError::invariant("library closed while waiting"));
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout(format!("file {file_id}")))?
    }

    /// Waits for the first snapshot of the record feed.
    pub async fn wait_until_loaded(&self, timeout: Duration) -> Result<FeedState, ClientError> {
        let mut feed = self.feed.watch();
        let wait = async {
            loop {
                let state = feed.borrow_and_update().clone();
                if state.loaded {
                    return Ok(state);
                }
                if let Some(error) = state.error {
                    return Err(ClientError::remote(
                        "record subscription",
                        anyhow::anyhow!(error),
                    ));
                }
                if feed.changed().await.is_err() {
                    return Err(ClientError::invariant("record feed closed before loading"));
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::Timeout("the first record snapshot".to_string()))?
    }

    /// Stops the feed and any further locator resolution. In-flight uploads,
    /// deletes and jobs are left to finish.
    pub async fn close(&self) {
        self.feed.unsubscribe();
        self.merge_task.abort();
        self.resolver.clear().await;
        info!("library: closed");
    }
}

impl Drop for FileLibrary {
    fn drop(&mut self) {
        self.merge_task.abort();
    }
}

async fn run_merge_loop(
    mut feed: watch::Receiver<FeedState>,
    resolver: Arc<LocatorResolver>,
    view: watch::Sender<LibraryView>,
    events: EventBus,
) {
    let mut resolved = resolver.watch();
    let mut feed_open = true;
    loop {
        let state = feed.borrow_and_update().clone();
        resolver.sync(&state.records).await;
        let _ = resolved.borrow_and_update();
        let next = merge_view(&state.records, &resolver.locators().await);

        let changed = view.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next.clone();
            true
        });
        if changed {
            events.emit(ClientEvent::LibraryUpdated(next));
        }

        tokio::select! {
            result = feed.changed(), if feed_open => {
                if result.is_err() {
                    feed_open = false;
                }
            }
            result = resolved.changed() => {
                if result.is_err() {
                    warn!("library: locator resolver went away");
                    break;
                }
            }
        }
    }
}

/// The upload saga shared by direct uploads and template seeding:
/// registered (record with `uploaded=false`) → stored (blob written) →
/// available (`uploaded=true`).
pub(crate) async fn store_file(
    backends: &Backends,
    events: &EventBus,
    user_id: &UserId,
    bytes: Vec<u8>,
    file_name: &str,
    content_type: &str,
) -> Result<FileId, ClientError> {
    let upload_error = |file_id: Option<FileId>, reached, source| ClientError::Upload {
        file_name: file_name.to_string(),
        file_id,
        reached,
        source,
    };

    let body = serde_json::to_value(NewFileRecord::pending(file_name, content_type))
        .map_err(|err| ClientError::invariant(format!("unserializable record: {err}")))?;
    let file_id = match backends
        .documents
        .create(&uploads_collection(user_id), body)
        .await
    {
        Ok(id) if !id.trim().is_empty() => FileId(id),
        Ok(_) => {
            return Err(ClientError::invariant(
                "document store returned an empty record id",
            ))
        }
        Err(source) => return Err(upload_error(None, None, source)),
    };
    report_stage(events, user_id, &file_id, file_name, UploadStage::Registered);

    let size = bytes.len();
    if let Err(source) = backends
        .objects
        .write(&blob_path(user_id, &file_id), bytes, content_type)
        .await
    {
        return Err(upload_error(
            Some(file_id),
            Some(UploadStage::Registered),
            source,
        ));
    }
    report_stage(events, user_id, &file_id, file_name, UploadStage::Stored);

    if let Err(source) = backends
        .documents
        .update(&record_path(user_id, &file_id), json!({ "uploaded": true }))
        .await
    {
        return Err(upload_error(
            Some(file_id),
            Some(UploadStage::Stored),
            source,
        ));
    }
    report_stage(events, user_id, &file_id, file_name, UploadStage::Available);
    info!(user_id = %user_id, file_id = %file_id, size_bytes = size, "library: upload complete");

    Ok(file_id)
}

fn report_stage(
    events: &EventBus,
    user_id: &UserId,
    file_id: &FileId,
    file_name: &str,
    stage: UploadStage,
) {
    debug!(user_id = %user_id, file_id = %file_id, stage = ?stage, "library: upload stage reached");
    events.emit(ClientEvent::UploadStageChanged {
        file_id: file_id.clone(),
        file_name: file_name.to_string(),
        stage,
    });
}

#[cfg(test)]
#[path = "tests/library_tests.rs"]
mod tests;
