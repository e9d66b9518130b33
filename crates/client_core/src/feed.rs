use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use shared::{
    domain::UserId,
    protocol::{CollectionSnapshot, FileRecord},
};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    events::{ClientEvent, EventBus},
    paths::uploads_collection,
    remote::DocumentStore,
};

/// Latest view of the user's upload records as pushed by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub records: Vec<FileRecord>,
    /// Set while the subscription is failing; `records` then still holds the
    /// last good snapshot.
    pub error: Option<String>,
    /// False until the first snapshot arrives.
    pub loaded: bool,
    pub revision: u64,
}

/// Live subscription to `users/{uid}/uploads`. Runs until unsubscribed or
/// dropped.
pub struct RecordFeed {
    state: watch::Receiver<FeedState>,
    task: JoinHandle<()>,
}

impl RecordFeed {
    pub async fn subscribe(
        documents: Arc<dyn DocumentStore>,
        user_id: &UserId,
        events: EventBus,
    ) -> Result<Self> {
        let collection = uploads_collection(user_id);
        let mut stream = documents
            .subscribe(&collection)
            .await
            .with_context(|| format!("failed to subscribe to {collection}"))?;
        info!(user_id = %user_id, "feed: subscribed to upload records");

        let (tx, rx) = watch::channel(FeedState::default());
        let task = tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(snapshot) => {
                        let records = decode_snapshot(&snapshot);
                        debug!(
                            collection = %collection,
                            records = records.len(),
                            changes = snapshot.changes.len(),
                            "feed: snapshot received"
                        );
                        tx.send_modify(|state| {
                            state.records = records;
                            state.error = None;
                            state.loaded = true;
                            state.revision += 1;
                        });
                    }
                    Err(err) => {
                        let message = format!("{err:#}");
                        warn!(collection = %collection, error = %message, "feed: subscription error");
                        tx.send_modify(|state| {
                            state.error = Some(message.clone());
                            state.revision += 1;
                        });
                        events.emit(ClientEvent::FeedError(message));
                    }
                }
            }
            let message = format!("record feed for {collection} closed");
            warn!(collection = %collection, "feed: stream ended");
            tx.send_modify(|state| {
                state.error = Some(message.clone());
                state.revision += 1;
            });
            events.emit(ClientEvent::FeedError(message));
        });

        Ok(Self { state: rx, task })
    }

    pub fn snapshot(&self) -> FeedState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<FeedState> {
        self.state.clone()
    }

    pub fn unsubscribe(&self) {
        self.task.abort();
    }
}

impl Drop for RecordFeed {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn decode_snapshot(snapshot: &CollectionSnapshot) -> Vec<FileRecord> {
    snapshot
        .documents
        .iter()
        .filter_map(|document| match FileRecord::from_document(document) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(document_id = %document.id, error = %err, "feed: skipping malformed record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
#[path = "tests/feed_tests.rs"]
mod tests;
