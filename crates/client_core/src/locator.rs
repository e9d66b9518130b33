//! Download locator resolution for uploaded records.
//!
//! Each uploaded record gets its own resolution task. Results are cached per
//! `(file id, uploaded)` key so that unrelated field updates reuse the cached
//! locator, while a flip of `uploaded` always starts from scratch.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use shared::{
    domain::{FileId, UserId},
    protocol::FileRecord,
};
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tracing::{debug, warn};
use url::Url;

use crate::{paths::blob_path, remote::ObjectStore};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocatorKey {
    pub file_id: FileId,
    pub uploaded: bool,
}

impl LocatorKey {
    pub fn of(record: &FileRecord) -> Self {
        Self {
            file_id: record.id.clone(),
            uploaded: record.uploaded,
        }
    }
}

pub type LocatorCache = HashMap<LocatorKey, Url>;

enum Slot {
    Pending(JoinHandle<()>),
    Resolved(Url),
    // Stays failed until the key changes; the view keeps showing "loading".
    Failed,
}

#[derive(Default)]
struct ResolverState {
    slots: HashMap<LocatorKey, Slot>,
    started: u64,
}

pub struct LocatorResolver {
    objects: Arc<dyn ObjectStore>,
    user_id: UserId,
    state: Arc<Mutex<ResolverState>>,
    revision: Arc<watch::Sender<u64>>,
}

impl LocatorResolver {
    pub fn new(objects: Arc<dyn ObjectStore>, user_id: UserId) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            objects,
            user_id,
            state: Arc::new(Mutex::new(ResolverState::default())),
            revision: Arc::new(revision),
        }
    }

    /// Bumped whenever a resolution lands or cache entries are dropped.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Aligns the cache with the records currently of interest: starts a
    /// resolution for every new uploaded key and cancels/drops keys that are
    /// no longer present.
    pub async fn sync(&self, records: &[FileRecord]) {
        let wanted: Vec<LocatorKey> = records
            .iter()
            .filter(|record| record.uploaded)
            .map(LocatorKey::of)
            .collect();
        let wanted_set: HashSet<&LocatorKey> = wanted.iter().collect();

        let mut guard = self.state.lock().await;
        let before = guard.slots.len();
        guard.slots.retain(|key, slot| {
            if wanted_set.contains(key) {
                return true;
            }
            if let Slot::Pending(handle) = slot {
                handle.abort();
            }
            false
        });
        let dropped = before != guard.slots.len();

        for key in wanted {
            if guard.slots.contains_key(&key) {
                continue;
            }
            let handle = self.spawn_resolution(key.clone());
            guard.slots.insert(key, Slot::Pending(handle));
            guard.started += 1;
        }
        drop(guard);

        if dropped {
            self.revision.send_modify(|revision| *revision += 1);
        }
    }

    fn spawn_resolution(&self, key: LocatorKey) -> JoinHandle<()> {
        let objects = Arc::clone(&self.objects);
        let state = Arc::clone(&self.state);
        let revision = Arc::clone(&self.revision);
        let path = blob_path(&self.user_id, &key.file_id);
        tokio::spawn(async move {
            let result = objects.locator(&path).await;
            let mut guard = state.lock().await;
            let Some(slot) = guard.slots.get_mut(&key) else {
                return;
            };
            if !matches!(slot, Slot::Pending(_)) {
                return;
            }
            *slot = match result {
                Ok(url) => {
                    debug!(file_id = %key.file_id, "locator: resolved");
                    Slot::Resolved(url)
                }
                Err(err) => {
                    warn!(file_id = %key.file_id, error = %format!("{err:#}"), "locator: resolution failed");
                    Slot::Failed
                }
            };
            drop(guard);
            revision.send_modify(|revision| *revision += 1);
        })
    }

    pub async fn locators(&self) -> LocatorCache {
        let guard = self.state.lock().await;
        guard
            .slots
            .iter()
            .filter_map(|(key, slot)| match slot {
                Slot::Resolved(url) => Some((key.clone(), url.clone())),
                _ => None,
            })
            .collect()
    }

    /// Number of resolutions started over the resolver's lifetime.
    pub async fn resolutions_started(&self) -> u64 {
        self.state.lock().await.started
    }

    /// Cancels in-flight resolutions and forgets every cached locator.
    pub async fn clear(&self) {
        let mut guard = self.state.lock().await;
        for (_, slot) in guard.slots.drain() {
            if let Slot::Pending(handle) = slot {
                handle.abort();
            }
        }
    }
}

impl Drop for LocatorResolver {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.state.try_lock() {
            for (_, slot) in guard.slots.drain() {
                if let Slot::Pending(handle) = slot {
                    handle.abort();
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/locator_tests.rs"]
mod tests;
