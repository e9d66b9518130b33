use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::domain::{FileId, TransformKind};
use tokio::sync::broadcast;
use tracing::warn;

use crate::{error::UploadStage, library::LibraryView};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub description: String,
    pub raised_at: DateTime<Utc>,
}

/// Fire-and-forget presentation of failures to the user.
pub trait NotificationSurface: Send + Sync {
    fn notify(&self, notification: &Notification);
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    LibraryUpdated(LibraryView),
    UploadStageChanged {
        file_id: FileId,
        file_name: String,
        stage: UploadStage,
    },
    FeedError(String),
    JobCompleted {
        kind: TransformKind,
        target: FileId,
        new_file_id: FileId,
    },
    Notification(Notification),
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
    surface: Option<Arc<dyn NotificationSurface>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            surface: None,
        }
    }

    pub fn with_surface(mut self, surface: Arc<dyn NotificationSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ClientEvent) {
        // No receivers is fine; nobody is listening yet.
        let _ = self.sender.send(event);
    }

    pub fn notify(&self, title: impl Into<String>, description: impl Into<String>) {
        let notification = Notification {
            title: title.into(),
            description: description.into(),
            raised_at: Utc::now(),
        };
        warn!(
            title = %notification.title,
            description = %notification.description,
            "notify: operation failed"
        );
        if let Some(surface) = &self.surface {
            surface.notify(&notification);
        }
        self.emit(ClientEvent::Notification(notification));
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
