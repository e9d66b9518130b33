use serde::Serialize;
use shared::domain::{FileId, TransformKind};
use thiserror::Error;

use crate::mapping::PositionOutOfRange;

/// How far an upload got before it stopped. Each stage is observable in the
/// library: `Registered` shows up as a pending placeholder record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStage {
    Registered,
    Stored,
    Available,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no signed-in user")]
    Unauthenticated,
    #[error("invariant violated: {0}")]
    Invariant(String),
    #[error(transparent)]
    Position(#[from] PositionOutOfRange),
    #[error("upload of '{file_name}' failed: {source}")]
    Upload {
        file_name: String,
        file_id: Option<FileId>,
        reached: Option<UploadStage>,
        #[source]
        source: anyhow::Error,
    },
    #[error("delete of {file_id} incomplete: {}", delete_summary(.blob_error, .record_error))]
    Delete {
        file_id: FileId,
        blob_error: Option<String>,
        record_error: Option<String>,
    },
    #[error("{operation} failed: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
    #[error("{kind} job on {target} failed: {source}")]
    Job {
        kind: TransformKind,
        target: FileId,
        #[source]
        source: anyhow::Error,
    },
    #[error("a transform job is already pending")]
    JobPending,
    #[error("no file selected")]
    NoSelection,
    #[error("timed out waiting for {0}")]
    Timeout(String),
}

impl ClientError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::Invariant(message.into())
    }

    pub fn remote(operation: &'static str, source: anyhow::Error) -> Self {
        Self::Remote { operation, source }
    }

    /// Runtime conditions worth telling the user about, as opposed to
    /// programming or environment defects.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ClientError::Upload { .. }
                | ClientError::Delete { .. }
                | ClientError::Remote { .. }
                | ClientError::Job { .. }
                | ClientError::Timeout(_)
        )
    }

    pub fn notification_title(&self) -> &'static str {
        match self {
            ClientError::Upload { .. } => "Upload failed",
            ClientError::Delete { .. } => "Delete failed",
            ClientError::Job { .. } => "Transform failed",
            ClientError::Timeout(_) => "Request timed out",
            ClientError::Remote { operation, .. } => match *operation {
                "download" => "Download failed",
                "account setup" => "Account setup failed",
                _ => "Request failed",
            },
            _ => "Unexpected error",
        }
    }
}

fn delete_summary(blob_error: &Option<String>, record_error: &Option<String>) -> String {
    match (blob_error, record_error) {
        (Some(blob), Some(record)) => format!("blob: {blob}; record: {record}"),
        (Some(blob), None) => format!("blob: {blob}; record removed"),
        (None, Some(record)) => format!("blob removed; record: {record}"),
        (None, None) => "no failure recorded".to_string(),
    }
}
