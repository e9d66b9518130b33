use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    domain::FileId,
    error::ApiError,
};

/// Metadata record for one file in a user's library, as stored under
/// `users/{uid}/uploads/{id}`. The id is the document id and is not part of
/// the stored body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    #[serde(skip)]
    pub id: FileId,
    pub file_name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    #[serde(default)]
    pub uploaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_x: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_y: Option<u32>,
}

impl FileRecord {
    pub fn from_document(document: &Document) -> serde_json::Result<Self> {
        let mut record: FileRecord = serde_json::from_value(document.data.clone())?;
        record.id = FileId(document.id.clone());
        Ok(record)
    }

    pub fn size(&self) -> Option<(u32, u32)> {
        match (self.size_x, self.size_y) {
            (Some(x), Some(y)) if x > 0 && y > 0 => Some((x, y)),
            _ => None,
        }
    }
}

/// Body written when a record is first registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFileRecord {
    pub file_name: String,
    #[serde(rename = "type")]
    pub content_type: String,
    pub uploaded: bool,
}

impl NewFileRecord {
    pub fn pending(file_name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            uploaded: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountProfile {
    pub display_name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformJobRequest {
    pub file_id: FileId,
    pub log: bool,
    pub parameter: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformJobResponse {
    pub new_doc: FileId,
}

/// Envelope for a callable job invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallableRequest<T> {
    pub data: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallableResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub id: String,
}

/// Full current content of a collection plus the deltas since the previous
/// snapshot on the same subscription.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub documents: Vec<Document>,
    #[serde(default)]
    pub changes: Vec<DocumentChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedDocument {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ObjectMetadata {
    /// Last path segment, used as the display name of a copied template.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocatorResponse {
    pub url: String,
}
