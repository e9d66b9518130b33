//! Server-side reaction to a finished blob upload: measures the image and
//! writes its dimensions back onto the owning record.

use std::{io::Cursor, sync::Arc};

use anyhow::{Context, Result};
use client_core::{
    paths::{parse_blob_path, record_path},
    remote::{DocumentStore, ObjectStore},
};
use image::ImageReader;
use serde_json::json;
use shared::domain::{FileId, UserId};
use thiserror::Error;
use tracing::{debug, info};

/// Notification that an object finished writing to the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizedObject {
    pub bucket: String,
    pub name: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkipReason {
    #[error("object is in bucket {actual}, expected {expected}")]
    ForeignBucket { expected: String, actual: String },
    #[error("object path {0} is not a user file")]
    NotAUserFile(String),
    #[error("content type {0:?} is not an image")]
    NotAnImage(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Measured {
        user_id: UserId,
        file_id: FileId,
        width: u32,
        height: u32,
    },
    Skipped(SkipReason),
}

pub struct UploadProcessor {
    expected_bucket: String,
    objects: Arc<dyn ObjectStore>,
    documents: Arc<dyn DocumentStore>,
}

impl UploadProcessor {
    pub fn new(
        expected_bucket: impl Into<String>,
        objects: Arc<dyn ObjectStore>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            expected_bucket: expected_bucket.into(),
            objects,
            documents,
        }
    }

    pub async fn on_object_finalized(&self, object: &FinalizedObject) -> Result<ProcessOutcome> {
        if object.bucket != self.expected_bucket {
            return Ok(self.skip(SkipReason::ForeignBucket {
                expected: self.expected_bucket.clone(),
                actual: object.bucket.clone(),
            }));
        }
        let Some((user_id, file_id)) = parse_blob_path(&object.name) else {
            return Ok(self.skip(SkipReason::NotAUserFile(object.name.clone())));
        };
        let is_image = object
            .content_type
            .as_deref()
            .is_some_and(|content_type| content_type.starts_with("image/"));
        if !is_image {
            return Ok(self.skip(SkipReason::NotAnImage(object.content_type.clone())));
        }

        let bytes = self
            .objects
            .read(&object.name)
            .await
            .with_context(|| format!("failed to read {}", object.name))?;
        let (width, height) = measure(&bytes)
            .with_context(|| format!("failed to decode image {}", object.name))?;

        self.documents
            .update(
                &record_path(&user_id, &file_id),
                json!({ "sizeX": width, "sizeY": height }),
            )
            .await
            .with_context(|| format!("failed to record dimensions for {file_id}"))?;
        info!(
            user_id = %user_id,
            file_id = %file_id,
            width,
            height,
            "processor: dimensions recorded"
        );

        Ok(ProcessOutcome::Measured {
            user_id,
            file_id,
            width,
            height,
        })
    }

    fn skip(&self, reason: SkipReason) -> ProcessOutcome {
        debug!(reason = %reason, "processor: object skipped");
        ProcessOutcome::Skipped(reason)
    }
}

/// Reads only as much of the header as the format needs.
pub fn measure(bytes: &[u8]) -> Result<(u32, u32)> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

#[cfg(test)]
#[path = "tests/processor_tests.rs"]
mod tests;
