use std::{sync::Arc, time::Duration};

use anyhow::anyhow;
use shared::{
    domain::{FileId, TransformKind},
    protocol::TransformJobRequest,
};
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    error::ClientError,
    events::{ClientEvent, EventBus},
    mapping::{map_control_to_parameter, ControlPosition},
    remote::JobBackend,
    session::SessionIdentity,
};

/// Submits transform jobs and returns the id of the file each one produced.
/// Submissions are not queued; overlapping calls race on the backend.
pub struct TransformJobClient {
    identity: Arc<SessionIdentity>,
    jobs: Arc<dyn JobBackend>,
    events: EventBus,
    timeout: Option<Duration>,
}

impl TransformJobClient {
    pub fn new(
        identity: Arc<SessionIdentity>,
        jobs: Arc<dyn JobBackend>,
        events: EventBus,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            identity,
            jobs,
            events,
            timeout,
        }
    }

    pub async fn submit(
        &self,
        kind: TransformKind,
        target: &FileId,
        use_log: bool,
        parameter: f64,
    ) -> Result<FileId, ClientError> {
        let user_id = self.identity.user_id()?.clone();
        if target.is_empty() {
            return Err(ClientError::invariant("transform target id is empty"));
        }
        if !parameter.is_finite() {
            return Err(ClientError::invariant(format!(
                "transform parameter {parameter} is not finite"
            )));
        }

        let request = TransformJobRequest {
            file_id: target.clone(),
            log: use_log,
            parameter,
        };
        info!(
            user_id = %user_id,
            kind = %kind,
            file_id = %target,
            use_log,
            parameter,
            "jobs: submitting transform"
        );

        let call = self.jobs.call(kind, &request);
        let response = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(response) => response,
                Err(_) => Err(anyhow!("no result after {}s", limit.as_secs())),
            },
            None => call.await,
        };

        match response {
            Ok(response) if response.new_doc.is_empty() => Err(ClientError::invariant(format!(
                "{kind} job on {target} returned an empty file id"
            ))),
            Ok(response) => {
                info!(kind = %kind, file_id = %target, new_file_id = %response.new_doc, "jobs: transform finished");
                self.events.emit(ClientEvent::JobCompleted {
                    kind,
                    target: target.clone(),
                    new_file_id: response.new_doc.clone(),
                });
                Ok(response.new_doc)
            }
            Err(source) => {
                let err = ClientError::Job {
                    kind,
                    target: target.clone(),
                    source,
                };
                self.events.notify(err.notification_title(), err.to_string());
                Err(err)
            }
        }
    }

    /// Maps the control position to the job parameter and submits.
    pub async fn submit_at(
        &self,
        kind: TransformKind,
        target: &FileId,
        use_log: bool,
        position: ControlPosition,
    ) -> Result<FileId, ClientError> {
        let parameter = map_control_to_parameter(kind, use_log, position);
        self.submit(kind, target, use_log, parameter).await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformSettings {
    pub selected: Option<FileId>,
    pub kind: TransformKind,
    pub use_log: bool,
    pub position: ControlPosition,
    pub pending: bool,
    pub created: Option<FileId>,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            selected: None,
            kind: TransformKind::Rotate,
            use_log: false,
            position: ControlPosition::default(),
            pending: false,
            created: None,
        }
    }
}

impl TransformSettings {
    pub fn parameter(&self) -> f64 {
        map_control_to_parameter(self.kind, self.use_log, self.position)
    }
}

/// Caller-side state around the job client: what is selected, the control
/// settings, and the pending flag that keeps submissions one at a time.
pub struct TransformController {
    client: Arc<TransformJobClient>,
    state: Mutex<TransformSettings>,
}

impl TransformController {
    pub fn new(client: Arc<TransformJobClient>) -> Self {
        Self {
            client,
            state: Mutex::new(TransformSettings::default()),
        }
    }

    pub async fn settings(&self) -> TransformSettings {
        self.state.lock().await.clone()
    }

    pub async fn select_file(&self, file_id: Option<FileId>) {
        let mut guard = self.state.lock().await;
        if guard.selected != file_id {
            guard.created = None;
        }
        guard.selected = file_id;
    }

    pub async fn file_removed(&self, file_id: &FileId) {
        let mut guard = self.state.lock().await;
        if guard.selected.as_ref() == Some(file_id) {
            guard.selected = None;
        }
    }

    pub async fn set_kind(&self, kind: TransformKind) {
        self.state.lock().await.kind = kind;
    }

    pub async fn set_use_log(&self, use_log: bool) {
        self.state.lock().await.use_log = use_log;
    }

    pub async fn set_position(&self, position: ControlPosition) {
        self.state.lock().await.position = position;
    }

    /// Submits the current selection. Refused while another submission is
    /// pending or when nothing is selected.
    pub async fn submit(&self) -> Result<FileId, ClientError> {
        let (kind, target, use_log, position) = {
            let mut guard = self.state.lock().await;
            if guard.pending {
                return Err(ClientError::JobPending);
            }
            let target = guard.selected.clone().ok_or(ClientError::NoSelection)?;
            guard.pending = true;
            guard.created = None;
            (guard.kind, target, guard.use_log, guard.position)
        };

        let result = self
            .client
            .submit_at(kind, &target, use_log, position)
            .await;

        let mut guard = self.state.lock().await;
        guard.pending = false;
        if let Ok(new_file_id) = &result {
            guard.created = Some(new_file_id.clone());
        }
        result
    }
}

#[cfg(test)]
#[path = "tests/jobs_tests.rs"]
mod tests;
