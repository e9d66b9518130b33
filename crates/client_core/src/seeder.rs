//! First-run provisioning: the account profile plus a private copy of the
//! shared template files.
//!
//! Concurrent calls within one session are collapsed with an attempt counter:
//! each call that finds no profile claims the next attempt number before
//! writing, and only the call whose number is still current after the write
//! may copy templates. That call then records itself as the owner; once an
//! owner exists every later claimer is superseded, however late its profile
//! read returned. Two devices seeding the same account at the same time can
//! still both copy templates.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use shared::{
    domain::{AuthenticatedUser, FileId},
    protocol::{AccountProfile, ObjectMetadata},
};
use tracing::{debug, info};

use crate::{
    error::ClientError,
    events::EventBus,
    library::store_file,
    paths::profile_path,
    remote::Backends,
    session::SessionIdentity,
};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeedOutcome {
    AlreadyInitialized,
    /// Another invocation claimed seeding while this one was writing.
    Superseded,
    Seeded { copied: Vec<FileId> },
}

pub struct AccountSeeder {
    identity: Arc<SessionIdentity>,
    backends: Backends,
    events: EventBus,
    template_prefix: String,
    attempts: AtomicU64,
    seeded_by: AtomicU64,
}

impl AccountSeeder {
    pub fn new(
        identity: Arc<SessionIdentity>,
        backends: Backends,
        events: EventBus,
        template_prefix: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            backends,
            events,
            template_prefix: template_prefix.into(),
            attempts: AtomicU64::new(0),
            seeded_by: AtomicU64::new(0),
        }
    }

    pub async fn ensure_initialized(&self) -> Result<SeedOutcome, ClientError> {
        let user = self.identity.user()?.clone();
        let result = self.seed(&user).await;
        if let Err(err) = &result {
            if err.is_transient() {
                self.events.notify(err.notification_title(), err.to_string());
            }
        }
        result
    }

    async fn seed(&self, user: &AuthenticatedUser) -> Result<SeedOutcome, ClientError> {
        let path = profile_path(&user.user_id);
        let existing = self
            .backends
            .documents
            .get(&path)
            .await
            .map_err(|source| ClientError::remote("account setup", source))?;
        if existing.is_some() {
            debug!(user_id = %user.user_id, "seeder: profile exists");
            return Ok(SeedOutcome::AlreadyInitialized);
        }

        let claimed = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let profile = AccountProfile {
            display_name: user.display_name.clone(),
            email: user.email.clone(),
        };
        let body = serde_json::to_value(&profile)
            .map_err(|err| ClientError::invariant(format!("unserializable profile: {err}")))?;
        self.backends
            .documents
            .set(&path, body)
            .await
            .map_err(|source| ClientError::remote("account setup", source))?;

        if self.attempts.load(Ordering::SeqCst) != claimed {
            info!(user_id = %user.user_id, claimed, "seeder: superseded by a later attempt");
            return Ok(SeedOutcome::Superseded);
        }
        if let Err(owner) =
            self.seeded_by
                .compare_exchange(0, claimed, Ordering::SeqCst, Ordering::SeqCst)
        {
            info!(user_id = %user.user_id, claimed, owner, "seeder: templates already claimed");
            return Ok(SeedOutcome::Superseded);
        }

        let templates = self
            .backends
            .objects
            .list(&self.template_prefix)
            .await
            .map_err(|source| ClientError::remote("account setup", source))?;
        let mut copied = Vec::new();
        for template in templates.iter().filter(|t| is_template_file(t)) {
            let bytes = self
                .backends
                .objects
                .read(&template.path)
                .await
                .map_err(|source| ClientError::remote("account setup", source))?;
            let content_type = template
                .content_type
                .as_deref()
                .unwrap_or(FALLBACK_CONTENT_TYPE);
            let file_id = store_file(
                &self.backends,
                &self.events,
                &user.user_id,
                bytes,
                template.file_name(),
                content_type,
            )
            .await?;
            copied.push(file_id);
        }

        info!(
            user_id = %user.user_id,
            templates = copied.len(),
            "seeder: account initialized"
        );
        Ok(SeedOutcome::Seeded { copied })
    }
}

fn is_template_file(object: &ObjectMetadata) -> bool {
    !object.path.ends_with('/') && !object.file_name().is_empty()
}

#[cfg(test)]
#[path = "tests/seeder_tests.rs"]
mod tests;
