use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::domain::{AuthenticatedUser, FileId, UserId};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    error::ClientError,
    events::{ClientEvent, EventBus},
    jobs::{TransformController, TransformJobClient},
    library::FileLibrary,
    paths::TEMPLATE_PREFIX,
    remote::Backends,
    seeder::AccountSeeder,
};

/// The signed-in user for one session. Revoked on sign-out, after which every
/// operation that needs a user fails with [`ClientError::Unauthenticated`].
pub struct SessionIdentity {
    user: AuthenticatedUser,
    active: AtomicBool,
}

impl SessionIdentity {
    pub fn new(user: AuthenticatedUser) -> Result<Self, ClientError> {
        if user.user_id.is_empty() {
            return Err(ClientError::invariant(
                "identity provider returned an empty user id",
            ));
        }
        Ok(Self {
            user,
            active: AtomicBool::new(true),
        })
    }

    pub fn user(&self) -> Result<&AuthenticatedUser, ClientError> {
        if self.active.load(Ordering::SeqCst) {
            Ok(&self.user)
        } else {
            Err(ClientError::Unauthenticated)
        }
    }

    pub fn user_id(&self) -> Result<&UserId, ClientError> {
        self.user().map(|user| &user.user_id)
    }

    pub fn revoke(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub template_prefix: String,
    pub job_timeout: Option<Duration>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            template_prefix: TEMPLATE_PREFIX.to_string(),
            job_timeout: Some(Duration::from_secs(300)),
        }
    }
}

/// Everything that lives for one sign-in: the live library, a fresh seeding
/// guard, the job client and the transform controller.
pub struct UserSession {
    identity: Arc<SessionIdentity>,
    events: EventBus,
    library: Arc<FileLibrary>,
    seeder: AccountSeeder,
    jobs: Arc<TransformJobClient>,
    transforms: TransformController,
}

impl UserSession {
    pub async fn sign_in(
        backends: Backends,
        user: AuthenticatedUser,
        events: EventBus,
        options: SessionOptions,
    ) -> Result<Self, ClientError> {
        let identity = Arc::new(SessionIdentity::new(user)?);
        let library = Arc::new(
            FileLibrary::open(Arc::clone(&identity), backends.clone(), events.clone()).await?,
        );
        let seeder = AccountSeeder::new(
            Arc::clone(&identity),
            backends.clone(),
            events.clone(),
            options.template_prefix,
        );
        let jobs = Arc::new(TransformJobClient::new(
            Arc::clone(&identity),
            Arc::clone(&backends.jobs),
            events.clone(),
            options.job_timeout,
        ));
        let transforms = TransformController::new(Arc::clone(&jobs));
        info!(user_id = %identity.user_id()?, "session: signed in");

        Ok(Self {
            identity,
            events,
            library,
            seeder,
            jobs,
            transforms,
        })
    }

    pub fn user(&self) -> Result<&AuthenticatedUser, ClientError> {
        self.identity.user()
    }

    pub fn library(&self) -> &Arc<FileLibrary> {
        &self.library
    }

    pub fn seeder(&self) -> &AccountSeeder {
        &self.seeder
    }

    pub fn jobs(&self) -> &Arc<TransformJobClient> {
        &self.jobs
    }

    pub fn transforms(&self) -> &TransformController {
        &self.transforms
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Deletes a file and, once the delete succeeded, drops it from the
    /// transform selection if selected.
    pub async fn delete_file(&self, file_id: &FileId) -> Result<(), ClientError> {
        self.library.delete(file_id).await?;
        self.transforms.file_removed(file_id).await;
        Ok(())
    }

    pub async fn sign_out(&self) {
        if let Ok(user_id) = self.identity.user_id() {
            info!(user_id = %user_id, "session: signing out");
        }
        self.identity.revoke();
        self.library.close().await;
    }
}
