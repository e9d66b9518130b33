//! Remote-backed image library: live record feed, locator resolution, the
//! upload/delete/download operations, first-run seeding and transform jobs.

pub mod error;
pub mod events;
pub mod feed;
pub mod http;
pub mod jobs;
pub mod library;
pub mod locator;
pub mod mapping;
pub mod paths;
pub mod remote;
pub mod seeder;
pub mod session;

pub use error::{ClientError, UploadStage};
pub use events::{ClientEvent, EventBus, Notification, NotificationSurface};
pub use feed::{FeedState, RecordFeed};
pub use http::HttpBackend;
pub use jobs::{TransformController, TransformJobClient, TransformSettings};
pub use library::{merge_view, FileLibrary, LibraryEntry, LibraryView};
pub use locator::{LocatorCache, LocatorKey, LocatorResolver};
pub use mapping::{map_control_to_parameter, parameter_table, ControlPosition};
pub use remote::{
    Backends, BlobFetcher, DocumentStore, FileSaver, JobBackend, ObjectStore, SnapshotStream,
};
pub use seeder::{AccountSeeder, SeedOutcome};
pub use session::{SessionIdentity, SessionOptions, UserSession};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
