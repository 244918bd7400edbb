//! ponto-store: Adapters for the controller's external collaborators.
//!
//! HTTP attendance store and webhook notifier, the SQLite gallery of
//! enrolled identities, and the on-disk sink for unknown-face evidence.

pub mod evidence;
pub mod gallery;
pub mod http;

pub use evidence::DirectoryEvidenceSink;
pub use gallery::{EnrolledIdentity, GalleryStore, GalleryStoreError};
pub use http::{HttpAttendanceStore, WebhookNotifier};
