//! Primary/backup configuration records and their reconciliation.

pub mod folders;
mod reconcile;
mod record;
mod store;

pub use folders::{layout_root, SigningFolders};
pub use reconcile::{ConfigPair, ReconcileReport, SecretMove};
pub use record::{ConfigRecord, FolderLayout, GitVisibility, MathRendering};
pub use store::{no_retry, validate, ConfigStore, LoadReport, RecordStatus, RetryPolicy};
