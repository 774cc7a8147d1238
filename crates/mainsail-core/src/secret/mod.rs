//! Secret storage for the signing seed.
//!
//! A [`SecretBackend`] is bound to one location and stores at most one secret
//! string there. Backends are obtained from a [`BackendProvider`] by
//! [`SecretLocator`]; nothing outside the provider and the config store ever
//! matches on the backend kind.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use zeroize::Zeroizing;

mod filesystem;
mod keychain;
mod locker;

pub use filesystem::{FilesystemBackend, SECRET_FILE_NAME};
pub use keychain::KeychainBackend;
pub use locker::LockerBackend;

/// Service and account names shared by every installation.
pub const KEYCHAIN_SERVICE: &str = "mainsail_signing_service";
pub const KEYCHAIN_ACCOUNT: &str = "mainsail_secret_string";
pub const LOCKER_SERVICE: &str = "mainsail_secret_string";
pub const LOCKER_USER: &str = "ed25519_secret";

pub type SecretString = Zeroizing<String>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecretError {
    #[error("secret store is locked: {0}")]
    BackendLocked(String),
    #[error("secret store unavailable: {0}")]
    BackendUnavailable(String),
    #[error("no secret stored in {0}")]
    NotFound(String),
    #[error("a secret already exists in {0}")]
    AlreadyExists(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    Keychain,
    #[serde(rename = "Locker")]
    CredentialLocker,
    Filesystem,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Keychain => "Keychain",
            BackendKind::CredentialLocker => "Locker",
            BackendKind::Filesystem => "Filesystem",
        }
    }
}

/// Where a secret lives. Two configs point at the same secret exactly when
/// their locators are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SecretLocator {
    Keychain { name: String },
    CredentialLocker,
    Filesystem { dir: PathBuf },
}

impl SecretLocator {
    pub fn kind(&self) -> BackendKind {
        match self {
            SecretLocator::Keychain { .. } => BackendKind::Keychain,
            SecretLocator::CredentialLocker => BackendKind::CredentialLocker,
            SecretLocator::Filesystem { .. } => BackendKind::Filesystem,
        }
    }
}

impl fmt::Display for SecretLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecretLocator::Keychain { name } => write!(f, "keychain '{name}'"),
            SecretLocator::CredentialLocker => write!(f, "credential locker"),
            SecretLocator::Filesystem { dir } => write!(f, "directory {}", dir.display()),
        }
    }
}

/// Capability contract for one secret slot.
///
/// `write` never overwrites: it fails with [`SecretError::AlreadyExists`] if
/// the slot is occupied, and the caller has to `delete` first. Backends never
/// prompt; interactive retries belong to the caller (see
/// [`retry_while_unavailable`]).
pub trait SecretBackend: Send + Sync {
    fn exists(&self) -> Result<bool, SecretError>;
    fn read(&self) -> Result<SecretString, SecretError>;
    fn write(&self, secret: &str) -> Result<(), SecretError>;
    fn delete(&self) -> Result<(), SecretError>;
}

/// Resolves locators to backends for the current host.
pub trait BackendProvider: Send + Sync {
    fn backend(&self, locator: &SecretLocator) -> Box<dyn SecretBackend>;

    /// Whether the backend kind can be used on this host at all.
    fn supports(&self, kind: BackendKind) -> bool;

    fn keychain_exists(&self, name: &str) -> bool;
}

/// The OS-backed provider used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBackends;

impl BackendProvider for SystemBackends {
    fn backend(&self, locator: &SecretLocator) -> Box<dyn SecretBackend> {
        match locator {
            SecretLocator::Keychain { name } => Box::new(KeychainBackend::new(name)),
            SecretLocator::CredentialLocker => Box::new(LockerBackend::new()),
            SecretLocator::Filesystem { dir } => Box::new(FilesystemBackend::new(dir)),
        }
    }

    fn supports(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Keychain => cfg!(target_os = "macos"),
            BackendKind::CredentialLocker => !cfg!(target_os = "macos"),
            BackendKind::Filesystem => true,
        }
    }

    fn keychain_exists(&self, name: &str) -> bool {
        keychain::keychain_exists(name)
    }
}

/// Runs `op`, asking `retry` whether to try again each time the store is
/// unavailable (an unplugged drive, typically). At most `max_attempts` calls
/// to `op` are made. Programmatic callers pass `|_| false`.
pub fn retry_while_unavailable<T, F, R>(
    mut op: F,
    mut retry: R,
    max_attempts: usize,
) -> Result<T, SecretError>
where
    F: FnMut() -> Result<T, SecretError>,
    R: FnMut(&SecretError) -> bool,
{
    let mut attempt = 1;
    loop {
        match op() {
            Err(err @ SecretError::BackendUnavailable(_))
                if attempt < max_attempts && retry(&err) =>
            {
                tracing::debug!(attempt, error = %err, "retrying unavailable secret store");
                attempt += 1;
            }
            other => return other,
        }
    }
}
