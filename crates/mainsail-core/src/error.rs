//! Error types for Mainsail signing

use std::path::PathBuf;
use thiserror::Error;

use crate::secret::SecretError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("secret backend: {0}")]
    SecretBackend(#[from] SecretError),

    /// A secret is already stored at the configured location. Nothing was
    /// overwritten.
    #[error("a signing key already exists at the configured location")]
    AlreadyExists,

    #[error("malformed bundle: {0}")]
    MalformedBundle(String),

    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed profile: {0}")]
    MalformedProfile(String),

    #[error("{0} is not available for this bundle")]
    ChoiceNotAllowed(String),

    #[error("trust store at {} is unreadable: {reason}", .path.display())]
    TrustStoreCorrupted { path: PathBuf, reason: String },

    #[error("cannot determine {0} directory")]
    NoHomeDirectory(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Toml(#[from] toml::ser::Error),
}

impl Error {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Error::MalformedBundle(reason.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
