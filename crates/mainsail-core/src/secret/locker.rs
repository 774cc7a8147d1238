use keyring::Entry;
use zeroize::Zeroizing;

use super::{SecretBackend, SecretError, SecretString, LOCKER_SERVICE, LOCKER_USER};

/// The platform credential store (Windows Credential Manager, Secret Service).
#[derive(Debug, Default, Clone)]
pub struct LockerBackend;

impl LockerBackend {
    pub fn new() -> Self {
        Self
    }

    fn entry(&self) -> Result<Entry, SecretError> {
        Entry::new(LOCKER_SERVICE, LOCKER_USER).map_err(map_keyring)
    }
}

fn map_keyring(err: keyring::Error) -> SecretError {
    match err {
        keyring::Error::NoEntry => SecretError::NotFound("credential locker".into()),
        keyring::Error::NoStorageAccess(e) => SecretError::BackendLocked(format!("keyring: {e}")),
        other => SecretError::BackendUnavailable(format!("keyring: {other}")),
    }
}

impl SecretBackend for LockerBackend {
    fn exists(&self) -> Result<bool, SecretError> {
        match self.entry()?.get_password() {
            Ok(secret) => {
                drop(Zeroizing::new(secret));
                Ok(true)
            }
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(map_keyring(e)),
        }
    }

    fn read(&self) -> Result<SecretString, SecretError> {
        let secret = self.entry()?.get_password().map_err(map_keyring)?;
        Ok(Zeroizing::new(secret))
    }

    fn write(&self, secret: &str) -> Result<(), SecretError> {
        // The credential store overwrites silently, so check first.
        if self.exists()? {
            return Err(SecretError::AlreadyExists("credential locker".into()));
        }
        self.entry()?.set_password(secret).map_err(map_keyring)?;
        tracing::info!("secret written to credential locker");
        Ok(())
    }

    fn delete(&self) -> Result<(), SecretError> {
        self.entry()?.delete_password().map_err(map_keyring)?;
        tracing::info!("secret removed from credential locker");
        Ok(())
    }
}
