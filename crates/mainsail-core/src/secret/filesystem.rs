use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

use super::{SecretBackend, SecretError, SecretString};

pub const SECRET_FILE_NAME: &str = "mainsail_secret_string.secret";

/// Plaintext secret in a user-chosen directory, usually on a removable drive.
#[derive(Debug, Clone)]
pub struct FilesystemBackend {
    dir: PathBuf,
}

impl FilesystemBackend {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn secret_path(&self) -> PathBuf {
        self.dir.join(SECRET_FILE_NAME)
    }

    fn ensure_dir(&self) -> Result<(), SecretError> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(SecretError::BackendUnavailable(format!(
                "directory {} does not exist",
                self.dir.display()
            )))
        }
    }

    fn location(&self) -> String {
        self.dir.display().to_string()
    }
}

fn map_io(err: std::io::Error, location: String) -> SecretError {
    match err.kind() {
        ErrorKind::NotFound => SecretError::NotFound(location),
        ErrorKind::AlreadyExists => SecretError::AlreadyExists(location),
        ErrorKind::PermissionDenied => SecretError::BackendLocked(format!("{location}: {err}")),
        _ => SecretError::BackendUnavailable(format!("{location}: {err}")),
    }
}

impl SecretBackend for FilesystemBackend {
    fn exists(&self) -> Result<bool, SecretError> {
        self.ensure_dir()?;
        Ok(self.secret_path().is_file())
    }

    fn read(&self) -> Result<SecretString, SecretError> {
        self.ensure_dir()?;
        let raw = Zeroizing::new(
            fs::read_to_string(self.secret_path()).map_err(|e| map_io(e, self.location()))?,
        );
        Ok(Zeroizing::new(raw.trim().to_string()))
    }

    fn write(&self, secret: &str) -> Result<(), SecretError> {
        self.ensure_dir()?;
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(self.secret_path())
            .map_err(|e| map_io(e, self.location()))?;
        file.write_all(secret.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| map_io(e, self.location()))?;
        tracing::info!(dir = %self.dir.display(), "secret written to filesystem");
        Ok(())
    }

    fn delete(&self) -> Result<(), SecretError> {
        self.ensure_dir()?;
        fs::remove_file(self.secret_path()).map_err(|e| map_io(e, self.location()))?;
        tracing::info!(dir = %self.dir.display(), "secret removed from filesystem");
        Ok(())
    }
}
