//! macOS keychain slot, addressed by keychain name.
//!
//! The `keyring` crate only reaches the default keychains, so named keychains
//! go through the `security` tool. Exit statuses follow the Security
//! framework codes: 44 item not found, 45 duplicate item, 51 and 128 mean the
//! keychain could not be unlocked.

use std::process::{Command, Output};
use zeroize::Zeroizing;

use super::{SecretBackend, SecretError, SecretString, KEYCHAIN_ACCOUNT, KEYCHAIN_SERVICE};

const SECURITY_TOOL: &str = "/usr/bin/security";
const LOGIN_KEYCHAIN: &str = "login";

#[derive(Debug, Clone)]
pub struct KeychainBackend {
    name: String,
}

impl KeychainBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    fn keychain_file(&self) -> String {
        format!("{}.keychain-db", self.name)
    }

    fn location(&self) -> String {
        format!("keychain '{}'", self.name)
    }

    fn run(&self, args: &[&str]) -> Result<Output, SecretError> {
        Command::new(SECURITY_TOOL)
            .args(args)
            .output()
            .map_err(|e| SecretError::BackendUnavailable(format!("{SECURITY_TOOL}: {e}")))
    }

    fn check(&self, output: Output) -> Result<Output, SecretError> {
        if output.status.success() {
            return Ok(output);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(map_exit(output.status.code(), stderr.trim(), self.location()))
    }
}

/// Maps a failed `security` run. `None` means the tool was killed by a signal.
fn map_exit(code: Option<i32>, stderr: &str, location: String) -> SecretError {
    match code {
        Some(44) => SecretError::NotFound(location),
        Some(45) => SecretError::AlreadyExists(location),
        Some(51) | Some(128) => SecretError::BackendLocked(format!("{location}: {stderr}")),
        _ => SecretError::BackendUnavailable(format!("{location}: {stderr}")),
    }
}

impl SecretBackend for KeychainBackend {
    fn exists(&self) -> Result<bool, SecretError> {
        let keychain = self.keychain_file();
        let output = self.run(&[
            "find-generic-password",
            "-s",
            KEYCHAIN_SERVICE,
            "-a",
            KEYCHAIN_ACCOUNT,
            &keychain,
        ])?;
        match self.check(output) {
            Ok(_) => Ok(true),
            Err(SecretError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn read(&self) -> Result<SecretString, SecretError> {
        let keychain = self.keychain_file();
        let output = self.run(&[
            "find-generic-password",
            "-w",
            "-s",
            KEYCHAIN_SERVICE,
            "-a",
            KEYCHAIN_ACCOUNT,
            &keychain,
        ])?;
        let output = self.check(output)?;
        let raw = Zeroizing::new(output.stdout);
        let text = String::from_utf8_lossy(&raw).trim_end().to_string();
        Ok(Zeroizing::new(text))
    }

    fn write(&self, secret: &str) -> Result<(), SecretError> {
        // Without -U the tool refuses duplicates, which is the contract.
        let keychain = self.keychain_file();
        let output = self.run(&[
            "add-generic-password",
            "-s",
            KEYCHAIN_SERVICE,
            "-a",
            KEYCHAIN_ACCOUNT,
            "-D",
            "ed25519_secret",
            "-w",
            secret,
            &keychain,
        ])?;
        self.check(output)?;
        tracing::info!(keychain = %self.name, "secret written to keychain");
        Ok(())
    }

    fn delete(&self) -> Result<(), SecretError> {
        let keychain = self.keychain_file();
        let output = self.run(&[
            "delete-generic-password",
            "-s",
            KEYCHAIN_SERVICE,
            "-a",
            KEYCHAIN_ACCOUNT,
            &keychain,
        ])?;
        self.check(output)?;
        tracing::info!(keychain = %self.name, "secret removed from keychain");
        Ok(())
    }
}

pub(crate) fn keychain_exists(name: &str) -> bool {
    if name == LOGIN_KEYCHAIN {
        return true;
    }
    if name.trim().is_empty() {
        return false;
    }
    match Command::new(SECURITY_TOOL).arg("list-keychains").output() {
        Ok(output) if output.status.success() => {
            let listing = String::from_utf8_lossy(&output.stdout);
            let wanted = format!("/{name}.keychain");
            listing.lines().any(|line| line.contains(&wanted))
        }
        Ok(output) => {
            tracing::warn!(status = ?output.status.code(), "listing keychains failed");
            false
        }
        Err(err) => {
            tracing::warn!(error = %err, "security tool unavailable");
            false
        }
    }
}
