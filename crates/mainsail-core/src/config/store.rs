use parking_lot::Mutex;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::folders::SigningFolders;
use super::reconcile::{self, ConfigPair, ReconcileReport, Retry, SecretStep};
use super::record::ConfigRecord;
use crate::error::{Error, Result};
use crate::fsutil;
use crate::paths::AppPaths;
use crate::profile::{Profile, TrustStore, TrustedKeys};
use crate::secret::{BackendProvider, SecretError, SecretLocator, SecretString};

/// Decides whether an unavailable secret store should be tried again.
pub type RetryPolicy = Arc<dyn Fn(&SecretError) -> bool + Send + Sync>;

pub fn no_retry() -> RetryPolicy {
    Arc::new(|_| false)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RecordStatus {
    Loaded,
    /// The file was missing and a default was written.
    Created,
    /// The file was unusable; it was moved to `preserved` and a default was
    /// written in its place.
    Replaced { preserved: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub primary: RecordStatus,
    pub backup: RecordStatus,
}

impl LoadReport {
    pub fn replaced(&self) -> impl Iterator<Item = (&Path, &str)> {
        [&self.primary, &self.backup]
            .into_iter()
            .filter_map(|status| match status {
                RecordStatus::Replaced { preserved, reason } => {
                    Some((preserved.as_path(), reason.as_str()))
                }
                _ => None,
            })
    }
}

/// Field checks beyond what parsing already enforces.
pub fn validate(record: &ConfigRecord, backends: &dyn BackendProvider) -> bool {
    if !backends.supports(record.secret.kind()) {
        return false;
    }
    match &record.secret {
        SecretLocator::Filesystem { dir } => fs::create_dir_all(dir).is_ok(),
        SecretLocator::Keychain { name } => backends.keychain_exists(name),
        SecretLocator::CredentialLocker => true,
    }
}

fn write_record(path: &Path, record: &ConfigRecord, read_only: bool) -> Result<()> {
    let text = record.to_toml()?;
    fsutil::write_atomic(path, text.as_bytes(), read_only)?;
    Ok(())
}

fn preserve_invalid(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let preserved = path.with_file_name(format!("invalid_{file_name}"));
    if preserved.exists() {
        fsutil::set_read_only(&preserved, false)?;
        fs::remove_file(&preserved)?;
    }
    fs::rename(path, &preserved)?;
    Ok(preserved)
}

fn load_record(
    path: &Path,
    backends: &dyn BackendProvider,
    read_only: bool,
) -> Result<(ConfigRecord, RecordStatus)> {
    let problem = match fs::read(path) {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let record = ConfigRecord::platform_default();
            write_record(path, &record, read_only)?;
            info!(path = %path.display(), "created default configuration");
            return Ok((record, RecordStatus::Created));
        }
        Err(e) => format!("unreadable: {e}"),
        Ok(bytes) => match String::from_utf8(bytes) {
            Err(_) => "not UTF-8 text".to_string(),
            Ok(text) => match ConfigRecord::from_toml(&text) {
                Err(e) => format!("not a valid configuration: {}", e.message()),
                Ok(record) if validate(&record, backends) => {
                    return Ok((record, RecordStatus::Loaded));
                }
                Ok(_) => "values not usable on this host".to_string(),
            },
        },
    };

    let preserved = preserve_invalid(path)?;
    warn!(
        path = %path.display(),
        preserved = %preserved.display(),
        reason = %problem,
        "configuration replaced with defaults"
    );
    let record = ConfigRecord::platform_default();
    write_record(path, &record, read_only)?;
    Ok((
        record,
        RecordStatus::Replaced {
            preserved,
            reason: problem,
        },
    ))
}

pub(crate) fn load_pair(
    paths: &AppPaths,
    backends: &dyn BackendProvider,
) -> Result<(ConfigPair, LoadReport)> {
    fs::create_dir_all(paths.config_dir())?;
    let (primary, primary_status) = load_record(&paths.primary_config(), backends, false)?;
    let (backup, backup_status) = load_record(&paths.backup_config(), backends, true)?;
    Ok((
        ConfigPair::new(primary, backup),
        LoadReport {
            primary: primary_status,
            backup: backup_status,
        },
    ))
}

fn run_reconcile(
    paths: &AppPaths,
    backends: &dyn BackendProvider,
    retry: Retry<'_>,
) -> Result<(ConfigPair, ReconcileReport)> {
    let (pair, load) = load_pair(paths, backends)?;
    finish_reconcile(pair, load, paths, backends, SecretStep::Place(retry))
}

/// Reconciles without prompting. A locked or unreachable secret store
/// defers the secret move instead of failing; everything else converges.
fn run_reconcile_deferring(
    paths: &AppPaths,
    backends: &dyn BackendProvider,
) -> Result<(ConfigPair, ReconcileReport)> {
    let (pair, load) = load_pair(paths, backends)?;
    let never: Retry<'_> = &|_: &SecretError| false;
    let attempt = finish_reconcile(
        pair.clone(),
        load.clone(),
        paths,
        backends,
        SecretStep::Place(never),
    );
    match attempt {
        Err(Error::SecretBackend(
            e @ (SecretError::BackendLocked(_) | SecretError::BackendUnavailable(_)),
        )) => {
            warn!(error = %e, "secret store unreachable, secret move deferred");
            finish_reconcile(pair, load, paths, backends, SecretStep::Defer)
        }
        other => other,
    }
}

fn finish_reconcile(
    pair: ConfigPair,
    load: LoadReport,
    paths: &AppPaths,
    backends: &dyn BackendProvider,
    secrets: SecretStep<'_>,
) -> Result<(ConfigPair, ReconcileReport)> {
    let (pair, secret_move, folders_moved, write_backup) =
        reconcile::converge(pair, paths, backends, secrets)?;
    if write_backup {
        write_record(&paths.backup_config(), &pair.backup, true)?;
        info!(path = %paths.backup_config().display(), "backup configuration updated");
    }
    Ok((
        pair,
        ReconcileReport {
            load,
            secret_move,
            folders_moved,
            backup_written: write_backup,
        },
    ))
}

/// Single owner of the configuration pair and the trust store.
///
/// Every mutation (reconciliation, config edits, secret writes, trust
/// commits) takes the same lock, so none of them interleave.
pub struct ConfigStore {
    paths: AppPaths,
    backends: Arc<dyn BackendProvider>,
    retry: RetryPolicy,
    trust: TrustStore,
    state: Mutex<ConfigPair>,
}

impl ConfigStore {
    /// Loads and reconciles both records. Never prompts.
    pub fn open(
        paths: AppPaths,
        backends: Arc<dyn BackendProvider>,
    ) -> Result<(Self, ReconcileReport)> {
        Self::open_with_retry(paths, backends, no_retry())
    }

    pub fn open_with_retry(
        paths: AppPaths,
        backends: Arc<dyn BackendProvider>,
        retry: RetryPolicy,
    ) -> Result<(Self, ReconcileReport)> {
        let (pair, report) = run_reconcile(&paths, backends.as_ref(), retry.as_ref())?;
        Ok((Self::assemble(paths, backends, retry, pair), report))
    }

    /// Opens the store for verification and review. Never prompts, and a
    /// secret store that is locked or missing does not stop it: the secret
    /// stays where it is (reported as [`SecretMove::Deferred`]) until the
    /// next [`ConfigStore::open`] or [`ConfigStore::reconcile`].
    ///
    /// [`SecretMove::Deferred`]: super::SecretMove::Deferred
    pub fn open_for_review(
        paths: AppPaths,
        backends: Arc<dyn BackendProvider>,
    ) -> Result<(Self, ReconcileReport)> {
        let (pair, report) = run_reconcile_deferring(&paths, backends.as_ref())?;
        Ok((Self::assemble(paths, backends, no_retry(), pair), report))
    }

    fn assemble(
        paths: AppPaths,
        backends: Arc<dyn BackendProvider>,
        retry: RetryPolicy,
        pair: ConfigPair,
    ) -> Self {
        let trust = TrustStore::new(paths.trusted_keys());
        Self {
            paths,
            backends,
            retry,
            trust,
            state: Mutex::new(pair),
        }
    }

    pub fn paths(&self) -> &AppPaths {
        &self.paths
    }

    /// Re-reads both files and converges them.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut state = self.state.lock();
        let (pair, report) =
            run_reconcile(&self.paths, self.backends.as_ref(), self.retry.as_ref())?;
        *state = pair;
        Ok(report)
    }

    /// Re-reads both files, repairing unusable ones, without reconciling.
    pub fn load(&self) -> Result<(ConfigPair, LoadReport)> {
        let mut state = self.state.lock();
        let (pair, report) = load_pair(&self.paths, self.backends.as_ref())?;
        *state = pair.clone();
        Ok((pair, report))
    }

    pub fn validate(&self, record: &ConfigRecord) -> bool {
        validate(record, self.backends.as_ref())
    }

    pub fn pair(&self) -> ConfigPair {
        self.state.lock().clone()
    }

    pub fn primary(&self) -> ConfigRecord {
        self.state.lock().primary.clone()
    }

    pub fn backup(&self) -> ConfigRecord {
        self.state.lock().backup.clone()
    }

    pub fn signing_folders(&self) -> SigningFolders {
        SigningFolders::for_layout(self.state.lock().primary.folders_location, &self.paths)
    }

    /// Writes a new primary record and reconciles towards it.
    pub fn update_primary(&self, record: ConfigRecord) -> Result<ReconcileReport> {
        let mut state = self.state.lock();
        if !self.validate(&record) {
            return Err(Error::InvalidConfig(format!(
                "{} cannot be used on this host",
                record.secret
            )));
        }
        write_record(&self.paths.primary_config(), &record, false)?;
        let (pair, report) =
            run_reconcile(&self.paths, self.backends.as_ref(), self.retry.as_ref())?;
        *state = pair;
        Ok(report)
    }

    // ── Secret ──────────────────────────────────────────────────────────

    pub fn secret_exists(&self) -> Result<bool> {
        let state = self.state.lock();
        let backend = self.backends.backend(&state.primary.secret);
        Ok(reconcile::retrying(self.retry.as_ref(), || backend.exists())?)
    }

    pub fn read_secret(&self) -> Result<SecretString> {
        let state = self.state.lock();
        let backend = self.backends.backend(&state.primary.secret);
        Ok(reconcile::retrying(self.retry.as_ref(), || backend.read())?)
    }

    /// Stores `secret` at the primary location unless one is already there.
    pub fn store_secret(&self, secret: &str) -> Result<()> {
        let state = self.state.lock();
        let backend = self.backends.backend(&state.primary.secret);
        if reconcile::retrying(self.retry.as_ref(), || backend.exists())? {
            warn!(location = %state.primary.secret, "refusing to overwrite stored secret");
            return Err(Error::AlreadyExists);
        }
        match reconcile::retrying(self.retry.as_ref(), || backend.write(secret)) {
            Ok(()) => Ok(()),
            Err(SecretError::AlreadyExists(_)) => Err(Error::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    pub fn secret_location(&self) -> SecretLocator {
        self.state.lock().primary.secret.clone()
    }

    // ── Trust store ─────────────────────────────────────────────────────

    pub fn trust_store_path(&self) -> &Path {
        self.trust.path()
    }

    pub fn trusted(&self) -> Result<TrustedKeys> {
        let _state = self.state.lock();
        self.trust.load()
    }

    pub fn trusted_profile(&self, public_key: &str) -> Result<Option<Profile>> {
        let _state = self.state.lock();
        self.trust.get(public_key)
    }

    pub fn commit_trust(&self, public_key: &str, profile: Profile) -> Result<()> {
        let _state = self.state.lock();
        self.trust.insert(public_key, profile)?;
        info!(public_key, "signer trusted");
        Ok(())
    }

    pub fn revoke_trust(&self, public_key: &str) -> Result<bool> {
        let _state = self.state.lock();
        let removed = self.trust.remove(public_key)?;
        if removed {
            info!(public_key, "signer trust revoked");
        }
        Ok(removed)
    }
}
