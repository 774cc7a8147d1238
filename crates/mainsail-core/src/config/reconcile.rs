//! Convergence of the primary and backup records.
//!
//! The backup record always describes where things were last known to be.
//! The primary describes where they should be. Every step below moves state
//! from the backup's idea to the primary's and is a no-op once they agree, so
//! an interrupted run is finished by simply running again. The backup file is
//! the commit point: it is rewritten last.

use serde::Serialize;
use tracing::{debug, info};

use super::folders::{self, SigningFolders};
use super::record::ConfigRecord;
use crate::error::Result;
use crate::paths::AppPaths;
use crate::secret::{BackendProvider, SecretBackend, SecretError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPair {
    pub primary: ConfigRecord,
    pub backup: ConfigRecord,
}

impl ConfigPair {
    pub fn new(primary: ConfigRecord, backup: ConfigRecord) -> Self {
        Self { primary, backup }
    }

    pub fn is_converged(&self) -> bool {
        self.primary == self.backup
    }

    pub fn locators_differ(&self) -> bool {
        self.primary.secret != self.backup.secret
    }

    /// Copies the primary's secret location into the backup.
    pub fn align_locator(mut self) -> (Self, bool) {
        let changed = self.locators_differ();
        if changed {
            self.backup.secret = self.primary.secret.clone();
        }
        (self, changed)
    }

    pub fn align_layout(mut self) -> (Self, bool) {
        let changed = self.backup.folders_location != self.primary.folders_location;
        if changed {
            self.backup.folders_location = self.primary.folders_location;
        }
        (self, changed)
    }

    pub fn align_preferences(mut self) -> (Self, bool) {
        let mut changed = false;
        if self.backup.math_rendering != self.primary.math_rendering {
            self.backup.math_rendering = self.primary.math_rendering;
            changed = true;
        }
        if self.backup.git_extensions != self.primary.git_extensions {
            self.backup.git_extensions = self.primary.git_extensions;
            changed = true;
        }
        (self, changed)
    }
}

/// What happened to the secret during reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecretMove {
    /// Locators agree, or neither side holds a secret, or only the primary does.
    None,
    /// Both sides held a secret; the backup copy was deleted.
    DroppedBackupCopy,
    /// Only the backup side held a secret; it was copied to the primary
    /// location and then deleted from the backup location.
    MovedFromBackup,
    /// A secret store could not be reached. The backup still names the old
    /// location, so the next full reconciliation finishes the move.
    Deferred,
}

impl SecretMove {
    pub fn plan(primary_has: bool, backup_has: bool) -> Self {
        match (primary_has, backup_has) {
            (true, true) => SecretMove::DroppedBackupCopy,
            (false, true) => SecretMove::MovedFromBackup,
            _ => SecretMove::None,
        }
    }
}

/// Runs a backend operation under the caller's retry policy.
pub(crate) type Retry<'a> = &'a (dyn Fn(&SecretError) -> bool + Send + Sync);

/// How step 1 treats the secret.
#[derive(Clone, Copy)]
pub(crate) enum SecretStep<'a> {
    /// Move it to the primary location, consulting the retry policy.
    Place(Retry<'a>),
    /// Leave the secret and the backup's locator as they are.
    Defer,
}

pub(crate) const MAX_ATTEMPTS: usize = 3;

pub(crate) fn retrying<T>(
    retry: Retry<'_>,
    op: impl FnMut() -> std::result::Result<T, SecretError>,
) -> std::result::Result<T, SecretError> {
    crate::secret::retry_while_unavailable(op, |e| retry(e), MAX_ATTEMPTS)
}

/// Places the secret at the primary locator. Copy happens before delete,
/// and a copy left behind by an interrupted run is recognised as
/// "both hold a secret" on the next run.
pub(crate) fn place_secret(
    pair: &ConfigPair,
    backends: &dyn BackendProvider,
    retry: Retry<'_>,
) -> Result<SecretMove> {
    if !pair.locators_differ() {
        return Ok(SecretMove::None);
    }
    let primary = backends.backend(&pair.primary.secret);
    let backup = backends.backend(&pair.backup.secret);

    let primary_has = retrying(retry, || primary.exists())?;
    let backup_has = retrying(retry, || backup.exists())?;
    let plan = SecretMove::plan(primary_has, backup_has);

    match plan {
        SecretMove::None | SecretMove::Deferred => {}
        SecretMove::DroppedBackupCopy => {
            retrying(retry, || backup.delete())?;
            info!(from = %pair.backup.secret, "dropped stale secret copy");
        }
        SecretMove::MovedFromBackup => {
            copy_secret(backup.as_ref(), primary.as_ref(), retry)?;
            retrying(retry, || backup.delete())?;
            info!(
                from = %pair.backup.secret,
                to = %pair.primary.secret,
                "secret moved"
            );
        }
    }
    Ok(plan)
}

fn copy_secret(
    from: &dyn SecretBackend,
    to: &dyn SecretBackend,
    retry: Retry<'_>,
) -> std::result::Result<(), SecretError> {
    let secret = retrying(retry, || from.read())?;
    retrying(retry, || to.write(&secret))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub load: super::LoadReport,
    pub secret_move: SecretMove,
    pub folders_moved: bool,
    pub backup_written: bool,
}

/// Steps 1 to 4. Returns the converged pair and whether the backup record
/// has to be persisted; persisting is left to the caller.
pub(crate) fn converge(
    pair: ConfigPair,
    paths: &AppPaths,
    backends: &dyn BackendProvider,
    secrets: SecretStep<'_>,
) -> Result<(ConfigPair, SecretMove, bool, bool)> {
    let (pair, secret_move, locator_changed) = match secrets {
        SecretStep::Place(retry) => {
            let secret_move = place_secret(&pair, backends, retry)?;
            let (pair, changed) = pair.align_locator();
            (pair, secret_move, changed)
        }
        SecretStep::Defer if pair.locators_differ() => (pair, SecretMove::Deferred, false),
        SecretStep::Defer => (pair, SecretMove::None, false),
    };

    SigningFolders::for_layout(pair.primary.folders_location, paths).create_all()?;

    let folders_moved = folders::relocate(
        pair.backup.folders_location,
        pair.primary.folders_location,
        paths,
    )?;
    let (pair, layout_changed) = pair.align_layout();
    let (pair, prefs_changed) = pair.align_preferences();

    let write_backup = locator_changed || layout_changed || prefs_changed;
    debug!(
        ?secret_move,
        folders_moved, write_backup, "reconciliation steps done"
    );
    Ok((pair, secret_move, folders_moved, write_backup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FolderLayout, GitVisibility, MathRendering};
    use crate::secret::SecretLocator;

    fn record(layout: FolderLayout, dir: &str) -> ConfigRecord {
        ConfigRecord {
            folders_location: layout,
            math_rendering: MathRendering::MathJax3,
            git_extensions: GitVisibility::Hidden,
            secret: SecretLocator::Filesystem { dir: dir.into() },
        }
    }

    #[test]
    fn plan_table() {
        assert_eq!(SecretMove::plan(true, true), SecretMove::DroppedBackupCopy);
        assert_eq!(SecretMove::plan(false, true), SecretMove::MovedFromBackup);
        assert_eq!(SecretMove::plan(true, false), SecretMove::None);
        assert_eq!(SecretMove::plan(false, false), SecretMove::None);
    }

    #[test]
    fn steps_converge_and_are_idempotent() {
        let mut primary = record(FolderLayout::ProjectHome, "/keys/new");
        primary.math_rendering = MathRendering::KaTeX;
        let pair = ConfigPair::new(primary, record(FolderLayout::Desktop, "/keys/old"));

        let (pair, a) = pair.align_locator();
        let (pair, b) = pair.align_layout();
        let (pair, c) = pair.align_preferences();
        assert!(a && b && c);
        assert!(pair.is_converged());

        let (pair, a) = pair.align_locator();
        let (pair, b) = pair.align_layout();
        let (pair, c) = pair.align_preferences();
        assert!(!(a || b || c));
        assert!(pair.is_converged());
    }
}
