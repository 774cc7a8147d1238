//! Acting on a review decision: moving bundles and their companions out of
//! the to-check folder, and recording trust changes.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::bundle::{self, Bundle};
use crate::error::{Error, Result};
use crate::fsutil;
use crate::trust::{Assessment, ReviewChoice, TrustVerifier, Verdict};

/// `.edbdl` files directly inside `dir`, sorted by name.
pub fn pending_bundles(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && bundle::is_bundle_path(&path) {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}

/// A bundle waiting in the to-check folder, with the paths of its optional
/// companions next to it.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub bundle_path: PathBuf,
    pub document_path: PathBuf,
    pub signature_path: PathBuf,
    pub bundle: Bundle,
}

impl PendingFile {
    pub fn open(bundle_path: &Path) -> Result<Self> {
        let bundle = bundle::read_bundle(bundle_path)?;
        let document_path = bundle::document_path_for(bundle_path)
            .ok_or_else(|| Error::malformed("bundle path has no document name"))?;
        let signature_path = bundle::detached_signature_path(&document_path);
        Ok(Self {
            bundle_path: bundle_path.to_path_buf(),
            document_path,
            signature_path,
            bundle,
        })
    }
}

pub fn check_choice(verdict: &Verdict, choice: ReviewChoice) -> Result<()> {
    if verdict.allowed_choices().contains(&choice) {
        Ok(())
    } else {
        Err(Error::ChoiceNotAllowed(choice.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Applied {
    pub choice: ReviewChoice,
    pub destination: PathBuf,
    pub files: Vec<PathBuf>,
    pub trust_changed: bool,
}

fn move_into(source: &Path, dir: &Path) -> Result<PathBuf> {
    let name = source
        .file_name()
        .ok_or_else(|| Error::FileNotFound(source.to_path_buf()))?;
    let dest = dir.join(name);
    fsutil::move_file(source, &dest)?;
    Ok(dest)
}

/// Carries out `choice` for `pending`. Files are moved before the trust
/// store is touched, so a failed move leaves trust unchanged.
pub fn apply(
    verifier: &TrustVerifier,
    pending: &PendingFile,
    assessment: &Assessment,
    choice: ReviewChoice,
) -> Result<Applied> {
    check_choice(&assessment.verdict, choice)?;
    let folders = verifier.store().signing_folders();
    let mut files = Vec::new();

    let destination = if choice.authenticates() {
        let dest = folders.authenticated.clone();
        fs::create_dir_all(&dest)?;
        files.push(move_into(&pending.bundle_path, &dest)?);

        // The authenticated document is the signed message itself. A loose
        // copy next to the bundle is only kept if it differs, and then it
        // goes to quarantine.
        let doc_name = pending
            .document_path
            .file_name()
            .ok_or_else(|| Error::malformed("bundle path has no document name"))?;
        let doc_dest = dest.join(doc_name);
        fsutil::write_atomic(&doc_dest, &pending.bundle.message, false)?;
        files.push(doc_dest);
        if pending.document_path.is_file() {
            if fs::read(&pending.document_path)? == pending.bundle.message {
                fs::remove_file(&pending.document_path)?;
            } else {
                warn!(
                    path = %pending.document_path.display(),
                    "document differs from signed content, quarantining it"
                );
                fs::create_dir_all(&folders.quarantined)?;
                files.push(move_into(&pending.document_path, &folders.quarantined)?);
            }
        }
        if pending.signature_path.is_file() {
            files.push(move_into(&pending.signature_path, &dest)?);
        }
        dest
    } else {
        let dest = folders.quarantined.clone();
        fs::create_dir_all(&dest)?;
        for path in [
            &pending.bundle_path,
            &pending.document_path,
            &pending.signature_path,
        ] {
            if path.is_file() {
                files.push(move_into(path, &dest)?);
            }
        }
        dest
    };

    let trust_changed = match choice {
        ReviewChoice::AuthenticateAndTrust | ReviewChoice::AuthenticateAndUpdateTrust => {
            let profile = assessment
                .profile
                .clone()
                .ok_or_else(|| Error::ChoiceNotAllowed(choice.to_string()))?;
            verifier.commit_trust(&assessment.public_key, profile)?;
            true
        }
        ReviewChoice::AuthenticateAndRemoveTrust => {
            verifier.revoke_trust(&assessment.public_key)?
        }
        ReviewChoice::Quarantine | ReviewChoice::Authenticate => false,
    };

    info!(
        bundle = %pending.bundle_path.display(),
        choice = %choice,
        destination = %destination.display(),
        "review decision applied"
    );
    Ok(Applied {
        choice,
        destination,
        files,
        trust_changed,
    })
}
