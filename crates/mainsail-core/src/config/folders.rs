use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

use super::FolderLayout;
use crate::fsutil;
use crate::paths::AppPaths;

pub const CONTAINER_DIR: &str = "_digital_signatures";

/// Directory holding the signing folders for `layout`.
pub fn layout_root(layout: FolderLayout, paths: &AppPaths) -> PathBuf {
    match layout {
        FolderLayout::Desktop => paths.user_home().join("Desktop"),
        FolderLayout::Documents => paths.user_home().join("Documents").join(CONTAINER_DIR),
        FolderLayout::ProjectHome => paths.project_home().join(CONTAINER_DIR),
    }
}

/// The five folders a signing workflow uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SigningFolders {
    pub to_sign: PathBuf,
    pub signed: PathBuf,
    pub to_check: PathBuf,
    pub quarantined: PathBuf,
    pub authenticated: PathBuf,
}

impl SigningFolders {
    pub fn for_layout(layout: FolderLayout, paths: &AppPaths) -> Self {
        let root = layout_root(layout, paths);
        let to_sign = root.join("to-sign");
        let to_check = root.join("to-check");
        Self {
            signed: to_sign.join("signed"),
            quarantined: to_check.join("quarantine"),
            authenticated: to_check.join("authenticated"),
            to_sign,
            to_check,
        }
    }

    /// Parents come before children.
    pub fn all(&self) -> [&Path; 5] {
        [
            &self.to_sign,
            &self.signed,
            &self.to_check,
            &self.quarantined,
            &self.authenticated,
        ]
    }

    pub fn create_all(&self) -> io::Result<()> {
        for dir in self.all() {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Moves the content of every `from` folder into its `to` counterpart, then
/// drops an emptied `_digital_signatures` container. Returns whether anything
/// was moved. Safe to repeat: folders already moved are simply absent.
pub fn relocate(from: FolderLayout, to: FolderLayout, paths: &AppPaths) -> io::Result<bool> {
    if from == to {
        return Ok(false);
    }
    let old = SigningFolders::for_layout(from, paths);
    let new = SigningFolders::for_layout(to, paths);
    new.create_all()?;

    let mut moved = false;
    for (src, dst) in old.all().into_iter().zip(new.all()) {
        if src.is_dir() && src != dst {
            info!(from = %src.display(), to = %dst.display(), "moving signing folder");
            fsutil::move_tree(src, dst)?;
            moved = true;
        }
    }

    if from != FolderLayout::Desktop {
        let root = layout_root(from, paths);
        if root.is_dir() && fsutil::is_empty_dir(&root)? {
            fs::remove_dir(&root)?;
            info!(path = %root.display(), "removed empty signing container");
        }
    }
    Ok(moved)
}
