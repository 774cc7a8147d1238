use std::fs;
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Replaces `path` with `contents` through a temp file in the same
/// directory, so readers only ever see the old or the new file.
pub(crate) fn write_atomic(path: &Path, contents: &[u8], read_only: bool) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    if path.exists() {
        // Windows refuses to replace a read-only file.
        set_read_only(path, false)?;
    }
    let file = tmp.persist(path).map_err(|e| e.error)?;
    if read_only {
        let mut perms = file.metadata()?.permissions();
        perms.set_readonly(true);
        file.set_permissions(perms)?;
    }
    Ok(())
}

pub(crate) fn set_read_only(path: &Path, read_only: bool) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    if perms.readonly() == read_only {
        return Ok(());
    }
    #[allow(clippy::permissions_set_readonly_false)]
    perms.set_readonly(read_only);
    fs::set_permissions(path, perms)
}

/// Moves a file, replacing any file already at `dest`. Falls back to
/// copy-then-delete across filesystems.
pub(crate) fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(source, dest) {
        Ok(()) => {
            info!(from = %source.display(), to = %dest.display(), "file moved");
            Ok(())
        }
        Err(rename_err) => {
            warn!(error = %rename_err, "rename failed, trying copy");
            fs::copy(source, dest)?;
            fs::remove_file(source)?;
            info!(from = %source.display(), to = %dest.display(), "file moved (copied)");
            Ok(())
        }
    }
}

/// Moves everything under `source` into `dest`, merging with what is already
/// there, then removes the emptied `source` tree.
pub(crate) fn move_tree(source: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        let target = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            move_tree(&entry.path(), &target)?;
        } else {
            move_file(&entry.path(), &target)?;
        }
    }
    fs::remove_dir_all(source)
}

pub(crate) fn is_empty_dir(path: &Path) -> io::Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}
