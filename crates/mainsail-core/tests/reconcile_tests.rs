//! Integration tests for configuration reconciliation and key persistence.
//!
//! Tests cover:
//!  1. First run creates matching defaults and folders
//!  2. Secret migration between locators
//!  3. Idempotence of a second run
//!  4. Recovery after an interrupted or deferred secret move
//!  5. Recovery after an interrupted folder move
//!  6. Corrupted records are preserved and replaced
//!  7. Key save refuses to overwrite
//!  8. Editing the primary record moves the key, under the store lock

mod common;

use common::{app_paths, read_record, record, write_configs, MemoryBackends};
use mainsail_core::config::{
    ConfigStore, FolderLayout, MathRendering, RecordStatus, SecretMove, SigningFolders,
};
use mainsail_core::secret::{SecretLocator, SystemBackends, SECRET_FILE_NAME};
use mainsail_core::{signing, Error};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn fs_locator(dir: &Path) -> SecretLocator {
    SecretLocator::Filesystem {
        dir: dir.to_path_buf(),
    }
}

// ─── 1: First run ───────────────────────────────────────────────────────────

#[test]
fn first_run_creates_defaults_and_folders() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let (store, report) = ConfigStore::open(paths.clone(), Arc::new(MemoryBackends::default())).unwrap();

    assert_eq!(report.load.primary, RecordStatus::Created);
    assert_eq!(report.load.backup, RecordStatus::Created);
    assert!(!report.backup_written);
    assert!(store.pair().is_converged());

    let folders = store.signing_folders();
    assert_eq!(folders.to_sign, dir.path().join("home/Desktop/to-sign"));
    for f in folders.all() {
        assert!(f.is_dir(), "{} missing", f.display());
    }
}

// ─── 2: Migration ───────────────────────────────────────────────────────────

#[test]
fn secret_moves_to_new_filesystem_location() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let old_keys = dir.path().join("usb-old");
    let new_keys = dir.path().join("usb-new");
    fs::create_dir_all(&old_keys).unwrap();
    fs::write(old_keys.join(SECRET_FILE_NAME), "seed-text").unwrap();

    write_configs(
        &paths,
        &record(FolderLayout::Desktop, fs_locator(&new_keys)),
        &record(FolderLayout::Desktop, fs_locator(&old_keys)),
    );

    let (store, report) = ConfigStore::open(paths.clone(), Arc::new(SystemBackends)).unwrap();
    assert_eq!(report.secret_move, SecretMove::MovedFromBackup);
    assert!(report.backup_written);
    assert!(!old_keys.join(SECRET_FILE_NAME).exists());
    assert_eq!(
        fs::read_to_string(new_keys.join(SECRET_FILE_NAME)).unwrap(),
        "seed-text"
    );
    assert_eq!(read_record(&paths.backup_config()), store.primary());
    assert!(fs::metadata(paths.backup_config()).unwrap().permissions().readonly());
}

#[test]
fn primary_copy_wins_when_both_locations_hold_a_secret() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let old = fs_locator(&dir.path().join("old"));
    let new = fs_locator(&dir.path().join("new"));
    let backends = MemoryBackends::default();
    backends.put(&old, "stale");
    backends.put(&new, "current");

    write_configs(
        &paths,
        &record(FolderLayout::Desktop, new.clone()),
        &record(FolderLayout::Desktop, old.clone()),
    );
    let (_, report) = ConfigStore::open(paths, Arc::new(backends.clone())).unwrap();

    assert_eq!(report.secret_move, SecretMove::DroppedBackupCopy);
    assert_eq!(backends.occupied(), vec![new.clone()]);
    assert_eq!(backends.get(&new).as_deref(), Some("current"));
}

#[test]
fn no_secret_anywhere_only_updates_backup() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    write_configs(
        &paths,
        &record(FolderLayout::Desktop, SecretLocator::CredentialLocker),
        &record(
            FolderLayout::Desktop,
            SecretLocator::Keychain {
                name: "work".into(),
            },
        ),
    );
    let backends = MemoryBackends::default();
    let (store, report) = ConfigStore::open(paths.clone(), Arc::new(backends.clone())).unwrap();

    assert_eq!(report.secret_move, SecretMove::None);
    assert!(report.backup_written);
    assert!(backends.occupied().is_empty());
    assert_eq!(read_record(&paths.backup_config()), store.primary());
}

// ─── 3: Idempotence ─────────────────────────────────────────────────────────

#[test]
fn second_run_writes_nothing() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let old = fs_locator(&dir.path().join("old"));
    let new = fs_locator(&dir.path().join("new"));
    let backends = MemoryBackends::default();
    backends.put(&old, "seed");

    let mut primary = record(FolderLayout::ProjectHome, new.clone());
    primary.math_rendering = MathRendering::KaTeX;
    write_configs(&paths, &primary, &record(FolderLayout::Desktop, old));

    let (store, first) = ConfigStore::open(paths.clone(), Arc::new(backends.clone())).unwrap();
    assert!(first.backup_written);

    let before = fs::read(paths.backup_config()).unwrap();
    let mtime = fs::metadata(paths.backup_config()).unwrap().modified().unwrap();

    let second = store.reconcile().unwrap();
    assert_eq!(second.secret_move, SecretMove::None);
    assert!(!second.folders_moved);
    assert!(!second.backup_written);
    assert_eq!(second.load.backup, RecordStatus::Loaded);
    assert_eq!(fs::read(paths.backup_config()).unwrap(), before);
    assert_eq!(
        fs::metadata(paths.backup_config()).unwrap().modified().unwrap(),
        mtime
    );
    assert!(store.pair().is_converged());
    assert_eq!(backends.get(&new).as_deref(), Some("seed"));
}

// ─── 4: Interrupted secret move ─────────────────────────────────────────────

#[test]
fn interrupted_secret_move_converges() {
    let dir = tempdir().unwrap();
    let old = fs_locator(&dir.path().join("old"));
    let new = fs_locator(&dir.path().join("new"));
    let primary = record(FolderLayout::Desktop, new.clone());
    let backup = record(FolderLayout::Desktop, old.clone());

    // Uninterrupted run for reference.
    let clean_root = dir.path().join("clean");
    let clean_paths = app_paths(&clean_root);
    let clean = MemoryBackends::default();
    clean.put(&old, "seed");
    write_configs(&clean_paths, &primary, &backup);
    ConfigStore::open(clean_paths.clone(), Arc::new(clean.clone())).unwrap();

    // Crash after the copy to the new location, before the old copy was
    // deleted and before the backup record was rewritten.
    let crashed_root = dir.path().join("crashed");
    let crashed_paths = app_paths(&crashed_root);
    let crashed = MemoryBackends::default();
    crashed.put(&old, "seed");
    crashed.put(&new, "seed");
    write_configs(&crashed_paths, &primary, &backup);
    let (_, report) = ConfigStore::open(crashed_paths.clone(), Arc::new(crashed.clone())).unwrap();

    assert_eq!(report.secret_move, SecretMove::DroppedBackupCopy);
    assert_eq!(crashed.occupied(), clean.occupied());
    assert_eq!(crashed.get(&new), clean.get(&new));
    assert_eq!(
        read_record(&crashed_paths.backup_config()),
        read_record(&clean_paths.backup_config())
    );
}

#[test]
fn unavailable_old_location_is_reported_and_retried_later() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let old = fs_locator(&dir.path().join("old"));
    let new = fs_locator(&dir.path().join("new"));
    let backends = MemoryBackends::default();
    backends.put(&old, "seed");
    backends.set_unavailable(&old, true);
    write_configs(
        &paths,
        &record(FolderLayout::Desktop, new.clone()),
        &record(FolderLayout::Desktop, old.clone()),
    );

    let err = ConfigStore::open(paths.clone(), Arc::new(backends.clone()))
        .err()
        .unwrap();
    assert!(matches!(err, Error::SecretBackend(_)));
    // backup record still points at the old location
    assert_eq!(read_record(&paths.backup_config()).secret, old);

    backends.set_unavailable(&old, false);
    let (_, report) = ConfigStore::open(paths, Arc::new(backends.clone())).unwrap();
    assert_eq!(report.secret_move, SecretMove::MovedFromBackup);
    assert_eq!(backends.occupied(), vec![new]);
}

#[test]
fn review_open_defers_move_from_unreachable_store() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let old = fs_locator(&dir.path().join("usb"));
    let new = fs_locator(&dir.path().join("new"));
    let backends = MemoryBackends::default();
    backends.put(&old, "seed");
    backends.set_unavailable(&old, true);
    write_configs(
        &paths,
        &record(FolderLayout::ProjectHome, new.clone()),
        &record(FolderLayout::Documents, old.clone()),
    );

    let (store, report) =
        ConfigStore::open_for_review(paths.clone(), Arc::new(backends.clone())).unwrap();
    assert_eq!(report.secret_move, SecretMove::Deferred);
    // everything except the secret converged
    assert!(report.backup_written);
    assert!(store.signing_folders().to_check.is_dir());
    let backup = read_record(&paths.backup_config());
    assert_eq!(backup.folders_location, FolderLayout::ProjectHome);
    assert_eq!(backup.secret, old);
    assert_eq!(backends.get(&old).as_deref(), Some("seed"));
    assert!(store.trusted().unwrap().is_empty());

    backends.set_unavailable(&old, false);
    let (store, report) = ConfigStore::open(paths, Arc::new(backends.clone())).unwrap();
    assert_eq!(report.secret_move, SecretMove::MovedFromBackup);
    assert!(store.pair().is_converged());
    assert_eq!(backends.occupied(), vec![new]);
}

#[test]
fn review_open_of_converged_pair_writes_nothing() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let loc = fs_locator(&dir.path().join("keys"));
    write_configs(
        &paths,
        &record(FolderLayout::ProjectHome, loc.clone()),
        &record(FolderLayout::ProjectHome, loc),
    );
    let (_, report) =
        ConfigStore::open_for_review(paths, Arc::new(MemoryBackends::default())).unwrap();
    assert_eq!(report.secret_move, SecretMove::None);
    assert!(!report.backup_written);
}

// ─── 5: Interrupted folder move ─────────────────────────────────────────────

#[test]
fn folders_follow_the_primary_layout() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let loc = SecretLocator::CredentialLocker;
    let old = SigningFolders::for_layout(FolderLayout::Documents, &paths);
    old.create_all().unwrap();
    fs::write(old.quarantined.join("x.txt.edbdl"), b"x").unwrap();
    fs::write(old.to_sign.join("draft.md"), b"d").unwrap();

    write_configs(
        &paths,
        &record(FolderLayout::ProjectHome, loc.clone()),
        &record(FolderLayout::Documents, loc),
    );
    let (store, report) =
        ConfigStore::open(paths.clone(), Arc::new(MemoryBackends::default())).unwrap();

    assert!(report.folders_moved);
    assert!(report.backup_written);
    let new = store.signing_folders();
    assert!(new.quarantined.join("x.txt.edbdl").is_file());
    assert!(new.to_sign.join("draft.md").is_file());
    assert!(!dir.path().join("home/Documents/_digital_signatures").exists());
}

#[test]
fn interrupted_folder_move_converges() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let loc = SecretLocator::CredentialLocker;

    // Folders already moved to the primary layout, backup record never
    // rewritten.
    let new = SigningFolders::for_layout(FolderLayout::ProjectHome, &paths);
    new.create_all().unwrap();
    fs::write(new.authenticated.join("ok.txt"), b"ok").unwrap();
    write_configs(
        &paths,
        &record(FolderLayout::ProjectHome, loc.clone()),
        &record(FolderLayout::Documents, loc),
    );

    let (store, report) =
        ConfigStore::open(paths.clone(), Arc::new(MemoryBackends::default())).unwrap();
    assert!(!report.folders_moved);
    assert!(report.backup_written);
    assert!(store.pair().is_converged());
    assert!(new.authenticated.join("ok.txt").is_file());
}

// ─── 6: Corrupted records ───────────────────────────────────────────────────

#[test]
fn corrupted_primary_is_preserved() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    fs::create_dir_all(paths.config_dir()).unwrap();
    fs::write(paths.primary_config(), "folders_location = \"Attic\"\n").unwrap();

    let (store, report) =
        ConfigStore::open(paths.clone(), Arc::new(MemoryBackends::default())).unwrap();
    let preserved = paths.config_dir().join("invalid_config.toml");
    match &report.load.primary {
        RecordStatus::Replaced { preserved: p, .. } => assert_eq!(p, &preserved),
        other => panic!("expected replacement, got {other:?}"),
    }
    assert_eq!(
        fs::read_to_string(&preserved).unwrap(),
        "folders_location = \"Attic\"\n"
    );
    assert_eq!(report.load.replaced().count(), 1);
    assert!(store.pair().is_converged());
}

// ─── 7: Save guard ──────────────────────────────────────────────────────────

#[test]
fn saving_a_second_key_is_refused() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let keys = fs_locator(&dir.path().join("keys"));
    write_configs(
        &paths,
        &record(FolderLayout::Desktop, keys.clone()),
        &record(FolderLayout::Desktop, keys.clone()),
    );
    let backends = MemoryBackends::default();
    let (store, _) = ConfigStore::open(paths, Arc::new(backends.clone())).unwrap();

    let first = signing::generate_and_save_key(&store).unwrap();
    let original = backends.get(&keys).unwrap();

    let err = signing::generate_and_save_key(&store).unwrap_err();
    assert!(matches!(err, Error::AlreadyExists));
    assert_eq!(backends.get(&keys).unwrap(), original);
    assert_eq!(
        signing::load_key(&store).unwrap().public_key(),
        first.public_key()
    );
}

// ─── 8: Editing the primary record ──────────────────────────────────────────

#[test]
fn update_primary_moves_key_and_folders() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let usb = dir.path().join("usb");
    let start = record(FolderLayout::Desktop, SecretLocator::CredentialLocker);
    write_configs(&paths, &start, &start);

    let backends = MemoryBackends::default();
    let (store, _) = ConfigStore::open(paths.clone(), Arc::new(backends.clone())).unwrap();
    let key = signing::generate_and_save_key(&store).unwrap();

    let edited = record(FolderLayout::Documents, fs_locator(&usb));
    let report = store.update_primary(edited.clone()).unwrap();

    assert_eq!(report.secret_move, SecretMove::MovedFromBackup);
    assert!(report.folders_moved);
    assert_eq!(store.primary(), edited);
    assert_eq!(read_record(&paths.backup_config()), edited);
    assert_eq!(backends.occupied(), vec![fs_locator(&usb)]);
    assert_eq!(
        signing::load_key(&store).unwrap().public_key(),
        key.public_key()
    );
    assert!(!dir.path().join("home/Desktop/to-sign").exists());
}

#[test]
fn rejected_edit_leaves_primary_file_alone() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let start = record(FolderLayout::Desktop, SecretLocator::CredentialLocker);
    write_configs(&paths, &start, &start);
    let (store, _) = ConfigStore::open(paths.clone(), Arc::new(MemoryBackends::default())).unwrap();

    let bad = record(
        FolderLayout::Documents,
        SecretLocator::Keychain { name: " ".into() },
    );
    assert!(matches!(
        store.update_primary(bad),
        Err(Error::InvalidConfig(_))
    ));
    assert_eq!(read_record(&paths.primary_config()), start);
    assert_eq!(store.primary(), start);
}

#[test]
fn edits_and_reconciles_from_many_threads_converge() {
    let dir = tempdir().unwrap();
    let paths = app_paths(dir.path());
    let start = record(FolderLayout::Desktop, SecretLocator::CredentialLocker);
    write_configs(&paths, &start, &start);
    let (store, _) = ConfigStore::open(paths.clone(), Arc::new(MemoryBackends::default())).unwrap();
    let store = Arc::new(store);

    let editor = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for layout in [
                FolderLayout::Documents,
                FolderLayout::ProjectHome,
                FolderLayout::Desktop,
                FolderLayout::ProjectHome,
            ] {
                store
                    .update_primary(record(layout, SecretLocator::CredentialLocker))
                    .unwrap();
            }
        })
    };
    let reconciler = {
        let store = Arc::clone(&store);
        std::thread::spawn(move || {
            for _ in 0..8 {
                store.reconcile().unwrap();
            }
        })
    };
    editor.join().unwrap();
    reconciler.join().unwrap();

    assert!(store.pair().is_converged());
    assert_eq!(store.primary().folders_location, FolderLayout::ProjectHome);
    assert_eq!(
        read_record(&paths.backup_config()),
        read_record(&paths.primary_config())
    );
    assert!(store.signing_folders().to_check.is_dir());
}
