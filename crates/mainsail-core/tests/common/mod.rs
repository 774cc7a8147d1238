#![allow(dead_code)]

use async_trait::async_trait;
use mainsail_core::config::{ConfigRecord, FolderLayout};
use mainsail_core::mirror::{MirrorError, ProfileMirror};
use mainsail_core::paths::AppPaths;
use mainsail_core::secret::{
    BackendKind, BackendProvider, SecretBackend, SecretError, SecretLocator, SecretString,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use zeroize::Zeroizing;

// ─── In-memory secret stores ────────────────────────────────────────────────

#[derive(Default)]
struct Slots {
    secrets: HashMap<SecretLocator, String>,
    unavailable: HashSet<SecretLocator>,
}

/// Every locator maps to its own slot; nothing touches the OS.
#[derive(Clone, Default)]
pub struct MemoryBackends {
    slots: Arc<Mutex<Slots>>,
}

impl MemoryBackends {
    pub fn put(&self, locator: &SecretLocator, secret: &str) {
        self.slots
            .lock()
            .secrets
            .insert(locator.clone(), secret.to_string());
    }

    pub fn get(&self, locator: &SecretLocator) -> Option<String> {
        self.slots.lock().secrets.get(locator).cloned()
    }

    pub fn occupied(&self) -> Vec<SecretLocator> {
        self.slots.lock().secrets.keys().cloned().collect()
    }

    pub fn set_unavailable(&self, locator: &SecretLocator, unavailable: bool) {
        let mut slots = self.slots.lock();
        if unavailable {
            slots.unavailable.insert(locator.clone());
        } else {
            slots.unavailable.remove(locator);
        }
    }
}

struct MemorySlot {
    locator: SecretLocator,
    slots: Arc<Mutex<Slots>>,
}

impl MemorySlot {
    fn check(&self, slots: &Slots) -> Result<(), SecretError> {
        if slots.unavailable.contains(&self.locator) {
            return Err(SecretError::BackendUnavailable(self.locator.to_string()));
        }
        Ok(())
    }
}

impl SecretBackend for MemorySlot {
    fn exists(&self) -> Result<bool, SecretError> {
        let slots = self.slots.lock();
        self.check(&slots)?;
        Ok(slots.secrets.contains_key(&self.locator))
    }

    fn read(&self) -> Result<SecretString, SecretError> {
        let slots = self.slots.lock();
        self.check(&slots)?;
        slots
            .secrets
            .get(&self.locator)
            .map(|s| Zeroizing::new(s.clone()))
            .ok_or_else(|| SecretError::NotFound(self.locator.to_string()))
    }

    fn write(&self, secret: &str) -> Result<(), SecretError> {
        let mut slots = self.slots.lock();
        self.check(&slots)?;
        if slots.secrets.contains_key(&self.locator) {
            return Err(SecretError::AlreadyExists(self.locator.to_string()));
        }
        slots
            .secrets
            .insert(self.locator.clone(), secret.to_string());
        Ok(())
    }

    fn delete(&self) -> Result<(), SecretError> {
        let mut slots = self.slots.lock();
        self.check(&slots)?;
        slots
            .secrets
            .remove(&self.locator)
            .map(|_| ())
            .ok_or_else(|| SecretError::NotFound(self.locator.to_string()))
    }
}

impl BackendProvider for MemoryBackends {
    fn backend(&self, locator: &SecretLocator) -> Box<dyn SecretBackend> {
        Box::new(MemorySlot {
            locator: locator.clone(),
            slots: Arc::clone(&self.slots),
        })
    }

    fn supports(&self, _kind: BackendKind) -> bool {
        true
    }

    fn keychain_exists(&self, name: &str) -> bool {
        !name.trim().is_empty()
    }
}

// ─── Config helpers ─────────────────────────────────────────────────────────

pub fn app_paths(root: &Path) -> AppPaths {
    AppPaths::new(root.join("project"), root.join("home"))
}

pub fn record(layout: FolderLayout, locator: SecretLocator) -> ConfigRecord {
    let mut r = ConfigRecord::platform_default();
    r.folders_location = layout;
    r.secret = locator;
    r
}

pub fn write_configs(paths: &AppPaths, primary: &ConfigRecord, backup: &ConfigRecord) {
    fs::create_dir_all(paths.config_dir()).unwrap();
    fs::write(paths.primary_config(), primary.to_toml().unwrap()).unwrap();
    fs::write(paths.backup_config(), backup.to_toml().unwrap()).unwrap();
}

pub fn read_record(path: &Path) -> ConfigRecord {
    ConfigRecord::from_toml(&fs::read_to_string(path).unwrap()).unwrap()
}

// ─── Mirrors ────────────────────────────────────────────────────────────────

pub enum Canned {
    Body(String),
    Fail(MirrorError),
    Hang,
}

/// A mirror answering the same thing for every key.
pub struct CannedMirror {
    name: String,
    answer: Canned,
}

impl CannedMirror {
    pub fn arc(name: &str, answer: Canned) -> Arc<dyn ProfileMirror> {
        Arc::new(Self {
            name: name.to_string(),
            answer,
        })
    }
}

#[async_trait]
impl ProfileMirror for CannedMirror {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _public_key: &str) -> Result<String, MirrorError> {
        match &self.answer {
            Canned::Body(text) => Ok(text.clone()),
            Canned::Fail(e) => Err(e.clone()),
            Canned::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(MirrorError::Timeout)
            }
        }
    }
}
