//! Signer profiles as served by the mirrors, and the local trust store.
//!
//! A profile is kept as the full TOML table it was served as. Fields this
//! crate does not know about still take part in equality, so a mirror adding
//! or changing anything shows up as a changed profile.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use toml::{Table, Value};

use crate::error::{Error, Result};
use crate::fsutil;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(Table);

impl Profile {
    pub fn new(
        name: &str,
        location: &str,
        affiliation: &str,
        active: bool,
        last_verified: NaiveDate,
    ) -> Self {
        let mut table = Table::new();
        for (field, value) in [
            ("Name", name),
            ("Location", location),
            ("Affiliation", affiliation),
        ] {
            let mut inner = Table::new();
            inner.insert("Value".into(), Value::String(value.into()));
            table.insert(field.into(), Value::Table(inner));
        }
        let mut key = Table::new();
        key.insert("Active".into(), Value::Boolean(active));
        key.insert(
            "Last_verification_date".into(),
            Value::String(last_verified.format("%Y-%m-%d").to_string()),
        );
        table.insert("Public_key".into(), Value::Table(key));
        Self(table)
    }

    /// Parses a served profile. `Public_key.Active` has to be a boolean;
    /// everything else is optional.
    pub fn parse(text: &str) -> Result<Self> {
        let table: Table =
            toml::from_str(text).map_err(|e| Error::MalformedProfile(e.message().to_string()))?;
        let profile = Self(table);
        match profile.public_key_field("Active") {
            Some(Value::Boolean(_)) => Ok(profile),
            Some(_) => Err(Error::MalformedProfile(
                "Public_key.Active is not a boolean".into(),
            )),
            None => Err(Error::MalformedProfile("missing Public_key.Active".into())),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string(&self.0)?)
    }

    pub fn as_table(&self) -> &Table {
        &self.0
    }

    fn value_of(&self, field: &str) -> Option<&str> {
        self.0.get(field)?.get("Value")?.as_str()
    }

    fn public_key_field(&self, field: &str) -> Option<&Value> {
        self.0.get("Public_key")?.get(field)
    }

    pub fn name(&self) -> Option<&str> {
        self.value_of("Name")
    }

    pub fn location(&self) -> Option<&str> {
        self.value_of("Location")
    }

    pub fn affiliation(&self) -> Option<&str> {
        self.value_of("Affiliation")
    }

    pub fn is_active(&self) -> bool {
        matches!(self.public_key_field("Active"), Some(Value::Boolean(true)))
    }

    /// Accepts `YYYY-MM-DD`, `YYYY/MM/DD` and native TOML dates.
    pub fn last_verification_date(&self) -> Option<NaiveDate> {
        match self.public_key_field("Last_verification_date")? {
            Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .or_else(|_| NaiveDate::parse_from_str(s, "%Y/%m/%d"))
                .ok(),
            Value::Datetime(dt) => {
                let date = dt.date?;
                NaiveDate::from_ymd_opt(date.year.into(), date.month.into(), date.day.into())
            }
            _ => None,
        }
    }
}

/// Public key text to the profile the user approved for it.
pub type TrustedKeys = BTreeMap<String, Profile>;

/// `trusted_keys.toml`. Callers serialize access through the config store.
#[derive(Debug, Clone)]
pub struct TrustStore {
    path: PathBuf,
}

impl TrustStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty store. A file that does not parse is an
    /// error; it is never silently replaced.
    pub fn load(&self) -> Result<TrustedKeys> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(TrustedKeys::new()),
            Err(e) => {
                return Err(Error::TrustStoreCorrupted {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
        };
        toml::from_str(&text).map_err(|e| Error::TrustStoreCorrupted {
            path: self.path.clone(),
            reason: e.message().to_string(),
        })
    }

    pub fn save(&self, keys: &TrustedKeys) -> Result<()> {
        let text = toml::to_string(keys)?;
        fsutil::write_atomic(&self.path, text.as_bytes(), false)?;
        tracing::debug!(path = %self.path.display(), entries = keys.len(), "trust store saved");
        Ok(())
    }

    pub fn get(&self, public_key: &str) -> Result<Option<Profile>> {
        Ok(self.load()?.remove(public_key))
    }

    pub fn insert(&self, public_key: &str, profile: Profile) -> Result<()> {
        let mut keys = self.load()?;
        keys.insert(public_key.to_string(), profile);
        self.save(&keys)
    }

    /// Returns whether an entry was removed.
    pub fn remove(&self, public_key: &str) -> Result<bool> {
        let mut keys = self.load()?;
        if keys.remove(public_key).is_none() {
            return Ok(false);
        }
        self.save(&keys)?;
        Ok(true)
    }
}
