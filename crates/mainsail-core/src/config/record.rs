use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::secret::{BackendKind, SecretLocator};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FolderLayout {
    Desktop,
    Documents,
    #[serde(rename = "project_home")]
    ProjectHome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MathRendering {
    MathJax3,
    KaTeX,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GitVisibility {
    Hidden,
    Visible,
}

/// On-disk shape. Both locator fields are always written; only the one
/// selected by `key_management_strategy` carries a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawConfig {
    folders_location: FolderLayout,
    math_rendering: MathRendering,
    git_extensions: GitVisibility,
    key_management_strategy: BackendKind,
    #[serde(default)]
    keychain_name: String,
    #[serde(default)]
    key_dir_string: String,
}

/// One configuration record (primary or backup).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConfig", into = "RawConfig")]
pub struct ConfigRecord {
    pub folders_location: FolderLayout,
    pub math_rendering: MathRendering,
    pub git_extensions: GitVisibility,
    pub secret: SecretLocator,
}

impl TryFrom<RawConfig> for ConfigRecord {
    type Error = String;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let secret = match raw.key_management_strategy {
            BackendKind::Keychain => {
                if raw.keychain_name.trim().is_empty() {
                    return Err("keychain_name is empty".into());
                }
                SecretLocator::Keychain {
                    name: raw.keychain_name,
                }
            }
            BackendKind::CredentialLocker => SecretLocator::CredentialLocker,
            BackendKind::Filesystem => {
                if raw.key_dir_string.trim().is_empty() {
                    return Err("key_dir_string is empty".into());
                }
                SecretLocator::Filesystem {
                    dir: PathBuf::from(raw.key_dir_string),
                }
            }
        };
        Ok(Self {
            folders_location: raw.folders_location,
            math_rendering: raw.math_rendering,
            git_extensions: raw.git_extensions,
            secret,
        })
    }
}

impl From<ConfigRecord> for RawConfig {
    fn from(record: ConfigRecord) -> Self {
        let key_management_strategy = record.secret.kind();
        let (keychain_name, key_dir_string) = match record.secret {
            SecretLocator::Keychain { name } => (name, String::new()),
            SecretLocator::CredentialLocker => (String::new(), String::new()),
            SecretLocator::Filesystem { dir } => (String::new(), dir.display().to_string()),
        };
        Self {
            folders_location: record.folders_location,
            math_rendering: record.math_rendering,
            git_extensions: record.git_extensions,
            key_management_strategy,
            keychain_name,
            key_dir_string,
        }
    }
}

impl ConfigRecord {
    /// The record written on first run or when a file has to be replaced.
    pub fn platform_default() -> Self {
        let secret = if cfg!(target_os = "macos") {
            SecretLocator::Keychain {
                name: "login".to_string(),
            }
        } else {
            SecretLocator::CredentialLocker
        };
        Self {
            folders_location: FolderLayout::Desktop,
            math_rendering: MathRendering::MathJax3,
            git_extensions: GitVisibility::Hidden,
            secret,
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string(self)
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_existing_file_format() {
        let text = r#"
folders_location = "Documents"
math_rendering = "KaTeX"
git_extensions = "Visible"
key_management_strategy = "Filesystem"
keychain_name = ""
key_dir_string = "/Volumes/KEYS"
"#;
        let record = ConfigRecord::from_toml(text).unwrap();
        assert_eq!(record.folders_location, FolderLayout::Documents);
        assert_eq!(record.math_rendering, MathRendering::KaTeX);
        assert_eq!(
            record.secret,
            SecretLocator::Filesystem {
                dir: PathBuf::from("/Volumes/KEYS")
            }
        );
    }

    #[test]
    fn locker_is_spelled_as_on_disk() {
        let mut record = ConfigRecord::platform_default();
        record.secret = SecretLocator::CredentialLocker;
        let text = record.to_toml().unwrap();
        assert!(text.contains(r#"key_management_strategy = "Locker""#));
        assert!(text.contains(r#"key_dir_string = """#));
        assert_eq!(ConfigRecord::from_toml(&text).unwrap(), record);
    }

    #[test]
    fn rejects_values_outside_the_fixed_sets() {
        let text = r#"
folders_location = "Downloads"
math_rendering = "MathJax3"
git_extensions = "Hidden"
key_management_strategy = "Locker"
keychain_name = ""
key_dir_string = ""
"#;
        assert!(ConfigRecord::from_toml(text).is_err());
    }

    #[test]
    fn filesystem_without_directory_is_rejected() {
        let text = r#"
folders_location = "Desktop"
math_rendering = "MathJax3"
git_extensions = "Hidden"
key_management_strategy = "Filesystem"
keychain_name = "login"
key_dir_string = ""
"#;
        assert!(ConfigRecord::from_toml(text).is_err());
    }

    #[test]
    fn project_home_layout_name() {
        let mut record = ConfigRecord::platform_default();
        record.folders_location = FolderLayout::ProjectHome;
        assert!(record
            .to_toml()
            .unwrap()
            .contains(r#"folders_location = "project_home""#));
    }
}
