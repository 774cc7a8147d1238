//! Profile mirrors: passive stores answering `GET <base><public key>`.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MIRRORS: [&str; 3] = [
    "https://mainsail-s3-cli-test.s3.amazonaws.com/",
    "https://fra1.digitaloceanspaces.com/mainsail-do-cli-test/",
    "https://publickeyregistry.blob.core.windows.net/mainsail-az-cli-test/",
];

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("mainsail/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MirrorError {
    #[error("mirror unreachable: {0}")]
    Unreachable(String),
    #[error("mirror answered with status {0}")]
    Status(u16),
    #[error("no profile for this key")]
    NotFound,
    #[error("mirror timed out")]
    Timeout,
}

#[async_trait]
pub trait ProfileMirror: Send + Sync {
    fn name(&self) -> &str;

    /// The raw response body for `public_key`.
    async fn fetch(&self, public_key: &str) -> Result<String, MirrorError>;
}

// ── HTTP ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct HttpMirror {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMirror {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl ProfileMirror for HttpMirror {
    fn name(&self) -> &str {
        &self.base_url
    }

    async fn fetch(&self, public_key: &str) -> Result<String, MirrorError> {
        let url = format!("{}{}", self.base_url, public_key);
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| MirrorError::Unreachable(e.to_string()))?;
        let status = res.status();
        if !status.is_success() {
            return Err(MirrorError::Status(status.as_u16()));
        }
        res.text()
            .await
            .map_err(|e| MirrorError::Unreachable(e.to_string()))
    }
}

/// One HTTP mirror per base URL, sharing a client.
pub fn http_mirrors<S: AsRef<str>>(
    base_urls: &[S],
) -> Result<Vec<Arc<dyn ProfileMirror>>, MirrorError> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| MirrorError::Unreachable(e.to_string()))?;
    Ok(base_urls
        .iter()
        .map(|url| {
            Arc::new(HttpMirror::new(client.clone(), url.as_ref())) as Arc<dyn ProfileMirror>
        })
        .collect())
}

/// `MAINSAIL_MIRRORS` (comma separated) or the three default mirrors.
pub fn mirror_urls_from_env() -> Vec<String> {
    match std::env::var("MAINSAIL_MIRRORS") {
        Ok(list) if !list.trim().is_empty() => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .collect(),
        _ => DEFAULT_MIRRORS.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn mirror_timeout_from_env() -> Duration {
    std::env::var("MAINSAIL_MIRROR_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_TIMEOUT)
}

// ── Directory ───────────────────────────────────────────────────────────────

/// A local folder holding one file per public key, named by the key text.
/// Used for offline review and testing.
#[derive(Debug, Clone)]
pub struct DirectoryMirror {
    name: String,
    dir: PathBuf,
}

impl DirectoryMirror {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            name: dir.display().to_string(),
            dir,
        }
    }
}

fn is_key_text(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'='))
}

#[async_trait]
impl ProfileMirror for DirectoryMirror {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, public_key: &str) -> Result<String, MirrorError> {
        if !is_key_text(public_key) {
            return Err(MirrorError::NotFound);
        }
        match tokio::fs::read_to_string(self.dir.join(public_key)).await {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(MirrorError::NotFound),
            Err(e) => Err(MirrorError::Unreachable(e.to_string())),
        }
    }
}
