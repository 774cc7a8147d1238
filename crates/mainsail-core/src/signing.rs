//! Ed25519 key material, signing and verification.
//!
//! The only persisted state is the 32-byte seed, stored as URL-safe base64
//! text in whichever secret backend the primary config names. Persistence
//! always goes through [`ConfigStore`], which refuses to overwrite.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::bundle::{self, decode_b64, encode_b64, Bundle};
use crate::config::ConfigStore;
use crate::error::{Error, Result};

// ── Key material ────────────────────────────────────────────────────────────

#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    seed: [u8; 32],
    #[zeroize(skip)]
    public_key: [u8; 32],
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("public_key", &self.public_key_text())
            .field("seed", &"<redacted>")
            .finish()
    }
}

impl KeyMaterial {
    /// Fresh random seed. Nothing is persisted.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_seed(signing_key.to_bytes())
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        let public_key = SigningKey::from_bytes(&seed).verifying_key().to_bytes();
        Self { seed, public_key }
    }

    /// Decodes the stored text form of a seed.
    pub fn from_text(text: &str) -> Result<Self> {
        let bytes = Zeroizing::new(decode_b64(text.trim())?);
        let seed: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            Error::InvalidKeyMaterial(format!("seed must be 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self::from_seed(seed))
    }

    pub fn to_text(&self) -> Zeroizing<String> {
        Zeroizing::new(encode_b64(&self.seed))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.public_key
    }

    /// The 44-character text form embedded in bundles and used as the
    /// mirror lookup key.
    pub fn public_key_text(&self) -> String {
        encode_b64(&self.public_key)
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from_bytes(&self.seed)
    }

    pub fn sign(&self, message: &[u8]) -> Bundle {
        let signature = self.signing_key().sign(message);
        Bundle {
            signature: encode_b64(&signature.to_bytes()),
            public_key: self.public_key_text(),
            message: message.to_vec(),
        }
    }

    pub fn sign_file(&self, document: &Path) -> Result<Bundle> {
        let message = fs::read(document).map_err(|e| match e.kind() {
            ErrorKind::NotFound => Error::FileNotFound(document.to_path_buf()),
            _ => Error::Io(e),
        })?;
        Ok(self.sign(&message))
    }

    /// Signs `document` and writes `<name>.edbdl` into `out_dir`, or next to
    /// the document when `out_dir` is `None`.
    pub fn write_bundle(&self, document: &Path, out_dir: Option<&Path>) -> Result<PathBuf> {
        let bundle = self.sign_file(document)?;
        let target = match (out_dir, document.file_name()) {
            (Some(dir), Some(name)) => bundle::bundle_path_for(&dir.join(name)),
            _ => bundle::bundle_path_for(document),
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bundle.encode()?)?;
        info!(path = %target.display(), "bundle written");
        Ok(target)
    }
}

// ── Verification ────────────────────────────────────────────────────────────

/// True iff the embedded signature is valid for the message under the
/// embedded public key. Undecodable keys or signatures are just `false`.
pub fn verify(bundle: &Bundle) -> bool {
    let Ok(pk) = bundle.public_key_bytes() else {
        return false;
    };
    let Ok(sig) = bundle.signature_bytes() else {
        return false;
    };
    let Ok(pk): std::result::Result<[u8; 32], _> = pk.as_slice().try_into() else {
        return false;
    };
    let Ok(sig): std::result::Result<[u8; 64], _> = sig.as_slice().try_into() else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&pk) else {
        return false;
    };
    key.verify_strict(&bundle.message, &Signature::from_bytes(&sig))
        .is_ok()
}

/// Reads a bundle file and verifies it. Malformed files are errors; bad
/// signatures are `Ok(false)`.
pub fn verify_file(path: &Path) -> Result<bool> {
    Ok(verify(&bundle::read_bundle(path)?))
}

// ── Persistence ─────────────────────────────────────────────────────────────

/// Stores the seed at the configured location. Fails with
/// [`Error::AlreadyExists`] instead of replacing a stored key.
pub fn save_key(store: &ConfigStore, key: &KeyMaterial) -> Result<()> {
    store.store_secret(&key.to_text())?;
    info!(location = %store.secret_location(), "signing key saved");
    Ok(())
}

pub fn load_key(store: &ConfigStore) -> Result<KeyMaterial> {
    let text = store.read_secret()?;
    KeyMaterial::from_text(&text)
}

pub fn generate_and_save_key(store: &ConfigStore) -> Result<KeyMaterial> {
    let key = KeyMaterial::generate();
    save_key(store, &key)?;
    Ok(key)
}
