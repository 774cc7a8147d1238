//! Signed bundle layout.
//!
//! ```text
//! [ header (920 bytes) | message | 32 x NUL ]
//! ```
//!
//! The header is two box-drawn blocks holding the base64 signature and
//! public key. Only the field offsets matter for decoding; they are derived
//! once from the template and are the same for every bundle. The NUL suffix
//! makes editors and git treat the file as binary.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use std::fs;
use std::io::ErrorKind;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Error, Result};

pub const BUNDLE_SUFFIX: &str = "edbdl";
pub const SIGNATURE_SUFFIX: &str = "sig";

/// Length of a base64 Ed25519 signature (64 bytes).
pub const SIGNATURE_TEXT_LEN: usize = 88;
/// Length of a base64 Ed25519 public key (32 bytes).
pub const PUBLIC_KEY_TEXT_LEN: usize = 44;
pub const PADDING_LEN: usize = 32;

const PAD_BYTE: u8 = 0x00;

/// Byte positions inside the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderLayout {
    pub len: usize,
    pub signature: Range<usize>,
    pub public_key: Range<usize>,
}

fn render_header(signature: &str, public_key: &str) -> (String, HeaderLayout) {
    let sig_top = format!("╔{} SIGNATURE {}╗\n", "═".repeat(38), "═".repeat(39));
    let sig_mid = format!("║{signature}║\n");
    let sig_bottom = format!("╚{}╝\n", "═".repeat(SIGNATURE_TEXT_LEN));
    let pk_top = format!("╔{} PUBLIC KEY {}╗\n", "═".repeat(16), "═".repeat(16));
    let pk_mid = format!("║{public_key}║\n");
    let pk_bottom = format!("╚{}╝\n", "═".repeat(PUBLIC_KEY_TEXT_LEN));

    let side = "║".len();
    let sig_start = sig_top.len() + side;
    let pk_start = sig_top.len() + sig_mid.len() + sig_bottom.len() + pk_top.len() + side;

    let header = [sig_top, sig_mid, sig_bottom, pk_top, pk_mid, pk_bottom].concat();
    let layout = HeaderLayout {
        len: header.len(),
        signature: sig_start..sig_start + signature.len(),
        public_key: pk_start..pk_start + public_key.len(),
    };
    (header, layout)
}

/// Offsets of the template, computed once.
pub fn header_layout() -> &'static HeaderLayout {
    static LAYOUT: OnceLock<HeaderLayout> = OnceLock::new();
    LAYOUT.get_or_init(|| {
        let sig = "a".repeat(SIGNATURE_TEXT_LEN);
        let pk = "b".repeat(PUBLIC_KEY_TEXT_LEN);
        render_header(&sig, &pk).1
    })
}

pub fn encode_b64(bytes: &[u8]) -> String {
    URL_SAFE.encode(bytes)
}

pub fn decode_b64(text: &str) -> Result<Vec<u8>> {
    URL_SAFE
        .decode(text)
        .map_err(|e| Error::InvalidKeyMaterial(format!("bad base64: {e}")))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub signature: String,
    pub public_key: String,
    pub message: Vec<u8>,
}

impl Bundle {
    pub fn encode(&self) -> Result<Vec<u8>> {
        check_field("signature", &self.signature, SIGNATURE_TEXT_LEN)?;
        check_field("public key", &self.public_key, PUBLIC_KEY_TEXT_LEN)?;
        let (header, layout) = render_header(&self.signature, &self.public_key);
        debug_assert_eq!(&layout, header_layout());

        let mut out = Vec::with_capacity(header.len() + self.message.len() + PADDING_LEN);
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.message);
        out.extend_from_slice(&[PAD_BYTE; PADDING_LEN]);
        Ok(out)
    }

    /// Pure offset arithmetic; the framing bytes are never inspected. Short
    /// input, a damaged NUL suffix, or non-text fields are reported as
    /// [`Error::MalformedBundle`].
    ///
    /// A message that itself ends in NUL bytes can lose some of them to
    /// truncation without the suffix check noticing. The shortened message
    /// then fails signature verification.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let layout = header_layout();
        let min = layout.len + PADDING_LEN;
        if bytes.len() < min {
            return Err(Error::malformed(format!(
                "{} bytes, at least {min} expected",
                bytes.len()
            )));
        }
        let body_end = bytes.len() - PADDING_LEN;
        if bytes[body_end..].iter().any(|b| *b != PAD_BYTE) {
            return Err(Error::malformed("padding suffix is damaged or truncated"));
        }
        let signature = field_text(bytes, &layout.signature, "signature")?;
        let public_key = field_text(bytes, &layout.public_key, "public key")?;
        Ok(Self {
            signature,
            public_key,
            message: bytes[layout.len..body_end].to_vec(),
        })
    }

    pub fn signature_bytes(&self) -> Result<Vec<u8>> {
        decode_b64(&self.signature)
    }

    pub fn public_key_bytes(&self) -> Result<Vec<u8>> {
        decode_b64(&self.public_key)
    }
}

fn check_field(name: &str, text: &str, len: usize) -> Result<()> {
    if text.len() != len || !text.is_ascii() {
        return Err(Error::InvalidKeyMaterial(format!(
            "{name} must be {len} ASCII characters, got {}",
            text.len()
        )));
    }
    Ok(())
}

fn field_text(bytes: &[u8], range: &Range<usize>, name: &str) -> Result<String> {
    std::str::from_utf8(&bytes[range.clone()])
        .map(str::to_owned)
        .map_err(|_| Error::malformed(format!("{name} field is not text")))
}

/// Reads and decodes a `.edbdl` file.
pub fn read_bundle(path: &Path) -> Result<Bundle> {
    if !is_bundle_path(path) {
        return Err(Error::malformed(format!(
            "{} does not have the .{BUNDLE_SUFFIX} extension",
            path.display()
        )));
    }
    let bytes = fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })?;
    Bundle::decode(&bytes)
}

pub fn is_bundle_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == BUNDLE_SUFFIX)
}

/// `report.pdf` -> `report.pdf.edbdl`
pub fn bundle_path_for(document: &Path) -> PathBuf {
    let mut name = document.as_os_str().to_owned();
    name.push(".");
    name.push(BUNDLE_SUFFIX);
    PathBuf::from(name)
}

/// `report.pdf.edbdl` -> `report.pdf`
pub fn document_path_for(bundle: &Path) -> Option<PathBuf> {
    if !is_bundle_path(bundle) {
        return None;
    }
    let stem = bundle.file_stem()?;
    Some(bundle.with_file_name(stem))
}

/// `report.pdf` -> `report.sig`
pub fn detached_signature_path(document: &Path) -> PathBuf {
    document.with_extension(SIGNATURE_SUFFIX)
}
