//! Ed25519 signatures over manifest fingerprints, and the trust store
//! they verify against.
//!
//! A signature is written `<keyid>:<base64 signature bytes>`; verifying
//! keys use the same shape, `<keyid>:<base64 public key>`, one per file
//! under `R/keys/<keyid>.pub`.

use data_encoding::BASE64;
use ed25519_dalek::{PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use std::fmt::{self, Display};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use crate::error::Error;
use crate::manifest::Manifest;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("missing ':' separator")]
    MissingSeparator,
    #[error("invalid key id {0:?}")]
    InvalidName(String),
    #[error("invalid signature length: {0}")]
    InvalidSignatureLen(usize),
    #[error("invalid verifying key length: {0}")]
    InvalidVerifyingKeyLen(usize),
    #[error("unable to base64-decode {0:?}")]
    DecodeError(String),
    #[error("verifying key rejected: {0}")]
    InvalidVerifyingKey(ed25519_dalek::SignatureError),
}

fn validate_key_id(name: &str) -> Result<(), SignatureError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.' || c == '_')
    {
        return Err(SignatureError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// A detached signature: the id of the signing key plus 64 signature
/// bytes.
#[derive(Clone, Debug)]
pub struct Signature {
    key_id: String,
    bytes: [u8; SIGNATURE_LENGTH],
}

impl Signature {
    pub fn parse(input: &str) -> Result<Self, SignatureError> {
        let (key_id, bytes64) = input
            .split_once(':')
            .ok_or(SignatureError::MissingSeparator)?;
        validate_key_id(key_id)?;

        if bytes64.len() != BASE64.encode_len(SIGNATURE_LENGTH) {
            return Err(SignatureError::InvalidSignatureLen(bytes64.len()));
        }

        let mut buf = vec![0; BASE64.decode_len(bytes64.len()).unwrap()];
        let mut bytes = [0; SIGNATURE_LENGTH];
        match BASE64.decode_mut(bytes64.as_bytes(), &mut buf) {
            Ok(SIGNATURE_LENGTH) => bytes.copy_from_slice(&buf[..SIGNATURE_LENGTH]),
            Ok(_) => unreachable!(),
            // keeping DecodePartial gets annoying lifetime-wise
            Err(_) => return Err(SignatureError::DecodeError(input.to_string())),
        }

        Ok(Self {
            key_id: key_id.to_string(),
            bytes,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn bytes(&self) -> &[u8; SIGNATURE_LENGTH] {
        &self.bytes
    }
}

impl Display for Signature {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        write!(w, "{}:{}", self.key_id, BASE64.encode(&self.bytes))
    }
}

/// A named ed25519 verifying key from the trust store.
#[derive(Clone, Debug)]
pub struct VerifyingKey {
    key_id: String,
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl VerifyingKey {
    pub fn parse(input: &str) -> Result<Self, SignatureError> {
        let (key_id, bytes64) = input
            .split_once(':')
            .ok_or(SignatureError::MissingSeparator)?;
        validate_key_id(key_id)?;

        if bytes64.len() != BASE64.encode_len(PUBLIC_KEY_LENGTH) {
            return Err(SignatureError::InvalidVerifyingKeyLen(bytes64.len()));
        }

        let mut buf = vec![0; BASE64.decode_len(bytes64.len()).unwrap()];
        let mut bytes = [0; PUBLIC_KEY_LENGTH];
        match BASE64.decode_mut(bytes64.as_bytes(), &mut buf) {
            Ok(PUBLIC_KEY_LENGTH) => bytes.copy_from_slice(&buf[..PUBLIC_KEY_LENGTH]),
            Ok(_) => unreachable!(),
            Err(_) => return Err(SignatureError::DecodeError(input.to_string())),
        }

        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&bytes)
            .map_err(SignatureError::InvalidVerifyingKey)?;

        Ok(Self {
            key_id: key_id.to_string(),
            verifying_key,
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Check that `signature` was made over `message` by this key. The
    /// key id in the signature has to match as well.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        if self.key_id != signature.key_id {
            return false;
        }

        let sig = ed25519_dalek::Signature::from_bytes(signature.bytes());
        self.verifying_key.verify_strict(message, &sig).is_ok()
    }
}

impl Display for VerifyingKey {
    fn fmt(&self, w: &mut fmt::Formatter) -> fmt::Result {
        write!(
            w,
            "{}:{}",
            self.key_id,
            BASE64.encode(self.verifying_key.as_bytes())
        )
    }
}

/// Load every `*.pub` file from the trust store directory. A missing
/// directory is an empty trust store, not an error.
pub fn load_trust_store(dir: &Path) -> Result<Vec<VerifyingKey>, Error> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::internal(format!("unable to read {}", dir.display()), e)),
    };

    let mut keys = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| Error::internal(format!("unable to read {}", dir.display()), e))?;
        let path = entry.path();
        if path.extension().map_or(true, |ext| ext != "pub") {
            continue;
        }

        let text = fs::read_to_string(&path)
            .map_err(|e| Error::internal(format!("unable to read {}", path.display()), e))?;
        let key = VerifyingKey::parse(text.trim()).map_err(|e| {
            Error::SignatureInvalid(format!("unusable trust key {}: {e}", path.display()))
        })?;
        keys.push(key);
    }

    Ok(keys)
}

/// Enforce the signature policy for one manifest.
///
/// With at least one trusted key, the manifest must carry a signature by
/// one of them over its fingerprint. An empty trust store downgrades to
/// the digest-only gate, loudly.
pub fn verify_manifest(manifest: &Manifest, keys: &[VerifyingKey]) -> Result<(), Error> {
    if keys.is_empty() {
        warn!(id = %manifest.id, "trust store is empty, relying on digest verification alone");
        return Ok(());
    }

    let sig = manifest.sig.as_ref().ok_or_else(|| {
        Error::SignatureInvalid(format!("manifest for {} carries no signature", manifest.id))
    })?;

    let key = keys
        .iter()
        .find(|k| k.key_id() == sig.key_id())
        .ok_or_else(|| {
            Error::SignatureInvalid(format!(
                "manifest for {} is signed by unknown key {}",
                manifest.id,
                sig.key_id()
            ))
        })?;

    if !key.verify(manifest.fingerprint().as_bytes(), sig) {
        return Err(Error::SignatureInvalid(format!(
            "signature on manifest for {} does not verify against key {}",
            manifest.id,
            key.key_id()
        )));
    }

    Ok(())
}
