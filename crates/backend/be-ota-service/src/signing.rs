//! Code signing of manifest and directive bodies.
//!
//! Signatures are RSASSA-PKCS1-v1_5 over SHA-256, computed on the exact bytes
//! sent as the part body, and carried as an RFC 8941 dictionary:
//! `sig="<base64>", keyid="<id>"`.

use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use rsa::{
    RsaPrivateKey,
    pkcs1::DecodeRsaPrivateKey,
    pkcs1v15::SigningKey,
    pkcs8::DecodePrivateKey,
    sha2::Sha256,
    signature::{SignatureEncoding, Signer},
};
use tracing::debug;

use crate::error::OtaError;

pub const DEFAULT_KEY_ID: &str = "main";

/// Deterministic PKCS#1 v1.5 signature of `payload`.
pub fn sign_rsa_sha256(payload: &[u8], key: &SigningKey<Sha256>) -> Result<Vec<u8>, OtaError> {
    let signature = key
        .try_sign(payload)
        .map_err(|e| OtaError::Signing(e.to_string()))?;
    Ok(signature.to_vec())
}

#[derive(Clone)]
pub struct ManifestSigner {
    key: SigningKey<Sha256>,
    key_id: String,
}

impl std::fmt::Debug for ManifestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl ManifestSigner {
    pub fn new(key: RsaPrivateKey, key_id: impl Into<String>) -> Result<Self, OtaError> {
        let key_id = key_id.into();
        if key_id.is_empty() || !key_id.bytes().all(|b| (0x20..=0x7e).contains(&b)) {
            return Err(OtaError::Config(format!(
                "signing key id must be non-empty printable ASCII, got {key_id:?}"
            )));
        }
        Ok(Self {
            key: SigningKey::<Sha256>::new(key),
            key_id,
        })
    }

    /// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`).
    pub fn from_pem(pem: &str, key_id: impl Into<String>) -> Result<Self, OtaError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| OtaError::Config(format!("unreadable RSA private key: {e}")))?;
        Self::new(key, key_id)
    }

    pub fn from_file(path: impl AsRef<Path>, key_id: impl Into<String>) -> Result<Self, OtaError> {
        let path = path.as_ref();
        let pem = std::fs::read_to_string(path).map_err(|e| {
            OtaError::Config(format!("cannot read private key {}: {e}", path.display()))
        })?;
        debug!("Loaded signing key from {}", path.display());
        Self::from_pem(&pem, key_id)
    }

    /// Base64 signature of `payload`.
    pub fn sign(&self, payload: &[u8]) -> Result<String, OtaError> {
        Ok(STANDARD.encode(sign_rsa_sha256(payload, &self.key)?))
    }

    /// Value of the `expo-signature` part header for `payload`.
    pub fn signature_header(&self, payload: &[u8]) -> Result<String, OtaError> {
        let sig = self.sign(payload)?;
        Ok(serialize_dictionary(&[
            ("sig", sig.as_str()),
            ("keyid", self.key_id.as_str()),
        ]))
    }
}

/// Serializes string-valued members as an RFC 8941 dictionary.
pub fn serialize_dictionary(members: &[(&str, &str)]) -> String {
    members
        .iter()
        .map(|(key, value)| format!("{key}={}", sf_string(value)))
        .collect::<Vec<_>>()
        .join(", ")
}

fn sf_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
