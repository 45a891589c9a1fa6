//! Content addressing: stable identifiers derived purely from bytes.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use md5::Md5;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// SHA-256 digest of a bundle's `metadata.json` and the update id derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataDigest {
    pub hex: String,
    pub update_id: Uuid,
}

impl MetadataDigest {
    pub fn of(metadata: &[u8]) -> Self {
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&Sha256::digest(metadata));
        Self {
            hex: hex::encode(digest),
            update_id: update_id_from_digest(&digest),
        }
    }

    /// Hyphenated lower-case form, as sent to clients.
    pub fn update_id_string(&self) -> String {
        self.update_id.as_hyphenated().to_string()
    }
}

/// Maps a SHA-256 digest onto an RFC 9562 version-8 UUID: the first 16
/// digest bytes with the version and variant bits overwritten.
pub fn update_id_from_digest(digest: &[u8; 32]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::new_v8(bytes)
}

/// Integrity hash of an asset: unpadded base64url SHA-256.
pub fn asset_hash(content: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(content))
}

/// Cache key of an asset: hex MD5.
pub fn asset_key(content: &[u8]) -> String {
    hex::encode(Md5::digest(content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_id_of_empty_metadata() {
        let digest = MetadataDigest::of(b"");
        assert_eq!(
            digest.hex,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            digest.update_id_string(),
            "e3b0c442-98fc-8c14-9afb-f4c8996fb924"
        );
        assert_eq!(digest.update_id.get_version_num(), 8);
    }

    #[test]
    fn test_update_id_is_deterministic() {
        let metadata = br#"{"version":0,"bundler":"metro","fileMetadata":{}}"#;
        let first = MetadataDigest::of(metadata);
        let second = MetadataDigest::of(&metadata.to_vec());
        assert_eq!(first, second);

        let other = MetadataDigest::of(br#"{"version":1}"#);
        assert_ne!(first.update_id, other.update_id);
    }

    #[test]
    fn test_asset_hash_and_key() {
        assert_eq!(
            asset_hash(b"Hello, World!"),
            "3_1gIbsr1bCvZ2KQgJ7DpTGR3YHH9wpLKGiKNiGCmG8"
        );
        assert_eq!(asset_key(b"Hello, World!"), "65a8e27d8879283831b664bd8b7f0ad4");
    }
}
