//! Read access to uploaded update archives.
//!
//! An update bundle is a zip produced by `expo export` plus a few files the
//! upload tooling adds:
//!
//! - `metadata.json`: per-platform launch bundle and asset list
//! - `expoConfig.json`: the app config handed to clients as `extra.expoClient`
//! - `rollback`: optional marker; its presence turns the bundle into a
//!   roll-back-to-embedded instruction

use std::{
    collections::HashMap,
    io::{Cursor, Read},
};

use be_release_db::Platform;
use serde::Deserialize;
use tracing::{debug, instrument};
use zip::{ZipArchive, result::ZipError};

use crate::{content::MetadataDigest, error::OtaError, store::BundleStore};

pub const METADATA_ENTRY: &str = "metadata.json";
pub const APP_CONFIG_ENTRY: &str = "expoConfig.json";
pub const ROLLBACK_ENTRY: &str = "rollback";

/// Largest decompressed entry the server will read out of an archive.
pub const MAX_ENTRY_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataJson {
    pub file_metadata: HashMap<String, PlatformMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlatformMetadata {
    /// Path of the launch bundle inside the archive.
    pub bundle: String,
    #[serde(default)]
    pub assets: Vec<AssetMetadata>,
}

impl PlatformMetadata {
    pub fn find_asset(&self, path: &str) -> Option<&AssetMetadata> {
        self.assets.iter().find(|asset| asset.path == path)
    }

    pub fn is_launch_asset(&self, path: &str) -> bool {
        self.bundle == path
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssetMetadata {
    pub path: String,
    pub ext: String,
}

/// Parsed `metadata.json` together with the exact bytes it was parsed from.
#[derive(Debug, Clone)]
pub struct BundleMetadata {
    pub raw: Vec<u8>,
    pub json: MetadataJson,
}

impl BundleMetadata {
    pub fn parse(raw: Vec<u8>) -> Result<Self, OtaError> {
        let json = serde_json::from_slice(&raw)
            .map_err(|e| OtaError::invalid_bundle(format!("malformed {METADATA_ENTRY}: {e}")))?;
        Ok(Self { raw, json })
    }

    pub fn digest(&self) -> MetadataDigest {
        MetadataDigest::of(&self.raw)
    }

    pub fn platform(&self, platform: Platform) -> Result<&PlatformMetadata, OtaError> {
        self.json
            .file_metadata
            .get(platform.as_str())
            .ok_or(OtaError::PlatformNotInBundle(platform))
    }
}

pub struct BundleArchive {
    zip: ZipArchive<Cursor<Vec<u8>>>,
}

impl std::fmt::Debug for BundleArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BundleArchive")
            .field("entries", &self.zip.len())
            .finish()
    }
}

impl BundleArchive {
    pub fn open(bytes: Vec<u8>) -> Result<Self, OtaError> {
        let zip = ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| OtaError::invalid_bundle(format!("not a zip archive: {e}")))?;
        Ok(Self { zip })
    }

    /// Bytes of the named entry, or `None` when the archive has no such entry.
    pub fn read_entry(&mut self, name: &str) -> Result<Option<Vec<u8>>, OtaError> {
        self.read_entry_limited(name, MAX_ENTRY_BYTES)
    }

    /// Sizes declared in the zip headers are untrusted; only `limit` bytes
    /// are ever buffered.
    fn read_entry_limited(&mut self, name: &str, limit: u64) -> Result<Option<Vec<u8>>, OtaError> {
        let file = match self.zip.by_name(name) {
            Ok(file) => file,
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(OtaError::invalid_bundle(format!(
                    "cannot open entry {name}: {e}"
                )));
            }
        };

        let mut content = Vec::new();
        file.take(limit + 1)
            .read_to_end(&mut content)
            .map_err(|e| OtaError::invalid_bundle(format!("cannot read entry {name}: {e}")))?;
        if content.len() as u64 > limit {
            return Err(OtaError::invalid_bundle(format!(
                "entry {name} exceeds {limit} bytes"
            )));
        }
        Ok(Some(content))
    }

    pub fn require_entry(&mut self, name: &str) -> Result<Vec<u8>, OtaError> {
        self.read_entry(name)?
            .ok_or_else(|| OtaError::invalid_bundle(format!("missing entry {name}")))
    }

    pub fn has_entry(&self, name: &str) -> bool {
        self.zip.file_names().any(|entry| entry == name)
    }

    pub fn is_rollback(&self) -> bool {
        self.has_entry(ROLLBACK_ENTRY)
    }

    pub fn metadata(&mut self) -> Result<BundleMetadata, OtaError> {
        BundleMetadata::parse(self.require_entry(METADATA_ENTRY)?)
    }

    /// Client-facing app config. Must be a JSON object.
    pub fn app_config(&mut self) -> Result<serde_json::Value, OtaError> {
        let raw = self.require_entry(APP_CONFIG_ENTRY)?;
        let config: serde_json::Value = serde_json::from_slice(&raw).map_err(|e| {
            OtaError::invalid_bundle(format!("malformed {APP_CONFIG_ENTRY}: {e}"))
        })?;
        if !config.is_object() {
            return Err(OtaError::invalid_bundle(format!(
                "{APP_CONFIG_ENTRY} is not a JSON object"
            )));
        }
        Ok(config)
    }
}

/// Fetch a stored archive and open it for entry lookup.
#[instrument(skip(bundles))]
pub async fn open_bundle(bundles: &dyn BundleStore, path: &str) -> Result<BundleArchive, OtaError> {
    let bytes = bundles.read_bundle(path).await?;
    debug!("Fetched bundle archive ({} bytes)", bytes.len());
    BundleArchive::open(bytes)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use zip::{CompressionMethod, ZipWriter, write::SimpleFileOptions};

    use super::*;
    use crate::testing::BundleBuilder;

    #[test]
    fn test_reads_metadata_and_entries() {
        let bytes = BundleBuilder::new()
            .asset("assets/4f1cb2cac2370cd5050681232e8575a8", "png", b"png-bytes")
            .build();
        let mut archive = BundleArchive::open(bytes).unwrap();

        let metadata = archive.metadata().unwrap();
        let ios = metadata.platform(Platform::Ios).unwrap();
        assert_eq!(ios.bundle, BundleBuilder::IOS_BUNDLE);
        assert_eq!(ios.assets.len(), 1);
        assert!(ios.find_asset("assets/4f1cb2cac2370cd5050681232e8575a8").is_some());
        assert!(ios.is_launch_asset(BundleBuilder::IOS_BUNDLE));

        assert_eq!(
            archive
                .read_entry("assets/4f1cb2cac2370cd5050681232e8575a8")
                .unwrap()
                .unwrap(),
            b"png-bytes"
        );
        assert!(archive.read_entry("assets/missing").unwrap().is_none());
        assert!(!archive.is_rollback());
    }

    #[test]
    fn test_digest_uses_raw_metadata_bytes() {
        let bytes = BundleBuilder::new().build();
        let mut archive = BundleArchive::open(bytes).unwrap();
        let raw = archive.read_entry(METADATA_ENTRY).unwrap().unwrap();

        assert_eq!(archive.metadata().unwrap().digest(), MetadataDigest::of(&raw));
    }

    #[test]
    fn test_rollback_marker_presence() {
        let bytes = BundleBuilder::new().rollback().build();
        let archive = BundleArchive::open(bytes).unwrap();
        assert!(archive.is_rollback());
    }

    #[test]
    fn test_missing_platform_is_reported() {
        let bytes = BundleBuilder::new().only_platform(Platform::Android).build();
        let mut archive = BundleArchive::open(bytes).unwrap();
        let metadata = archive.metadata().unwrap();

        assert!(matches!(
            metadata.platform(Platform::Ios),
            Err(OtaError::PlatformNotInBundle(Platform::Ios))
        ));
        assert!(metadata.platform(Platform::Android).is_ok());
    }

    #[test]
    fn test_app_config_must_be_object() {
        let bytes = BundleBuilder::new().app_config("[1, 2]").build();
        let mut archive = BundleArchive::open(bytes).unwrap();
        assert!(matches!(archive.app_config(), Err(OtaError::InvalidBundle(_))));
    }

    #[test]
    fn test_entry_over_limit_is_invalid() {
        let bytes = BundleBuilder::new().build();
        let mut archive = BundleArchive::open(bytes).unwrap();

        assert!(matches!(
            archive.read_entry_limited(METADATA_ENTRY, 8),
            Err(OtaError::InvalidBundle(_))
        ));
        let content = BundleBuilder::LAUNCH_CONTENT;
        assert_eq!(
            archive
                .read_entry_limited(BundleBuilder::IOS_BUNDLE, content.len() as u64)
                .unwrap()
                .unwrap(),
            content
        );
    }

    #[test]
    fn test_forged_declared_size_is_not_trusted() {
        let content = br#"{"fileMetadata":{}}"#;
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Stored)
            .large_file(true);
        zip.start_file(METADATA_ENTRY, options).unwrap();
        zip.write_all(content).unwrap();
        let mut bytes = zip.finish().unwrap().into_inner();

        // Rewrite the zip64 uncompressed size to 2^62 wherever it is recorded.
        let real_size = (content.len() as u64).to_le_bytes();
        let forged_size = (1u64 << 62).to_le_bytes();
        let mut patched = 0;
        let mut i = 0;
        while i + 12 <= bytes.len() {
            if bytes[i] == 0x01
                && bytes[i + 1] == 0x00
                && bytes[i + 3] == 0x00
                && bytes[i + 4..i + 12] == real_size
            {
                bytes[i + 4..i + 12].copy_from_slice(&forged_size);
                patched += 1;
                i += 12;
            } else {
                i += 1;
            }
        }
        assert!(patched > 0);

        let result =
            BundleArchive::open(bytes).and_then(|mut archive| archive.read_entry(METADATA_ENTRY));
        match result {
            Ok(Some(read)) => assert_eq!(read, content),
            Ok(None) => panic!("entry disappeared"),
            Err(e) => assert!(matches!(e, OtaError::InvalidBundle(_)), "{e}"),
        }
    }

    #[test]
    fn test_rejects_non_zip_bytes() {
        assert!(matches!(
            BundleArchive::open(b"definitely not a zip".to_vec()),
            Err(OtaError::InvalidBundle(_))
        ));
    }
}
