//! Manifest construction for normal updates.

use be_release_db::{Platform, Release};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::{
    archive::{BundleArchive, PlatformMetadata},
    content::{MetadataDigest, asset_hash, asset_key},
    error::OtaError,
};

/// Content type of every launch asset, whatever its extension on disk.
pub const LAUNCH_ASSET_CONTENT_TYPE: &str = "application/javascript";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub id: String,
    pub created_at: String,
    pub runtime_version: String,
    pub assets: Vec<AssetDescriptor>,
    pub launch_asset: AssetDescriptor,
    pub metadata: ManifestMetadata,
    pub extra: ManifestExtra,
}

impl Manifest {
    /// Launch asset first, then the rest in manifest order.
    pub fn all_assets(&self) -> impl Iterator<Item = &AssetDescriptor> {
        std::iter::once(&self.launch_asset).chain(self.assets.iter())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetDescriptor {
    pub hash: String,
    pub key: String,
    pub content_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_extension: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestExtra {
    pub expo_client: serde_json::Value,
}

/// MIME type for a non-launch asset extension (with or without the dot).
pub fn content_type_for_extension(ext: &str) -> Option<&'static str> {
    mime_guess::from_ext(ext.trim_start_matches('.')).first_raw()
}

/// Rendering of a timestamp in manifests and directives.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Everything a manifest is assembled from, besides the archive itself.
pub struct ManifestInputs<'a> {
    pub platform_metadata: &'a PlatformMetadata,
    pub digest: &'a MetadataDigest,
    pub release: &'a Release,
    pub app_config: serde_json::Value,
    pub runtime_version: &'a str,
    pub platform: Platform,
    pub asset_endpoint: &'a Url,
}

pub fn build_manifest(
    archive: &mut BundleArchive,
    inputs: ManifestInputs<'_>,
) -> Result<Manifest, OtaError> {
    let resolver = AssetResolver {
        asset_endpoint: inputs.asset_endpoint,
        runtime_version: inputs.runtime_version,
        platform: inputs.platform,
    };

    let assets = inputs
        .platform_metadata
        .assets
        .iter()
        .map(|asset| resolver.resolve(archive, &asset.path, Some(&asset.ext)))
        .collect::<Result<Vec<_>, _>>()?;
    let launch_asset = resolver.resolve(archive, &inputs.platform_metadata.bundle, None)?;

    debug!(
        assets = assets.len(),
        update_id = %inputs.digest.update_id,
        "Built manifest"
    );

    Ok(Manifest {
        id: inputs.digest.update_id_string(),
        created_at: format_timestamp(inputs.release.timestamp),
        runtime_version: inputs.runtime_version.to_string(),
        assets,
        launch_asset,
        metadata: ManifestMetadata {
            release_notes: inputs.release.display_notes().map(str::to_owned),
        },
        extra: ManifestExtra {
            expo_client: inputs.app_config,
        },
    })
}

struct AssetResolver<'a> {
    asset_endpoint: &'a Url,
    runtime_version: &'a str,
    platform: Platform,
}

impl AssetResolver<'_> {
    /// `ext` is `None` for the launch asset.
    fn resolve(
        &self,
        archive: &mut BundleArchive,
        path: &str,
        ext: Option<&str>,
    ) -> Result<AssetDescriptor, OtaError> {
        let content = archive.require_entry(path)?;

        let (content_type, file_extension) = match ext {
            Some(ext) => {
                let content_type = content_type_for_extension(ext).ok_or_else(|| {
                    OtaError::invalid_bundle(format!(
                        "no content type known for asset {path} with extension '{ext}'"
                    ))
                })?;
                (
                    content_type.to_string(),
                    Some(format!(".{}", ext.trim_start_matches('.'))),
                )
            }
            None => (LAUNCH_ASSET_CONTENT_TYPE.to_string(), None),
        };

        Ok(AssetDescriptor {
            hash: asset_hash(&content),
            key: asset_key(&content),
            content_type,
            file_extension,
            url: self.url_for(path),
        })
    }

    fn url_for(&self, path: &str) -> String {
        let mut url = self.asset_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("asset", path)
            .append_pair("runtimeVersion", self.runtime_version)
            .append_pair("platform", self.platform.as_str());
        url.to_string()
    }
}
