//! Bundle upload: one archive published under one or more runtime versions.

use axum::extract::Multipart;
use be_release_db::NewRelease;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::{
    archive::{BundleArchive, METADATA_ENTRY},
    content::MetadataDigest,
    error::OtaError,
    store::{BundleStore, ReleaseStore},
    types::{FailedVersion, UploadResponse},
};

pub const DEFAULT_COMMIT_MESSAGE: &str = "No message provided";

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub archive: Vec<u8>,
    /// Deduplicated, in first-seen order.
    pub runtime_versions: Vec<String>,
    pub commit_hash: String,
    pub commit_message: String,
    pub release_notes: Option<String>,
}

impl UploadRequest {
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, OtaError> {
        let mut archive = None;
        let mut runtime_values = Vec::new();
        let mut commit_hash = None;
        let mut commit_message = None;
        let mut release_notes = None;

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| OtaError::bad_request(format!("Malformed upload: {}", e.body_text())))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match name.as_str() {
                "file" => {
                    let bytes = field.bytes().await.map_err(|e| {
                        OtaError::bad_request(format!("Cannot read uploaded file: {}", e.body_text()))
                    })?;
                    archive = Some(bytes.to_vec());
                }
                "runtimeVersion" | "commitHash" | "commitMessage" | "releaseNotes" => {
                    let value = field.text().await.map_err(|e| {
                        OtaError::bad_request(format!("Cannot read field {name}: {}", e.body_text()))
                    })?;
                    match name.as_str() {
                        "runtimeVersion" => runtime_values.push(value),
                        "commitHash" => commit_hash = Some(value),
                        "commitMessage" => commit_message = Some(value),
                        _ => release_notes = Some(value),
                    }
                }
                other => debug!("Ignoring upload field '{}'", other),
            }
        }

        let archive = archive
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| OtaError::bad_request("No file uploaded."))?;
        let runtime_versions = parse_runtime_versions(&runtime_values)?;
        let commit_hash = commit_hash
            .map(|hash| hash.trim().to_string())
            .filter(|hash| !hash.is_empty())
            .ok_or_else(|| OtaError::bad_request("No commitHash provided."))?;
        let commit_message = commit_message
            .filter(|msg| !msg.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_COMMIT_MESSAGE.to_string());
        let release_notes = release_notes.filter(|notes| !notes.trim().is_empty());

        Ok(Self {
            archive,
            runtime_versions,
            commit_hash,
            commit_message,
            release_notes,
        })
    }
}

/// Flattens repeated and comma-separated values into unique runtime versions.
pub fn parse_runtime_versions<S: AsRef<str>>(values: &[S]) -> Result<Vec<String>, OtaError> {
    let mut versions: Vec<String> = Vec::new();
    for version in values
        .iter()
        .flat_map(|value| value.as_ref().split(','))
        .map(str::trim)
        .filter(|version| !version.is_empty())
    {
        if version.contains('/') || version.contains('\\') || version.contains("..") {
            return Err(OtaError::bad_request(format!(
                "Invalid runtimeVersion '{version}'"
            )));
        }
        if !versions.iter().any(|seen| seen == version) {
            versions.push(version.to_string());
        }
    }

    if versions.is_empty() {
        return Err(OtaError::MissingRuntimeVersion);
    }
    Ok(versions)
}

/// Storage key of an archive uploaded for `runtime_version` at `timestamp`.
pub fn bundle_path(runtime_version: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "updates/{}/{}.zip",
        runtime_version,
        timestamp.format("%Y%m%d%H%M%S")
    )
}

/// Stores the archive and creates a release for each runtime version in turn.
/// A failing target does not stop the others.
#[instrument(skip_all, fields(versions = ?upload.runtime_versions, commit = %upload.commit_hash))]
pub async fn publish(
    releases: &dyn ReleaseStore,
    bundles: &dyn BundleStore,
    upload: UploadRequest,
) -> Result<UploadResponse, OtaError> {
    let digest = {
        let mut archive = BundleArchive::open(upload.archive.clone())
            .map_err(|_| OtaError::bad_request("Uploaded file is not a zip archive."))?;
        let metadata = archive
            .read_entry(METADATA_ENTRY)
            .map_err(|_| OtaError::bad_request(format!("Cannot read {METADATA_ENTRY}.")))?
            .ok_or_else(|| OtaError::bad_request(format!("Archive has no {METADATA_ENTRY}.")))?;
        MetadataDigest::of(&metadata)
    };
    let update_id = digest.update_id_string();

    let mut deployed_versions = Vec::new();
    let mut failed_versions = Vec::new();
    let mut paths = Vec::new();

    for runtime_version in &upload.runtime_versions {
        let timestamp = Utc::now();
        let path = bundle_path(runtime_version, timestamp);

        match publish_one(releases, bundles, &upload, runtime_version, &path, &update_id, timestamp)
            .await
        {
            Ok(()) => {
                info!(%runtime_version, %path, "Deployed update");
                deployed_versions.push(runtime_version.clone());
                paths.push(path);
            }
            Err(e) => {
                warn!(%runtime_version, error = %e, "Failed to deploy update");
                failed_versions.push(FailedVersion {
                    version: runtime_version.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    let success = !deployed_versions.is_empty();
    Ok(UploadResponse {
        success,
        error: (!success).then(|| "Failed to deploy to any runtime version".to_string()),
        update_id,
        deployed_versions,
        failed_versions,
        paths,
    })
}

async fn publish_one(
    releases: &dyn ReleaseStore,
    bundles: &dyn BundleStore,
    upload: &UploadRequest,
    runtime_version: &str,
    path: &str,
    update_id: &str,
    timestamp: DateTime<Utc>,
) -> Result<(), OtaError> {
    // Stored archives back existing releases and are never replaced.
    if bundles.bundle_exists(path).await? {
        return Err(OtaError::BundleExists(path.to_string()));
    }
    bundles.write_bundle(path, upload.archive.clone()).await?;

    releases
        .create_release(NewRelease {
            runtime_version: runtime_version.to_string(),
            path: path.to_string(),
            timestamp,
            commit_hash: upload.commit_hash.clone(),
            commit_message: upload.commit_message.clone(),
            release_notes: upload.release_notes.clone(),
            update_id: update_id.to_string(),
        })
        .await?;
    Ok(())
}
