//! Update resolution for a single manifest request.
//!
//! [`ProtocolEngine::resolve`] decides what a client should receive, without
//! touching the wire format. [`ProtocolEngine::respond`] serializes, signs and
//! assembles that decision, and records the download for served manifests.

use axum::response::Response;
use be_release_db::Release;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::{
    archive::open_bundle,
    directive::{Directive, build_rollback, no_update_available},
    error::OtaError,
    locator::{UpdateLookup, latest_update},
    manifest::{Manifest, ManifestInputs, build_manifest},
    signing::ManifestSigner,
    store::{BundleStore, ReleaseStore},
    types::{ManifestRequest, ProtocolVersion},
    wire::{SignedBody, directive_response, extensions_for, manifest_response},
};

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Manifest { manifest: Manifest, release: Release },
    RollBack(Directive),
    NoUpdate,
}

pub struct ProtocolEngine<'a> {
    pub releases: &'a dyn ReleaseStore,
    pub bundles: &'a dyn BundleStore,
    pub signer: Option<&'a ManifestSigner>,
    pub asset_endpoint: &'a Url,
    pub asset_request_headers: &'a Map<String, Value>,
}

impl ProtocolEngine<'_> {
    #[instrument(
        skip(self, request),
        fields(
            runtime_version = %request.runtime_version,
            platform = %request.platform,
            protocol = %request.protocol_version,
        )
    )]
    pub async fn resolve(&self, request: &ManifestRequest) -> Result<UpdateOutcome, OtaError> {
        let protocol = request.protocol_version;

        let release = match latest_update(self.releases, &request.runtime_version).await? {
            UpdateLookup::Found(release) => release,
            UpdateLookup::NoUpdate => return no_bundle(request),
        };

        if protocol.supports_directives() && request.is_running(&release.update_id) {
            debug!(update_id = %release.update_id, "Client already runs the latest update");
            return Ok(UpdateOutcome::NoUpdate);
        }

        let mut archive = match open_bundle(self.bundles, &release.path).await {
            Ok(archive) => archive,
            Err(OtaError::Storage(e)) if e.is_not_found() => {
                warn!(path = %release.path, "Release row points at a missing archive");
                return no_bundle(request);
            }
            Err(e) => return Err(e),
        };

        if archive.is_rollback() {
            debug!(path = %release.path, "Serving rollback bundle");
            let directive = build_rollback(request, release.timestamp)?;
            return Ok(if directive.is_no_update() {
                UpdateOutcome::NoUpdate
            } else {
                UpdateOutcome::RollBack(directive)
            });
        }

        let metadata = archive.metadata()?;
        let digest = metadata.digest();
        if protocol.supports_directives() && request.is_running(&digest.update_id_string()) {
            debug!(update_id = %digest.update_id, "Client already runs the bundle's update");
            return Ok(UpdateOutcome::NoUpdate);
        }

        let platform_metadata = metadata.platform(request.platform)?;
        let app_config = archive.app_config()?;
        let manifest = build_manifest(
            &mut archive,
            ManifestInputs {
                platform_metadata,
                digest: &digest,
                release: &release,
                app_config,
                runtime_version: &request.runtime_version,
                platform: request.platform,
                asset_endpoint: self.asset_endpoint,
            },
        )?;

        Ok(UpdateOutcome::Manifest { manifest, release })
    }

    pub async fn respond(
        &self,
        request: &ManifestRequest,
        outcome: UpdateOutcome,
    ) -> Result<Response, OtaError> {
        match outcome {
            UpdateOutcome::Manifest { manifest, release } => {
                let body = self.signed_json(request, &manifest)?;
                let extensions = extensions_for(&manifest, self.asset_request_headers);
                let response = manifest_response(request.protocol_version, body, &extensions)?;
                self.track_download(request, &release).await;
                Ok(response)
            }
            UpdateOutcome::RollBack(directive) => {
                directive_response(self.signed_json(request, &directive)?)
            }
            UpdateOutcome::NoUpdate => {
                let directive = no_update_available(request.protocol_version)?;
                directive_response(self.signed_json(request, &directive)?)
            }
        }
    }

    fn signed_json<T: Serialize>(
        &self,
        request: &ManifestRequest,
        value: &T,
    ) -> Result<SignedBody, OtaError> {
        let body = serde_json::to_string(value)
            .map_err(|e| OtaError::Internal(format!("cannot serialize response body: {e}")))?;

        let signature = if request.expect_signature {
            let signer = self.signer.ok_or(OtaError::SigningKeyMissing)?;
            Some(signer.signature_header(body.as_bytes())?)
        } else {
            None
        };

        Ok(SignedBody { body, signature })
    }

    /// Records a download of `served`. Failures are logged; the manifest has already been built.
    async fn track_download(&self, request: &ManifestRequest, served: &Release) {
        let release = match self.releases.release_by_path(&served.path).await {
            Ok(Some(release)) => release,
            Ok(None) => {
                debug!(path = %served.path, "No release row for served path, not tracking");
                return;
            }
            Err(e) => {
                error!(path = %served.path, error = %e, "Failed to look up served release");
                return;
            }
        };

        if let Err(e) = self
            .releases
            .create_tracking(release.id, request.platform, Utc::now())
            .await
        {
            error!(release_id = %release.id, error = %e, "Failed to record download");
        }
    }
}

/// No bundle exists for the runtime version. Protocol 0 cannot say "no
/// update", so it gets a 404 instead.
fn no_bundle(request: &ManifestRequest) -> Result<UpdateOutcome, OtaError> {
    match request.protocol_version {
        ProtocolVersion::V1 => Ok(UpdateOutcome::NoUpdate),
        ProtocolVersion::V0 => Err(OtaError::NoReleaseForRuntime(
            request.runtime_version.clone(),
        )),
    }
}
