//! Application state and the operations behind each endpoint

use std::sync::Arc;

use axum::{http::StatusCode, response::Response};
use be_release_db::Platform;
use chrono::{SecondsFormat, Utc};
use tracing::{debug, error, instrument};
use url::Url;

use crate::{
    archive::open_bundle,
    config::OtaConfig,
    engine::ProtocolEngine,
    error::OtaError,
    locator::{UpdateLookup, latest_update},
    manifest::{LAUNCH_ASSET_CONTENT_TYPE, content_type_for_extension},
    signing::ManifestSigner,
    store::{BundleStore, ReleaseStore},
    types::{AssetQuery, EnvironmentReport, HealthResponse, ManifestRequest, UploadResponse},
    upload::{UploadRequest, publish},
};

/// Content type for assets whose extension has no known mapping.
const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Bytes of one asset and the content type it is served with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPayload {
    pub content: Vec<u8>,
    pub content_type: String,
}

#[derive(Clone)]
pub struct AppState {
    config: OtaConfig,
    asset_endpoint: Url,
    releases: Arc<dyn ReleaseStore>,
    bundles: Arc<dyn BundleStore>,
    signer: Option<ManifestSigner>,
}

impl AppState {
    /// Loads the signing key when one is configured. An unreadable key is an error.
    #[instrument(skip_all, fields(hostname = %config.hostname, backend = bundles.backend_name()))]
    pub fn new(
        config: OtaConfig,
        releases: Arc<dyn ReleaseStore>,
        bundles: Arc<dyn BundleStore>,
    ) -> Result<Self, OtaError> {
        let asset_endpoint = config.asset_endpoint()?;
        let signer = match &config.private_key_path {
            Some(path) => Some(ManifestSigner::from_file(path, config.signing_key_id.clone())?),
            None => {
                debug!("No private key configured, code signing disabled");
                None
            }
        };

        Ok(Self {
            config,
            asset_endpoint,
            releases,
            bundles,
            signer,
        })
    }

    pub fn with_signer(mut self, signer: ManifestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    pub fn signing_enabled(&self) -> bool {
        self.signer.is_some()
    }

    fn engine(&self) -> ProtocolEngine<'_> {
        ProtocolEngine {
            releases: self.releases.as_ref(),
            bundles: self.bundles.as_ref(),
            signer: self.signer.as_ref(),
            asset_endpoint: &self.asset_endpoint,
            asset_request_headers: &self.config.asset_request_headers,
        }
    }

    /// Resolve and encode the response to a manifest request.
    pub async fn serve_manifest(&self, request: &ManifestRequest) -> Result<Response, OtaError> {
        let engine = self.engine();
        let outcome = engine.resolve(request).await?;
        engine.respond(request, outcome).await
    }

    /// Look up one asset of the latest bundle for a runtime version.
    #[instrument(skip(self))]
    pub async fn load_asset(&self, query: &AssetQuery) -> Result<AssetPayload, OtaError> {
        let asset = required(query.asset.as_deref(), "No asset name provided.")?;
        let runtime_version =
            required(query.runtime_version.as_deref(), "No runtimeVersion provided.")?;
        let platform_raw = required(query.platform.as_deref(), "No platform provided.")?;
        let platform: Platform = platform_raw
            .parse()
            .map_err(|_| OtaError::UnsupportedPlatform(Some(platform_raw.to_string())))?;

        let release = match latest_update(self.releases.as_ref(), runtime_version).await? {
            UpdateLookup::Found(release) => release,
            UpdateLookup::NoUpdate => {
                return Err(OtaError::NoReleaseForRuntime(runtime_version.to_string()));
            }
        };

        let mut archive = open_bundle(self.bundles.as_ref(), &release.path).await?;
        let metadata = archive.metadata()?;
        let platform_metadata = metadata.platform(platform)?;

        let content_type = if platform_metadata.is_launch_asset(asset) {
            LAUNCH_ASSET_CONTENT_TYPE
        } else if let Some(entry) = platform_metadata.find_asset(asset) {
            content_type_for_extension(&entry.ext).unwrap_or(FALLBACK_CONTENT_TYPE)
        } else {
            return Err(OtaError::AssetNotFound(asset.to_string()));
        };

        let content = archive
            .read_entry(asset)?
            .ok_or_else(|| OtaError::AssetNotFound(asset.to_string()))?;
        debug!("Serving asset {} ({} bytes, {})", asset, content.len(), content_type);

        Ok(AssetPayload {
            content,
            content_type: content_type.to_string(),
        })
    }

    pub async fn upload(&self, request: UploadRequest) -> Result<UploadResponse, OtaError> {
        publish(self.releases.as_ref(), self.bundles.as_ref(), request).await
    }

    /// Store connectivity and the non-secret parts of the configuration.
    pub async fn health(&self) -> (StatusCode, HealthResponse) {
        let environment = EnvironmentReport {
            storage_backend: self.bundles.backend_name().to_string(),
            hostname: self.config.hostname.clone(),
            signing_enabled: self.signing_enabled(),
            profile: if cfg!(debug_assertions) {
                "debug".to_string()
            } else {
                "release".to_string()
            },
        };
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let stats = async {
            let releases = self.releases.list_releases().await?;
            let downloads = self.releases.tracking_metrics(None).await?;
            Ok::<_, OtaError>((releases.len(), downloads))
        };

        match stats.await {
            Ok((releases_count, downloads)) => (
                StatusCode::OK,
                HealthResponse {
                    status: "healthy".to_string(),
                    database: Some("connected".to_string()),
                    releases_count: Some(releases_count),
                    downloads: Some(downloads),
                    error: None,
                    environment,
                    timestamp,
                },
            ),
            Err(e) => {
                error!("Health check failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    HealthResponse {
                        status: "unhealthy".to_string(),
                        database: None,
                        releases_count: None,
                        downloads: None,
                        error: Some(e.to_string()),
                        environment,
                        timestamp,
                    },
                )
            }
        }
    }
}

fn required<'a>(value: Option<&'a str>, message: &str) -> Result<&'a str, OtaError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OtaError::bad_request(message))
}
