use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use be_release_db::{DbError, Platform};
use be_storage::StorageError;
use serde::Serialize;
use tracing::{error, warn};

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, thiserror::Error)]
pub enum OtaError {
    #[error("Unsupported platform. Expected either ios or android.")]
    UnsupportedPlatform(Option<String>),

    #[error("No runtimeVersion provided.")]
    MissingRuntimeVersion,

    #[error("Unsupported protocol version. Expected either 0 or 1.")]
    UnsupportedProtocolVersion(String),

    #[error("Invalid Expo-Embedded-Update-ID request header specified.")]
    MissingEmbeddedUpdateId,

    #[error("Rollbacks not supported on protocol version 0")]
    RollbackUnsupported,

    #[error("Code signing requested but no key supplied when starting server.")]
    SigningKeyMissing,

    #[error("{0}")]
    BadRequest(String),

    #[error("No update available for runtime version {0}")]
    NoReleaseForRuntime(String),

    #[error("No update available for platform {0}")]
    PlatformNotInBundle(Platform),

    #[error("Asset not found: {0}")]
    AssetNotFound(String),

    #[error("An update is already stored at {0}")]
    BundleExists(String),

    #[error("NoUpdateAvailable directive not available in protocol version 0")]
    NoUpdateUnsupported,

    #[error("Invalid update bundle: {0}")]
    InvalidBundle(String),

    #[error("Signing failed: {0}")]
    Signing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Internal(String),
}

impl OtaError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn invalid_bundle(msg: impl Into<String>) -> Self {
        Self::InvalidBundle(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OtaError::UnsupportedPlatform(_)
            | OtaError::MissingRuntimeVersion
            | OtaError::UnsupportedProtocolVersion(_)
            | OtaError::MissingEmbeddedUpdateId
            | OtaError::RollbackUnsupported
            | OtaError::SigningKeyMissing
            | OtaError::BadRequest(_) => StatusCode::BAD_REQUEST,
            OtaError::NoReleaseForRuntime(_)
            | OtaError::PlatformNotInBundle(_)
            | OtaError::AssetNotFound(_) => StatusCode::NOT_FOUND,
            OtaError::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            OtaError::BundleExists(_) => StatusCode::CONFLICT,
            OtaError::NoUpdateUnsupported
            | OtaError::InvalidBundle(_)
            | OtaError::Signing(_)
            | OtaError::Config(_)
            | OtaError::Database(_)
            | OtaError::Storage(_)
            | OtaError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OtaError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!(%status, error = %self, "OTA request failed");
        } else {
            warn!(%status, error = %self, "OTA request rejected");
        }

        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
