//! Request and response types for the OTA endpoints

use std::collections::HashMap;

use axum::http::HeaderMap;
use be_release_db::{Platform, TrackingMetrics};
use serde::{Deserialize, Serialize};

use crate::error::OtaError;

pub const RUNTIME_VERSION_HEADER: &str = "expo-runtime-version";
pub const PLATFORM_HEADER: &str = "expo-platform";
pub const PROTOCOL_VERSION_HEADER: &str = "expo-protocol-version";
pub const CURRENT_UPDATE_ID_HEADER: &str = "expo-current-update-id";
pub const EMBEDDED_UPDATE_ID_HEADER: &str = "expo-embedded-update-id";
pub const EXPECT_SIGNATURE_HEADER: &str = "expo-expect-signature";
pub const SIGNATURE_HEADER: &str = "expo-signature";
pub const SFV_VERSION_HEADER: &str = "expo-sfv-version";

/// Wire-format revision spoken by the client. Directives only exist from V1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    #[default]
    V0,
    V1,
}

impl ProtocolVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolVersion::V0 => "0",
            ProtocolVersion::V1 => "1",
        }
    }

    pub fn supports_directives(&self) -> bool {
        matches!(self, ProtocolVersion::V1)
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = OtaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "0" => Ok(ProtocolVersion::V0),
            "1" => Ok(ProtocolVersion::V1),
            other => Err(OtaError::UnsupportedProtocolVersion(other.to_string())),
        }
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A manifest request, validated once at the HTTP boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRequest {
    pub runtime_version: String,
    pub platform: Platform,
    pub protocol_version: ProtocolVersion,
    pub current_update_id: Option<String>,
    pub embedded_update_id: Option<String>,
    pub expect_signature: bool,
}

impl ManifestRequest {
    /// Build a request from headers, falling back to query parameters for the
    /// fields a browser or curl user would pass in the URL.
    pub fn from_parts(
        headers: &HeaderMap,
        query: &HashMap<String, String>,
    ) -> Result<Self, OtaError> {
        let mut protocol_values = headers.get_all(PROTOCOL_VERSION_HEADER).iter();
        let first_protocol = protocol_values.next();
        if protocol_values.next().is_some() {
            return Err(OtaError::UnsupportedProtocolVersion(
                "multiple values".to_string(),
            ));
        }
        let protocol_version = match first_protocol {
            Some(value) => value
                .to_str()
                .map_err(|_| OtaError::UnsupportedProtocolVersion("non-ascii".to_string()))?
                .parse()?,
            None => match query.get("protocol-version") {
                Some(value) => value.parse()?,
                None => ProtocolVersion::V0,
            },
        };

        let platform_raw = lookup(headers, PLATFORM_HEADER, query, "platform");
        let platform = platform_raw
            .as_deref()
            .and_then(|p| p.parse::<Platform>().ok())
            .ok_or(OtaError::UnsupportedPlatform(platform_raw))?;

        let runtime_version = lookup(headers, RUNTIME_VERSION_HEADER, query, "runtime-version")
            .filter(|rv| !rv.is_empty())
            .ok_or(OtaError::MissingRuntimeVersion)?;

        Ok(Self {
            runtime_version,
            platform,
            protocol_version,
            current_update_id: lookup(
                headers,
                CURRENT_UPDATE_ID_HEADER,
                query,
                "current-update-id",
            )
            .filter(|id| !id.is_empty()),
            embedded_update_id: lookup(
                headers,
                EMBEDDED_UPDATE_ID_HEADER,
                query,
                "embedded-update-id",
            )
            .filter(|id| !id.is_empty()),
            expect_signature: lookup(headers, EXPECT_SIGNATURE_HEADER, query, "expect-signature")
                .is_some_and(|value| !value.trim().is_empty()),
        })
    }

    /// Whether the client reports `update_id` as the update it is running.
    pub fn is_running(&self, update_id: &str) -> bool {
        self.current_update_id
            .as_deref()
            .is_some_and(|current| same_update_id(current, update_id))
    }
}

/// Update ids are UUIDs; iOS clients report them upper-cased.
pub fn same_update_id(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn lookup(
    headers: &HeaderMap,
    header: &str,
    query: &HashMap<String, String>,
    key: &str,
) -> Option<String> {
    headers
        .get(header)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .or_else(|| query.get(key).cloned())
}

/// Query parameters for the asset endpoint
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct AssetQuery {
    pub asset: Option<String>,
    pub runtime_version: Option<String>,
    pub platform: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FailedVersion {
    pub version: String,
    pub error: String,
}

/// Aggregate result of a multi-runtime-version upload
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub update_id: String,
    pub deployed_versions: Vec<String>,
    pub failed_versions: Vec<FailedVersion>,
    pub paths: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentReport {
    pub storage_backend: String,
    pub hostname: String,
    pub signing_enabled: bool,
    pub profile: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub releases_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloads: Option<Vec<TrackingMetrics>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub environment: EnvironmentReport,
    pub timestamp: String,
}
