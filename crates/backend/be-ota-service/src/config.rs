use std::path::PathBuf;

use axum::http::HeaderValue;
use serde_json::{Map, Value};
use url::Url;

use crate::{error::OtaError, signing::DEFAULT_KEY_ID};

pub const DEFAULT_HOSTNAME: &str = "http://localhost:3000";
pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct OtaConfig {
    /// Public base URL clients reach this server on.
    pub hostname: String,
    pub private_key_path: Option<PathBuf>,
    pub signing_key_id: String,
    /// Headers advertised for every asset in the `extensions` part.
    pub asset_request_headers: Map<String, Value>,
    pub upload_max_bytes: usize,
    /// `None` allows any origin.
    pub cors_allowed_origins: Option<Vec<HeaderValue>>,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            hostname: DEFAULT_HOSTNAME.to_string(),
            private_key_path: None,
            signing_key_id: DEFAULT_KEY_ID.to_string(),
            asset_request_headers: Map::new(),
            upload_max_bytes: DEFAULT_UPLOAD_MAX_BYTES,
            cors_allowed_origins: None,
        }
    }
}

impl OtaConfig {
    pub fn from_env() -> Result<Self, OtaError> {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| DEFAULT_HOSTNAME.to_string());

        let private_key_path = std::env::var("PRIVATE_KEY_PATH")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);

        let signing_key_id =
            std::env::var("SIGNING_KEY_ID").unwrap_or_else(|_| DEFAULT_KEY_ID.to_string());

        let asset_request_headers = match std::env::var("ASSET_REQUEST_HEADERS") {
            Ok(raw) => parse_asset_request_headers(&raw)?,
            Err(_) => Map::new(),
        };

        let upload_max_bytes = match std::env::var("UPLOAD_MAX_BYTES") {
            Ok(raw) => raw.trim().parse().map_err(|e| {
                OtaError::Config(format!("UPLOAD_MAX_BYTES '{raw}' is not a byte count: {e}"))
            })?,
            Err(_) => DEFAULT_UPLOAD_MAX_BYTES,
        };

        let cors_allowed_origins = match std::env::var("CORS_ALLOWED_ORIGINS") {
            Ok(raw) => Some(parse_origins(&raw)?),
            Err(_) => None,
        };

        let config = Self {
            hostname,
            private_key_path,
            signing_key_id,
            asset_request_headers,
            upload_max_bytes,
            cors_allowed_origins,
        };
        config.asset_endpoint()?;
        Ok(config)
    }

    /// `{hostname}/api/assets`, keeping any path prefix on the hostname.
    pub fn asset_endpoint(&self) -> Result<Url, OtaError> {
        let mut base = Url::parse(&self.hostname).map_err(|e| {
            OtaError::Config(format!("HOSTNAME '{}' is not a valid URL: {e}", self.hostname))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        base.join("api/assets")
            .map_err(|e| OtaError::Config(format!("cannot build asset URL: {e}")))
    }
}

fn parse_asset_request_headers(raw: &str) -> Result<Map<String, Value>, OtaError> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(OtaError::Config(
            "ASSET_REQUEST_HEADERS must be a JSON object".into(),
        )),
        Err(e) => Err(OtaError::Config(format!(
            "ASSET_REQUEST_HEADERS is not valid JSON: {e}"
        ))),
    }
}

fn parse_origins(raw: &str) -> Result<Vec<HeaderValue>, OtaError> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            HeaderValue::from_str(origin).map_err(|e| {
                OtaError::Config(format!(
                    "CORS origin '{origin}' is not a valid header value: {e}"
                ))
            })
        })
        .collect()
}
