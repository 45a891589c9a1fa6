//! multipart/mixed encoding of manifest and directive responses.

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::{
    error::OtaError,
    manifest::Manifest,
    types::{PROTOCOL_VERSION_HEADER, ProtocolVersion, SFV_VERSION_HEADER, SIGNATURE_HEADER},
};

const CRLF: &str = "\r\n";
const PART_CONTENT_TYPE: &str = "application/json; charset=utf-8";

/// A serialized JSON body and, when signing was requested, its signature header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBody {
    pub body: String,
    pub signature: Option<String>,
}

#[derive(Debug, Clone)]
struct Part {
    name: String,
    body: String,
    signature: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MultipartBody {
    boundary: String,
    parts: Vec<Part>,
}

impl Default for MultipartBody {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBody {
    pub fn new() -> Self {
        Self::with_boundary(Uuid::new_v4().simple().to_string())
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            parts: Vec::new(),
        }
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    pub fn part(mut self, name: impl Into<String>, body: SignedBody) -> Self {
        self.parts.push(Part {
            name: name.into(),
            body: body.body,
            signature: body.signature,
        });
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/mixed; boundary={}", self.boundary)
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            out.push_str(&format!("--{}{CRLF}", self.boundary));
            out.push_str(&format!(
                "content-disposition: form-data; name=\"{}\"{CRLF}",
                part.name
            ));
            out.push_str(&format!("content-type: {PART_CONTENT_TYPE}{CRLF}"));
            if let Some(signature) = &part.signature {
                out.push_str(&format!("{SIGNATURE_HEADER}: {signature}{CRLF}"));
            }
            out.push_str(CRLF);
            out.push_str(&part.body);
            out.push_str(CRLF);
        }
        out.push_str(&format!("--{}--{CRLF}", self.boundary));
        out
    }
}

/// `extensions` part: the configured request headers, advertised for every asset key.
pub fn extensions_for(manifest: &Manifest, asset_request_headers: &Map<String, Value>) -> Value {
    let headers: Map<String, Value> = manifest
        .all_assets()
        .map(|asset| (asset.key.clone(), Value::Object(asset_request_headers.clone())))
        .collect();
    json!({ "assetRequestHeaders": headers })
}

pub fn manifest_response(
    protocol: ProtocolVersion,
    manifest: SignedBody,
    extensions: &Value,
) -> Result<Response, OtaError> {
    let body = MultipartBody::new().part("manifest", manifest).part(
        "extensions",
        SignedBody {
            body: extensions.to_string(),
            signature: None,
        },
    );
    multipart_response(protocol, body)
}

/// Directives only exist from protocol 1, so the echoed version is always 1.
pub fn directive_response(directive: SignedBody) -> Result<Response, OtaError> {
    multipart_response(
        ProtocolVersion::V1,
        MultipartBody::new().part("directive", directive),
    )
}

fn multipart_response(protocol: ProtocolVersion, body: MultipartBody) -> Result<Response, OtaError> {
    let content_type = HeaderValue::from_str(&body.content_type())
        .map_err(|e| OtaError::Internal(format!("invalid multipart boundary: {e}")))?;

    let mut response = (StatusCode::OK, Body::from(body.encode())).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("private, max-age=0"),
    );
    headers.insert(
        PROTOCOL_VERSION_HEADER,
        HeaderValue::from_static(protocol.as_str()),
    );
    headers.insert(SFV_VERSION_HEADER, HeaderValue::from_static("0"));
    Ok(response)
}
