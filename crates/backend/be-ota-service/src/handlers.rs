use std::{collections::HashMap, convert::Infallible, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::{Multipart, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Json, Response},
};
use tracing::{debug, instrument};

use crate::{
    service::{AppState, AssetPayload},
    types::{AssetQuery, ManifestRequest},
    upload::UploadRequest,
};

/// Assets larger than this are streamed instead of sent as one buffer.
pub const STREAMING_THRESHOLD: usize = 4 * 1024 * 1024;
const STREAM_CHUNK_SIZE: usize = 64 * 1024;
const ASSET_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[instrument(skip_all)]
pub async fn manifest_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let request = match ManifestRequest::from_parts(&headers, &query) {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };
    debug!(
        runtime_version = %request.runtime_version,
        platform = %request.platform,
        protocol = %request.protocol_version,
        "Manifest request"
    );

    match state.serve_manifest(&request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

#[instrument(skip_all, fields(asset = ?query.asset))]
pub async fn asset_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssetQuery>,
) -> Response {
    match state.load_asset(&query).await {
        Ok(payload) => asset_response(payload),
        Err(e) => e.into_response(),
    }
}

fn asset_response(payload: AssetPayload) -> Response {
    let len = payload.content.len();
    let content_type = HeaderValue::from_str(&payload.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));

    let mut response = if len > STREAMING_THRESHOLD {
        debug!("Streaming {} byte asset", len);
        Body::from_stream(chunked(payload.content)).into_response()
    } else {
        let mut response = Body::from(payload.content).into_response();
        response
            .headers_mut()
            .insert(header::CONTENT_LENGTH, HeaderValue::from(len));
        response
    };

    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(ASSET_CACHE_CONTROL),
    );
    response
}

fn chunked(content: Vec<u8>) -> impl futures::Stream<Item = Result<Bytes, Infallible>> {
    let content = Bytes::from(content);
    let len = content.len();
    futures::stream::iter((0..len).step_by(STREAM_CHUNK_SIZE).map(move |start| {
        Ok(content.slice(start..(start + STREAM_CHUNK_SIZE).min(len)))
    }))
}

#[instrument(skip_all)]
pub async fn upload_handler(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let request = match UploadRequest::from_multipart(multipart).await {
        Ok(request) => request,
        Err(e) => return e.into_response(),
    };

    match state.upload(request).await {
        Ok(report) => {
            let status = if report.success {
                StatusCode::OK
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            };
            (status, Json(report)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let (status, report) = state.health().await;
    (status, Json(report)).into_response()
}
