//! HTTP router: `POST /daydreamcamera` (API dispatch) and
//! `GET`/`DELETE /media/<path>` (byte-range-aware file serving), both
//! behind the HMAC authentication layer.
//!
//! Range parsing follows the same `bytes=start-end` grammar as any HTTP
//! range server: three forms (`A-B`, `A-`, `-N`). A start at or beyond
//! the content length is unsatisfiable; an end beyond the content length
//! clamps to the last byte instead of being rejected.

use axum::body::Body;
use axum::extract::{Extension, Path};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tokio_util::io::ReaderStream;

use crate::api::error::ApiError;
use crate::api::middleware::auth::require_hmac_auth;
use crate::api::types::ApiContext;
use crate::api_dispatch::{decode_envelope, ApiDispatcher, DecodeError};

pub fn build_router(ctx: ApiContext) -> Router {
    Router::new()
        .route("/daydreamcamera", post(handle_api_request))
        .route("/media/{*path}", get(handle_media_get).delete(handle_media_delete))
        .layer(axum::middleware::from_fn(require_hmac_auth))
        .layer(Extension(ctx))
}

async fn handle_api_request(Extension(ctx): Extension<ApiContext>, body: axum::body::Bytes) -> Response {
    let envelope = match decode_envelope(&body) {
        Ok(envelope) => envelope,
        Err(DecodeError::Malformed) => return StatusCode::BAD_REQUEST.into_response(),
        Err(DecodeError::UnrecognizedType { request_id }) => {
            let response = serde_json::json!({
                "header": {"request_id": request_id},
                "status": "NOT_SUPPORTED",
            });
            return (StatusCode::OK, serde_json::to_vec(&response).unwrap()).into_response();
        }
    };

    let dispatcher = ApiDispatcher {
        settings: &ctx.settings,
        status: &ctx.status,
        capture_queue: &ctx.capture_queue,
        wifi: &ctx.wifi,
        media_root: &ctx.media_root,
    };
    let now_ms = chrono::Utc::now().timestamp_millis();
    let response = dispatcher.dispatch(envelope, now_ms);
    (StatusCode::OK, serde_json::to_vec(&response).expect("ApiResponse always serializes")).into_response()
}

async fn handle_media_get(
    Extension(ctx): Extension<ApiContext>,
    Path(path): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let resolved = resolve_media_path(&ctx.media_root, &path)?;
    let metadata = tokio::fs::metadata(&resolved).await.map_err(|_| ApiError::NotFound)?;
    let total_len = metadata.len();

    let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
        Some(raw) => Some(parse_range(raw, total_len)?),
        None => None,
    };

    let file = tokio::fs::File::open(&resolved).await.map_err(|_| ApiError::NotFound)?;

    match range {
        None => {
            let stream = ReaderStream::new(file);
            let body = Body::from_stream(stream);
            Ok((
                StatusCode::OK,
                [(header::CONTENT_LENGTH, total_len.to_string())],
                body,
            )
                .into_response())
        }
        Some((start, end)) => {
            use tokio::io::{AsyncReadExt, AsyncSeekExt};
            let mut file = file;
            file.seek(std::io::SeekFrom::Start(start)).await.map_err(ApiError::from)?;
            let len = end - start + 1;
            let limited = file.take(len);
            let stream = ReaderStream::new(limited);
            let body = Body::from_stream(stream);
            Ok((
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_LENGTH, len.to_string()),
                    (header::CONTENT_RANGE, format!("bytes {start}-{end}/{total_len}")),
                ],
                body,
            )
                .into_response())
        }
    }
}

async fn handle_media_delete(
    Extension(ctx): Extension<ApiContext>,
    Path(path): Path<String>,
) -> Result<StatusCode, ApiError> {
    let resolved = resolve_media_path(&ctx.media_root, &path)?;
    tokio::fs::remove_file(&resolved).await.map_err(|_| ApiError::NotFound)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Resolves `path` against the media root, rejecting any traversal
/// outside it with `NotFound` rather than revealing why (the path is
/// attacker-controlled input).
fn resolve_media_path(root: &std::path::Path, path: &str) -> Result<std::path::PathBuf, ApiError> {
    let candidate = root.join(path.trim_start_matches('/'));
    let canonical_root = std::fs::canonicalize(root).map_err(|_| ApiError::NotFound)?;
    let canonical_candidate = std::fs::canonicalize(&candidate).map_err(|_| ApiError::NotFound)?;
    if !canonical_candidate.starts_with(&canonical_root) {
        return Err(ApiError::NotFound);
    }
    Ok(canonical_candidate)
}

/// Parses a single-range `Range: bytes=A-B|A-|-N` header.
///
/// `start >= total_len` is unsatisfiable (416). An end beyond the last
/// byte clamps to `total_len - 1` rather than rejecting.
fn parse_range(raw: &str, total_len: u64) -> Result<(u64, u64), ApiError> {
    let range_value = raw
        .strip_prefix("bytes=")
        .ok_or_else(|| ApiError::BadRequest("unsupported range unit".into()))?;
    if range_value.contains(',') {
        return Err(ApiError::BadRequest("multi-part ranges not supported".into()));
    }
    let (start_str, end_str) =
        range_value.split_once('-').ok_or_else(|| ApiError::BadRequest("malformed range".into()))?;
    let last_byte = total_len.saturating_sub(1);

    if start_str.is_empty() {
        let suffix_len: u64 =
            end_str.parse().map_err(|_| ApiError::BadRequest("malformed range".into()))?;
        if suffix_len == 0 {
            return Err(ApiError::BadRequest("malformed range".into()));
        }
        let start = total_len.saturating_sub(suffix_len);
        return Ok((start, last_byte));
    }

    let start: u64 = start_str.parse().map_err(|_| ApiError::BadRequest("malformed range".into()))?;
    if start >= total_len {
        return Err(ApiError::RangeNotSatisfiable { total_len });
    }
    let end = if end_str.is_empty() {
        last_byte
    } else {
        let requested: u64 = end_str.parse().map_err(|_| ApiError::BadRequest("malformed range".into()))?;
        requested.min(last_byte)
    };
    if end < start {
        return Err(ApiError::BadRequest("end before start".into()));
    }
    Ok((start, end))
}
