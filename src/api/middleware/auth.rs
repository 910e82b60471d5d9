//! HMAC request authentication middleware.
//!
//! Validates `Authorization: daydreamcamera <base64url(hmac)>` where
//! `hmac = hmac_sha256(shared_key, [method, uri, body])`. The whole
//! middleware rejects with a bare 403 (no body) on any failure, so a
//! probing adversary learns nothing about which check failed.

use axum::body::{to_bytes, Body};
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use subtle::ConstantTimeEq;

use crate::api::error::ApiError;
use crate::api::types::ApiContext;
use crate::crypto::hmac_sha256;

const SCHEME: &str = "daydreamcamera";
/// 10 MiB: generous enough for any in-scope API request body, small
/// enough to bound the buffering this middleware must do to HMAC it.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

pub async fn require_hmac_auth(req: Request, next: Next) -> Response {
    match require_hmac_auth_inner(req, next).await {
        Ok(resp) => resp,
        Err(_) => ApiError::Forbidden.into_response(),
    }
}

async fn require_hmac_auth_inner(req: Request, next: Next) -> Result<Response, ApiError> {
    let ctx = req
        .extensions()
        .get::<ApiContext>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("missing API context".into()))?;

    let snapshot = ctx.settings.read();
    let shared_key = match (snapshot.shared_key, snapshot.shared_key_pending) {
        (Some(key), false) => key,
        _ => return Err(ApiError::Forbidden),
    };

    let provided_tag = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix(SCHEME))
        .map(|v| v.trim())
        .and_then(|v| URL_SAFE_NO_PAD.decode(v).ok())
        .ok_or(ApiError::Forbidden)?;

    let method = req.method().as_str().to_string();
    let uri = req.uri().path_and_query().map(|p| p.as_str()).unwrap_or("").to_string();

    let (parts, body) = req.into_parts();
    let body_bytes = to_bytes(body, MAX_BODY_BYTES).await.map_err(|_| ApiError::Forbidden)?;

    let expected = hmac_sha256(&shared_key, &[method.as_bytes(), uri.as_bytes(), &body_bytes]);
    if provided_tag.len() != expected.len() || provided_tag.ct_eq(&expected).unwrap_u8() != 1 {
        return Err(ApiError::Forbidden);
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture_queue::CaptureQueue;
    use crate::crypto::SharedSecret;
    use crate::settings::SettingsStore;
    use crate::status::StatusManager;
    use crate::wifi::{WifiDriver, WifiStateMachine};
    use axum::body::Body;
    use axum::http::Method;
    use axum::routing::post;
    use axum::{Extension, Router};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct NoopDriver;
    impl WifiDriver for NoopDriver {
        fn disconnect(&self) {}
        fn enable_network(&self, _: &str, _: &str) {}
        fn bind_process_to_network(&self) {}
        fn unbind_process(&self) {}
        fn forget_network(&self, _: &str) {}
    }

    fn context_with_key(key: [u8; 32], pending: bool) -> ApiContext {
        let settings = SettingsStore::open_in_memory().unwrap();
        settings.set_pending_shared_key(&SharedSecret(key)).unwrap();
        if !pending {
            settings.confirm_shared_key().unwrap();
        }
        ApiContext {
            settings: Arc::new(settings),
            status: Arc::new(StatusManager::new()),
            capture_queue: Arc::new(CaptureQueue::new(4, |_| {})),
            wifi: WifiStateMachine::new(Arc::new(NoopDriver)),
            media_root: std::env::temp_dir(),
        }
    }

    fn app(ctx: ApiContext) -> Router {
        Router::new()
            .route("/echo", post(|| async { "ok" }))
            .layer(axum::middleware::from_fn(require_hmac_auth))
            .layer(Extension(ctx))
    }

    #[tokio::test]
    async fn valid_hmac_is_accepted() {
        let key = [7u8; 32];
        let ctx = context_with_key(key, false);
        let body = b"hello".to_vec();
        let tag = hmac_sha256(&key, &[b"POST", b"/echo", &body]);
        let header = format!("{SCHEME} {}", URL_SAFE_NO_PAD.encode(tag));

        let response = app(ctx)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("Authorization", header)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_key_is_rejected() {
        let ctx = context_with_key([7u8; 32], false);
        let body = b"hello".to_vec();
        let tag = hmac_sha256(&[9u8; 32], &[b"POST", b"/echo", &body]);
        let header = format!("{SCHEME} {}", URL_SAFE_NO_PAD.encode(tag));

        let response = app(ctx)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("Authorization", header)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn pending_shared_key_rejects_every_request() {
        let key = [7u8; 32];
        let ctx = context_with_key(key, true);
        let body = b"hello".to_vec();
        let tag = hmac_sha256(&key, &[b"POST", b"/echo", &body]);
        let header = format!("{SCHEME} {}", URL_SAFE_NO_PAD.encode(tag));

        let response = app(ctx)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("Authorization", header)
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn missing_header_is_rejected() {
        let ctx = context_with_key([7u8; 32], false);
        let response = app(ctx)
            .oneshot(Request::builder().method(Method::POST).uri("/echo").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn wrong_scheme_name_is_rejected() {
        let key = [7u8; 32];
        let ctx = context_with_key(key, false);
        let tag = hmac_sha256(&key, &[b"POST", b"/echo", b""]);
        let header = format!("bearer {}", URL_SAFE_NO_PAD.encode(tag));

        let response = app(ctx)
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("Authorization", header)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::FORBIDDEN);
    }
}
