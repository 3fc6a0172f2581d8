//! Inter-service authentication.
//!
//! Every protected route requires the shared `SERVICE_AUTH_TOKEN` as a
//! bearer credential. The policy is a pure function from (configured
//! digest, presented token) to an [`AuthDecision`], so the accept,
//! dev-mode, and reject paths are unit tested without spinning up a
//! router; the middleware itself only extracts the header and acts on
//! the decision.

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Outcome of checking one request against the shared-secret policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    /// A token is configured and the request presented the right one.
    Accept,
    /// No token is configured: development mode lets the request pass,
    /// with a warning per request path.
    AcceptDevMode,
    /// A token is configured and the request's credential is missing
    /// or wrong.
    Reject,
}

/// The bearer credential from an `Authorization` header, if present
/// and well-formed.
pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// Apply the policy. `expected_hash` is the startup-computed SHA-256
/// digest of the configured token (`None` = dev mode). The presented
/// token is hashed to the same fixed length before a constant-time
/// comparison, so neither content nor length leaks through timing.
pub fn decide(expected_hash: Option<&[u8]>, bearer: Option<&str>) -> AuthDecision {
    let Some(expected) = expected_hash else {
        return AuthDecision::AcceptDevMode;
    };
    let Some(token) = bearer else {
        return AuthDecision::Reject;
    };
    let presented = Sha256::digest(token.as_bytes());
    if bool::from(presented.as_slice().ct_eq(expected)) {
        AuthDecision::Accept
    } else {
        AuthDecision::Reject
    }
}

/// Axum middleware for protected routes. Attach via
/// `axum::middleware::from_fn_with_state`.
pub async fn require_service_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let decision = decide(state.auth_token_hash.as_deref(), extract_bearer(req.headers()));
    match decision {
        AuthDecision::Accept => next.run(req).await,
        AuthDecision::AcceptDevMode => {
            tracing::warn!(
                path = %req.uri().path(),
                "service auth disabled — set SERVICE_AUTH_TOKEN for production"
            );
            next.run(req).await
        }
        AuthDecision::Reject => (
            StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({ "error": "invalid or missing service token" })),
        )
            .into_response(),
    }
}

/// Compute the startup digest for a configured token.
pub fn token_hash(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn extract_bearer_happy_path() {
        assert_eq!(extract_bearer(&headers_with("Bearer s3cret")), Some("s3cret"));
    }

    #[test]
    fn extract_bearer_missing_header() {
        assert_eq!(extract_bearer(&HeaderMap::new()), None);
    }

    #[test]
    fn extract_bearer_rejects_other_schemes() {
        assert_eq!(extract_bearer(&headers_with("Basic dXNlcjpwdw==")), None);
        // Scheme prefix is case-sensitive per RFC 6750's common usage here.
        assert_eq!(extract_bearer(&headers_with("bearer s3cret")), None);
    }

    #[test]
    fn dev_mode_accepts_anything() {
        assert_eq!(decide(None, None), AuthDecision::AcceptDevMode);
        assert_eq!(decide(None, Some("whatever")), AuthDecision::AcceptDevMode);
    }

    #[test]
    fn correct_token_accepted() {
        let hash = token_hash("s3cret");
        assert_eq!(decide(Some(&hash), Some("s3cret")), AuthDecision::Accept);
    }

    #[test]
    fn wrong_or_missing_token_rejected() {
        let hash = token_hash("s3cret");
        assert_eq!(decide(Some(&hash), Some("nope")), AuthDecision::Reject);
        assert_eq!(decide(Some(&hash), Some("")), AuthDecision::Reject);
        assert_eq!(decide(Some(&hash), None), AuthDecision::Reject);
    }
}
