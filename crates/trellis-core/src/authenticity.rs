// crates/trellis-core/src/authenticity.rs
// ============================================================================
// Module: Authenticity Filter
// Description: Cross-site request forgery check for state-changing requests.
// Purpose: Reject unsafe requests that do not echo the session authenticity token.
// Dependencies: axum, url
// ============================================================================

//! ## Overview
//! [`require_authenticity_token`] is an axum middleware for routes that change
//! state. Safe methods pass through. Other methods must carry the session token
//! either in the `x-authenticity-token` header or in the `authenticityToken`
//! field of a URL-encoded form body; otherwise the request is answered with
//! `403 Forbidden`. The middleware relies on the session layer being installed
//! outside of it.

use axum::body::Body;
use axum::extract::Request;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;

use crate::session::HttpContext;
use crate::session::RequestContext;

/// Form field carrying the authenticity token.
pub const AUTHENTICITY_FIELD: &str = "authenticityToken";
/// Header carrying the authenticity token.
pub const AUTHENTICITY_HEADER: &str = "x-authenticity-token";
/// Maximum form body buffered while looking for the token.
const MAX_FORM_BYTES: usize = 64 * 1024;
/// Content type of URL-encoded forms.
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Rejects unsafe requests lacking a valid authenticity token.
pub async fn require_authenticity_token(
    context: HttpContext,
    request: Request,
    next: Next,
) -> Response {
    if is_safe(request.method()) {
        return next.run(request).await;
    }
    let session = context.session();

    let header_candidate = request
        .headers()
        .get(AUTHENTICITY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    if let Some(candidate) = header_candidate {
        if session.verify_authenticity_token(&candidate) {
            return next.run(request).await;
        }
        return forbidden();
    }

    let is_form = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(FORM_CONTENT_TYPE));
    if !is_form {
        return forbidden();
    }

    let (parts, body) = request.into_parts();
    let Ok(bytes) = axum::body::to_bytes(body, MAX_FORM_BYTES).await else {
        return (StatusCode::PAYLOAD_TOO_LARGE, "form body too large").into_response();
    };
    let candidate = url::form_urlencoded::parse(&bytes)
        .find(|(key, _)| key == AUTHENTICITY_FIELD)
        .map(|(_, value)| value.into_owned());
    match candidate {
        Some(candidate) if session.verify_authenticity_token(&candidate) => {
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        _ => forbidden(),
    }
}

/// Returns true for methods that must not change state.
fn is_safe(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE)
}

/// Builds the rejection response.
fn forbidden() -> Response {
    (StatusCode::FORBIDDEN, "invalid authenticity token").into_response()
}
