//! Auth boundary stub (spec §1 Non-goals: "authentication/authorization
//! policy and token verification... the engine consumes already-validated
//! identity and scope"). This middleware is the seam where a real
//! deployment would plug in token verification; here it only threads
//! whatever `Authorization` header arrived into a request extension so
//! downstream handlers have a consistent place to read identity from,
//! without this crate ever judging whether it's valid.

use axum::body::Body;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

/// Caller identity as seen at the edge. A stub: always present, never
/// checked. A real deployment replaces this middleware with one that
/// rejects missing/invalid tokens before handlers ever run.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub bearer_token: Option<String>,
}

pub async fn stub_identity(mut req: Request<Body>, next: Next) -> Response {
    let bearer_token = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    req.extensions_mut().insert(CallerIdentity { bearer_token });
    next.run(req).await
}
