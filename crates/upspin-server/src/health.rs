//! The unauthenticated `/healthz` liveness endpoint (§2.1), mounted
//! alongside the authenticated `/api` surface.

use axum::{Router, routing::get};

pub fn router() -> Router {
    Router::new().route("/healthz", get(|| async { "ok" }))
}
