// SPDX-License-Identifier: MIT OR Apache-2.0
//! Auth Gate (C9) wired as Axum middleware: validates the bearer token for
//! every non-exempt route and attaches the resulting identity to the
//! request's extensions for downstream handlers.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::sync::Arc;

use crate::{bearer_token, AppState, RequestIdentity};

/// Runs [`trac_authgate::AuthGate::authenticate`] against the request's
/// route and bearer token, short-circuiting with `401` on failure.
pub async fn auth_middleware(State(state): State<Arc<AppState>>, mut req: Request, next: Next) -> Response {
    let route = req.uri().path().to_string();
    let token = bearer_token(req.headers()).map(str::to_string);

    match state.auth.authenticate(&route, token.as_deref()) {
        Ok(identity) => {
            crate::log_request_identity(&identity);
            req.extensions_mut().insert(RequestIdentity(identity));
            next.run(req).await
        }
        Err(err) => {
            (err.code.http_status(), axum::Json(json!({ "code": err.code.code(), "message": err.message }))).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_strips_prefix() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn bearer_token_absent_without_header() {
        let headers = axum::http::HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
    }
}
