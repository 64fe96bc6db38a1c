//! Shared-token check in front of every relay route.

use std::collections::HashMap;

use axum::{
    Json,
    extract::{Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::http::AppState;

/// Header carrying the token.
pub const TOKEN_HEADER: &str = "x-auth-token";

/// Query parameter carrying the token (browsers and WebSocket handshakes).
pub const TOKEN_QUERY: &str = "token";

/// Token presented by the request, header first.
#[must_use]
pub fn presented_token(request: &Request) -> Option<String> {
    if let Some(value) = request
        .headers()
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        return Some(value.to_owned());
    }

    Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(mut params)| params.remove(TOKEN_QUERY))
}

/// Middleware rejecting requests without the configured token.
pub async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    match presented_token(&request) {
        Some(token) if token == *state.token => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "rejected unauthenticated request");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Unauthorized" })),
            )
                .into_response()
        }
    }
}
