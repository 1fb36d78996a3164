//! HTTP/WS surface (C7): the panel WebSocket endpoint plus a liveness
//! health check. Origin checking is left permissive (§6) — axum's
//! `WebSocketUpgrade` performs no origin check by default, which is
//! exactly the accept-all posture specified.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::hub::Hub;

pub fn build_router(hub: Arc<Hub>, panel_path: &str) -> Router {
    Router::new()
        .route(panel_path, get(handle_panel))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// §4.3.3: the auth check happens before the upgrade is attempted, so
/// an unauthorized request never sees a 101 response.
async fn handle_panel(
    State(hub): State<Arc<Hub>>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !hub.panel_authorized(bearer_token(&headers)) {
        warn!("panel unauthorized");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    ws.on_upgrade(move |socket| async move {
        hub.run_panel_session(socket).await;
    })
    .into_response()
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_extracts_from_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc123"));
    }

    #[test]
    fn bearer_token_is_none_for_missing_or_malformed_header() {
        assert_eq!(bearer_token(&HeaderMap::new()), None);
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic abc123".parse().unwrap());
        assert_eq!(bearer_token(&headers), None);
    }
}
