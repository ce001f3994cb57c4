//! Route definitions for the Haven service.
//!
//! Provides the chat endpoint, a health check, static asset fallback, and
//! the CORS / compression / request-log / HTTPS-redirect middleware stack.

use crate::dispatcher::ChatService;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use haven_common::config::{Config, ServerConfig};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ChatService>,
    pub trusted_proxy: Option<IpAddr>,
}

/// Chat request body.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Chat response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub response: String,
}

/// Error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Resolve the client identifier for a request.
///
/// The peer address is the identifier. When the request comes through the
/// configured trusted reverse proxy, the first `X-Forwarded-For` entry is
/// used instead. A request with no resolvable peer falls back to a
/// distinguishing placeholder.
fn client_identifier(
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    trusted_proxy: Option<IpAddr>,
) -> String {
    if let (Some(proxy), Some(peer)) = (trusted_proxy, peer) {
        if peer.ip() == proxy {
            if let Some(forwarded) = headers
                .get("x-forwarded-for")
                .and_then(|value| value.to_str().ok())
            {
                if let Some(first) = forwarded.split(',').next().map(str::trim) {
                    if !first.is_empty() {
                        return first.to_string();
                    }
                }
            }
        }
    }

    peer.map_or_else(|| "unknown".to_string(), |peer| peer.ip().to_string())
}

/// Handle one chat message.
async fn chat_handler(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, (StatusCode, Json<ErrorResponse>)> {
    let identifier = client_identifier(&headers, connect_info.map(|info| info.0), state.trusted_proxy);

    let Json(request) = payload.map_err(|err| {
        tracing::warn!(identifier = %identifier, error = %err, "Invalid request body");
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Invalid request body".into(),
            }),
        )
    })?;

    match state.service.handle_message(&identifier, &request.message).await {
        Ok(reply) => Ok(Json(ChatResponse { response: reply })),
        Err(err) => {
            let status = StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            if status.is_server_error() {
                tracing::error!(identifier = %identifier, error = %err, "Chat request failed");
            } else {
                tracing::warn!(identifier = %identifier, error = %err, "Chat request rejected");
            }
            Err((
                status,
                Json(ErrorResponse {
                    error: err.to_string(),
                }),
            ))
        }
    }
}

/// Service liveness.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".into(),
        service: env!("CARGO_PKG_NAME").into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Redirect plain-HTTP requests to HTTPS, judged by `X-Forwarded-Proto`.
async fn https_redirect(request: Request, next: Next) -> Response {
    let forwarded_proto = request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok());

    if forwarded_proto == Some("http") {
        if let Some(host) = request
            .headers()
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
        {
            let location = format!("https://{}{}", host, request.uri());
            return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)])
                .into_response();
        }
    }

    next.run(request).await
}

/// Build the CORS layer from configured origins.
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let methods = [Method::GET, Method::POST];

    if server.allowed_origins.is_empty() {
        tracing::warn!("No allowed origins configured; CORS will accept any origin");
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = server
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "Ignoring unparseable CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(methods)
        .allow_headers(Any)
}

/// Build the complete router with all routes and middleware.
pub fn build_router(config: &Config, state: AppState) -> Router {
    let mut router = Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .fallback_service(ServeDir::new(&config.server.static_dir))
        .layer(cors_layer(&config.server))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    if config.server.enforce_https {
        router = router.layer(middleware::from_fn(https_redirect));
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(addr: &str) -> Option<SocketAddr> {
        Some(addr.parse().unwrap())
    }

    fn forwarded_headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", value.parse().unwrap());
        headers
    }

    #[test]
    fn identifier_is_peer_ip_without_proxy() {
        let id = client_identifier(&HeaderMap::new(), peer("10.0.0.5:50000"), None);
        assert_eq!(id, "10.0.0.5");
    }

    #[test]
    fn identifier_falls_back_when_peer_unknown() {
        let id = client_identifier(&HeaderMap::new(), None, None);
        assert_eq!(id, "unknown");
    }

    #[test]
    fn identifier_uses_forwarded_for_from_trusted_proxy() {
        let proxy: IpAddr = "192.168.1.1".parse().unwrap();
        let headers = forwarded_headers("203.0.113.9, 192.168.1.1");

        let id = client_identifier(&headers, peer("192.168.1.1:40000"), Some(proxy));
        assert_eq!(id, "203.0.113.9");
    }

    #[test]
    fn identifier_ignores_forwarded_for_from_untrusted_peer() {
        let proxy: IpAddr = "192.168.1.1".parse().unwrap();
        let headers = forwarded_headers("203.0.113.9");

        let id = client_identifier(&headers, peer("10.0.0.5:40000"), Some(proxy));
        assert_eq!(id, "10.0.0.5");
    }

    #[test]
    fn identifier_ignores_empty_forwarded_for() {
        let proxy: IpAddr = "192.168.1.1".parse().unwrap();
        let headers = forwarded_headers("  ");

        let id = client_identifier(&headers, peer("192.168.1.1:40000"), Some(proxy));
        assert_eq!(id, "192.168.1.1");
    }
}
