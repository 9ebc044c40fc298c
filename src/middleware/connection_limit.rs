//! Connection limit middleware for WebSocket upgrades
//!
//! Enforces two caps before a socket is accepted:
//! - the server-wide maximum number of concurrent WebSocket sessions
//! - the per-IP maximum
//!
//! Plain HTTP requests pass through untouched; only upgrade requests are
//! counted. The acquired slot travels to the handler as a [`ClientIp`]
//! extension, and the handler releases it when the socket closes.
//!
//! # Example
//!
//! ```ignore
//! use axum::Router;
//! use callbridge_gateway::middleware::connection_limit_middleware;
//!
//! let app = Router::new()
//!     .route("/media", get(media_handler))
//!     .layer(axum::middleware::from_fn_with_state(
//!         state.clone(),
//!         connection_limit_middleware,
//!     ));
//! ```

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::state::{AppState, ConnectionLimitError};

/// Extension type carrying the client IP to the handler so it can release
/// the connection slot when the socket closes.
#[derive(Clone, Debug)]
pub struct ClientIp(pub IpAddr);

/// Middleware enforcing the WebSocket connection caps.
///
/// Returns 503 Service Unavailable when the global cap is reached and
/// 429 Too Many Requests when the per-IP cap is reached. On success the
/// request proceeds with a [`ClientIp`] extension attached.
pub async fn connection_limit_middleware(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let is_ws_upgrade = request
        .headers()
        .get("upgrade")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    if !is_ws_upgrade {
        return next.run(request).await;
    }

    let client_ip = addr.ip();

    match state.try_acquire_connection(client_ip) {
        Ok(()) => {
            // The handler owns the slot from here and releases it on close.
            request.extensions_mut().insert(ClientIp(client_ip));
            next.run(request).await
        }
        Err(ConnectionLimitError::GlobalLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting connection: global limit reached"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "Server at capacity. Please try again later.",
            )
                .into_response()
        }
        Err(ConnectionLimitError::PerIpLimitReached) => {
            tracing::warn!(
                ip = %client_ip,
                "Rejecting connection: per-IP limit reached"
            );
            (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many connections from your IP address.",
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Environment, ServerConfig, TimingPolicy};
    use std::net::Ipv4Addr;

    fn test_config(
        max_websocket_connections: Option<usize>,
        max_connections_per_ip: u32,
    ) -> ServerConfig {
        ServerConfig {
            host: "localhost".to_string(),
            port: 8080,
            tls: None,
            environment: Environment::Local,
            openai_api_key: Some("sk-test".to_string()),
            ai_realtime_url: "wss://example.invalid/v1/realtime".to_string(),
            ai_model: "test-model".to_string(),
            platform_base_url: "http://127.0.0.1:8081".to_string(),
            platform_api_key: None,
            allowed_ws_origins: Vec::new(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections,
            max_connections_per_ip,
            timing: TimingPolicy::default(),
            actions: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_per_ip_limit_and_release() {
        let state = AppState::new(test_config(Some(10), 3)).unwrap();
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 100).into();

        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&ip), 0);

        for expected in 1..=3 {
            assert!(state.try_acquire_connection(ip).is_ok());
            assert_eq!(state.ws_connection_count(), expected);
            assert_eq!(state.ip_connection_count(&ip), expected);
        }

        // Fourth connection from the same IP is refused.
        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );

        state.release_connection(ip);
        assert_eq!(state.ws_connection_count(), 2);
        assert_eq!(state.ip_connection_count(&ip), 2);

        assert!(state.try_acquire_connection(ip).is_ok());
        assert_eq!(state.ws_connection_count(), 3);
    }

    #[tokio::test]
    async fn test_global_limit() {
        let state = AppState::new(test_config(Some(5), 10)).unwrap();

        let ips: Vec<IpAddr> = (1..=6)
            .map(|i| Ipv4Addr::new(192, 168, 1, i).into())
            .collect();

        for ip in &ips[0..5] {
            assert!(state.try_acquire_connection(*ip).is_ok());
        }
        assert_eq!(state.ws_connection_count(), 5);

        assert_eq!(
            state.try_acquire_connection(ips[5]),
            Err(ConnectionLimitError::GlobalLimitReached)
        );

        state.release_connection(ips[0]);
        assert!(state.try_acquire_connection(ips[5]).is_ok());
    }

    #[tokio::test]
    async fn test_unlimited_when_no_global_cap() {
        let state = AppState::new(test_config(None, 2)).unwrap();
        let a: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();
        let b: IpAddr = Ipv4Addr::new(10, 0, 0, 2).into();

        assert!(state.try_acquire_connection(a).is_ok());
        assert!(state.try_acquire_connection(a).is_ok());
        assert_eq!(
            state.try_acquire_connection(a),
            Err(ConnectionLimitError::PerIpLimitReached)
        );
        // A different IP still gets in.
        assert!(state.try_acquire_connection(b).is_ok());
    }
}
