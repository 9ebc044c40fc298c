//! Browser playground WebSocket handler
//!
//! A developer console endpoint that exercises the same bridge machinery as
//! real calls without a telephony provider in the loop. The browser supplies
//! the agent configuration directly in its first frame, then speaks the
//! ordinary media-stream protocol: `start`, mu-law `media` frames, `mark`
//! echoes. No credit or business checks run here, and the endpoint is not
//! served in production.
//!
//! Playground bridges are registered under `play-` call ids so they can
//! never collide with a live call.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension,
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::external::AgentConfig;
use crate::middleware::ClientIp;
use crate::state::AppState;

use super::gateway::close_code;
use super::telephony::{SessionSeed, run_bridge_session};

/// Business id recorded on playground sessions
const PLAYGROUND_BUSINESS_ID: &str = "playground";

/// How long the browser may take to send its config frame
const CONFIG_TIMEOUT: Duration = Duration::from_secs(10);

/// First frame of a playground session.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum PlaygroundFrame {
    Config(PlaygroundConfig),
}

/// Agent settings supplied directly by the browser.
#[derive(Debug, Deserialize)]
struct PlaygroundConfig {
    instructions: String,
    #[serde(default)]
    voice: Option<String>,
    #[serde(default)]
    greeting: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    tools: Option<Vec<String>>,
}

impl From<PlaygroundConfig> for AgentConfig {
    fn from(config: PlaygroundConfig) -> Self {
        AgentConfig {
            instructions: config.instructions,
            voice: config.voice,
            greeting: config.greeting,
            model: config.model,
            tools: config.tools,
        }
    }
}

/// Playground WebSocket handler
///
/// Not served in production; elsewhere it upgrades and waits for the config
/// frame before running the standard bridge session.
pub async fn playground_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    if !state.config.playground_enabled() {
        return StatusCode::NOT_FOUND.into_response();
    }

    let ip = client_ip.map(|Extension(ClientIp(ip))| ip);
    info!("Playground connection upgrade requested");

    ws.on_upgrade(move |socket| handle_playground_socket(socket, state, ip))
}

async fn handle_playground_socket(
    mut socket: WebSocket,
    app_state: Arc<AppState>,
    client_ip: Option<IpAddr>,
) {
    match wait_for_config(&mut socket).await {
        Some(config) => {
            let seed = SessionSeed {
                business_id: PLAYGROUND_BUSINESS_ID.to_string(),
                agent_type: None,
                agent: config.into(),
                call_id_override: Some(format!("play-{}", Uuid::new_v4())),
                stream_id_override: None,
                customer_id: None,
                direction: None,
            };
            run_bridge_session(socket, &app_state, seed).await;
        }
        None => {
            let frame = CloseFrame {
                code: close_code::HANDSHAKE_TIMEOUT,
                reason: "no config frame".to_string().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
        }
    }

    if let Some(ip) = client_ip {
        app_state.release_connection(ip);
    }
}

/// Read frames until a valid config arrives. Returns `None` on timeout or
/// a closed socket.
async fn wait_for_config(socket: &mut WebSocket) -> Option<PlaygroundConfig> {
    let deadline = tokio::time::sleep(CONFIG_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            message = socket.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<PlaygroundFrame>(&text) {
                        Ok(PlaygroundFrame::Config(config)) => return Some(config),
                        Err(e) => {
                            warn!(error = %e, "Dropping frame that is not a playground config");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Playground socket closed before config");
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Playground socket error before config");
                    return None;
                }
            },
            _ = &mut deadline => {
                warn!("Playground config frame never arrived");
                return None;
            }
        }
    }
}
