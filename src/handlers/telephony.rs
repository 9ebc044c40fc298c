//! Telephony media-stream WebSocket handler
//!
//! The entry point for phone calls. Admission runs first (origin, business
//! id, credit, agent config); only an admitted socket gets to the handshake,
//! and only a completed handshake dials the AI leg. From there the socket is
//! split: a spawned sender task drains the bridge's outbound queue while the
//! read loop feeds decoded frames into the bridge.
//!
//! A socket arriving for a call whose bridge is in the degraded state does
//! not build a new bridge; it resumes the existing one.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Extension,
    extract::{
        Query, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, header},
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::bridge::{
    BridgeConfig, BridgeEvent, BridgeHandle, BridgeState, CallDirection, RealtimeBridge, Session,
};
use crate::core::realtime::AiClientConfig;
use crate::core::telephony::{TelephonyEvent, TelephonyOutbound, decode_telephony_event};
use crate::external::AgentConfig;
use crate::middleware::ClientIp;
use crate::state::AppState;

use super::gateway::{self, ConnectionRejected, close_code};

/// Queue depth for frames headed to the telephony socket
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

/// Telephony frames are tiny; anything near this size is garbage
const MAX_WS_FRAME_SIZE: usize = 64 * 1024;

/// Maximum WebSocket message size
const MAX_WS_MESSAGE_SIZE: usize = 64 * 1024;

/// How long the handshake may take to produce a `start` event
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Query parameters of the media endpoint
///
/// The platform injects these into the stream URL when it answers the call,
/// so they are authoritative where present; the `start` event fills in
/// whatever the URL left out.
#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    /// Business the call belongs to. Required; its absence closes with 4400.
    pub business_id: Option<String>,
    /// Agent flavor to resolve for this call
    pub agent_type: Option<String>,
    /// Caller identity, when the platform already knows it
    pub customer_id: Option<String>,
    /// Call id to register under, overriding the start event's
    pub call_id: Option<String>,
    /// Stream id, overriding the start event's
    pub stream_id: Option<String>,
    /// "inbound" or "outbound"
    pub direction: Option<String>,
}

/// Telephony media WebSocket handler
///
/// Upgrades the HTTP connection and hands the socket to the session driver.
/// The Origin header is captured here; it is gone once the upgrade
/// completes.
pub async fn telephony_media_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<MediaQuery>,
    headers: HeaderMap,
    client_ip: Option<Extension<ClientIp>>,
) -> Response {
    let origin = headers
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let ip = client_ip.map(|Extension(ClientIp(ip))| ip);

    info!(
        business_id = ?params.business_id,
        "Telephony media connection upgrade requested"
    );

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_media_socket(socket, state, origin, params, ip))
}

async fn handle_media_socket(
    mut socket: WebSocket,
    app_state: Arc<AppState>,
    origin: Option<String>,
    params: MediaQuery,
    client_ip: Option<IpAddr>,
) {
    let admitted = gateway::admit(
        &app_state.config,
        app_state.directory.as_ref(),
        app_state.meter.as_ref(),
        origin.as_deref(),
        params.business_id.as_deref(),
        params.agent_type.as_deref(),
    )
    .await;

    match admitted {
        Ok(agent) => {
            let seed = SessionSeed {
                business_id: params.business_id.unwrap_or_default(),
                agent_type: params.agent_type,
                agent,
                call_id_override: params.call_id,
                stream_id_override: params.stream_id,
                customer_id: params.customer_id,
                direction: params.direction,
            };
            run_bridge_session(socket, &app_state, seed).await;
        }
        Err(rejection) => {
            warn!(%rejection, "Rejecting telephony connection");
            close_with(&mut socket, rejection.close_code(), &rejection.to_string()).await;
        }
    }

    if let Some(ip) = client_ip {
        app_state.release_connection(ip);
    }
}

/// Everything admission established before the `start` event arrives.
pub(crate) struct SessionSeed {
    pub business_id: String,
    pub agent_type: Option<String>,
    pub agent: AgentConfig,
    /// Replaces the telephony call id as the registry key when set. The
    /// playground uses this to keep its sessions apart from real calls.
    pub call_id_override: Option<String>,
    /// Replaces the start event's stream id when set
    pub stream_id_override: Option<String>,
    pub customer_id: Option<String>,
    pub direction: Option<String>,
}

/// Drive one admitted socket through handshake, bridge launch, and the media
/// read loop. Consumes the socket.
pub(crate) async fn run_bridge_session(
    mut socket: WebSocket,
    app_state: &Arc<AppState>,
    seed: SessionSeed,
) {
    let start = match wait_for_start(&mut socket).await {
        Ok(start) => start,
        Err(HandshakeFailure::Timeout) => {
            warn!(
                business_id = %seed.business_id,
                "No start event before the handshake deadline"
            );
            close_with(&mut socket, close_code::HANDSHAKE_TIMEOUT, "no start event").await;
            return;
        }
        Err(HandshakeFailure::SocketClosed) => {
            debug!(business_id = %seed.business_id, "Socket closed during handshake");
            return;
        }
    };

    let call_id = seed
        .call_id_override
        .unwrap_or_else(|| start.call_sid.clone());

    // A second socket for a degraded call resumes the existing bridge; a
    // second socket for a live call is refused.
    if let Some(existing) = app_state.registry.get(&call_id) {
        match existing.state() {
            BridgeState::DegradedReconnecting => {
                resume_bridge(socket, existing, start.stream_sid).await;
                return;
            }
            BridgeState::Closed => {
                // Dead entry the sweep has not caught yet; the new bridge
                // replaces it.
            }
            _ => {
                let rejection = ConnectionRejected::DuplicateCall(call_id);
                warn!(%rejection, "Rejecting telephony connection");
                close_with(&mut socket, rejection.close_code(), &rejection.to_string()).await;
                return;
            }
        }
    }

    let customer_id = seed
        .customer_id
        .or_else(|| start.custom_parameters.get("customer_id").cloned());
    let direction = CallDirection::parse(
        seed.direction
            .as_deref()
            .or_else(|| start.custom_parameters.get("direction").map(String::as_str)),
    );

    let mut session = Session::new(
        call_id,
        seed.business_id,
        seed.agent_type,
        customer_id,
        direction,
    );
    session.stream_id = Some(seed.stream_id_override.unwrap_or(start.stream_sid));

    let Some(api_key) = app_state.config.openai_api_key.clone() else {
        // Startup validation requires the key; an empty one here means the
        // process is misconfigured beyond this one call.
        close_with(
            &mut socket,
            close_code::UPSTREAM_FAILURE,
            "gateway misconfigured",
        )
        .await;
        return;
    };
    let model = seed
        .agent
        .model
        .clone()
        .unwrap_or_else(|| app_state.config.ai_model.clone());
    let ai = AiClientConfig::new(app_state.config.ai_realtime_url.clone(), api_key, model);

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let bridge_config = BridgeConfig {
        session,
        agent: seed.agent,
        ai,
        timing: app_state.config.timing.clone(),
        dispatcher: app_state.dispatcher.clone(),
        meter: app_state.meter.clone(),
        call_log: app_state.call_log.clone(),
    };

    let handle =
        match RealtimeBridge::launch(bridge_config, app_state.registry.clone(), outbound_tx).await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(error = %e, "Bridge launch failed");
                close_with(
                    &mut socket,
                    close_code::UPSTREAM_FAILURE,
                    "AI connection failed",
                )
                .await;
                return;
            }
        };

    let (ws_sender, mut ws_receiver) = socket.split();
    let sender_task = tokio::spawn(pump_outbound(outbound_rx, ws_sender));

    read_telephony_frames(&mut ws_receiver, &handle).await;

    let _ = handle.send_event(BridgeEvent::TelephonyClosed).await;
    sender_task.abort();
}

/// Attach a fresh socket to a degraded bridge.
async fn resume_bridge(socket: WebSocket, handle: BridgeHandle, stream_sid: String) {
    info!(
        call_id = %handle.call_id(),
        stream_sid = %stream_sid,
        "Resuming degraded bridge"
    );

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
    let (ws_sender, mut ws_receiver) = socket.split();
    let sender_task = tokio::spawn(pump_outbound(outbound_rx, ws_sender));

    let reattach = BridgeEvent::TelephonyReattached {
        stream_sid,
        outbound: outbound_tx,
    };
    if handle.send_event(reattach).await.is_err() {
        sender_task.abort();
        return;
    }

    read_telephony_frames(&mut ws_receiver, &handle).await;

    let _ = handle.send_event(BridgeEvent::TelephonyClosed).await;
    sender_task.abort();
}

struct StartInfo {
    stream_sid: String,
    call_sid: String,
    custom_parameters: HashMap<String, String>,
}

enum HandshakeFailure {
    Timeout,
    SocketClosed,
}

/// Read frames until the `start` event arrives.
///
/// `connected` is consumed, stray pre-start events are dropped, and
/// undecodable frames are logged and skipped.
async fn wait_for_start(socket: &mut WebSocket) -> Result<StartInfo, HandshakeFailure> {
    let deadline = tokio::time::sleep(HANDSHAKE_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            message = socket.next() => match message {
                Some(Ok(Message::Text(text))) => match decode_telephony_event(&text) {
                    Ok(TelephonyEvent::Connected { protocol, .. }) => {
                        debug!(protocol = ?protocol, "Telephony handshake connected");
                    }
                    Ok(TelephonyEvent::Start { stream_sid, call_sid, custom_parameters }) => {
                        return Ok(StartInfo { stream_sid, call_sid, custom_parameters });
                    }
                    Ok(other) => {
                        debug!(kind = other.kind(), "Ignoring pre-start event");
                    }
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable handshake frame");
                    }
                },
                Some(Ok(Message::Close(_))) | None => return Err(HandshakeFailure::SocketClosed),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "Socket error during handshake");
                    return Err(HandshakeFailure::SocketClosed);
                }
            },
            _ = &mut deadline => return Err(HandshakeFailure::Timeout),
        }
    }
}

/// Forward decoded telephony frames into the bridge until the socket or the
/// bridge goes away. An undecodable frame is dropped; the call stays up.
async fn read_telephony_frames(receiver: &mut SplitStream<WebSocket>, handle: &BridgeHandle) {
    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match decode_telephony_event(&text) {
                Ok(event) => {
                    if handle
                        .send_event(BridgeEvent::Telephony(event))
                        .await
                        .is_err()
                    {
                        debug!(call_id = %handle.call_id(), "Bridge gone, stopping reads");
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        call_id = %handle.call_id(),
                        error = %e,
                        "Dropping undecodable telephony frame"
                    );
                }
            },
            Ok(Message::Binary(_)) => {
                debug!(call_id = %handle.call_id(), "Ignoring binary telephony frame");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(call_id = %handle.call_id(), "Telephony socket closed");
                break;
            }
            Err(e) => {
                warn!(call_id = %handle.call_id(), error = %e, "Telephony socket error");
                break;
            }
        }
    }
}

/// Serialize bridge frames onto the socket.
///
/// Runs as its own task so a slow socket never blocks the bridge loop; the
/// bridge uses try_send on its side and drops frames when this queue fills.
async fn pump_outbound(
    mut rx: mpsc::Receiver<TelephonyOutbound>,
    mut sender: SplitSink<WebSocket, Message>,
) {
    while let Some(frame) = rx.recv().await {
        match frame.to_json() {
            Ok(json) => {
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to serialize outbound frame");
            }
        }
    }
    // The bridge dropped its sender; finish the socket politely.
    let _ = sender.send(Message::Close(None)).await;
}

/// Close the socket with a policy code before any bridge exists.
async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let frame = CloseFrame {
        code,
        reason: reason.to_string().into(),
    };
    let _ = socket.send(Message::Close(Some(frame))).await;
}
