//! The realtime bridge.
//!
//! One [`RealtimeBridge`] relays one live call between the telephony media
//! stream and the AI realtime session. All of its state is owned by a single
//! spawned loop; transport handlers and API readers interact with it only
//! through a [`BridgeHandle`], which queues events and reads mirrored
//! snapshots. Nothing outside the loop ever touches call state directly.
//!
//! # Lifecycle
//!
//! `Init -> ConnectingAi -> Active -> Closing -> Closed`, with an optional
//! `DegradedReconnecting` detour when the telephony socket drops mid-call.
//! AI-side loss is terminal: the conversation context lives in the AI
//! session and cannot be rebuilt, so the bridge closes instead of retrying.
//!
//! # Failure containment
//!
//! A single bad frame on either leg is counted, logged and dropped. Only
//! transport loss, caller hangup, an explicit disconnect or the inactivity
//! deadline end a session.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use super::registry::BridgeRegistry;
use super::session::{
    AudioFrameBuffer, BridgeMetrics, BridgeState, CallDirection, MetricsSnapshot, SequenceTracker,
    Session,
};
use crate::config::TimingPolicy;
use crate::core::audio::{AudioCodecAdapter, AudioFormat};
use crate::core::dispatch::{FunctionCallDispatcher, FunctionCallRequest};
use crate::core::realtime::{
    AiClientConfig, AiRealtimeClient, AiSessionConfig, AiTransportEvent, ApiError, ClientEvent,
    ResponseInfo, ServerEvent, TransportError,
};
use crate::core::telephony::{MediaTrack, TelephonyEvent, TelephonyOutbound};
use crate::external::{
    AgentConfig, CallLogSink, CallRecord, CreditMeter, TranscriptLine, UsageReport,
};

/// Capacity of the inbound event queue feeding the bridge loop.
const INBOUND_QUEUE_CAPACITY: usize = 256;

/// Capacity of the AI transport's event queue into the bridge loop.
const AI_EVENT_QUEUE_CAPACITY: usize = 256;

/// Voice used when the agent configuration names none.
const DEFAULT_VOICE: &str = "alloy";

// ============================================================================
// Errors and reasons
// ============================================================================

/// Failures starting or reaching a bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("AI transport: {0}")]
    Transport(#[from] TransportError),

    /// The bridge loop has already exited.
    #[error("bridge for call `{0}` is gone")]
    Gone(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Why a bridge shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The telephony side sent `stop`.
    CallerHangup,
    /// The telephony socket dropped and was not reattached in time.
    TelephonyLost,
    /// The AI transport closed or errored.
    AiConnectionLost,
    /// No traffic in either direction for the inactivity window.
    InactivityTimeout,
    /// The registry reaper collected a stale bridge.
    Reaped,
    /// The process is shutting down.
    ServerShutdown,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DisconnectReason::CallerHangup => "caller_hangup",
            DisconnectReason::TelephonyLost => "telephony_lost",
            DisconnectReason::AiConnectionLost => "ai_connection_lost",
            DisconnectReason::InactivityTimeout => "inactivity_timeout",
            DisconnectReason::Reaped => "reaped",
            DisconnectReason::ServerShutdown => "server_shutdown",
        };
        write!(f, "{label}")
    }
}

// ============================================================================
// Events
// ============================================================================

/// Inputs the bridge loop consumes, queued by transport handlers.
#[derive(Debug)]
pub enum BridgeEvent {
    /// A decoded frame from the telephony socket.
    Telephony(TelephonyEvent),
    /// The telephony socket closed or errored.
    TelephonyClosed,
    /// A replacement telephony socket attached mid-call.
    TelephonyReattached {
        stream_sid: String,
        outbound: mpsc::Sender<TelephonyOutbound>,
    },
    /// Ask the bridge to shut down.
    Disconnect(DisconnectReason),
}

// ============================================================================
// Shared state and handle
// ============================================================================

/// State mirrored out of the bridge loop for registry and API readers.
pub struct BridgeShared {
    session: RwLock<Session>,
    metrics: RwLock<MetricsSnapshot>,
    last_traffic: Mutex<Instant>,
    teardown_done: AtomicBool,
}

impl BridgeShared {
    fn new(session: Session) -> Self {
        BridgeShared {
            session: RwLock::new(session),
            metrics: RwLock::new(MetricsSnapshot::default()),
            last_traffic: Mutex::new(Instant::now()),
            teardown_done: AtomicBool::new(false),
        }
    }
}

/// Shareable handle to a running bridge.
///
/// Cloning is cheap; every clone addresses the same bridge loop.
#[derive(Clone)]
pub struct BridgeHandle {
    call_id: String,
    inbound: mpsc::Sender<BridgeEvent>,
    shared: Arc<BridgeShared>,
}

impl BridgeHandle {
    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub fn state(&self) -> BridgeState {
        self.shared.session.read().state
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        *self.shared.metrics.read()
    }

    /// Time since the last frame in either direction.
    pub fn idle_for(&self) -> Duration {
        self.shared.last_traffic.lock().elapsed()
    }

    /// Queue an event for the bridge loop.
    pub async fn send_event(&self, event: BridgeEvent) -> BridgeResult<()> {
        self.inbound
            .send(event)
            .await
            .map_err(|_| BridgeError::Gone(self.call_id.clone()))
    }

    /// Ask the bridge to shut down. Idempotent and safe from any task at any
    /// time, including concurrently; cleanup runs exactly once.
    pub async fn disconnect(&self, reason: DisconnectReason) {
        let _ = self.inbound.send(BridgeEvent::Disconnect(reason)).await;
    }

    /// Point-in-time view for listings.
    pub fn snapshot(&self) -> BridgeSnapshot {
        let session = self.shared.session.read();
        BridgeSnapshot {
            call_id: session.call_id.clone(),
            session_id: session.session_id,
            business_id: session.business_id.clone(),
            agent_type: session.agent_type.clone(),
            direction: session.direction,
            state: session.state,
            age_secs: session.age_secs(),
            idle_secs: self.shared.last_traffic.lock().elapsed().as_secs(),
            metrics: *self.shared.metrics.read(),
        }
    }
}

/// Serializable view of one bridge.
#[derive(Debug, Clone, Serialize)]
pub struct BridgeSnapshot {
    pub call_id: String,
    pub session_id: Uuid,
    pub business_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    pub direction: CallDirection,
    pub state: BridgeState,
    pub age_secs: u64,
    pub idle_secs: u64,
    pub metrics: MetricsSnapshot,
}

// ============================================================================
// Configuration
// ============================================================================

/// Everything a bridge needs to run one call.
pub struct BridgeConfig {
    /// Call identity, as assembled by the connection gateway
    pub session: Session,
    /// Resolved agent configuration
    pub agent: AgentConfig,
    /// AI transport credentials and endpoint
    pub ai: AiClientConfig,
    pub timing: TimingPolicy,
    pub dispatcher: Arc<FunctionCallDispatcher>,
    pub meter: Arc<dyn CreditMeter>,
    pub call_log: Arc<dyn CallLogSink>,
}

// ============================================================================
// Bridge
// ============================================================================

/// The per-call relay loop. Constructed through [`RealtimeBridge::launch`].
pub struct RealtimeBridge {
    call_id: String,
    stream_sid: String,
    timing: TimingPolicy,
    shared: Arc<BridgeShared>,
    registry: BridgeRegistry,
    dispatcher: Arc<FunctionCallDispatcher>,
    meter: Arc<dyn CreditMeter>,
    call_log: Arc<dyn CallLogSink>,

    ai: Arc<AiRealtimeClient>,
    inbound_rx: mpsc::Receiver<BridgeEvent>,
    ai_rx: mpsc::Receiver<AiTransportEvent>,
    telephony: Option<mpsc::Sender<TelephonyOutbound>>,

    metrics: BridgeMetrics,
    buffer: AudioFrameBuffer,
    gaps: SequenceTracker,
    transcript: Vec<TranscriptLine>,
    agent_line: String,
    turn_count: u64,
    reattach_deadline: Option<Instant>,
    reattach_attempts: u32,
}

impl RealtimeBridge {
    /// Connect the AI leg and start the bridge loop.
    ///
    /// On success the bridge is registered under its call id and `Active`,
    /// and the returned handle is the only way to reach it. On failure
    /// nothing was registered and the telephony socket still belongs to the
    /// caller.
    pub async fn launch(
        config: BridgeConfig,
        registry: BridgeRegistry,
        telephony: mpsc::Sender<TelephonyOutbound>,
    ) -> BridgeResult<BridgeHandle> {
        let BridgeConfig {
            mut session,
            agent,
            ai,
            timing,
            dispatcher,
            meter,
            call_log,
        } = config;

        let call_id = session.call_id.clone();
        let business_id = session.business_id.clone();
        let stream_sid = session.stream_id.clone().unwrap_or_default();

        session.state = BridgeState::ConnectingAi;
        tracing::info!(call_id = %call_id, model = %ai.model, "Connecting AI leg");

        let tools = dispatcher.tool_definitions_for(agent.tools.as_deref());
        let voice = agent.voice.clone().unwrap_or_else(|| DEFAULT_VOICE.to_string());
        let session_config = AiSessionConfig::for_call(agent.instructions.clone(), voice, tools);

        let (ai_tx, ai_rx) = mpsc::channel(AI_EVENT_QUEUE_CAPACITY);
        let client = Arc::new(AiRealtimeClient::connect(&ai, session_config, ai_tx).await?);

        if let Some(greeting) = &agent.greeting {
            client
                .send(ClientEvent::response_create(Some(greeting.clone())))
                .await?;
        }

        session.state = BridgeState::Active;
        let shared = Arc::new(BridgeShared::new(session));

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let handle = BridgeHandle {
            call_id: call_id.clone(),
            inbound: inbound_tx,
            shared: shared.clone(),
        };
        registry.insert(handle.clone());

        // Call-start logging stays off the setup path.
        {
            let call_log = call_log.clone();
            let call_id = call_id.clone();
            let business_id = business_id.clone();
            tokio::spawn(async move {
                if let Err(e) = call_log.call_started(&call_id, &business_id).await {
                    tracing::warn!(call_id = %call_id, error = %e, "Call start log failed");
                }
            });
        }

        let bridge = RealtimeBridge {
            call_id: call_id.clone(),
            stream_sid,
            buffer: AudioFrameBuffer::new(timing.audio_buffer_frames),
            timing,
            shared,
            registry,
            dispatcher,
            meter,
            call_log,
            ai: client,
            inbound_rx,
            ai_rx,
            telephony: Some(telephony),
            metrics: BridgeMetrics::default(),
            gaps: SequenceTracker::new(),
            transcript: Vec::new(),
            agent_line: String::new(),
            turn_count: 0,
            reattach_deadline: None,
            reattach_attempts: 0,
        };
        tokio::spawn(bridge.run());

        tracing::info!(call_id = %call_id, "Bridge active");
        Ok(handle)
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.timing.activity_check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let reason = loop {
            tokio::select! {
                Some(event) = self.inbound_rx.recv() => {
                    let outcome = self.handle_event(event);
                    self.publish_metrics();
                    if let Some(reason) = outcome {
                        break reason;
                    }
                }
                Some(event) = self.ai_rx.recv() => {
                    let outcome = self.handle_ai_event(event);
                    self.publish_metrics();
                    if let Some(reason) = outcome {
                        break reason;
                    }
                }
                _ = ticker.tick() => {
                    if let Some(reason) = self.check_deadlines() {
                        break reason;
                    }
                }
            }
        };

        self.teardown(reason).await;
    }

    // ------------------------------------------------------------------
    // Telephony-side events
    // ------------------------------------------------------------------

    fn handle_event(&mut self, event: BridgeEvent) -> Option<DisconnectReason> {
        match event {
            BridgeEvent::Telephony(frame) => self.handle_telephony(frame),
            BridgeEvent::TelephonyClosed => self.on_telephony_closed(),
            BridgeEvent::TelephonyReattached {
                stream_sid,
                outbound,
            } => {
                self.on_telephony_reattached(stream_sid, outbound);
                None
            }
            BridgeEvent::Disconnect(reason) => Some(reason),
        }
    }

    fn handle_telephony(&mut self, frame: TelephonyEvent) -> Option<DisconnectReason> {
        self.touch();
        match frame {
            TelephonyEvent::Connected { .. } => {
                tracing::debug!(call_id = %self.call_id, "Duplicate connected event");
                None
            }
            TelephonyEvent::Start { stream_sid, .. } => {
                tracing::warn!(call_id = %self.call_id, %stream_sid, "Duplicate start event ignored");
                None
            }
            media @ TelephonyEvent::Media { .. } => {
                self.on_caller_media(media);
                None
            }
            TelephonyEvent::Stop { .. } => {
                tracing::info!(call_id = %self.call_id, "Caller hung up");
                Some(DisconnectReason::CallerHangup)
            }
            TelephonyEvent::Mark { mark } => {
                tracing::debug!(call_id = %self.call_id, mark = %mark.name, "Playback mark confirmed");
                None
            }
            TelephonyEvent::Clear => {
                // Flush staged caller audio and whatever the AI side already
                // buffered; the telephony side just discarded its own.
                self.buffer.clear();
                if let Err(e) = self.ai.try_send(ClientEvent::InputAudioBufferClear) {
                    tracing::debug!(call_id = %self.call_id, error = %e, "Input buffer clear not delivered");
                }
                tracing::debug!(call_id = %self.call_id, "Telephony flush mirrored to AI leg");
                None
            }
        }
    }

    fn on_caller_media(&mut self, media: TelephonyEvent) {
        let frame = match media.into_frame() {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => {
                self.metrics.record_error();
                tracing::warn!(call_id = %self.call_id, error = %e, "Dropping undecodable media frame");
                return;
            }
            None => return,
        };

        self.metrics.record_received(frame.payload.len());
        self.note_sequence(frame.track, frame.sequence);

        match AudioCodecAdapter::convert(&frame.payload, frame.format, AudioFormat::LinearPcm24k) {
            Ok(pcm) => {
                if self.buffer.push(pcm) {
                    tracing::debug!(
                        call_id = %self.call_id,
                        evicted_total = self.buffer.evicted(),
                        "Audio buffer full, oldest frame dropped"
                    );
                }
                self.pump_caller_audio();
            }
            Err(e) => {
                self.metrics.record_error();
                tracing::warn!(call_id = %self.call_id, error = %e, "Dropping unconvertible media frame");
            }
        }
    }

    /// Advisory only: a gap is logged and counted, the frame still flows.
    fn note_sequence(&mut self, track: MediaTrack, chunk: u64) {
        if let Some(gap) = self.gaps.record(track, chunk) {
            self.metrics.record_loss();
            tracing::warn!(
                call_id = %self.call_id,
                track = %gap.track,
                last_seen = gap.last_seen,
                received = gap.received,
                missing = gap.missing,
                "Frame sequence gap"
            );
        }
    }

    /// Drain buffered caller audio into the AI transport until it pushes
    /// back. The frame that did not fit goes back to the head.
    fn pump_caller_audio(&mut self) {
        while let Some(frame) = self.buffer.pop() {
            match self.ai.try_send(ClientEvent::audio_append(&frame)) {
                Ok(()) => {}
                Err(_) => {
                    self.buffer.requeue(frame);
                    break;
                }
            }
        }
    }

    fn on_telephony_closed(&mut self) -> Option<DisconnectReason> {
        self.telephony = None;
        let reattachable = self.shared.session.read().state == BridgeState::Active
            && self.timing.reattach.should_accept(self.reattach_attempts);

        if reattachable {
            self.set_state(BridgeState::DegradedReconnecting);
            self.reattach_deadline = Some(Instant::now() + self.timing.reattach.grace_window());
            tracing::info!(
                call_id = %self.call_id,
                grace_ms = self.timing.reattach.grace_window_ms,
                "Telephony leg lost, holding AI session for reattach"
            );
            None
        } else {
            tracing::info!(call_id = %self.call_id, "Telephony leg lost");
            Some(DisconnectReason::TelephonyLost)
        }
    }

    fn on_telephony_reattached(
        &mut self,
        stream_sid: String,
        outbound: mpsc::Sender<TelephonyOutbound>,
    ) {
        if self.shared.session.read().state != BridgeState::DegradedReconnecting {
            tracing::warn!(
                call_id = %self.call_id,
                "Reattach for a call that is not degraded, dropping socket"
            );
            return;
        }

        self.reattach_attempts += 1;
        self.reattach_deadline = None;
        self.shared.session.write().stream_id = Some(stream_sid.clone());
        self.stream_sid = stream_sid;
        self.telephony = Some(outbound);
        self.set_state(BridgeState::Active);
        self.touch();
        self.pump_caller_audio();

        tracing::info!(
            call_id = %self.call_id,
            attempt = self.reattach_attempts,
            "Telephony leg reattached"
        );
    }

    // ------------------------------------------------------------------
    // AI-side events
    // ------------------------------------------------------------------

    fn handle_ai_event(&mut self, event: AiTransportEvent) -> Option<DisconnectReason> {
        match event {
            AiTransportEvent::Event(server_event) => {
                self.touch();
                self.on_server_event(server_event);
                None
            }
            AiTransportEvent::DecodeError(e) => {
                self.metrics.record_error();
                tracing::warn!(call_id = %self.call_id, error = %e, "Dropping undecodable AI event");
                None
            }
            AiTransportEvent::Closed { reason } => {
                tracing::warn!(call_id = %self.call_id, %reason, "AI leg lost");
                Some(DisconnectReason::AiConnectionLost)
            }
        }
    }

    fn on_server_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::SessionCreated { session } => {
                tracing::debug!(call_id = %self.call_id, ai_session = %session.id, "AI session created");
            }
            ServerEvent::SessionUpdated { .. } => {
                tracing::debug!(call_id = %self.call_id, "AI session updated");
            }
            ServerEvent::SpeechStarted { audio_start_ms, .. } => {
                self.on_barge_in(audio_start_ms);
            }
            ServerEvent::SpeechStopped { .. }
            | ServerEvent::InputAudioBufferCommitted { .. }
            | ServerEvent::InputAudioBufferCleared
            | ServerEvent::ConversationItemCreated { .. }
            | ServerEvent::AudioDone { .. } => {}
            ServerEvent::ResponseCreated { .. } => {
                // A new response starts a new agent utterance; whatever a
                // cancelled one left behind is stale.
                self.agent_line.clear();
            }
            ServerEvent::TranscriptionCompleted { transcript, .. } => {
                let text = transcript.trim();
                if !text.is_empty() {
                    self.record_line(TranscriptLine::caller(text));
                }
            }
            ServerEvent::TranscriptionFailed { error, .. } => {
                self.metrics.record_error();
                tracing::warn!(call_id = %self.call_id, message = %error.message, "Caller transcription failed");
            }
            ServerEvent::AudioDelta { delta, .. } => {
                self.on_agent_audio(&delta);
            }
            ServerEvent::AudioTranscriptDelta { delta, .. } => {
                self.agent_line.push_str(&delta);
            }
            ServerEvent::AudioTranscriptDone { transcript, .. } => {
                self.agent_line.clear();
                let text = transcript.trim();
                if !text.is_empty() {
                    self.record_line(TranscriptLine::agent(text));
                }
            }
            ServerEvent::FunctionCallArgumentsDelta { .. } => {
                // The done event carries the complete arguments.
            }
            ServerEvent::FunctionCallArgumentsDone {
                call_id: correlation_id,
                name,
                arguments,
                ..
            } => {
                self.on_function_call(name, arguments, correlation_id);
            }
            ServerEvent::ResponseDone { response } => {
                self.on_response_done(response);
            }
            ServerEvent::Error { error } => {
                self.on_ai_error(error);
            }
            ServerEvent::RateLimitsUpdated { rate_limits } => {
                tracing::debug!(call_id = %self.call_id, limits = rate_limits.len(), "AI rate limits updated");
            }
        }
    }

    /// Keep the line for the final record and ship it downstream right away,
    /// off the relay path.
    fn record_line(&mut self, line: TranscriptLine) {
        tracing::info!(call_id = %self.call_id, role = %line.role, text = %line.text, "Transcript");
        let sink = self.call_log.clone();
        let call_id = self.call_id.clone();
        let entry = line.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.transcript(&call_id, entry).await {
                tracing::warn!(call_id = %call_id, error = %e, "Transcript line not persisted");
            }
        });
        self.transcript.push(line);
    }

    /// Caller started talking over the agent. The telephony playback buffer
    /// is flushed before any further agent audio is forwarded, then the
    /// in-flight response is cancelled.
    fn on_barge_in(&mut self, audio_start_ms: u64) {
        tracing::debug!(call_id = %self.call_id, audio_start_ms, "Caller barge-in");
        self.send_to_telephony(TelephonyOutbound::clear(&self.stream_sid));
        if let Err(e) = self.ai.try_send(ClientEvent::ResponseCancel) {
            tracing::debug!(call_id = %self.call_id, error = %e, "Response cancel not delivered");
        }
    }

    fn on_agent_audio(&mut self, delta: &str) {
        let pcm = match ServerEvent::decode_audio_delta(delta) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.metrics.record_error();
                tracing::warn!(call_id = %self.call_id, error = %e, "Dropping undecodable agent audio");
                return;
            }
        };

        match AudioCodecAdapter::convert(&pcm, AudioFormat::LinearPcm24k, AudioFormat::MulawPcm8k)
        {
            Ok(mulaw) => {
                self.metrics.record_sent(mulaw.len());
                self.send_to_telephony(TelephonyOutbound::media(&self.stream_sid, &mulaw));
            }
            Err(e) => {
                self.metrics.record_error();
                tracing::warn!(call_id = %self.call_id, error = %e, "Dropping unconvertible agent audio");
            }
        }
    }

    fn on_function_call(&mut self, name: String, arguments: String, correlation_id: String) {
        tracing::info!(
            call_id = %self.call_id,
            function = %name,
            correlation_id = %correlation_id,
            "Dispatching function call"
        );

        // Runs outside the loop so a slow handler cannot stall audio; the
        // dispatcher itself bounds the wait.
        let dispatcher = self.dispatcher.clone();
        let ai = self.ai.clone();
        let call_id = self.call_id.clone();
        tokio::spawn(async move {
            let result = dispatcher
                .dispatch(FunctionCallRequest {
                    name,
                    arguments,
                    correlation_id,
                })
                .await;
            let output = result.output_json();

            if let Err(e) = ai
                .send(ClientEvent::function_output(&result.correlation_id, output))
                .await
            {
                tracing::warn!(call_id = %call_id, error = %e, "Function result not delivered");
                return;
            }
            if let Err(e) = ai.send(ClientEvent::response_create(None)).await {
                tracing::warn!(call_id = %call_id, error = %e, "Post-function response request not delivered");
            }
        });
    }

    fn on_response_done(&mut self, response: ResponseInfo) {
        if response.status == "failed" {
            self.metrics.record_error();
            tracing::warn!(
                call_id = %self.call_id,
                details = ?response.status_details,
                "AI response failed"
            );
            return;
        }

        self.turn_count += 1;
        let name = format!("turn-{}", self.turn_count);
        self.send_to_telephony(TelephonyOutbound::mark(&self.stream_sid, &name));
        tracing::debug!(call_id = %self.call_id, turn = self.turn_count, "Response complete, mark queued");
    }

    /// An AI error leaves half-spoken audio stale; flush the caller's
    /// playback and keep the session alive.
    fn on_ai_error(&mut self, error: ApiError) {
        self.metrics.record_error();
        tracing::warn!(
            call_id = %self.call_id,
            error_type = %error.error_type,
            code = ?error.code,
            message = %error.message,
            "AI service error"
        );
        self.send_to_telephony(TelephonyOutbound::clear(&self.stream_sid));
    }

    // ------------------------------------------------------------------
    // Plumbing
    // ------------------------------------------------------------------

    fn send_to_telephony(&mut self, frame: TelephonyOutbound) {
        let Some(tx) = &self.telephony else {
            tracing::debug!(call_id = %self.call_id, "No telephony leg, dropping outbound frame");
            return;
        };
        match tx.try_send(frame) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.record_error();
                tracing::warn!(call_id = %self.call_id, "Telephony send queue full, dropping frame");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                // Socket task is gone; the closed event follows on the queue.
                self.telephony = None;
            }
        }
    }

    fn check_deadlines(&mut self) -> Option<DisconnectReason> {
        if let Some(deadline) = self.reattach_deadline
            && Instant::now() >= deadline
        {
            tracing::info!(call_id = %self.call_id, "Reattach window expired");
            return Some(DisconnectReason::TelephonyLost);
        }

        let idle = self.shared.last_traffic.lock().elapsed();
        if idle >= self.timing.inactivity_timeout() {
            tracing::info!(
                call_id = %self.call_id,
                idle_secs = idle.as_secs(),
                "Closing inactive bridge"
            );
            return Some(DisconnectReason::InactivityTimeout);
        }
        None
    }

    fn touch(&self) {
        *self.shared.last_traffic.lock() = Instant::now();
    }

    fn set_state(&self, state: BridgeState) {
        let from = {
            let mut session = self.shared.session.write();
            let from = session.state;
            session.state = state;
            from
        };
        tracing::debug!(call_id = %self.call_id, %from, to = %state, "Bridge state change");
    }

    fn publish_metrics(&self) {
        *self.shared.metrics.write() = self.metrics.snapshot();
    }

    async fn teardown(mut self, reason: DisconnectReason) {
        if self.shared.teardown_done.swap(true, Ordering::SeqCst) {
            return;
        }

        self.set_state(BridgeState::Closing);
        self.ai.close();
        // Dropping the sender ends the socket task, which closes the caller
        // connection.
        self.telephony = None;
        self.registry.remove(&self.call_id);

        // A hangup can cut the agent off mid-utterance; keep what was heard.
        let partial = std::mem::take(&mut self.agent_line);
        let partial = partial.trim();
        if !partial.is_empty() {
            self.record_line(TranscriptLine::agent(partial));
        }

        let session = self.shared.session.read().clone();
        let duration_secs = session.age_secs();
        let snapshot = self.metrics.snapshot();
        let record = CallRecord {
            call_id: session.call_id.clone(),
            session_id: session.session_id,
            business_id: session.business_id.clone(),
            agent_type: session.agent_type.clone(),
            customer_id: session.customer_id.clone(),
            direction: session.direction,
            started_at_epoch_ms: session.started_at_epoch_ms,
            duration_secs,
            disconnect_reason: reason.to_string(),
            metrics: snapshot,
            transcript: std::mem::take(&mut self.transcript),
        };
        self.publish_metrics();

        // Reporting is fire-and-forget; teardown does not wait on it.
        let meter = self.meter.clone();
        let usage = UsageReport {
            business_id: session.business_id.clone(),
            service_type: "realtime_call".to_string(),
            reference_id: session.call_id.clone(),
            amount: snapshot.packets_received + snapshot.packets_sent,
            duration_seconds: duration_secs,
        };
        tokio::spawn(async move {
            let business_id = usage.business_id.clone();
            if let Err(e) = meter.record_usage(usage).await {
                tracing::warn!(%business_id, error = %e, "Usage report failed");
            }
        });
        let call_log = self.call_log.clone();
        let log_call_id = self.call_id.clone();
        tokio::spawn(async move {
            if let Err(e) = call_log.call_ended(record).await {
                tracing::warn!(call_id = %log_call_id, error = %e, "Call log delivery failed");
            }
        });

        self.set_state(BridgeState::Closed);
        tracing::info!(
            call_id = %self.call_id,
            %reason,
            duration_secs,
            packets_received = snapshot.packets_received,
            packets_sent = snapshot.packets_sent,
            errors = snapshot.errors,
            loss_events = snapshot.loss_events,
            "Bridge closed"
        );
    }
}

// ============================================================================
// Tests
// ============================================================================
