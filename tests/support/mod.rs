//! Shared test support for bridge and gateway integration tests:
//! - a mock AI realtime WebSocket server
//! - in-memory platform collaborator doubles
//! - helpers that assemble and launch a bridge against the mock

// Allow dead code in test infrastructure - not every test binary uses every helper
#![allow(dead_code)]

pub mod ai_mock;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use callbridge_gateway::config::{ReattachPolicy, TimingPolicy};
use callbridge_gateway::core::bridge::{
    BridgeConfig, BridgeHandle, BridgeRegistry, CallDirection, RealtimeBridge, Session,
};
use callbridge_gateway::core::dispatch::{ActionHandler, FunctionCallDispatcher};
use callbridge_gateway::core::realtime::{AiClientConfig, ToolDefinition};
use callbridge_gateway::core::telephony::{MediaTrack, TelephonyEvent, TelephonyOutbound};
use callbridge_gateway::external::{
    AgentConfig, BusinessDirectory, CallLogSink, CallRecord, CreditMeter, PlatformError,
    PlatformResult, TranscriptLine, UsageReport,
};

use self::ai_mock::MockAiServer;

// =============================================================================
// Platform doubles
// =============================================================================

/// Directory that always resolves to one fixed agent.
pub struct StaticDirectory {
    pub agent: AgentConfig,
}

#[async_trait]
impl BusinessDirectory for StaticDirectory {
    async fn resolve_agent(
        &self,
        _business_id: &str,
        _agent_type: Option<&str>,
    ) -> PlatformResult<AgentConfig> {
        Ok(self.agent.clone())
    }
}

/// Meter with a fixed credit answer that records every usage report.
pub struct FixedMeter {
    credit: bool,
    pub checks: AtomicUsize,
    pub usage: Mutex<Vec<UsageReport>>,
}

impl FixedMeter {
    pub fn new(credit: bool) -> Arc<Self> {
        Arc::new(FixedMeter {
            credit,
            checks: AtomicUsize::new(0),
            usage: Mutex::new(Vec::new()),
        })
    }

    pub fn usage_reports(&self) -> usize {
        self.usage.lock().len()
    }
}

#[async_trait]
impl CreditMeter for FixedMeter {
    async fn check_credit(
        &self,
        _business_id: &str,
        _minimum_seconds: u64,
    ) -> PlatformResult<bool> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        Ok(self.credit)
    }

    async fn record_usage(&self, usage: UsageReport) -> PlatformResult<()> {
        self.usage.lock().push(usage);
        Ok(())
    }
}

/// Call log that records everything and signals each ended call through a
/// channel, so tests can await the fire-and-forget delivery.
pub struct RecordingCallLog {
    pub started: Mutex<Vec<(String, String)>>,
    pub lines: Mutex<Vec<(String, TranscriptLine)>>,
    pub ended: Mutex<Vec<CallRecord>>,
    ended_tx: mpsc::UnboundedSender<CallRecord>,
}

impl RecordingCallLog {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<CallRecord>) {
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        (
            Arc::new(RecordingCallLog {
                started: Mutex::new(Vec::new()),
                lines: Mutex::new(Vec::new()),
                ended: Mutex::new(Vec::new()),
                ended_tx,
            }),
            ended_rx,
        )
    }

    pub fn ended_count(&self) -> usize {
        self.ended.lock().len()
    }

    pub fn line_count(&self) -> usize {
        self.lines.lock().len()
    }
}

#[async_trait]
impl CallLogSink for RecordingCallLog {
    async fn call_started(&self, call_id: &str, business_id: &str) -> PlatformResult<()> {
        self.started
            .lock()
            .push((call_id.to_string(), business_id.to_string()));
        Ok(())
    }

    async fn transcript(&self, call_id: &str, line: TranscriptLine) -> PlatformResult<()> {
        self.lines.lock().push((call_id.to_string(), line));
        Ok(())
    }

    async fn call_ended(&self, record: CallRecord) -> PlatformResult<()> {
        self.ended.lock().push(record.clone());
        let _ = self.ended_tx.send(record);
        Ok(())
    }
}

/// Directory double that rejects every lookup.
pub struct GhostDirectory;

#[async_trait]
impl BusinessDirectory for GhostDirectory {
    async fn resolve_agent(
        &self,
        business_id: &str,
        _agent_type: Option<&str>,
    ) -> PlatformResult<AgentConfig> {
        Err(PlatformError::UnknownBusiness(business_id.to_string()))
    }
}

// =============================================================================
// Action handler doubles
// =============================================================================

/// Handler that records invocations and answers with a fixed payload.
pub struct RecordingHandler {
    name: String,
    response: serde_json::Value,
    pub invocations: Mutex<Vec<serde_json::Value>>,
}

impl RecordingHandler {
    pub fn new(name: &str, response: serde_json::Value) -> Arc<Self> {
        Arc::new(RecordingHandler {
            name: name.to_string(),
            response,
            invocations: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ActionHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(
            &self.name,
            "Test action",
            serde_json::json!({"type": "object", "properties": {}}),
        )
    }

    async fn execute(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self.invocations.lock().push(arguments);
        Ok(self.response.clone())
    }
}

// =============================================================================
// Fixtures
// =============================================================================

/// Timing tuned for tests: fast ticks, generous timeouts that never fire on
/// their own.
pub fn fast_timing() -> TimingPolicy {
    TimingPolicy {
        inactivity_timeout_ms: 60_000,
        activity_check_interval_ms: 25,
        reap_interval_ms: 3_600_000,
        reap_staleness_ms: 3_600_000,
        audio_buffer_frames: 50,
        dispatch_timeout_ms: 1_000,
        reattach: ReattachPolicy {
            enabled: true,
            max_attempts: 3,
            grace_window_ms: 5_000,
        },
    }
}

pub fn test_agent() -> AgentConfig {
    AgentConfig {
        instructions: "You answer the phone for Testing Inc.".to_string(),
        voice: Some("alloy".to_string()),
        greeting: None,
        model: None,
        tools: None,
    }
}

pub fn test_session(call_id: &str) -> Session {
    let mut session = Session::new(call_id, "biz_test", None, None, CallDirection::Inbound);
    session.stream_id = Some(format!("MZ-{call_id}"));
    session
}

/// One inbound caller audio frame: `samples` bytes of mu-law silence.
pub fn media_event(chunk: u64, samples: usize) -> TelephonyEvent {
    TelephonyEvent::Media {
        track: MediaTrack::Inbound,
        chunk,
        timestamp: chunk * 20,
        payload: BASE64.encode(vec![0xFFu8; samples]),
    }
}

// =============================================================================
// Bridge harness
// =============================================================================

/// A launched bridge plus every double wired into it.
pub struct LaunchedBridge {
    pub handle: BridgeHandle,
    pub registry: BridgeRegistry,
    pub outbound: mpsc::Receiver<TelephonyOutbound>,
    pub meter: Arc<FixedMeter>,
    pub call_log: Arc<RecordingCallLog>,
    pub ended: mpsc::UnboundedReceiver<CallRecord>,
}

/// Launch a bridge against the mock AI server with the given knobs.
pub async fn launch_bridge(
    server: &MockAiServer,
    call_id: &str,
    timing: TimingPolicy,
    dispatcher: FunctionCallDispatcher,
    agent: AgentConfig,
) -> LaunchedBridge {
    let registry = BridgeRegistry::new();
    let meter = FixedMeter::new(true);
    let (call_log, ended) = RecordingCallLog::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(64);

    let config = BridgeConfig {
        session: test_session(call_id),
        agent,
        ai: AiClientConfig::new(server.url(), "sk-test", "gpt-4o-realtime-preview"),
        timing,
        dispatcher: Arc::new(dispatcher),
        meter: meter.clone(),
        call_log: call_log.clone(),
    };

    let handle = RealtimeBridge::launch(config, registry.clone(), outbound_tx)
        .await
        .expect("Bridge launch against the mock AI server failed");

    LaunchedBridge {
        handle,
        registry,
        outbound: outbound_rx,
        meter,
        call_log,
        ended,
    }
}

/// Launch with default timing, an empty dispatcher and the stock agent.
pub async fn launch_default_bridge(server: &MockAiServer, call_id: &str) -> LaunchedBridge {
    launch_bridge(
        server,
        call_id,
        fast_timing(),
        FunctionCallDispatcher::new(Duration::from_secs(1)),
        test_agent(),
    )
    .await
}

/// Poll `cond` every 10ms until it holds, failing the test after 2 seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Timed out waiting for {what}");
}
