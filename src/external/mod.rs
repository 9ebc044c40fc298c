//! Platform collaborators.
//!
//! The bridge core stays transport-pure. Everything that talks to the wider
//! platform sits behind the traits here: business lookup and agent
//! configuration, credit metering, and end-of-call records. Deployments wire
//! in the HTTP implementations from [`http`]; tests substitute doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::bridge::{CallDirection, MetricsSnapshot};

pub mod http;

pub use http::{HttpActionHandler, HttpPlatformClient, PlatformHttpConfig};

// ============================================================================
// Errors
// ============================================================================

/// Failures talking to the platform.
#[derive(Error, Debug)]
pub enum PlatformError {
    /// The platform does not know the business.
    #[error("business `{0}` not found")]
    UnknownBusiness(String),

    /// The request never completed.
    #[error("platform request failed: {0}")]
    Request(String),

    /// The platform answered with something unusable.
    #[error("platform response invalid: {0}")]
    InvalidResponse(String),
}

pub type PlatformResult<T> = Result<T, PlatformError>;

// ============================================================================
// Agent configuration
// ============================================================================

/// Resolved agent configuration for one call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// System instructions for the AI session
    pub instructions: String,
    /// Voice identifier; the AI service default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
    /// Spoken opening line, delivered before the caller says anything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub greeting: Option<String>,
    /// Realtime model override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Tool names this agent may call; `None` allows every registered tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<String>>,
}

// ============================================================================
// Collaborator traits
// ============================================================================

/// Resolves businesses to per-call agent configuration.
#[async_trait]
pub trait BusinessDirectory: Send + Sync {
    /// Fetch the agent configuration for a business, optionally narrowed to
    /// an agent flavor. [`PlatformError::UnknownBusiness`] when the business
    /// does not exist.
    async fn resolve_agent(
        &self,
        business_id: &str,
        agent_type: Option<&str>,
    ) -> PlatformResult<AgentConfig>;
}

/// Checks and records call spend.
#[async_trait]
pub trait CreditMeter: Send + Sync {
    /// Whether the business can fund at least `minimum_seconds` of call time
    /// right now.
    async fn check_credit(
        &self,
        business_id: &str,
        minimum_seconds: u64,
    ) -> PlatformResult<bool>;

    /// Record a finished call's spend.
    async fn record_usage(&self, usage: UsageReport) -> PlatformResult<()>;
}

/// Receives call lifecycle records.
#[async_trait]
pub trait CallLogSink: Send + Sync {
    /// A bridge went active.
    async fn call_started(&self, call_id: &str, business_id: &str) -> PlatformResult<()>;

    /// One finalized utterance, delivered while the call is still running.
    async fn transcript(&self, call_id: &str, line: TranscriptLine) -> PlatformResult<()>;

    /// A bridge closed; `record` carries the full accounting.
    async fn call_ended(&self, record: CallRecord) -> PlatformResult<()>;
}

// ============================================================================
// Call records
// ============================================================================

/// One line of conversation, either side.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptLine {
    /// "caller" or "agent"
    pub role: String,
    pub text: String,
}

impl TranscriptLine {
    pub fn caller(text: impl Into<String>) -> Self {
        TranscriptLine {
            role: "caller".to_string(),
            text: text.into(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        TranscriptLine {
            role: "agent".to_string(),
            text: text.into(),
        }
    }
}

/// Spend accounting for one finished call.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub business_id: String,
    /// Billed service class; bridge sessions report `realtime_call`
    pub service_type: String,
    /// The call this spend belongs to
    pub reference_id: String,
    /// Relayed packets, both directions
    pub amount: u64,
    pub duration_seconds: u64,
}

/// Everything reported downstream when a call ends.
#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub call_id: String,
    pub session_id: Uuid,
    pub business_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub direction: CallDirection,
    pub started_at_epoch_ms: u64,
    pub duration_secs: u64,
    pub disconnect_reason: String,
    pub metrics: MetricsSnapshot,
    pub transcript: Vec<TranscriptLine>,
}
