//! Session state owned by a bridge.
//!
//! Everything here is mutated only from inside the owning bridge's event
//! loop; external code sees read-only snapshots.

use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::core::telephony::MediaTrack;

// ============================================================================
// Bridge state machine
// ============================================================================

/// Lifecycle states of a bridge.
///
/// `DegradedReconnecting` is entered only on telephony-side socket loss; loss
/// of the AI transport is always terminal. `Closed` is terminal and entered
/// exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeState {
    Init,
    ConnectingAi,
    Active,
    DegradedReconnecting,
    Closing,
    Closed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeState::Init => write!(f, "init"),
            BridgeState::ConnectingAi => write!(f, "connecting_ai"),
            BridgeState::Active => write!(f, "active"),
            BridgeState::DegradedReconnecting => write!(f, "degraded_reconnecting"),
            BridgeState::Closing => write!(f, "closing"),
            BridgeState::Closed => write!(f, "closed"),
        }
    }
}

/// Call direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

impl CallDirection {
    /// Parse from a connection parameter; anything but "outbound" is inbound.
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some(v) if v.eq_ignore_ascii_case("outbound") => CallDirection::Outbound,
            _ => CallDirection::Inbound,
        }
    }
}

// ============================================================================
// Session
// ============================================================================

/// One call's identity and state, owned by its bridge.
#[derive(Debug, Clone)]
pub struct Session {
    /// Internal session id
    pub session_id: Uuid,
    /// Telephony call identifier, the registry key
    pub call_id: String,
    /// Telephony stream identifier, set by the `start` event
    pub stream_id: Option<String>,
    /// Business the call belongs to
    pub business_id: String,
    /// Agent flavor requested for this call
    pub agent_type: Option<String>,
    /// Customer identifier, when the telephony side supplies one
    pub customer_id: Option<String>,
    /// Call direction
    pub direction: CallDirection,
    /// Current lifecycle state
    pub state: BridgeState,
    /// Construction instant, for durations
    pub created_at: Instant,
    /// Wall-clock start, for reporting
    pub started_at_epoch_ms: u64,
}

impl Session {
    pub fn new(
        call_id: impl Into<String>,
        business_id: impl Into<String>,
        agent_type: Option<String>,
        customer_id: Option<String>,
        direction: CallDirection,
    ) -> Self {
        Session {
            session_id: Uuid::new_v4(),
            call_id: call_id.into(),
            stream_id: None,
            business_id: business_id.into(),
            agent_type,
            customer_id,
            direction,
            state: BridgeState::Init,
            created_at: Instant::now(),
            started_at_epoch_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
        }
    }

    /// Seconds since the session was constructed.
    pub fn age_secs(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Traffic counters for one bridge. Mutated only inside the bridge loop.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub errors: u64,
    pub loss_events: u64,
}

impl BridgeMetrics {
    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn record_loss(&mut self) {
        self.loss_events += 1;
    }

    pub fn total_packets(&self) -> u64 {
        self.packets_received + self.packets_sent
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            packets_received: self.packets_received,
            packets_sent: self.packets_sent,
            bytes_received: self.bytes_received,
            bytes_sent: self.bytes_sent,
            errors: self.errors,
            loss_events: self.loss_events,
        }
    }
}

/// Read-only copy of a bridge's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub packets_received: u64,
    pub packets_sent: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub errors: u64,
    pub loss_events: u64,
}

// ============================================================================
// Sequence tracking
// ============================================================================

/// One detected discontinuity in a track's frame numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceGap {
    pub track: MediaTrack,
    /// Last sequence seen before the jump
    pub last_seen: u64,
    /// Sequence that arrived
    pub received: u64,
    /// Number of frames missing between them
    pub missing: u64,
}

/// Per-track last-seen sequence numbers.
///
/// Detection is advisory: neither protocol has retransmission, so a gap is
/// recorded and the frame is forwarded anyway. Nothing here reorders.
#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_seen: HashMap<MediaTrack, u64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame's sequence number. Returns a gap description when the
    /// number is not exactly one past the previous value for the track; the
    /// first frame on a track never produces a gap.
    pub fn record(&mut self, track: MediaTrack, sequence: u64) -> Option<SequenceGap> {
        match self.last_seen.insert(track, sequence) {
            Some(last) if sequence > last + 1 => Some(SequenceGap {
                track,
                last_seen: last,
                received: sequence,
                missing: sequence - last - 1,
            }),
            _ => None,
        }
    }

    /// Last sequence recorded for a track, if any frame arrived yet.
    pub fn last(&self, track: MediaTrack) -> Option<u64> {
        self.last_seen.get(&track).copied()
    }
}

// ============================================================================
// Bounded audio buffer
// ============================================================================

/// Inbound audio staging buffer with a hard frame bound.
///
/// When full, pushing evicts the oldest frame instead of blocking; the
/// telephony side keeps real time, stale audio is worthless.
#[derive(Debug)]
pub struct AudioFrameBuffer {
    frames: VecDeque<Vec<u8>>,
    capacity: usize,
    evicted: u64,
}

impl AudioFrameBuffer {
    pub fn new(capacity: usize) -> Self {
        AudioFrameBuffer {
            frames: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    /// Append a frame, evicting the oldest when at capacity. Returns true
    /// when an eviction happened.
    pub fn push(&mut self, frame: Vec<u8>) -> bool {
        let mut evicted = false;
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
            self.evicted += 1;
            evicted = true;
        }
        self.frames.push_back(frame);
        evicted
    }

    pub fn pop(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    /// Put a just-popped frame back at the head when the downstream queue
    /// refused it. Keeps oldest-first order.
    pub fn requeue(&mut self, frame: Vec<u8>) {
        self.frames.push_front(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Total frames dropped to keep the bound.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}

// ============================================================================
// Tests
// ============================================================================
