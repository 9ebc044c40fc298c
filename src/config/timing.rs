//! Injectable timing policy for bridges and the registry reaper.
//!
//! Every timing constant the bridge relies on lives here so tests can run
//! with millisecond thresholds and deployments can tune behavior through the
//! environment without code changes.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Policy for waiting on a telephony-side reconnect.
///
/// Only telephony socket loss is recoverable; the bridge holds the session in
/// a degraded state for the grace window, waiting for a new socket bound to
/// the same call id. Loss of the AI transport is always terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReattachPolicy {
    /// Enable holding degraded sessions open for a reconnect.
    /// Default: true
    pub enabled: bool,

    /// Maximum number of reattachments accepted over a session's lifetime.
    /// Default: 3
    pub max_attempts: u32,

    /// How long a degraded session waits for a new telephony socket
    /// (milliseconds). Default: 10000ms
    pub grace_window_ms: u64,
}

impl Default for ReattachPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            grace_window_ms: 10_000,
        }
    }
}

impl ReattachPolicy {
    /// Create a policy that terminates immediately on telephony loss.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Whether one more reattachment is allowed.
    pub fn should_accept(&self, attempts_so_far: u32) -> bool {
        self.enabled && attempts_so_far < self.max_attempts
    }

    pub fn grace_window(&self) -> Duration {
        Duration::from_millis(self.grace_window_ms)
    }
}

/// Timing constants for bridge supervision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingPolicy {
    /// A session with no events from either transport for this long is
    /// force-disconnected (milliseconds). Default: 120000ms (2 minutes)
    pub inactivity_timeout_ms: u64,

    /// Interval of the per-bridge activity check (milliseconds).
    /// Default: 10000ms
    pub activity_check_interval_ms: u64,

    /// Interval of the registry reaper sweep (milliseconds).
    /// Default: 60000ms
    pub reap_interval_ms: u64,

    /// A bridge older than this with zero packets in both directions is
    /// reaped (milliseconds). Default: 60000ms
    pub reap_staleness_ms: u64,

    /// Maximum frames held in the inbound audio buffer before the oldest is
    /// evicted. Default: 50 frames (one second of 20ms telephony audio)
    pub audio_buffer_frames: usize,

    /// Upper bound on a single function-call dispatch (milliseconds).
    /// Default: 10000ms
    pub dispatch_timeout_ms: u64,

    /// Telephony reattach policy.
    pub reattach: ReattachPolicy,
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 120_000,
            activity_check_interval_ms: 10_000,
            reap_interval_ms: 60_000,
            reap_staleness_ms: 60_000,
            audio_buffer_frames: 50,
            dispatch_timeout_ms: 10_000,
            reattach: ReattachPolicy::default(),
        }
    }
}

impl TimingPolicy {
    /// Build from the environment, falling back to defaults per field.
    ///
    /// Recognized variables: `BRIDGE_INACTIVITY_TIMEOUT_MS`,
    /// `BRIDGE_ACTIVITY_CHECK_INTERVAL_MS`, `BRIDGE_REAP_INTERVAL_MS`,
    /// `BRIDGE_REAP_STALENESS_MS`, `BRIDGE_AUDIO_BUFFER_FRAMES`,
    /// `BRIDGE_DISPATCH_TIMEOUT_MS`, `BRIDGE_REATTACH_MAX_ATTEMPTS`,
    /// `BRIDGE_REATTACH_GRACE_WINDOW_MS`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            inactivity_timeout_ms: env_u64(
                "BRIDGE_INACTIVITY_TIMEOUT_MS",
                defaults.inactivity_timeout_ms,
            ),
            activity_check_interval_ms: env_u64(
                "BRIDGE_ACTIVITY_CHECK_INTERVAL_MS",
                defaults.activity_check_interval_ms,
            ),
            reap_interval_ms: env_u64("BRIDGE_REAP_INTERVAL_MS", defaults.reap_interval_ms),
            reap_staleness_ms: env_u64("BRIDGE_REAP_STALENESS_MS", defaults.reap_staleness_ms),
            audio_buffer_frames: env_u64(
                "BRIDGE_AUDIO_BUFFER_FRAMES",
                defaults.audio_buffer_frames as u64,
            ) as usize,
            dispatch_timeout_ms: env_u64(
                "BRIDGE_DISPATCH_TIMEOUT_MS",
                defaults.dispatch_timeout_ms,
            ),
            reattach: ReattachPolicy {
                enabled: defaults.reattach.enabled,
                max_attempts: env_u64(
                    "BRIDGE_REATTACH_MAX_ATTEMPTS",
                    defaults.reattach.max_attempts as u64,
                ) as u32,
                grace_window_ms: env_u64(
                    "BRIDGE_REATTACH_GRACE_WINDOW_MS",
                    defaults.reattach.grace_window_ms,
                ),
            },
        }
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn activity_check_interval(&self) -> Duration {
        Duration::from_millis(self.activity_check_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }

    pub fn reap_staleness(&self) -> Duration {
        Duration::from_millis(self.reap_staleness_ms)
    }

    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_millis(self.dispatch_timeout_ms)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_defaults() {
        let policy = TimingPolicy::default();
        assert_eq!(policy.inactivity_timeout(), Duration::from_secs(120));
        assert_eq!(policy.audio_buffer_frames, 50);
        assert!(policy.reattach.enabled);
        assert_eq!(policy.reattach.max_attempts, 3);
    }

    #[test]
    fn test_reattach_accounting() {
        let policy = ReattachPolicy::default();
        assert!(policy.should_accept(0));
        assert!(policy.should_accept(2));
        assert!(!policy.should_accept(3));

        let off = ReattachPolicy::disabled();
        assert!(!off.should_accept(0));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        unsafe {
            std::env::set_var("BRIDGE_INACTIVITY_TIMEOUT_MS", "5000");
            std::env::set_var("BRIDGE_AUDIO_BUFFER_FRAMES", "8");
        }
        let policy = TimingPolicy::from_env();
        assert_eq!(policy.inactivity_timeout_ms, 5000);
        assert_eq!(policy.audio_buffer_frames, 8);
        // Untouched fields keep their defaults
        assert_eq!(policy.dispatch_timeout_ms, 10_000);
        unsafe {
            std::env::remove_var("BRIDGE_INACTIVITY_TIMEOUT_MS");
            std::env::remove_var("BRIDGE_AUDIO_BUFFER_FRAMES");
        }
    }

    #[test]
    #[serial]
    fn test_env_garbage_falls_back() {
        unsafe {
            std::env::set_var("BRIDGE_DISPATCH_TIMEOUT_MS", "not-a-number");
        }
        let policy = TimingPolicy::from_env();
        assert_eq!(policy.dispatch_timeout_ms, 10_000);
        unsafe {
            std::env::remove_var("BRIDGE_DISPATCH_TIMEOUT_MS");
        }
    }
}
