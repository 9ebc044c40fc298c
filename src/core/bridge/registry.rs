//! Live bridge registry.
//!
//! A process-wide concurrent map from call id to [`BridgeHandle`], populated
//! when a bridge goes active and cleared by its teardown. Handlers use it to
//! route reattaching sockets, the operations API lists it, and a periodic
//! sweep collects sessions that never started moving media.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::bridge::{BridgeHandle, BridgeSnapshot, DisconnectReason};
use super::session::BridgeState;
use crate::config::TimingPolicy;

/// Concurrent map of live bridges keyed by call id.
///
/// Cloning shares the same underlying map; one instance is created at
/// startup and injected everywhere.
#[derive(Clone, Default)]
pub struct BridgeRegistry {
    bridges: Arc<DashMap<String, BridgeHandle>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bridge under its call id. Replacing an entry is legal; the
    /// replaced bridge keeps running until it closes itself.
    pub fn insert(&self, handle: BridgeHandle) {
        let call_id = handle.call_id().to_string();
        if self.bridges.insert(call_id.clone(), handle).is_some() {
            tracing::warn!(%call_id, "Replaced an existing bridge registration");
        }
        tracing::debug!(%call_id, total = self.bridges.len(), "Bridge registered");
    }

    /// Drop a registration. Missing ids are fine; teardown and sweeps race.
    pub fn remove(&self, call_id: &str) {
        if self.bridges.remove(call_id).is_some() {
            tracing::debug!(call_id, total = self.bridges.len(), "Bridge deregistered");
        }
    }

    pub fn get(&self, call_id: &str) -> Option<BridgeHandle> {
        self.bridges.get(call_id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, call_id: &str) -> bool {
        self.bridges.contains_key(call_id)
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    /// Point-in-time view of every live bridge, for the operations API.
    pub fn snapshots(&self) -> Vec<BridgeSnapshot> {
        self.bridges.iter().map(|e| e.value().snapshot()).collect()
    }

    /// Ask every bridge to shut down. Used on process shutdown.
    pub async fn disconnect_all(&self, reason: DisconnectReason) {
        let handles: Vec<BridgeHandle> =
            self.bridges.iter().map(|e| e.value().clone()).collect();
        for handle in handles {
            handle.disconnect(reason).await;
        }
    }

    /// Start the periodic sweep task. It disconnects bridges older than the
    /// staleness window that never transferred a packet, and drops
    /// registrations whose loop already closed without deregistering.
    pub fn spawn_reaper(&self, timing: TimingPolicy) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timing.reap_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.sweep(timing.reap_staleness()).await;
            }
        })
    }

    async fn sweep(&self, staleness: Duration) {
        let candidates: Vec<BridgeHandle> = self
            .bridges
            .iter()
            .filter(|entry| {
                let handle = entry.value();
                let snapshot = handle.snapshot();
                let never_flowed = snapshot.metrics.packets_received == 0
                    && snapshot.metrics.packets_sent == 0
                    && Duration::from_secs(snapshot.age_secs) >= staleness;
                handle.state() == BridgeState::Closed || never_flowed
            })
            .map(|entry| entry.value().clone())
            .collect();

        if candidates.is_empty() {
            return;
        }

        for handle in candidates {
            if handle.state() == BridgeState::Closed {
                // The loop exited and left its registration behind.
                tracing::warn!(call_id = handle.call_id(), "Sweeping orphaned registration");
                self.remove(handle.call_id());
            } else {
                tracing::warn!(
                    call_id = handle.call_id(),
                    age_secs = handle.snapshot().age_secs,
                    "Reaping bridge that never moved media"
                );
                handle.disconnect(DisconnectReason::Reaped).await;
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
