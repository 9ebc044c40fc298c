//! Shared application state
//!
//! [`AppState`] owns everything the HTTP and WebSocket handlers share: the
//! resolved configuration, the bridge registry, the function dispatcher, and
//! the platform collaborators. It also tracks live WebSocket connections so
//! the connection-limit middleware can enforce the global and per-IP caps.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;

use crate::config::ServerConfig;
use crate::core::bridge::BridgeRegistry;
use crate::core::dispatch::FunctionCallDispatcher;
use crate::external::{
    BusinessDirectory, CallLogSink, CreditMeter, HttpActionHandler, HttpPlatformClient,
    PlatformHttpConfig, PlatformResult,
};

/// Why a connection slot could not be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    /// The server-wide WebSocket cap is reached
    GlobalLimitReached,
    /// This IP already holds its maximum number of connections
    PerIpLimitReached,
}

/// Shared state for all handlers
pub struct AppState {
    pub config: ServerConfig,
    pub registry: BridgeRegistry,
    pub dispatcher: Arc<FunctionCallDispatcher>,
    pub directory: Arc<dyn BusinessDirectory>,
    pub meter: Arc<dyn CreditMeter>,
    pub call_log: Arc<dyn CallLogSink>,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, usize>,
}

impl AppState {
    /// Build the application state from a validated configuration
    ///
    /// One HTTP client serves the directory, the credit meter, and the call
    /// log. Each configured action endpoint becomes a registered function
    /// handler visible to the AI as a callable tool.
    pub fn new(config: ServerConfig) -> PlatformResult<Self> {
        let platform = Arc::new(HttpPlatformClient::new(PlatformHttpConfig {
            base_url: config.platform_base_url.clone(),
            api_key: config.platform_api_key.clone(),
            ..PlatformHttpConfig::default()
        })?);

        let mut dispatcher = FunctionCallDispatcher::new(config.timing.dispatch_timeout());
        for action in &config.actions {
            let handler = HttpActionHandler::new(
                action.name.clone(),
                action.description.clone(),
                action.parameters.clone(),
                action.url.clone(),
                action.api_key.clone(),
                Duration::from_millis(action.timeout_ms),
            )?;
            dispatcher.register(Arc::new(handler));
        }

        Ok(AppState {
            config,
            registry: BridgeRegistry::new(),
            dispatcher: Arc::new(dispatcher),
            directory: platform.clone(),
            meter: platform.clone(),
            call_log: platform,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Try to reserve a WebSocket connection slot for `ip`
    ///
    /// On success the caller must pair this with [`release_connection`]
    /// when the socket closes.
    ///
    /// [`release_connection`]: AppState::release_connection
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let prev = self.ws_connections.fetch_add(1, Ordering::AcqRel);
        if let Some(max) = self.config.max_websocket_connections {
            if prev >= max {
                self.ws_connections.fetch_sub(1, Ordering::AcqRel);
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        }

        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip as usize {
            drop(per_ip);
            self.ws_connections.fetch_sub(1, Ordering::AcqRel);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *per_ip += 1;
        Ok(())
    }

    /// Release a previously acquired connection slot
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));

        if let Some(mut entry) = self.ip_connections.get_mut(&ip) {
            *entry = entry.saturating_sub(1);
            let now_zero = *entry == 0;
            // The guard must be gone before touching the map again.
            drop(entry);
            if now_zero {
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
            }
        }
    }

    /// Current number of live WebSocket connections
    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    /// Current number of live WebSocket connections held by `ip`
    pub fn ip_connection_count(&self, ip: &IpAddr) -> usize {
        self.ip_connections.get(ip).map(|entry| *entry).unwrap_or(0)
    }
}
