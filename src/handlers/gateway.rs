//! Connection admission for the WebSocket entry points
//!
//! Every media connection passes these checks, in order, before the AI leg
//! is dialed: origin, required parameters, business credit, agent
//! configuration. A failure closes the socket with a 4xxx close code so the
//! telephony side can tell rejection classes apart; it never reaches the AI
//! service.

use thiserror::Error;

use crate::config::ServerConfig;
use crate::external::{AgentConfig, BusinessDirectory, CreditMeter, PlatformError};

/// Smallest fundable call the credit check must clear.
const MIN_FUNDED_SECONDS: u64 = 60;

/// WebSocket close codes sent when a connection is rejected before a bridge
/// exists.
pub mod close_code {
    /// Origin header missing or not on the allow-list
    pub const ORIGIN_FORBIDDEN: u16 = 4003;
    /// A required connection parameter is missing
    pub const MISSING_PARAMETER: u16 = 4400;
    /// The business has no remaining credit
    pub const INSUFFICIENT_CREDIT: u16 = 4402;
    /// The business is unknown to the platform
    pub const UNKNOWN_BUSINESS: u16 = 4404;
    /// The handshake never produced a start event
    pub const HANDSHAKE_TIMEOUT: u16 = 4408;
    /// A live bridge already exists for the call
    pub const DUPLICATE_CALL: u16 = 4409;
    /// The platform or AI leg failed before the bridge went active
    pub const UPSTREAM_FAILURE: u16 = 4500;
}

/// Why a connection was refused admission
#[derive(Error, Debug)]
pub enum ConnectionRejected {
    #[error("origin `{0}` is not allowed")]
    OriginForbidden(String),

    #[error("missing required parameter `{0}`")]
    MissingParameter(&'static str),

    #[error("business `{0}` has insufficient credit")]
    InsufficientCredit(String),

    #[error("business `{0}` not found")]
    UnknownBusiness(String),

    #[error("call `{0}` already has a live bridge")]
    DuplicateCall(String),

    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl ConnectionRejected {
    /// The close code delivered to the telephony side for this rejection
    pub fn close_code(&self) -> u16 {
        match self {
            ConnectionRejected::OriginForbidden(_) => close_code::ORIGIN_FORBIDDEN,
            ConnectionRejected::MissingParameter(_) => close_code::MISSING_PARAMETER,
            ConnectionRejected::InsufficientCredit(_) => close_code::INSUFFICIENT_CREDIT,
            ConnectionRejected::UnknownBusiness(_) => close_code::UNKNOWN_BUSINESS,
            ConnectionRejected::DuplicateCall(_) => close_code::DUPLICATE_CALL,
            ConnectionRejected::Upstream(_) => close_code::UPSTREAM_FAILURE,
        }
    }
}

/// Check the Origin header against the configured allow-list.
///
/// In production the header must be present and listed. Elsewhere a missing
/// header is fine (telephony providers and CLI tools send none), but a
/// browser origin that contradicts a configured list is still refused.
pub fn check_origin(
    config: &ServerConfig,
    origin: Option<&str>,
) -> Result<(), ConnectionRejected> {
    let listed = |candidate: &str| {
        config
            .allowed_ws_origins
            .iter()
            .any(|entry| entry.eq_ignore_ascii_case(candidate))
    };

    if config.enforces_origin_allow_list() {
        return match origin {
            Some(o) if listed(o) => Ok(()),
            Some(o) => Err(ConnectionRejected::OriginForbidden(o.to_string())),
            None => Err(ConnectionRejected::OriginForbidden("<missing>".to_string())),
        };
    }

    if let Some(o) = origin
        && !config.allowed_ws_origins.is_empty()
        && !listed(o)
    {
        return Err(ConnectionRejected::OriginForbidden(o.to_string()));
    }
    Ok(())
}

/// Run the full admission sequence for a telephony connection.
///
/// Order matters: origin first, then the required business id, then credit,
/// then agent resolution. The first failure wins and nothing later runs, so
/// an unauthorized origin never triggers a platform call.
pub async fn admit(
    config: &ServerConfig,
    directory: &dyn BusinessDirectory,
    meter: &dyn CreditMeter,
    origin: Option<&str>,
    business_id: Option<&str>,
    agent_type: Option<&str>,
) -> Result<AgentConfig, ConnectionRejected> {
    check_origin(config, origin)?;

    let business_id = business_id
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ConnectionRejected::MissingParameter("business_id"))?;

    match meter.check_credit(business_id, MIN_FUNDED_SECONDS).await {
        Ok(true) => {}
        Ok(false) => {
            return Err(ConnectionRejected::InsufficientCredit(
                business_id.to_string(),
            ));
        }
        Err(PlatformError::UnknownBusiness(id)) => {
            return Err(ConnectionRejected::UnknownBusiness(id));
        }
        Err(e) => return Err(ConnectionRejected::Upstream(e.to_string())),
    }

    match directory.resolve_agent(business_id, agent_type).await {
        Ok(agent) => Ok(agent),
        Err(PlatformError::UnknownBusiness(id)) => Err(ConnectionRejected::UnknownBusiness(id)),
        Err(e) => Err(ConnectionRejected::Upstream(e.to_string())),
    }
}
