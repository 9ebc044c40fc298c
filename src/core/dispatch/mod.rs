//! Function call dispatch.
//!
//! The AI service issues tool invocations; this module routes them to named
//! business-action handlers and always produces exactly one correlated
//! result. A missing handler, a handler failure, a timeout and malformed
//! arguments all come back as structured results carrying the caller's
//! correlation id, never as a panic or a hung future.

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::core::realtime::ToolDefinition;

// ============================================================================
// Errors
// ============================================================================

/// Failure shapes a dispatch can produce.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The AI named a function nothing registered.
    #[error("no handler registered for function `{0}`")]
    UnknownFunction(String),

    /// The handler ran and failed.
    #[error("handler `{name}` failed: {message}")]
    HandlerFailed { name: String, message: String },

    /// The handler exceeded the dispatch timeout.
    #[error("handler `{name}` timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },

    /// The argument payload was not valid JSON.
    #[error("invalid arguments for `{name}`: {detail}")]
    InvalidArguments { name: String, detail: String },
}

impl DispatchError {
    /// Stable machine-readable tag used in result payloads.
    pub fn error_type(&self) -> &'static str {
        match self {
            DispatchError::UnknownFunction(_) => "unknown_function",
            DispatchError::HandlerFailed { .. } => "handler_failed",
            DispatchError::Timeout { .. } => "timeout",
            DispatchError::InvalidArguments { .. } => "invalid_arguments",
        }
    }
}

// ============================================================================
// Requests and results
// ============================================================================

/// One tool invocation as issued by the AI service.
#[derive(Debug, Clone)]
pub struct FunctionCallRequest {
    /// Function name
    pub name: String,
    /// Raw JSON argument string from the wire
    pub arguments: String,
    /// The AI protocol's call id; the result must echo it
    pub correlation_id: String,
}

/// Outcome of a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionOutcome {
    Success(serde_json::Value),
    Failed(DispatchError),
}

/// The single result produced for every [`FunctionCallRequest`].
#[derive(Debug, Clone)]
pub struct FunctionCallResult {
    /// Echo of the request's correlation id
    pub correlation_id: String,
    /// Echo of the requested function name
    pub name: String,
    pub outcome: FunctionOutcome,
}

impl FunctionCallResult {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, FunctionOutcome::Success(_))
    }

    /// Serialize the result payload handed back into the AI conversation.
    pub fn output_json(&self) -> String {
        let value = match &self.outcome {
            FunctionOutcome::Success(result) => json!({
                "status": "success",
                "result": result,
            }),
            FunctionOutcome::Failed(err) => json!({
                "status": "error",
                "error_type": err.error_type(),
                "message": err.to_string(),
            }),
        };
        value.to_string()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// A named business action the AI may invoke.
///
/// Handlers are opaque and fallible; nothing here assumes idempotency unless
/// the handler itself guarantees it.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Machine name the AI calls this action by.
    fn name(&self) -> &str;

    /// Tool schema advertised to the AI service.
    fn definition(&self) -> ToolDefinition;

    /// Execute with parsed JSON arguments.
    async fn execute(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Routes function invocations to registered handlers.
pub struct FunctionCallDispatcher {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
    timeout: Duration,
}

impl FunctionCallDispatcher {
    pub fn new(timeout: Duration) -> Self {
        FunctionCallDispatcher {
            handlers: HashMap::new(),
            timeout,
        }
    }

    /// Register a handler under its own name. Re-registering a name replaces
    /// the previous handler.
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(handler.name().to_string(), handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Tool schemas for every registered handler, for session configuration.
    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> =
            self.handlers.values().map(|h| h.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Schemas filtered to a business's allowed tool names. `None` means all.
    pub fn tool_definitions_for(&self, allowed: Option<&[String]>) -> Vec<ToolDefinition> {
        match allowed {
            None => self.tool_definitions(),
            Some(names) => self
                .tool_definitions()
                .into_iter()
                .filter(|d| names.iter().any(|n| n == &d.name))
                .collect(),
        }
    }

    /// Dispatch one invocation. Always returns a result with the request's
    /// correlation id; failures are folded into the result, never raised.
    pub async fn dispatch(&self, request: FunctionCallRequest) -> FunctionCallResult {
        let FunctionCallRequest {
            name,
            arguments,
            correlation_id,
        } = request;

        let Some(handler) = self.handlers.get(&name) else {
            tracing::warn!(function = %name, "Function call for unregistered handler");
            return FunctionCallResult {
                correlation_id,
                outcome: FunctionOutcome::Failed(DispatchError::UnknownFunction(name.clone())),
                name,
            };
        };

        let parsed: serde_json::Value = if arguments.trim().is_empty() {
            json!({})
        } else {
            match serde_json::from_str(&arguments) {
                Ok(v) => v,
                Err(e) => {
                    return FunctionCallResult {
                        correlation_id,
                        outcome: FunctionOutcome::Failed(DispatchError::InvalidArguments {
                            name: name.clone(),
                            detail: e.to_string(),
                        }),
                        name,
                    };
                }
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, handler.execute(parsed)).await {
            Ok(Ok(result)) => FunctionOutcome::Success(result),
            Ok(Err(e)) => {
                tracing::warn!(function = %name, error = %e, "Action handler failed");
                FunctionOutcome::Failed(DispatchError::HandlerFailed {
                    name: name.clone(),
                    message: e.to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(
                    function = %name,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Action handler timed out"
                );
                FunctionOutcome::Failed(DispatchError::Timeout {
                    name: name.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        FunctionCallResult {
            correlation_id,
            name,
            outcome,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
