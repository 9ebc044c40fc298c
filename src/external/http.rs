//! HTTP implementations of the platform collaborators.
//!
//! One [`HttpPlatformClient`] serves all three collaborator traits against
//! the platform REST API. Agent configurations are cached with a short TTL;
//! credit checks are not cached, a stale balance answer costs real money.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use serde_json::json;

use super::{
    AgentConfig, BusinessDirectory, CallLogSink, CallRecord, CreditMeter, PlatformError,
    PlatformResult, TranscriptLine, UsageReport,
};
use crate::core::dispatch::ActionHandler;
use crate::core::realtime::ToolDefinition;

/// Connection parameters for the platform API.
#[derive(Debug, Clone)]
pub struct PlatformHttpConfig {
    /// Base URL, no trailing slash
    pub base_url: String,
    /// Bearer token for platform requests
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub agent_cache_ttl: Duration,
    pub agent_cache_capacity: u64,
}

impl Default for PlatformHttpConfig {
    fn default() -> Self {
        PlatformHttpConfig {
            base_url: "http://127.0.0.1:8081".to_string(),
            api_key: None,
            timeout: Duration::from_secs(10),
            agent_cache_ttl: Duration::from_secs(60),
            agent_cache_capacity: 1024,
        }
    }
}

/// REST client for the platform API.
pub struct HttpPlatformClient {
    config: PlatformHttpConfig,
    client: reqwest::Client,
    agent_cache: Cache<String, AgentConfig>,
}

#[derive(Deserialize)]
struct CreditBody {
    has_credit: bool,
}

impl HttpPlatformClient {
    pub fn new(config: PlatformHttpConfig) -> PlatformResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        let agent_cache = Cache::builder()
            .max_capacity(config.agent_cache_capacity)
            .time_to_live(config.agent_cache_ttl)
            .build();

        Ok(HttpPlatformClient {
            config,
            client,
            agent_cache,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    async fn fetch_agent(
        &self,
        business_id: &str,
        agent_type: Option<&str>,
    ) -> PlatformResult<AgentConfig> {
        let url = self.url(&format!("/api/v1/businesses/{business_id}/agent-config"));
        let mut builder = self.request(self.client.get(&url));
        if let Some(flavor) = agent_type {
            builder = builder.query(&[("agent_type", flavor)]);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::UnknownBusiness(business_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(PlatformError::InvalidResponse(format!(
                "agent-config returned {}",
                response.status()
            )));
        }

        response
            .json::<AgentConfig>()
            .await
            .map_err(|e| PlatformError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl BusinessDirectory for HttpPlatformClient {
    async fn resolve_agent(
        &self,
        business_id: &str,
        agent_type: Option<&str>,
    ) -> PlatformResult<AgentConfig> {
        let cache_key = format!("{business_id}::{}", agent_type.unwrap_or("default"));
        if let Some(cached) = self.agent_cache.get(&cache_key).await {
            return Ok(cached);
        }

        let config = self.fetch_agent(business_id, agent_type).await?;
        self.agent_cache.insert(cache_key, config.clone()).await;
        Ok(config)
    }
}

#[async_trait]
impl CreditMeter for HttpPlatformClient {
    async fn check_credit(
        &self,
        business_id: &str,
        minimum_seconds: u64,
    ) -> PlatformResult<bool> {
        let url = self.url(&format!("/api/v1/businesses/{business_id}/credit"));
        let response = self
            .request(self.client.get(&url))
            .query(&[("minimum_seconds", minimum_seconds)])
            .send()
            .await
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(PlatformError::UnknownBusiness(business_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(PlatformError::InvalidResponse(format!(
                "credit check returned {}",
                response.status()
            )));
        }

        let body: CreditBody = response
            .json()
            .await
            .map_err(|e| PlatformError::InvalidResponse(e.to_string()))?;
        Ok(body.has_credit)
    }

    async fn record_usage(&self, usage: UsageReport) -> PlatformResult<()> {
        let url = self.url(&format!("/api/v1/businesses/{}/usage", usage.business_id));
        let response = self
            .request(self.client.post(&url))
            .json(&usage)
            .send()
            .await
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlatformError::InvalidResponse(format!(
                "usage report returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CallLogSink for HttpPlatformClient {
    async fn call_started(&self, call_id: &str, business_id: &str) -> PlatformResult<()> {
        let url = self.url("/api/v1/call-logs/start");
        let response = self
            .request(self.client.post(&url))
            .json(&json!({ "call_id": call_id, "business_id": business_id }))
            .send()
            .await
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlatformError::InvalidResponse(format!(
                "call start log returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn transcript(&self, call_id: &str, line: TranscriptLine) -> PlatformResult<()> {
        let url = self.url(&format!("/api/v1/call-logs/{call_id}/transcript"));
        let response = self
            .request(self.client.post(&url))
            .json(&line)
            .send()
            .await
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlatformError::InvalidResponse(format!(
                "transcript log returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn call_ended(&self, record: CallRecord) -> PlatformResult<()> {
        let url = self.url("/api/v1/call-logs");
        let response = self
            .request(self.client.post(&url))
            .json(&record)
            .send()
            .await
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PlatformError::InvalidResponse(format!(
                "call log returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

// ============================================================================
// HTTP-backed actions
// ============================================================================

/// An action handler that forwards invocations to a business webhook.
///
/// The webhook receives the parsed arguments as its JSON body and its JSON
/// response becomes the function result.
pub struct HttpActionHandler {
    name: String,
    description: String,
    parameters: serde_json::Value,
    url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpActionHandler {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> PlatformResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PlatformError::Request(e.to_string()))?;

        Ok(HttpActionHandler {
            name: name.into(),
            description: description.into(),
            parameters,
            url: url.into(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl ActionHandler for HttpActionHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition::function(&self.name, &self.description, self.parameters.clone())
    }

    async fn execute(&self, arguments: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        let mut builder = self.client.post(&self.url).json(&arguments);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("action endpoint returned {status}");
        }

        let body = response.bytes().await?;
        if body.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> PlatformHttpConfig {
        PlatformHttpConfig {
            base_url,
            api_key: None,
            timeout: Duration::from_secs(2),
            agent_cache_ttl: Duration::from_secs(60),
            agent_cache_capacity: 16,
        }
    }

    #[tokio::test]
    async fn test_resolve_agent_and_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/businesses/biz_1/agent-config"))
            .and(query_param("agent_type", "reception"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "instructions": "You answer the phone.",
                "voice": "alloy",
                "greeting": "Hello!"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpPlatformClient::new(test_config(server.uri())).unwrap();
        let first = client.resolve_agent("biz_1", Some("reception")).await.unwrap();
        assert_eq!(first.voice.as_deref(), Some("alloy"));

        // Second hit is served from cache; the mock expects exactly one call.
        let second = client.resolve_agent("biz_1", Some("reception")).await.unwrap();
        assert_eq!(second.instructions, first.instructions);
    }

    #[tokio::test]
    async fn test_unknown_business_is_distinct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/businesses/ghost/agent-config"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = HttpPlatformClient::new(test_config(server.uri())).unwrap();
        let err = client.resolve_agent("ghost", None).await.unwrap_err();
        assert!(matches!(err, PlatformError::UnknownBusiness(_)));
    }

    #[tokio::test]
    async fn test_credit_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/businesses/biz_1/credit"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"has_credit": false})),
            )
            .mount(&server)
            .await;

        let client = HttpPlatformClient::new(test_config(server.uri())).unwrap();
        assert!(!client.check_credit("biz_1", 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_transcript_posts_per_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/call-logs/CA-1/transcript"))
            .and(wiremock::matchers::body_json(serde_json::json!({
                "role": "caller",
                "text": "Are you open today?"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpPlatformClient::new(test_config(server.uri())).unwrap();
        client
            .transcript("CA-1", TranscriptLine::caller("Are you open today?"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_action_handler_posts_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/create-order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "order_id": "ord_42"
            })))
            .mount(&server)
            .await;

        let handler = HttpActionHandler::new(
            "create_order",
            "Create an order",
            serde_json::json!({"type": "object"}),
            format!("{}/hooks/create-order", server.uri()),
            None,
            Duration::from_secs(2),
        )
        .unwrap();

        let result = handler
            .execute(serde_json::json!({"items": ["latte"]}))
            .await
            .unwrap();
        assert_eq!(result["order_id"], "ord_42");
    }

    #[tokio::test]
    async fn test_action_handler_surfaces_failure_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hooks/broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let handler = HttpActionHandler::new(
            "broken",
            "Always fails",
            serde_json::json!({"type": "object"}),
            format!("{}/hooks/broken", server.uri()),
            None,
            Duration::from_secs(2),
        )
        .unwrap();

        assert!(handler.execute(serde_json::json!({})).await.is_err());
    }
}
