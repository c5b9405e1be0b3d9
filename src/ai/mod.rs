//! Agent gateway module.
//!
//! The boundary between the workflow engine and the language-model backend.
//!
//! ## Features
//!
//! - Intent recognition for incoming requests
//! - Agent execution for agent-backed workflow steps
//! - Chat-completion HTTP gateway with a deterministic local fallback
//! - Intent routing from a request to a workflow template

mod chat;
mod fallback;
mod intent;
mod routing;

pub use chat::ChatCompletionGateway;
pub use fallback::LocalAgent;
pub use intent::{Intent, IntentRecognition};
pub use routing::{AgentProfile, Dispatch, IntentRouter, RouteDecision};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One turn of conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Request to run an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    /// Agent to run
    pub agent_id: String,
    /// Task the run belongs to
    pub task_id: String,
    /// Task payload (the accumulated execution context)
    pub params: Value,
    /// System prompt for this step
    pub system_prompt: String,
}

/// Result of an agent run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    /// Structured output
    pub output: Value,
    /// Reasoning trace, if the agent reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Log lines
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Trait for agent gateways.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// Classify a request. Never fails: unusable backends degrade to a
    /// local classification.
    async fn recognize_intent(&self, text: &str, history: &[ChatMessage]) -> IntentRecognition;

    /// Run an agent for one workflow step.
    async fn execute_agent(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError>;

    /// Get the gateway name.
    fn name(&self) -> &str;
}

/// Agent gateway error types.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Gateway not available: {0}")]
    Unavailable(String),

    #[error("API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("No response from agent")]
    NoResponse,

    #[error("Transport error: {0}")]
    Transport(String),
}

impl AgentError {
    /// Whether the error means the backend could not be reached at all.
    ///
    /// These are absorbed by the local fallback instead of failing a step.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Transport(_))
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::MalformedResponse(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}
