//! Step executors.
//!
//! One executor per step type. Executors get a copy of the context and
//! return a delta; the engine does the merge.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::context::Context;
use super::error::StepError;
use super::prompts::PromptLibrary;
use super::template::{StepTemplate, StepType};
use crate::ai::{AgentGateway, AgentRequest, LocalAgent};
use crate::integrations::{BlobStore, DocumentRenderer, MarkdownRenderer, MemoryBlobStore};

/// Agent used when the context does not name one.
pub const DEFAULT_AGENT_ID: &str = "ops-assistant";

/// Input to a step executor.
#[derive(Debug, Clone)]
pub struct StepRequest {
    pub execution_id: String,
    pub task_id: String,
    pub step: StepTemplate,
    /// Snapshot of the execution context
    pub context: Context,
}

/// Result of a step executor.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// Value recorded as the step's output
    pub output: Value,
    /// Keys merged into the execution context
    pub context_delta: Context,
    /// Reasoning trace
    pub thinking: Option<String>,
    /// Log lines appended to the step
    pub logs: Vec<String>,
}

impl Default for StepOutcome {
    fn default() -> Self {
        Self { output: json!({}), context_delta: Context::new(), thinking: None, logs: Vec::new() }
    }
}

impl StepOutcome {
    /// Outcome that also stores `output` in the context under `key`.
    pub fn published(key: &str, output: Value) -> Self {
        Self {
            context_delta: Context::new().with(key, output.clone()),
            output,
            ..Self::default()
        }
    }

    pub fn with_log(mut self, line: impl Into<String>) -> Self {
        self.logs.push(line.into());
        self
    }

    pub fn with_thinking(mut self, thinking: Option<String>) -> Self {
        self.thinking = thinking;
        self
    }
}

/// Performs the work of one step type.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, request: StepRequest) -> Result<StepOutcome, StepError>;
}

/// Delegates `analysis`, `generation` and `evaluation` steps to the agent
/// gateway.
pub struct AgentStepExecutor {
    gateway: Arc<dyn AgentGateway>,
    prompts: Arc<PromptLibrary>,
    default_agent: String,
}

impl AgentStepExecutor {
    pub fn new(gateway: Arc<dyn AgentGateway>, prompts: Arc<PromptLibrary>) -> Self {
        Self { gateway, prompts, default_agent: DEFAULT_AGENT_ID.to_string() }
    }

    /// Agent to use when the context has no `agentId`.
    pub fn with_default_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.default_agent = agent_id.into();
        self
    }
}

#[async_trait]
impl StepExecutor for AgentStepExecutor {
    async fn execute(&self, request: StepRequest) -> Result<StepOutcome, StepError> {
        let agent_id = request.context.agent_id().unwrap_or(self.default_agent.as_str()).to_string();
        let agent_request = AgentRequest {
            agent_id,
            task_id: request.task_id.clone(),
            params: request.context.to_value(),
            system_prompt: self.prompts.resolve(&request.step),
        };

        let response = self.gateway.execute_agent(&agent_request).await?;

        let mut outcome = StepOutcome::published(request.step.step_type.context_key(), response.output)
            .with_thinking(response.thinking);
        outcome.logs = response.logs;
        Ok(outcome.with_log(format!("{} completed", request.step.name)))
    }
}

/// Approves unconditionally, recording which deliverables were present.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationExecutor;

#[async_trait]
impl StepExecutor for ValidationExecutor {
    async fn execute(&self, request: StepRequest) -> Result<StepOutcome, StepError> {
        let checked: Vec<&str> = [StepType::Analysis, StepType::Generation, StepType::Evaluation]
            .iter()
            .map(StepType::context_key)
            .filter(|key| request.context.contains_key(key))
            .collect();

        let output = json!({ "approved": true, "checked": checked });
        Ok(StepOutcome::published(StepType::Validation.context_key(), output)
            .with_log(format!("{} approved", request.step.name)))
    }
}

/// Renders the deliverable and stores it as a blob.
pub struct SubmissionExecutor {
    renderer: Arc<dyn DocumentRenderer>,
    blobs: Arc<dyn BlobStore>,
}

impl SubmissionExecutor {
    pub fn new(renderer: Arc<dyn DocumentRenderer>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { renderer, blobs }
    }

    /// The generated deliverable, else the analysis, else the whole context.
    fn deliverable(context: &Context) -> Value {
        context
            .generation()
            .or_else(|| context.analysis())
            .cloned()
            .unwrap_or_else(|| context.to_value())
    }
}

#[async_trait]
impl StepExecutor for SubmissionExecutor {
    async fn execute(&self, request: StepRequest) -> Result<StepOutcome, StepError> {
        let document = self.renderer.render(&Self::deliverable(&request.context))?;
        let content_type = document.content_type.clone();
        let bytes = document.bytes.len();
        let blob_id = self.blobs.put(document)?;

        let output = json!({ "blobId": blob_id, "contentType": content_type, "bytes": bytes });
        Ok(StepOutcome::published(StepType::Submission.context_key(), output)
            .with_log(format!("{} stored {bytes} bytes as {content_type}", request.step.name)))
    }
}

/// Emits a notification event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationExecutor;

#[async_trait]
impl StepExecutor for NotificationExecutor {
    async fn execute(&self, request: StepRequest) -> Result<StepOutcome, StepError> {
        let message = if request.step.description.is_empty() {
            format!("{} finished for task {}", request.step.name, request.task_id)
        } else {
            request.step.description.clone()
        };

        tracing::info!(
            execution_id = %request.execution_id,
            task_id = %request.task_id,
            message = %message,
            "Workflow notification"
        );

        let output = json!({ "notified": true, "message": message });
        Ok(StepOutcome::published(StepType::Notification.context_key(), output)
            .with_log(format!("{} sent", request.step.name)))
    }
}

/// Step type -> executor.
#[derive(Clone, Default)]
pub struct StepRegistry {
    executors: HashMap<StepType, Arc<dyn StepExecutor>>,
}

impl StepRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with an executor for every recognized step type.
    pub fn with_defaults(
        gateway: Arc<dyn AgentGateway>,
        prompts: Arc<PromptLibrary>,
        renderer: Arc<dyn DocumentRenderer>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let agent: Arc<dyn StepExecutor> = Arc::new(AgentStepExecutor::new(gateway, prompts));

        Self::new()
            .with(StepType::Analysis, Arc::clone(&agent))
            .with(StepType::Generation, Arc::clone(&agent))
            .with(StepType::Evaluation, agent)
            .with(StepType::Validation, Arc::new(ValidationExecutor))
            .with(StepType::Submission, Arc::new(SubmissionExecutor::new(renderer, blobs)))
            .with(StepType::Notification, Arc::new(NotificationExecutor))
    }

    /// Defaults backed by the local agent, markdown rendering and an
    /// in-memory blob store.
    pub fn local() -> Self {
        Self::with_defaults(
            Arc::new(LocalAgent),
            Arc::new(PromptLibrary::new()),
            Arc::new(MarkdownRenderer),
            Arc::new(MemoryBlobStore::new()),
        )
    }

    /// Builder-style register.
    pub fn with(mut self, step_type: StepType, executor: Arc<dyn StepExecutor>) -> Self {
        self.register(step_type, executor);
        self
    }

    /// Register or replace the executor for a type.
    pub fn register(&mut self, step_type: StepType, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(step_type, executor);
    }

    pub fn get(&self, step_type: &StepType) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(step_type).cloned()
    }

    pub fn supports(&self, step_type: &StepType) -> bool {
        self.executors.contains_key(step_type)
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&str> = self.executors.keys().map(StepType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("StepRegistry").field("types", &types).finish()
    }
}
