//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::Notify;

use opsflow::workflow::{
    Execution, StepError, StepExecutor, StepOutcome, StepRequest, StepTemplate, StepType,
    Subscription, WorkflowTemplate,
};

/// Upper bound for any wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Receive snapshots until `predicate` holds.
pub async fn wait_for<F>(subscription: &mut Subscription, predicate: F) -> Execution
where
    F: FnMut(&Execution) -> bool,
{
    tokio::time::timeout(WAIT, subscription.wait_until(predicate))
        .await
        .expect("timed out waiting for execution state")
        .expect("snapshot stream ended")
}

/// Output every scripted step produces.
pub fn scripted_output(step_id: &str) -> serde_json::Value {
    json!({ "step": step_id })
}

/// Deterministic executor that records the context keys each step saw.
#[derive(Default)]
pub struct ScriptedExecutor {
    seen: Mutex<Vec<(String, Vec<String>)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// `(step_id, sorted context keys)` per call, in call order.
    pub fn seen(&self) -> Vec<(String, Vec<String>)> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl StepExecutor for ScriptedExecutor {
    async fn execute(&self, request: StepRequest) -> Result<StepOutcome, StepError> {
        let mut keys: Vec<String> = request.context.keys().map(str::to_string).collect();
        keys.sort();
        self.seen.lock().push((request.step.id.clone(), keys));

        Ok(StepOutcome::published(
            request.step.step_type.context_key(),
            scripted_output(&request.step.id),
        )
        .with_log(format!("{} completed", request.step.name)))
    }
}

/// Always fails.
pub struct FailingExecutor;

#[async_trait]
impl StepExecutor for FailingExecutor {
    async fn execute(&self, _request: StepRequest) -> Result<StepOutcome, StepError> {
        Err(StepError::Failed("boom".to_string()))
    }
}

/// Always panics.
pub struct PanickingExecutor;

#[async_trait]
impl StepExecutor for PanickingExecutor {
    async fn execute(&self, _request: StepRequest) -> Result<StepOutcome, StepError> {
        panic!("executor exploded");
    }
}

/// Sleeps far longer than any configured step timeout.
pub struct SlowExecutor;

#[async_trait]
impl StepExecutor for SlowExecutor {
    async fn execute(&self, _request: StepRequest) -> Result<StepOutcome, StepError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(StepOutcome::default())
    }
}

/// Signals when it starts and finishes only when released.
#[derive(Default)]
pub struct BlockingExecutor {
    pub started: Notify,
    pub release: Notify,
}

impl BlockingExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl StepExecutor for BlockingExecutor {
    async fn execute(&self, request: StepRequest) -> Result<StepOutcome, StepError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(StepOutcome::published(
            request.step.step_type.context_key(),
            scripted_output(&request.step.id),
        ))
    }
}

/// analysis -> generation -> evaluation, no gates.
pub fn three_step_template(id: &str) -> WorkflowTemplate {
    WorkflowTemplate::new(id, "Three steps", "testing")
        .with_step(StepTemplate::new("a", "Analyse", StepType::Analysis))
        .with_step(StepTemplate::new("b", "Generate", StepType::Generation))
        .with_step(StepTemplate::new("c", "Evaluate", StepType::Evaluation))
}

/// analysis -> generation (gated) -> validation.
pub fn gated_template(id: &str) -> WorkflowTemplate {
    WorkflowTemplate::new(id, "Gated", "testing")
        .with_step(StepTemplate::new("a", "Analyse", StepType::Analysis))
        .with_step(
            StepTemplate::new("b", "Generate", StepType::Generation)
                .with_human_input("Approve the draft"),
        )
        .with_step(StepTemplate::new("c", "Validate", StepType::Validation))
}
