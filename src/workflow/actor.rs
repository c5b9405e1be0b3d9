//! Per-execution task.
//!
//! Each live execution is owned by one spawned task. The task is the only
//! writer of its [`Execution`]: steps advance here, and control operations
//! arrive as [`Command`]s on its queue. Every mutation goes through
//! [`ExecutionActor::commit`], which persists, refreshes the shared snapshot
//! and notifies subscribers, in that order.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot};

use super::bus::NotificationBus;
use super::context::HUMAN_INPUT_KEY;
use super::error::{StepError, StoreError, WorkflowError, WorkflowResult};
use super::execution::{Execution, ExecutionStatus, StepStatus};
use super::steps::{StepExecutor, StepOutcome, StepRegistry, StepRequest};
use super::store::ExecutionStore;
use super::template::{StepTemplate, WorkflowTemplate};
use crate::core::{EngineConfig, HumanInputPolicy};

/// Error recorded on a gated step when its execution is cancelled.
pub(crate) const CANCELLED_MESSAGE: &str = "execution cancelled";

pub(crate) type Reply = oneshot::Sender<WorkflowResult<()>>;

/// Control operation delivered to an execution task.
pub(crate) enum Command {
    Pause(Reply),
    Resume(Reply),
    Cancel(Reply),
    ConfirmHumanInput(Value, Reply),
}

/// Owner of one execution's state.
pub(crate) struct ExecutionActor {
    execution: Execution,
    template: Arc<WorkflowTemplate>,
    config: EngineConfig,
    steps: Arc<StepRegistry>,
    store: Arc<dyn ExecutionStore>,
    bus: NotificationBus,
    snapshot: Arc<RwLock<Execution>>,
}

impl ExecutionActor {
    pub(crate) fn new(
        execution: Execution,
        template: Arc<WorkflowTemplate>,
        config: EngineConfig,
        steps: Arc<StepRegistry>,
        store: Arc<dyn ExecutionStore>,
        bus: NotificationBus,
    ) -> Self {
        let snapshot = Arc::new(RwLock::new(execution.clone()));
        Self { execution, template, config, steps, store, bus, snapshot }
    }

    /// Shared read view of the execution.
    pub(crate) fn snapshot(&self) -> Arc<RwLock<Execution>> {
        Arc::clone(&self.snapshot)
    }

    /// Persist, refresh the snapshot, notify.
    ///
    /// Store failures are logged and do not stop the execution.
    pub(crate) fn commit(&mut self) {
        self.execution.touch();
        if let Err(e) = self.persist() {
            tracing::warn!(
                execution_id = %self.execution.id,
                error = %e,
                "Failed to persist execution, continuing in memory"
            );
        }
        *self.snapshot.write() = self.execution.clone();
        self.bus.publish(&self.execution);
    }

    /// Write the record to the store.
    ///
    /// Store implementations may block on IO. On a multi-threaded runtime
    /// the write runs through `block_in_place` so other executions keep
    /// their worker; a current-thread runtime writes inline.
    fn persist(&self) -> Result<(), StoreError> {
        let flavor = Handle::try_current().map(|handle| handle.runtime_flavor());
        if matches!(flavor, Ok(RuntimeFlavor::MultiThread)) {
            tokio::task::block_in_place(|| self.store.put(&self.execution))
        } else {
            self.store.put(&self.execution)
        }
    }

    /// Drive the execution until it is terminal or nobody can reach it.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            match self.execution.status {
                ExecutionStatus::Running => {
                    // Commands queued while the previous step ran apply
                    // before the next one starts.
                    while let Ok(command) = commands.try_recv() {
                        self.handle(command);
                    }
                    if self.execution.status != ExecutionStatus::Running {
                        continue;
                    }
                    match self.execution.next_pending_index() {
                        Some(index) => self.run_step(index, &mut commands).await,
                        None => self.complete(),
                    }
                }
                status if status.is_terminal() => break,
                _ => match commands.recv().await {
                    Some(command) => self.handle(command),
                    None => {
                        tracing::debug!(execution_id = %self.execution.id, "Engine dropped, parking execution");
                        return;
                    }
                },
            }
        }

        commands.close();
        while let Ok(command) = commands.try_recv() {
            self.handle(command);
        }
        self.bus.close(&self.execution.id);
        tracing::debug!(
            execution_id = %self.execution.id,
            status = %self.execution.status,
            "Execution task finished"
        );
    }

    async fn run_step(&mut self, index: usize, commands: &mut mpsc::UnboundedReceiver<Command>) {
        let template = self.template.steps[index].clone();

        let step = &mut self.execution.steps[index];
        step.status = StepStatus::Running;
        step.progress = 0;
        step.start_time = Some(Utc::now());
        step.end_time = None;
        step.log(format!("{} started", template.name));
        self.execution.current_step_id = Some(template.id.clone());
        self.commit();

        tracing::debug!(
            execution_id = %self.execution.id,
            step_id = %template.id,
            step_type = %template.step_type,
            "Step started"
        );

        let request = StepRequest {
            execution_id: self.execution.id.clone(),
            task_id: self.execution.task_id.clone(),
            step: template.clone(),
            context: self.execution.context.clone(),
        };
        let invocation = invoke(self.steps.get(&template.step_type), request, self.config.step_timeout());
        tokio::pin!(invocation);

        // Commands are served while the step runs; their effect on
        // advancement is observed once the step settles.
        let result = loop {
            tokio::select! {
                biased;
                Some(command) = commands.recv() => self.handle(command),
                result = &mut invocation => break result,
            }
        };

        self.settle_step(index, &template, result);
    }

    fn settle_step(&mut self, index: usize, template: &StepTemplate, result: Result<StepOutcome, StepError>) {
        let gate = template.requires_human_input
            && self.config.human_input == HumanInputPolicy::Gate
            && !self.execution.status.is_terminal();

        match result {
            Ok(outcome) => {
                self.execution.context.merge(outcome.context_delta);

                let step = &mut self.execution.steps[index];
                step.progress = 100;
                step.thinking = outcome.thinking;
                step.logs.extend(outcome.logs);

                if gate {
                    step.status = StepStatus::WaitingHuman;
                    step.pending_output = Some(outcome.output);
                    step.log("Waiting for human input");
                    self.execution.status = ExecutionStatus::Paused;
                    tracing::info!(
                        execution_id = %self.execution.id,
                        step_id = %template.id,
                        "Step waiting for human input"
                    );
                } else {
                    step.status = StepStatus::Success;
                    step.output = Some(outcome.output);
                    step.end_time = Some(Utc::now());
                    tracing::debug!(execution_id = %self.execution.id, step_id = %template.id, "Step completed");
                }
            }
            Err(e) => {
                let step = &mut self.execution.steps[index];
                step.status = StepStatus::Failed;
                step.error = Some(e.to_string());
                step.end_time = Some(Utc::now());
                step.log(format!("{} failed: {e}", template.name));
                self.execution.status = ExecutionStatus::Failed;
                tracing::warn!(
                    execution_id = %self.execution.id,
                    step_id = %template.id,
                    error = %e,
                    "Step failed"
                );
            }
        }

        self.commit();
    }

    fn complete(&mut self) {
        self.execution.status = ExecutionStatus::Completed;
        self.execution.current_step_id = None;
        self.commit();
        tracing::info!(
            execution_id = %self.execution.id,
            template_id = %self.execution.template_id,
            "Execution completed"
        );
    }

    fn handle(&mut self, command: Command) {
        let (result, reply) = match command {
            Command::Pause(reply) => (self.pause(), reply),
            Command::Resume(reply) => (self.resume(), reply),
            Command::Cancel(reply) => (self.cancel(), reply),
            Command::ConfirmHumanInput(input, reply) => (self.confirm(input), reply),
        };
        // The caller may have stopped waiting.
        let _ = reply.send(result);
    }

    fn pause(&mut self) -> WorkflowResult<()> {
        if self.execution.status != ExecutionStatus::Running {
            return Err(self.rejected("pause"));
        }
        self.execution.status = ExecutionStatus::Paused;
        self.commit();
        tracing::info!(execution_id = %self.execution.id, "Execution paused");
        Ok(())
    }

    fn resume(&mut self) -> WorkflowResult<()> {
        if self.execution.status != ExecutionStatus::Paused {
            return Err(self.rejected("resume"));
        }
        if self.execution.waiting_step_index().is_some() {
            return Err(WorkflowError::AwaitingHumanInput(self.execution.id.clone()));
        }
        self.execution.status = ExecutionStatus::Running;
        self.commit();
        tracing::info!(execution_id = %self.execution.id, "Execution resumed");
        Ok(())
    }

    fn cancel(&mut self) -> WorkflowResult<()> {
        if self.execution.status.is_terminal() {
            return Err(self.rejected("cancel"));
        }
        if let Some(index) = self.execution.waiting_step_index() {
            let step = &mut self.execution.steps[index];
            step.status = StepStatus::Failed;
            step.error = Some(CANCELLED_MESSAGE.to_string());
            step.end_time = Some(Utc::now());
            let line = format!("{} failed: {CANCELLED_MESSAGE}", step.name);
            step.log(line);
        }
        self.execution.status = ExecutionStatus::Failed;
        self.commit();
        tracing::info!(execution_id = %self.execution.id, "Execution cancelled");
        Ok(())
    }

    fn confirm(&mut self, input: Value) -> WorkflowResult<()> {
        let index = match self.execution.waiting_step_index() {
            Some(index) if self.execution.status == ExecutionStatus::Paused => index,
            _ => return Err(self.rejected("confirm human input for")),
        };

        self.execution.context.insert(HUMAN_INPUT_KEY, input);
        let step = &mut self.execution.steps[index];
        step.status = StepStatus::Success;
        step.output = step.pending_output.take();
        step.end_time = Some(Utc::now());
        step.log("Human input confirmed");
        self.execution.status = ExecutionStatus::Running;
        self.commit();
        tracing::info!(execution_id = %self.execution.id, "Human input confirmed");
        Ok(())
    }

    fn rejected(&self, action: &'static str) -> WorkflowError {
        WorkflowError::InvalidTransition {
            execution_id: self.execution.id.clone(),
            action,
            status: self.execution.status,
        }
    }
}

/// Run one executor call with panic capture and an upper time bound.
///
/// A missing executor yields an empty outcome with a log line. A zero
/// timeout disables the bound.
async fn invoke(
    executor: Option<Arc<dyn StepExecutor>>,
    request: StepRequest,
    timeout: Duration,
) -> Result<StepOutcome, StepError> {
    let Some(executor) = executor else {
        tracing::warn!(
            execution_id = %request.execution_id,
            step_id = %request.step.id,
            step_type = %request.step.step_type,
            "No executor for step type, skipping"
        );
        return Ok(StepOutcome::default().with_log(format!(
            "Unrecognized step type '{}' for {}, skipped",
            request.step.step_type, request.step.name
        )));
    };

    let call = AssertUnwindSafe(executor.execute(request)).catch_unwind();
    let caught = if timeout.is_zero() {
        call.await
    } else {
        match tokio::time::timeout(timeout, call).await {
            Ok(caught) => caught,
            Err(_) => return Err(StepError::Timeout(timeout)),
        }
    };

    caught.unwrap_or_else(|panic| Err(StepError::Panicked(panic_message(panic.as_ref()))))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let text: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(text.as_ref()), "boom");

        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(owned.as_ref()), "bang");

        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_missing_executor_is_tolerated() {
        use crate::workflow::context::Context;
        use crate::workflow::template::StepType;

        let request = StepRequest {
            execution_id: "exec".into(),
            task_id: "task".into(),
            step: StepTemplate::new("x", "Custom", StepType::Unknown("translation".to_string())),
            context: Context::new(),
        };

        let outcome = invoke(None, request, Duration::from_secs(1)).await.unwrap();
        assert_eq!(outcome.output, serde_json::json!({}));
        assert!(outcome.context_delta.is_empty());
        assert_eq!(outcome.logs[0], "Unrecognized step type 'translation' for Custom, skipped");
    }
}
