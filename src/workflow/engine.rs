//! Workflow engine.
//!
//! [`WorkflowEngine`] is a cheap, cloneable handle. It owns the table of
//! known executions, spawns one task per live execution and routes control
//! operations to those tasks. It never writes execution state itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::Instrument;

use super::actor::{Command, ExecutionActor, Reply};
use super::bus::{NotificationBus, Subscription};
use super::catalog::TemplateCatalog;
use super::context::Context;
use super::error::{WorkflowError, WorkflowResult};
use super::execution::{Execution, ExecutionStatus, StepStatus};
use super::prompts::PromptLibrary;
use super::steps::StepRegistry;
use super::store::{ExecutionStore, JsonFileStore, MemoryStore};
use super::template::WorkflowTemplate;
use crate::ai::ChatCompletionGateway;
use crate::core::{Config, EngineConfig, UnknownStepPolicy};
use crate::integrations::{MarkdownRenderer, MemoryBlobStore};

struct ExecutionSlot {
    snapshot: Arc<RwLock<Execution>>,
    /// `None` for executions restored in a terminal state.
    commands: Option<mpsc::UnboundedSender<Command>>,
}

struct EngineInner {
    config: EngineConfig,
    store: Arc<dyn ExecutionStore>,
    steps: Arc<StepRegistry>,
    catalog: Arc<TemplateCatalog>,
    bus: NotificationBus,
    executions: RwLock<HashMap<String, ExecutionSlot>>,
}

/// Builder for [`WorkflowEngine`].
#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn ExecutionStore>>,
    steps: Option<StepRegistry>,
    catalog: Option<Arc<TemplateCatalog>>,
}

impl EngineBuilder {
    /// Engine settings.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Execution store. Defaults to [`MemoryStore`].
    pub fn store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Step executors. Defaults to [`StepRegistry::local`].
    pub fn steps(mut self, steps: StepRegistry) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Template catalog. Defaults to the built-in templates.
    pub fn catalog(mut self, catalog: Arc<TemplateCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn build(self) -> WorkflowEngine {
        WorkflowEngine {
            inner: Arc::new(EngineInner {
                config: self.config,
                store: self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
                steps: Arc::new(self.steps.unwrap_or_else(StepRegistry::local)),
                catalog: self
                    .catalog
                    .unwrap_or_else(|| Arc::new(TemplateCatalog::with_builtins())),
                bus: NotificationBus::new(),
                executions: RwLock::new(HashMap::new()),
            }),
        }
    }
}

/// Runs workflow executions.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    /// Start building an engine.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    /// Build an engine from configuration.
    ///
    /// Uses the JSON file store at the configured path and the
    /// chat-completion gateway for agent-backed steps.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = JsonFileStore::open(config.store.resolved_path())?;
        let gateway = ChatCompletionGateway::from_config(&config.gateway);
        if !gateway.has_credentials() {
            tracing::info!(
                env = %config.gateway.api_key_env,
                "No gateway API key found, agent steps will run locally"
            );
        }

        let steps = StepRegistry::with_defaults(
            Arc::new(gateway),
            Arc::new(PromptLibrary::with_overrides(&config.prompts)),
            Arc::new(MarkdownRenderer),
            Arc::new(MemoryBlobStore::new()),
        );

        Ok(Self::builder().config(config.engine).store(Arc::new(store)).steps(steps).build())
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Template catalog shared with routers.
    pub fn catalog(&self) -> &Arc<TemplateCatalog> {
        &self.inner.catalog
    }

    /// Start a new execution of `template`.
    ///
    /// Validates the template, persists the new execution and spawns its
    /// task. Returns without waiting for any step. Must be called from
    /// within a Tokio runtime.
    pub fn start(
        &self,
        template: impl Into<Arc<WorkflowTemplate>>,
        task_id: impl Into<String>,
        context: Context,
    ) -> WorkflowResult<String> {
        let (execution_id, _) = self.launch(template.into(), task_id.into(), context, false)?;
        Ok(execution_id)
    }

    /// Start a catalog template by id.
    pub fn start_template(
        &self,
        template_id: &str,
        task_id: impl Into<String>,
        context: Context,
    ) -> WorkflowResult<String> {
        let template = self
            .inner
            .catalog
            .get(template_id)
            .ok_or_else(|| WorkflowError::TemplateNotFound(template_id.to_string()))?;
        self.start(template, task_id, context)
    }

    /// Start an execution with a subscription registered before the first
    /// commit, so the start state is observed too.
    pub fn start_with_subscription(
        &self,
        template: impl Into<Arc<WorkflowTemplate>>,
        task_id: impl Into<String>,
        context: Context,
    ) -> WorkflowResult<(String, Subscription)> {
        let (execution_id, subscription) =
            self.launch(template.into(), task_id.into(), context, true)?;
        match subscription {
            Some(subscription) => Ok((execution_id, subscription)),
            None => Err(WorkflowError::ExecutionNotFound(execution_id)),
        }
    }

    fn launch(
        &self,
        template: Arc<WorkflowTemplate>,
        task_id: String,
        context: Context,
        subscribe: bool,
    ) -> WorkflowResult<(String, Option<Subscription>)> {
        template.validate(self.inner.config.unknown_steps)?;
        if self.inner.config.unknown_steps == UnknownStepPolicy::Reject {
            if let Some(step) = template.steps.iter().find(|s| !self.inner.steps.supports(&s.step_type)) {
                return Err(template.invalid(format!(
                    "no executor for step '{}' of type '{}'",
                    step.id, step.step_type
                )));
            }
        }
        if !self.inner.catalog.register_if_absent(Arc::clone(&template)) {
            tracing::debug!(template_id = %template.id, "Catalog already holds this template id, keeping it");
        }

        let execution = Execution::new(&template, task_id, context);
        let execution_id = execution.id.clone();
        let subscription = subscribe.then(|| self.inner.bus.subscribe(&execution_id));

        tracing::info!(
            execution_id = %execution_id,
            template_id = %template.id,
            task_id = %execution.task_id,
            steps = template.steps.len(),
            "Starting execution"
        );

        self.spawn(execution, template);
        Ok((execution_id, subscription))
    }

    /// Register an execution, commit its current state and spawn its task.
    ///
    /// Returns false, doing nothing, if the id is already registered.
    fn spawn(&self, execution: Execution, template: Arc<WorkflowTemplate>) -> bool {
        let execution_id = execution.id.clone();
        let mut actor = ExecutionActor::new(
            execution,
            template,
            self.inner.config,
            Arc::clone(&self.inner.steps),
            Arc::clone(&self.inner.store),
            self.inner.bus.clone(),
        );
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut executions = self.inner.executions.write();
            if executions.contains_key(&execution_id) {
                return false;
            }
            executions.insert(
                execution_id.clone(),
                ExecutionSlot { snapshot: actor.snapshot(), commands: Some(tx) },
            );
        }

        actor.commit();

        let span = tracing::info_span!("execution", execution_id = %execution_id);
        tokio::spawn(actor.run(rx).instrument(span));
        true
    }

    /// Pause a running execution.
    ///
    /// A step already in flight finishes first; no later step starts until
    /// the execution is resumed.
    pub async fn pause(&self, execution_id: &str) -> WorkflowResult<()> {
        self.send(execution_id, "pause", Command::Pause).await
    }

    /// Resume a paused execution that is not waiting for human input.
    pub async fn resume(&self, execution_id: &str) -> WorkflowResult<()> {
        self.send(execution_id, "resume", Command::Resume).await
    }

    /// Fail a non-terminal execution. Context already merged is kept.
    pub async fn cancel(&self, execution_id: &str) -> WorkflowResult<()> {
        self.send(execution_id, "cancel", Command::Cancel).await
    }

    /// Confirm the step waiting for human input and continue.
    ///
    /// `input` is merged into the context under `humanInput`.
    pub async fn confirm_human_input(&self, execution_id: &str, input: Value) -> WorkflowResult<()> {
        self.send(execution_id, "confirm human input for", |reply| {
            Command::ConfirmHumanInput(input, reply)
        })
        .await
    }

    async fn send<F>(&self, execution_id: &str, action: &'static str, command: F) -> WorkflowResult<()>
    where
        F: FnOnce(Reply) -> Command,
    {
        let (sender, snapshot) = {
            let executions = self.inner.executions.read();
            let slot = executions
                .get(execution_id)
                .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;
            (slot.commands.clone(), Arc::clone(&slot.snapshot))
        };

        let rejected = || WorkflowError::InvalidTransition {
            execution_id: execution_id.to_string(),
            action,
            status: snapshot.read().status,
        };

        let Some(sender) = sender else {
            return Err(rejected());
        };

        let (reply, response) = oneshot::channel();
        if sender.send(command(reply)).is_err() {
            return Err(rejected());
        }
        response.await.unwrap_or_else(|_| Err(rejected()))
    }

    /// Current state of an execution.
    ///
    /// In-memory state is authoritative; executions not loaded in this
    /// process are read from the store.
    pub fn get_execution(&self, execution_id: &str) -> Option<Execution> {
        if let Some(slot) = self.inner.executions.read().get(execution_id) {
            return Some(slot.snapshot.read().clone());
        }

        match self.inner.store.get(execution_id) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(execution_id = %execution_id, error = %e, "Failed to read execution from store");
                None
            }
        }
    }

    /// Snapshots of every execution known to this engine, oldest first.
    pub fn list_executions(&self) -> Vec<Execution> {
        let mut executions: Vec<Execution> = self
            .inner
            .executions
            .read()
            .values()
            .map(|slot| slot.snapshot.read().clone())
            .collect();
        executions.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        executions
    }

    /// Subscribe to an execution's snapshots through a channel.
    ///
    /// The latest snapshot is delivered first.
    pub fn subscribe(&self, execution_id: &str) -> WorkflowResult<Subscription> {
        let snapshot = self.snapshot_handle(execution_id)?;
        Ok(self.inner.bus.subscribe_or_replay(execution_id, &|| Some(snapshot.read().clone())))
    }

    /// Subscribe with a callback run synchronously after every commit.
    pub fn subscribe_with<F>(&self, execution_id: &str, callback: F) -> WorkflowResult<Subscription>
    where
        F: Fn(&Execution) + Send + Sync + 'static,
    {
        let snapshot = self.snapshot_handle(execution_id)?;
        Ok(self.inner.bus.subscribe_with_or_replay(execution_id, callback, &|| {
            Some(snapshot.read().clone())
        }))
    }

    /// Shared snapshot of a loaded execution. Finished streams replay it.
    fn snapshot_handle(&self, execution_id: &str) -> WorkflowResult<Arc<RwLock<Execution>>> {
        self.inner
            .executions
            .read()
            .get(execution_id)
            .map(|slot| Arc::clone(&slot.snapshot))
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))
    }

    /// Load an execution from the store and bring it back to life.
    ///
    /// Running records continue from their first unfinished step; a step
    /// caught mid-run is re-run. Paused records wait for `resume` or
    /// `confirm_human_input`. Terminal records are loaded read-only.
    /// Executions already loaded are returned as they are.
    pub fn restore_execution(&self, execution_id: &str) -> WorkflowResult<Execution> {
        if let Some(slot) = self.inner.executions.read().get(execution_id) {
            return Ok(slot.snapshot.read().clone());
        }

        let mut execution = self
            .inner
            .store
            .get(execution_id)?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(execution_id.to_string()))?;

        if execution.status.is_terminal() {
            let mut executions = self.inner.executions.write();
            if let Some(slot) = executions.get(execution_id) {
                return Ok(slot.snapshot.read().clone());
            }
            executions.insert(
                execution.id.clone(),
                ExecutionSlot { snapshot: Arc::new(RwLock::new(execution.clone())), commands: None },
            );
            drop(executions);

            self.inner.bus.close(&execution.id);
            tracing::debug!(execution_id = %execution_id, status = %execution.status, "Restored finished execution");
            return Ok(execution);
        }

        let template = self
            .inner
            .catalog
            .get(&execution.template_id)
            .ok_or_else(|| WorkflowError::TemplateNotFound(execution.template_id.clone()))?;

        let matches_template = template.steps.len() == execution.steps.len()
            && template.steps.iter().zip(&execution.steps).all(|(t, s)| t.id == s.step_id);
        if !matches_template {
            return Err(template.invalid(format!(
                "template no longer matches stored execution {execution_id}"
            )));
        }

        if let Some(index) = execution.interrupted_step_index() {
            let step = &mut execution.steps[index];
            step.status = StepStatus::Pending;
            step.progress = 0;
            step.start_time = None;
            step.log("Interrupted by restart, will run again");
        }
        if execution.status == ExecutionStatus::Idle {
            execution.status = ExecutionStatus::Running;
        }

        tracing::info!(
            execution_id = %execution_id,
            status = %execution.status,
            "Restoring execution"
        );
        let restored = execution.clone();
        if !self.spawn(execution, template) {
            // Restored concurrently; report the live state.
            return self.restore_execution(execution_id);
        }
        Ok(restored)
    }

    /// Restore every execution in the store. Failures are logged and
    /// skipped; the ids that were restored are returned.
    pub fn restore_all(&self) -> WorkflowResult<Vec<String>> {
        let mut restored = Vec::new();
        for execution_id in self.inner.store.list_ids()? {
            match self.restore_execution(&execution_id) {
                Ok(_) => restored.push(execution_id),
                Err(e) => {
                    tracing::warn!(execution_id = %execution_id, error = %e, "Failed to restore execution");
                }
            }
        }
        Ok(restored)
    }
}

impl fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.inner.config)
            .field("executions", &self.inner.executions.read().len())
            .field("steps", &self.inner.steps)
            .finish()
    }
}
