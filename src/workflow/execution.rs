//! Execution records.
//!
//! An [`Execution`] is one run of a template against a task: a status, one
//! [`StepExecution`] per template step, and the accumulating [`Context`].
//! Records serialize with camelCase keys so persisted JSON matches what
//! front-ends consume.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::context::Context;
use super::template::{StepTemplate, WorkflowTemplate};

/// Lifecycle status of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Running,
    Paused,
    Completed,
    Failed,
}

impl ExecutionStatus {
    /// Completed and failed executions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Success,
    Failed,
    WaitingHuman,
}

impl StepStatus {
    /// Success and failed steps are never re-run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::WaitingHuman => "waiting_human",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime state of one template step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    /// Unique id of this step run
    pub id: String,

    /// Id of the template step this run belongs to
    pub step_id: String,

    /// Display name copied from the template
    pub name: String,

    /// Description copied from the template
    #[serde(default)]
    pub description: String,

    /// Current status
    pub status: StepStatus,

    /// Progress percentage (0..=100)
    #[serde(default)]
    pub progress: u8,

    /// Result produced by the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Result held back until a human confirms it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_output: Option<Value>,

    /// Failure message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Reasoning text reported by the agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,

    /// Human-readable log lines
    #[serde(default)]
    pub logs: Vec<String>,

    /// When the step started running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    /// When the step reached a terminal or waiting state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    /// Whether a person must confirm this step
    #[serde(default)]
    pub requires_human_input: bool,

    /// Text shown to the person confirming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_prompt: Option<String>,
}

impl StepExecution {
    /// Create a pending step run for a template step.
    pub fn pending(step: &StepTemplate) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            step_id: step.id.clone(),
            name: step.name.clone(),
            description: step.description.clone(),
            status: StepStatus::Pending,
            progress: 0,
            output: None,
            pending_output: None,
            error: None,
            thinking: None,
            logs: Vec::new(),
            start_time: None,
            end_time: None,
            requires_human_input: step.requires_human_input,
            human_prompt: step.human_prompt.clone(),
        }
    }

    /// Append a log line.
    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }
}

/// One run of a workflow template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    /// Unique execution id
    pub id: String,

    /// Template this execution runs
    pub template_id: String,

    /// Task this execution belongs to
    pub task_id: String,

    /// Current status
    pub status: ExecutionStatus,

    /// Template step id of the step in progress (or last touched)
    #[serde(default)]
    pub current_step_id: Option<String>,

    /// One entry per template step, in template order
    pub steps: Vec<StepExecution>,

    /// Shared context
    #[serde(default)]
    pub context: Context,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Last mutation time
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    /// Create a running execution with every step pending.
    pub fn new(template: &WorkflowTemplate, task_id: impl Into<String>, context: Context) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            template_id: template.id.clone(),
            task_id: task_id.into(),
            status: ExecutionStatus::Running,
            current_step_id: None,
            steps: template.steps.iter().map(StepExecution::pending).collect(),
            context,
            created_at: now,
            updated_at: now,
        }
    }

    /// Index of the first step that has not started yet.
    pub fn next_pending_index(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::Pending)
    }

    /// Index of the step currently gated on human input.
    pub fn waiting_step_index(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::WaitingHuman)
    }

    /// Index of a step left `running` (e.g. by a crash mid-step).
    pub fn interrupted_step_index(&self) -> Option<usize> {
        self.steps.iter().position(|s| s.status == StepStatus::Running)
    }

    /// Look up a step run by template step id.
    pub fn step(&self, step_id: &str) -> Option<&StepExecution> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// The step named by `current_step_id`.
    pub fn current_step(&self) -> Option<&StepExecution> {
        self.current_step_id.as_deref().and_then(|id| self.step(id))
    }

    /// Whether the execution has reached a terminal status.
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of steps that finished successfully.
    pub fn completed_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.status == StepStatus::Success).count()
    }

    /// Overall progress percentage.
    pub fn progress(&self) -> u8 {
        if self.steps.is_empty() {
            return 0;
        }
        let total: u32 = self.steps.iter().map(|s| u32::from(s.progress)).sum();
        (total / self.steps.len() as u32) as u8
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
