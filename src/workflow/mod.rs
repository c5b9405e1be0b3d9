//! Workflow execution engine.
//!
//! Runs ordered, typed step templates against a shared context, one spawned
//! task per execution.
//!
//! ## Lifecycle
//!
//! - `running` - steps advance in template order
//! - `paused` - by request, or while a step waits for human input
//! - `completed` / `failed` - terminal, kept for reading
//!
//! ## Pieces
//!
//! - `WorkflowEngine` - start/pause/resume/cancel/confirm, snapshots, restore
//! - `StepRegistry` - one `StepExecutor` per step type
//! - `ExecutionStore` - whole-record persistence after every mutation
//! - `NotificationBus` - ordered snapshot fan-out per execution

mod actor;
mod bus;
mod catalog;
mod context;
mod engine;
mod error;
mod execution;
mod prompts;
mod steps;
mod store;
mod template;

pub use bus::{Callback, NotificationBus, Subscription};
pub use catalog::{builtin_templates, TemplateCatalog, DOCUMENT_TEMPLATE, PLAN_TEMPLATE, REPORT_TEMPLATE};
pub use context::{Context, AGENT_ID_KEY, HUMAN_INPUT_KEY, REQUEST_KEY};
pub use engine::{EngineBuilder, WorkflowEngine};
pub use error::{StepError, StoreError, WorkflowError, WorkflowResult};
pub use execution::{Execution, ExecutionStatus, StepExecution, StepStatus};
pub use prompts::{default_prompt, PromptLibrary};
pub use steps::{
    AgentStepExecutor, NotificationExecutor, StepExecutor, StepOutcome, StepRegistry, StepRequest,
    SubmissionExecutor, ValidationExecutor, DEFAULT_AGENT_ID,
};
pub use store::{ExecutionStore, JsonFileStore, MemoryStore};
pub use template::{StepTemplate, StepType, WorkflowTemplate};
