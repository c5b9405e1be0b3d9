#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::needless_pass_by_value)]

//! # Opsflow
//!
//! Workflow execution engine for an operations assistant.
//!
//! A request is classified into an intent, routed to a workflow template,
//! and run as an execution: an ordered series of typed steps (analysis,
//! generation, validation, submission, notification, evaluation) sharing an
//! accumulating context.
//!
//! ## Features
//!
//! - **Sequential execution**: steps run strictly in template order on a
//!   task owned by the execution
//! - **Human-input gates**: steps can pause the execution until confirmed
//! - **Control**: pause, resume and cancel at any point
//! - **Persistence**: every mutation is written to an execution store, and
//!   executions can be restored after a restart
//! - **Live progress**: ordered snapshot streams per execution
//! - **Agent gateway**: chat-completion backend with a deterministic local
//!   fallback
//!
//! ## Quick Start
//!
//! ```no_run
//! use opsflow::workflow::{Context, WorkflowEngine, PLAN_TEMPLATE};
//!
//! # async fn run() -> opsflow::workflow::WorkflowResult<()> {
//! let engine = WorkflowEngine::builder().build();
//! let id = engine.start_template(PLAN_TEMPLATE, "task-1", Context::new().with("budget", 500_000))?;
//!
//! let mut updates = engine.subscribe(&id)?;
//! while let Some(snapshot) = updates.recv().await {
//!     println!("{} {}", snapshot.status, snapshot.progress());
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod ai;
pub mod core;
pub mod integrations;
pub mod workflow;

// Re-export commonly used types
pub use ai::{AgentGateway, ChatCompletionGateway, IntentRouter, LocalAgent};
pub use crate::core::{init_logging, Config};
pub use workflow::{
    Context, Execution, ExecutionStatus, StepStatus, Subscription, WorkflowEngine, WorkflowError,
    WorkflowResult, WorkflowTemplate,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "opsflow";
