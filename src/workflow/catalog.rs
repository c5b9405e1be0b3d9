//! Template catalog.
//!
//! Templates are shared as `Arc<WorkflowTemplate>` and never mutated once
//! registered. Explicit re-registration swaps the entry; executions already
//! holding the old template keep it. Starting an execution only adds
//! templates whose id is not yet taken.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::template::{StepTemplate, StepType, WorkflowTemplate};

/// Built-in operations-plan template id.
pub const PLAN_TEMPLATE: &str = "ops-plan";

/// Built-in status-report template id.
pub const REPORT_TEMPLATE: &str = "ops-report";

/// Built-in document template id.
pub const DOCUMENT_TEMPLATE: &str = "ops-document";

/// Registry of workflow templates keyed by id.
#[derive(Debug, Default)]
pub struct TemplateCatalog {
    templates: RwLock<HashMap<String, Arc<WorkflowTemplate>>>,
}

impl TemplateCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding the built-in templates.
    pub fn with_builtins() -> Self {
        let catalog = Self::new();
        for template in builtin_templates() {
            catalog.register(template);
        }
        catalog
    }

    /// Register a template, returning the shared handle.
    pub fn register(&self, template: WorkflowTemplate) -> Arc<WorkflowTemplate> {
        let template = Arc::new(template);
        self.templates.write().insert(template.id.clone(), Arc::clone(&template));
        template
    }

    /// Register a template unless its id is taken. Returns whether it was
    /// added.
    pub fn register_if_absent(&self, template: Arc<WorkflowTemplate>) -> bool {
        match self.templates.write().entry(template.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(template);
                true
            }
        }
    }

    /// Look up a template by id.
    pub fn get(&self, template_id: &str) -> Option<Arc<WorkflowTemplate>> {
        self.templates.read().get(template_id).cloned()
    }

    /// Sorted template ids.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.templates.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.read().is_empty()
    }
}

/// The three deliverable workflows shipped with the engine.
pub fn builtin_templates() -> Vec<WorkflowTemplate> {
    vec![
        WorkflowTemplate::new(PLAN_TEMPLATE, "Operations plan", "planning")
            .with_step(
                StepTemplate::new("analyze-request", "Analyze request", StepType::Analysis)
                    .with_description("Break the request into goals, constraints and budget")
                    .with_prompt("plan.analysis")
                    .with_estimated_duration(20),
            )
            .with_step(
                StepTemplate::new("draft-plan", "Draft plan", StepType::Generation)
                    .with_description("Draft the operations plan from the analysis")
                    .with_prompt("plan.generation")
                    .with_estimated_duration(40)
                    .with_human_input("Review the drafted plan and approve or adjust it"),
            )
            .with_step(
                StepTemplate::new("validate-plan", "Validate plan", StepType::Validation)
                    .with_description("Check the approved plan")
                    .with_estimated_duration(5),
            )
            .with_step(
                StepTemplate::new("notify-owner", "Notify owner", StepType::Notification)
                    .with_description("Tell the task owner the plan is ready")
                    .with_estimated_duration(1),
            ),
        WorkflowTemplate::new(REPORT_TEMPLATE, "Status report", "reporting")
            .with_step(
                StepTemplate::new("collect-metrics", "Collect metrics", StepType::Analysis)
                    .with_description("Summarize the figures supplied with the request")
                    .with_prompt("report.analysis")
                    .with_estimated_duration(20),
            )
            .with_step(
                StepTemplate::new("write-report", "Write report", StepType::Generation)
                    .with_description("Write the report narrative")
                    .with_prompt("report.generation")
                    .with_estimated_duration(40),
            )
            .with_step(
                StepTemplate::new("review-report", "Review report", StepType::Evaluation)
                    .with_description("Score the report for completeness and accuracy")
                    .with_prompt("report.evaluation")
                    .with_estimated_duration(15),
            )
            .with_step(
                StepTemplate::new("publish-report", "Publish report", StepType::Submission)
                    .with_description("Render and store the report")
                    .with_estimated_duration(5),
            ),
        WorkflowTemplate::new(DOCUMENT_TEMPLATE, "Operations document", "documentation")
            .with_step(
                StepTemplate::new("outline", "Outline document", StepType::Analysis)
                    .with_description("Outline sections from the request")
                    .with_prompt("document.analysis")
                    .with_estimated_duration(15),
            )
            .with_step(
                StepTemplate::new("write-document", "Write document", StepType::Generation)
                    .with_description("Write the document body")
                    .with_prompt("document.generation")
                    .with_estimated_duration(60)
                    .with_human_input("Review the document draft before it is filed"),
            )
            .with_step(
                StepTemplate::new("check-document", "Check document", StepType::Validation)
                    .with_description("Check the approved draft")
                    .with_estimated_duration(5),
            )
            .with_step(
                StepTemplate::new("file-document", "File document", StepType::Submission)
                    .with_description("Render and store the document")
                    .with_estimated_duration(5),
            ),
    ]
}
