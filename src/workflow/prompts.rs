//! System prompts for agent-backed steps.
//!
//! A step's `promptId` picks the prompt. Ids without an entry fall back to a
//! default prompt for the step's type, so a template never fails just
//! because a prompt is missing.

use std::collections::HashMap;

use super::template::{StepTemplate, StepType};

/// Prompt id -> system prompt text.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    prompts: HashMap<String, String>,
}

impl Default for PromptLibrary {
    fn default() -> Self {
        let prompts = BUILTIN_PROMPTS
            .iter()
            .map(|(id, text)| ((*id).to_string(), (*text).to_string()))
            .collect();
        Self { prompts }
    }
}

impl PromptLibrary {
    /// Built-in prompts only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Built-in prompts with configured overrides applied on top.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Self {
        let mut library = Self::default();
        for (id, text) in overrides {
            library.insert(id.clone(), text.clone());
        }
        library
    }

    /// Add or replace a prompt.
    pub fn insert(&mut self, id: impl Into<String>, text: impl Into<String>) {
        self.prompts.insert(id.into(), text.into());
    }

    /// Look up a prompt by id.
    pub fn get(&self, id: &str) -> Option<&str> {
        self.prompts.get(id).map(String::as_str)
    }

    /// System prompt for a step.
    pub fn resolve(&self, step: &StepTemplate) -> String {
        if let Some(text) = step.prompt_id.as_deref().and_then(|id| self.get(id)) {
            return text.to_string();
        }
        if let Some(id) = &step.prompt_id {
            tracing::debug!(prompt_id = %id, step_id = %step.id, "Unknown prompt id, using type default");
        }
        default_prompt(&step.step_type).to_string()
    }
}

/// Per-type fallback prompt.
pub fn default_prompt(step_type: &StepType) -> &'static str {
    match step_type {
        StepType::Analysis => {
            "You are an operations analyst. Study the task context and return a JSON object \
             describing goals, constraints, risks and open questions."
        }
        StepType::Generation => {
            "You are an operations writer. Using the task context and prior analysis, produce \
             the requested deliverable as a JSON object with a title and sections."
        }
        StepType::Evaluation => {
            "You are a reviewer. Score the deliverable in the context for completeness and \
             accuracy and return a JSON object with a score from 0 to 100 and findings."
        }
        _ => "You are an operations assistant. Complete the step using the task context.",
    }
}

const BUILTIN_PROMPTS: &[(&str, &str)] = &[
    (
        "plan.analysis",
        "You are an operations planner. Analyse the request and budget in the context. \
         Return JSON with goals, constraints, budget assessment and risks.",
    ),
    (
        "plan.generation",
        "You are an operations planner. Draft a phased plan from the analysis in the context. \
         Return JSON with phases, owners, milestones and budget allocation.",
    ),
    (
        "report.analysis",
        "You are a reporting analyst. Summarize the figures and events in the context. \
         Return JSON with key metrics, trends and anomalies.",
    ),
    (
        "report.generation",
        "You are a report writer. Write a status report from the analysis in the context. \
         Return JSON with a title, summary and sections.",
    ),
    (
        "report.evaluation",
        "You are a report reviewer. Check the generated report against the analysis. \
         Return JSON with a score from 0 to 100 and a list of findings.",
    ),
    (
        "document.analysis",
        "You are a technical writer. Outline the document the request asks for. \
         Return JSON with a title and ordered section headings.",
    ),
    (
        "document.generation",
        "You are a technical writer. Write each section of the outlined document. \
         Return JSON with a title and sections, each with a heading and body.",
    ),
];
