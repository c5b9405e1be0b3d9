//! Workflow templates.
//!
//! A template is an immutable, ordered list of typed steps. Step order
//! defines execution order.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{WorkflowError, WorkflowResult};
use crate::core::UnknownStepPolicy;

/// Kind of work a step performs.
///
/// Serialized as its snake_case name. Names this build does not recognize
/// are kept verbatim in [`StepType::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepType {
    /// Analyse the inputs gathered so far
    Analysis,
    /// Produce deliverable content
    Generation,
    /// Check a deliverable before it moves on
    Validation,
    /// Hand the deliverable off
    Submission,
    /// Tell someone about progress
    Notification,
    /// Score or critique a deliverable
    Evaluation,
    /// Anything this build does not recognize, with its original name
    Unknown(String),
}

impl StepType {
    /// All recognized step types.
    pub const KNOWN: [StepType; 6] = [
        Self::Analysis,
        Self::Generation,
        Self::Validation,
        Self::Submission,
        Self::Notification,
        Self::Evaluation,
    ];

    /// Wire name of this type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Analysis => "analysis",
            Self::Generation => "generation",
            Self::Validation => "validation",
            Self::Submission => "submission",
            Self::Notification => "notification",
            Self::Evaluation => "evaluation",
            Self::Unknown(name) => name,
        }
    }

    /// Context key a step of this type writes its output under.
    pub fn context_key(&self) -> &str {
        self.as_str()
    }

    /// Whether this type is one of the recognized kinds.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl From<String> for StepType {
    fn from(name: String) -> Self {
        match name.as_str() {
            "analysis" => Self::Analysis,
            "generation" => Self::Generation,
            "validation" => Self::Validation,
            "submission" => Self::Submission,
            "notification" => Self::Notification,
            "evaluation" => Self::Evaluation,
            _ => Self::Unknown(name),
        }
    }
}

impl From<StepType> for String {
    fn from(step_type: StepType) -> Self {
        match step_type {
            StepType::Unknown(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One step of a workflow template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTemplate {
    /// Identifier, unique within the template
    pub id: String,

    /// Display name
    pub name: String,

    /// What the step does
    #[serde(default)]
    pub description: String,

    /// Step kind, selects the executor
    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Rough duration estimate in seconds (informational)
    #[serde(default)]
    pub estimated_duration: u64,

    /// Prompt/config id used by agent-backed executors
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,

    /// Whether completion must be confirmed by a person
    #[serde(default)]
    pub requires_human_input: bool,

    /// Text shown to the person confirming
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub human_prompt: Option<String>,
}

impl StepTemplate {
    /// Create a step with the minimum required fields.
    pub fn new(id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            step_type,
            estimated_duration: 0,
            prompt_id: None,
            requires_human_input: false,
            human_prompt: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the prompt id.
    pub fn with_prompt(mut self, prompt_id: impl Into<String>) -> Self {
        self.prompt_id = Some(prompt_id.into());
        self
    }

    /// Set the duration estimate in seconds.
    pub fn with_estimated_duration(mut self, secs: u64) -> Self {
        self.estimated_duration = secs;
        self
    }

    /// Require human confirmation after this step completes.
    pub fn with_human_input(mut self, prompt: impl Into<String>) -> Self {
        self.requires_human_input = true;
        self.human_prompt = Some(prompt.into());
        self
    }
}

/// An ordered, immutable list of steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    /// Template identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Phase tag (e.g. "planning", "reporting")
    #[serde(default)]
    pub phase: String,

    /// Steps in execution order
    pub steps: Vec<StepTemplate>,
}

impl WorkflowTemplate {
    /// Create an empty template.
    pub fn new(id: impl Into<String>, name: impl Into<String>, phase: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into(), phase: phase.into(), steps: Vec::new() }
    }

    /// Append a step.
    pub fn with_step(mut self, step: StepTemplate) -> Self {
        self.steps.push(step);
        self
    }

    /// Parse a template from JSON.
    pub fn from_json(json: &str) -> WorkflowResult<Self> {
        serde_json::from_str(json).map_err(|e| WorkflowError::InvalidTemplate {
            template_id: "<unparsed>".to_string(),
            reason: e.to_string(),
        })
    }

    /// Look up a step by id.
    pub fn step(&self, step_id: &str) -> Option<&StepTemplate> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Check structural validity.
    ///
    /// A template needs at least one step and unique step ids. With
    /// [`UnknownStepPolicy::Reject`], unrecognized step types are errors too.
    pub fn validate(&self, unknown_steps: UnknownStepPolicy) -> WorkflowResult<()> {
        if self.steps.is_empty() {
            return Err(self.invalid("template has no steps"));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                return Err(self.invalid(format!("step '{}' has an empty id", step.name)));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(self.invalid(format!("duplicate step id '{}'", step.id)));
            }
            if unknown_steps == UnknownStepPolicy::Reject && !step.step_type.is_known() {
                return Err(self.invalid(format!("step '{}' has an unrecognized type", step.id)));
            }
        }

        Ok(())
    }

    pub(crate) fn invalid(&self, reason: impl Into<String>) -> WorkflowError {
        WorkflowError::InvalidTemplate { template_id: self.id.clone(), reason: reason.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> WorkflowTemplate {
        WorkflowTemplate::new("wf", "Sample", "planning")
            .with_step(StepTemplate::new("a", "Analyse", StepType::Analysis))
            .with_step(
                StepTemplate::new("b", "Draft", StepType::Generation)
                    .with_human_input("Approve the draft"),
            )
    }

    #[test]
    fn test_validate_accepts_well_formed_template() {
        assert!(sample().validate(UnknownStepPolicy::Reject).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_template() {
        let template = WorkflowTemplate::new("empty", "Empty", "planning");
        let err = template.validate(UnknownStepPolicy::Tolerate).unwrap_err();
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_validate_rejects_duplicate_ids() {
        let template = sample().with_step(StepTemplate::new("a", "Again", StepType::Validation));
        let err = template.validate(UnknownStepPolicy::Tolerate).unwrap_err();
        assert!(err.to_string().contains("duplicate step id 'a'"));
    }

    #[test]
    fn test_unknown_type_policy() {
        let json = r#"{
            "id": "wf",
            "name": "With custom step",
            "phase": "planning",
            "steps": [
                {"id": "a", "name": "Analyse", "type": "analysis"},
                {"id": "x", "name": "Custom", "type": "translation"}
            ]
        }"#;

        let template = WorkflowTemplate::from_json(json).unwrap();
        assert_eq!(template.steps[1].step_type, StepType::Unknown("translation".to_string()));
        assert_eq!(template.steps[1].step_type.to_string(), "translation");
        assert!(template.validate(UnknownStepPolicy::Tolerate).is_ok());
        assert!(template.validate(UnknownStepPolicy::Reject).is_err());
    }

    #[test]
    fn test_unknown_type_name_survives_round_trip() {
        let step = StepTemplate::new("x", "Translate", StepType::from("translation".to_string()));
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["type"], "translation");

        let back: StepTemplate = serde_json::from_value(value).unwrap();
        assert_eq!(back.step_type, StepType::Unknown("translation".to_string()));
        assert_eq!(StepType::from("validation".to_string()), StepType::Validation);
    }

    #[test]
    fn test_step_template_wire_format() {
        let step = StepTemplate::new("b", "Draft", StepType::Generation)
            .with_prompt("plan.generation")
            .with_human_input("Approve");
        let value = serde_json::to_value(&step).unwrap();

        assert_eq!(value["type"], "generation");
        assert_eq!(value["promptId"], "plan.generation");
        assert_eq!(value["requiresHumanInput"], true);
        assert_eq!(value["humanPrompt"], "Approve");
    }
}
