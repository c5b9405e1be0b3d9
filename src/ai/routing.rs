//! Intent routing.
//!
//! Maps a classified request to an agent profile and a workflow template.
//! Low-confidence or unclear requests are sent to clarification instead of
//! starting a workflow.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{AgentGateway, ChatMessage, Intent, IntentRecognition};
use crate::core::{GatewayConfig, DEFAULT_INTENT_THRESHOLD};
use crate::workflow::{
    Context, TemplateCatalog, WorkflowEngine, WorkflowResult, WorkflowTemplate, AGENT_ID_KEY,
    DOCUMENT_TEMPLATE, PLAN_TEMPLATE, REPORT_TEMPLATE, REQUEST_KEY,
};

/// Context key recording which intent started an execution.
pub const INTENT_KEY: &str = "intent";

/// Agent and template that handle one intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProfile {
    pub agent_id: String,
    pub name: String,
    pub template_id: String,
}

impl AgentProfile {
    pub fn new(
        agent_id: impl Into<String>,
        name: impl Into<String>,
        template_id: impl Into<String>,
    ) -> Self {
        Self { agent_id: agent_id.into(), name: name.into(), template_id: template_id.into() }
    }
}

/// Outcome of routing a request.
#[derive(Debug, Clone)]
pub enum RouteDecision {
    /// Start this template with this agent.
    Workflow {
        recognition: IntentRecognition,
        agent: AgentProfile,
        template: Arc<WorkflowTemplate>,
    },
    /// Ask the user to clarify.
    Clarify { recognition: IntentRecognition, question: String },
}

/// Outcome of dispatching a request to the engine.
#[derive(Debug, Clone)]
pub enum Dispatch {
    Started { execution_id: String, recognition: IntentRecognition, agent: AgentProfile },
    NeedsClarification { recognition: IntentRecognition, question: String },
}

/// Routes requests to workflows.
pub struct IntentRouter {
    gateway: Arc<dyn AgentGateway>,
    catalog: Arc<TemplateCatalog>,
    profiles: HashMap<Intent, AgentProfile>,
    threshold: f64,
    history_window: usize,
}

impl IntentRouter {
    /// Create a router with the built-in agent profiles.
    pub fn new(gateway: Arc<dyn AgentGateway>, catalog: Arc<TemplateCatalog>) -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(Intent::Plan, AgentProfile::new("ops-planner", "Planner", PLAN_TEMPLATE));
        profiles.insert(Intent::Report, AgentProfile::new("ops-reporter", "Reporter", REPORT_TEMPLATE));
        profiles.insert(Intent::Document, AgentProfile::new("ops-writer", "Writer", DOCUMENT_TEMPLATE));

        Self { gateway, catalog, profiles, threshold: DEFAULT_INTENT_THRESHOLD, history_window: 6 }
    }

    /// Create a router using the gateway section of the configuration.
    pub fn from_config(
        gateway: Arc<dyn AgentGateway>,
        catalog: Arc<TemplateCatalog>,
        config: &GatewayConfig,
    ) -> Self {
        Self::new(gateway, catalog)
            .with_threshold(config.intent_threshold)
            .with_history_window(config.history_window)
    }

    /// Set the minimum confidence for starting a workflow.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set how many recent turns are passed to intent recognition.
    pub fn with_history_window(mut self, turns: usize) -> Self {
        self.history_window = turns;
        self
    }

    /// Register or replace the profile for an intent.
    pub fn with_profile(mut self, intent: Intent, profile: AgentProfile) -> Self {
        self.profiles.insert(intent, profile);
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classify a request and pick a workflow for it.
    pub async fn route(&self, text: &str, history: &[ChatMessage]) -> RouteDecision {
        let recent = &history[history.len().saturating_sub(self.history_window)..];
        let recognition = self.gateway.recognize_intent(text, recent).await;

        tracing::debug!(
            intent = %recognition.intent,
            confidence = recognition.confidence,
            gateway = self.gateway.name(),
            "Recognized intent"
        );

        if !recognition.is_actionable(self.threshold) {
            let question = clarification_question(&recognition);
            return RouteDecision::Clarify { recognition, question };
        }

        let Some(agent) = self.profiles.get(&recognition.intent).cloned() else {
            let question = clarification_question(&recognition);
            return RouteDecision::Clarify { recognition, question };
        };

        match self.catalog.get(&agent.template_id) {
            Some(template) => RouteDecision::Workflow { recognition, agent, template },
            None => {
                tracing::warn!(template_id = %agent.template_id, "Routed template is not registered");
                let question = clarification_question(&recognition);
                RouteDecision::Clarify { recognition, question }
            }
        }
    }

    /// Route a request and, when a workflow is chosen, start it.
    ///
    /// The initial context is `params` plus the request text, the agent id
    /// and the recognized intent.
    pub async fn dispatch(
        &self,
        engine: &WorkflowEngine,
        text: &str,
        history: &[ChatMessage],
        task_id: &str,
        params: Context,
    ) -> WorkflowResult<Dispatch> {
        match self.route(text, history).await {
            RouteDecision::Workflow { recognition, agent, template } => {
                let context = params
                    .with(REQUEST_KEY, text)
                    .with(AGENT_ID_KEY, agent.agent_id.clone())
                    .with(INTENT_KEY, recognition.intent.as_str());
                let execution_id = engine.start(template, task_id, context)?;
                tracing::info!(execution_id = %execution_id, agent_id = %agent.agent_id, "Dispatched request");
                Ok(Dispatch::Started { execution_id, recognition, agent })
            }
            RouteDecision::Clarify { recognition, question } => {
                Ok(Dispatch::NeedsClarification { recognition, question })
            }
        }
    }
}

fn clarification_question(recognition: &IntentRecognition) -> String {
    if recognition.summary.is_empty() {
        "Could you tell me whether you need a plan, a report or a document?".to_string()
    } else {
        format!(
            "I understood \"{}\". Do you need a plan, a report or a document?",
            recognition.summary
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::LocalAgent;

    fn router() -> IntentRouter {
        IntentRouter::new(Arc::new(LocalAgent), Arc::new(TemplateCatalog::with_builtins()))
    }

    #[tokio::test]
    async fn test_route_plan_request() {
        match router().route("Draft a plan for the Q3 budget", &[]).await {
            RouteDecision::Workflow { agent, template, .. } => {
                assert_eq!(agent.agent_id, "ops-planner");
                assert_eq!(template.id, PLAN_TEMPLATE);
            }
            RouteDecision::Clarify { .. } => panic!("expected a workflow"),
        }
    }

    #[tokio::test]
    async fn test_route_unclear_request() {
        match router().route("hello", &[]).await {
            RouteDecision::Clarify { recognition, question } => {
                assert_eq!(recognition.intent, Intent::Unclear);
                assert!(question.contains("plan, a report or a document"));
            }
            RouteDecision::Workflow { .. } => panic!("expected clarification"),
        }
    }

    #[tokio::test]
    async fn test_threshold_sends_weak_matches_to_clarify() {
        // A single keyword scores 0.75 locally.
        let router = router().with_threshold(0.8);
        assert!(matches!(router.route("weekly numbers", &[]).await, RouteDecision::Clarify { .. }));
    }

    #[tokio::test]
    async fn test_missing_template_clarifies() {
        let router = IntentRouter::new(Arc::new(LocalAgent), Arc::new(TemplateCatalog::new()));
        assert!(matches!(
            router.route("Draft a plan for the Q3 budget", &[]).await,
            RouteDecision::Clarify { .. }
        ));
    }
}
