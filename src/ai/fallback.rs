//! Deterministic local agent.
//!
//! Used when no model backend is configured or reachable. Same input, same
//! output, so the rest of the system keeps working offline.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{AgentError, AgentGateway, AgentRequest, AgentResponse, ChatMessage};
use super::{Intent, IntentRecognition};

const CANDIDATES: [Intent; 3] = [Intent::Plan, Intent::Report, Intent::Document];
const SUMMARY_LIMIT: usize = 120;

/// Keyword classifier and summary-producing agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAgent;

impl LocalAgent {
    pub fn new() -> Self {
        Self
    }

    /// Classify by counting intent keywords in the request.
    ///
    /// No hits, or a tie between intents, is `Unclear`.
    pub fn classify(&self, text: &str) -> IntentRecognition {
        let lower = text.to_lowercase();
        let summary = summarize(text);

        let mut scored: Vec<(Intent, usize)> = CANDIDATES
            .iter()
            .map(|intent| {
                let hits = intent.keywords().iter().filter(|k| lower.contains(*k)).count();
                (*intent, hits)
            })
            .collect();
        scored.sort_by(|a, b| b.1.cmp(&a.1));

        match (scored[0], scored[1]) {
            ((_, 0), _) => IntentRecognition::unclear(summary),
            ((_, best), (_, second)) if best == second => {
                IntentRecognition::new(Intent::Unclear, 0.4, summary)
            }
            ((intent, hits), _) => {
                let confidence = (0.6 + 0.15 * hits as f64).min(0.95);
                IntentRecognition::new(intent, confidence, summary)
            }
        }
    }

    /// Produce a deterministic summary of the payload.
    pub fn run(&self, request: &AgentRequest) -> AgentResponse {
        let inputs: Vec<String> = match &request.params {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };

        let output = json!({
            "agent": request.agent_id,
            "summary": format!(
                "{} processed {} context entries for task {}",
                request.agent_id,
                inputs.len(),
                request.task_id
            ),
            "inputs": inputs,
            "source": "local",
        });

        AgentResponse {
            output,
            thinking: Some("Generated locally without a model backend".to_string()),
            logs: vec![format!("{} ran locally", request.agent_id)],
        }
    }
}

#[async_trait]
impl AgentGateway for LocalAgent {
    async fn recognize_intent(&self, text: &str, _history: &[ChatMessage]) -> IntentRecognition {
        self.classify(text)
    }

    async fn execute_agent(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        Ok(self.run(request))
    }

    fn name(&self) -> &str {
        "local"
    }
}

fn summarize(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= SUMMARY_LIMIT {
        return text.to_string();
    }
    let cut: String = text.chars().take(SUMMARY_LIMIT).collect();
    format!("{}...", cut.trim_end())
}
