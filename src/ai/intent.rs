//! Intent recognition results.

use std::fmt;

use serde::{Deserialize, Serialize};

/// What a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// An operations plan
    Plan,
    /// A status report
    Report,
    /// A written document
    Document,
    /// Nothing actionable could be identified
    #[serde(other)]
    Unclear,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plan => "plan",
            Self::Report => "report",
            Self::Document => "document",
            Self::Unclear => "unclear",
        }
    }

    /// Keywords that point at this intent, used by the local classifier.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Plan => &["plan", "roadmap", "schedule", "budget", "milestone", "strategy"],
            Self::Report => &["report", "status", "metrics", "summary", "weekly", "kpi"],
            Self::Document => &["document", "doc", "write up", "policy", "manual", "guide"],
            Self::Unclear => &[],
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecognition {
    pub intent: Intent,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
    /// Short restatement of the request
    pub summary: String,
}

impl IntentRecognition {
    /// Create a recognition result; confidence is clamped to `[0, 1]`.
    pub fn new(intent: Intent, confidence: f64, summary: impl Into<String>) -> Self {
        let confidence = if confidence.is_nan() { 0.0 } else { confidence.clamp(0.0, 1.0) };
        Self { intent, confidence, summary: summary.into() }
    }

    /// An unclear result with zero confidence.
    pub fn unclear(summary: impl Into<String>) -> Self {
        Self::new(Intent::Unclear, 0.0, summary)
    }

    /// Whether this result is specific enough to start a workflow.
    pub fn is_actionable(&self, threshold: f64) -> bool {
        self.intent != Intent::Unclear && self.confidence >= threshold
    }
}
