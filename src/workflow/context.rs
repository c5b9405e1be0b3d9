//! Shared execution context.
//!
//! The context is the key/value state every step of one execution reads and
//! extends. Well-known keys get typed accessors; agent-provided content stays
//! an opaque [`serde_json::Value`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::template::StepType;

/// Reserved key under which confirmed human input is merged.
pub const HUMAN_INPUT_KEY: &str = "humanInput";

/// Reserved key selecting the agent that runs agent-backed steps.
pub const AGENT_ID_KEY: &str = "agentId";

/// Reserved key holding the user's original request text.
pub const REQUEST_KEY: &str = "request";

/// Accumulating key/value state of one execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Map<String, Value>);

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON value; only objects are accepted.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert a value, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Merge a delta into this context. Keys in `delta` win.
    pub fn merge(&mut self, delta: Context) {
        self.0.extend(delta.0);
    }

    /// Get a raw value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a string value.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Get a numeric value.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    /// Get a boolean value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(Value::as_bool)
    }

    /// Deserialize a value into a typed structure.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Output of the `analysis` step, if one ran.
    pub fn analysis(&self) -> Option<&Value> {
        self.get(StepType::Analysis.context_key())
    }

    /// Output of the `generation` step, if one ran.
    pub fn generation(&self) -> Option<&Value> {
        self.get(StepType::Generation.context_key())
    }

    /// Output of the `evaluation` step, if one ran.
    pub fn evaluation(&self) -> Option<&Value> {
        self.get(StepType::Evaluation.context_key())
    }

    /// Confirmed human input, if any.
    pub fn human_input(&self) -> Option<&Value> {
        self.get(HUMAN_INPUT_KEY)
    }

    /// Agent selected for this execution.
    pub fn agent_id(&self) -> Option<&str> {
        self.get_str(AGENT_ID_KEY)
    }

    /// Check whether a key is present.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate over keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the context is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Borrow the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Copy into a JSON object value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl From<Map<String, Value>> for Context {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Context {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_later_keys_win() {
        let mut ctx = Context::new().with("budget", 500_000).with("owner", "ops");
        let delta = Context::new().with("owner", "finance").with("analysis", json!({"ok": true}));

        ctx.merge(delta);

        assert_eq!(ctx.len(), 3);
        assert_eq!(ctx.get_str("owner"), Some("finance"));
        assert_eq!(ctx.get_f64("budget"), Some(500_000.0));
        assert_eq!(ctx.analysis(), Some(&json!({"ok": true})));
    }

    #[test]
    fn test_from_value_requires_object() {
        assert!(Context::from_value(json!([1, 2])).is_none());
        let ctx = Context::from_value(json!({"budget": 1})).unwrap();
        assert!(ctx.contains_key("budget"));
    }

    #[test]
    fn test_typed_accessors() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct Approval {
            approved: bool,
        }

        let ctx = Context::new()
            .with(HUMAN_INPUT_KEY, json!({"approved": true}))
            .with(AGENT_ID_KEY, "planner");

        assert_eq!(ctx.get_as::<Approval>(HUMAN_INPUT_KEY), Some(Approval { approved: true }));
        assert_eq!(ctx.agent_id(), Some("planner"));
        assert_eq!(ctx.get_bool("missing"), None);
    }

    #[test]
    fn test_serializes_as_plain_object() {
        let ctx = Context::new().with("budget", 10);
        assert_eq!(serde_json::to_value(&ctx).unwrap(), json!({"budget": 10}));
    }
}
