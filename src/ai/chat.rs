//! Chat-completion gateway.
//!
//! Talks to any API with the `{model, messages, temperature}` ->
//! `choices[0].message.content` shape. Missing credentials and transport
//! failures degrade to [`LocalAgent`]; error statuses and malformed bodies
//! are reported as [`AgentError`]s.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::{
    AgentError, AgentGateway, AgentRequest, AgentResponse, ChatMessage, Intent, IntentRecognition,
    LocalAgent,
};
use crate::core::GatewayConfig;

const INTENT_PROMPT: &str = r#"You classify requests for an operations assistant.
Possible intents: "plan" (operations plans, budgets, schedules), "report" (status reports, metrics),
"document" (policies, guides, write-ups), "unclear" (anything else).
Reply with JSON only: {"intent": "...", "confidence": 0.0-1.0, "summary": "one sentence"}"#;

/// HTTP chat-completion gateway with local fallback.
pub struct ChatCompletionGateway {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
    temperature: f32,
    timeout: Duration,
    history_window: usize,
    fallback: LocalAgent,
}

impl ChatCompletionGateway {
    /// Create a gateway with default settings.
    ///
    /// `None` for the key means every call goes to the local fallback.
    pub fn new(api_key: Option<String>) -> Self {
        Self::from_config(&GatewayConfig::default()).with_api_key(api_key)
    }

    /// Create from configuration, reading the key from the configured env var.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            client: Client::new(),
            api_key: config.api_key(),
            model: config.model.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: config.temperature,
            timeout: config.request_timeout(),
            history_window: config.history_window,
            fallback: LocalAgent,
        }
    }

    /// Replace the API key.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    /// Create with a specific model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Create with a custom base URL (for compatible APIs).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Whether a key is configured.
    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some()
    }

    /// Make a request to the chat-completion API.
    async fn request(&self, messages: Vec<ChatMessage>) -> Result<String, AgentError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::Unavailable("no API key configured".to_string()))?;

        let request = ChatRequest { model: &self.model, messages, temperature: self.temperature };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(AgentError::Api { status, body });
        }

        let response: ChatResponse =
            response.json().await.map_err(|e| AgentError::MalformedResponse(e.to_string()))?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or(AgentError::NoResponse)
    }

    fn recent<'a>(&self, history: &'a [ChatMessage]) -> &'a [ChatMessage] {
        &history[history.len().saturating_sub(self.history_window)..]
    }
}

#[async_trait]
impl AgentGateway for ChatCompletionGateway {
    async fn recognize_intent(&self, text: &str, history: &[ChatMessage]) -> IntentRecognition {
        let mut messages = vec![ChatMessage::system(INTENT_PROMPT)];
        messages.extend_from_slice(self.recent(history));
        messages.push(ChatMessage::user(text));

        let reply = match self.request(messages).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::warn!(gateway = self.name(), error = %e, "Intent recognition failed, classifying locally");
                return self.fallback.classify(text);
            }
        };

        match extract_json(&reply).and_then(|v| serde_json::from_value::<IntentReply>(v).ok()) {
            Some(parsed) => IntentRecognition::new(parsed.intent, parsed.confidence, parsed.summary),
            None => {
                tracing::warn!(gateway = self.name(), "Unparseable intent reply, classifying locally");
                self.fallback.classify(text)
            }
        }
    }

    async fn execute_agent(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        let payload = json!({
            "agentId": request.agent_id,
            "taskId": request.task_id,
            "params": request.params,
        });
        let messages = vec![
            ChatMessage::system(request.system_prompt.clone()),
            ChatMessage::user(payload.to_string()),
        ];

        match self.request(messages).await {
            Ok(reply) => {
                let mut response = parse_agent_reply(&reply);
                response.logs.push(format!("{} answered via {}", request.agent_id, self.model));
                Ok(response)
            }
            Err(e) if e.is_transport() => {
                tracing::warn!(
                    gateway = self.name(),
                    agent_id = %request.agent_id,
                    error = %e,
                    "Agent backend unreachable, running locally"
                );
                self.fallback.execute_agent(request).await
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "chat-completion"
    }
}

/// Interpret an agent reply.
///
/// `{output, thinking, logs}` objects are taken as-is; other JSON becomes the
/// output; plain text is wrapped as `{"content": text}`.
fn parse_agent_reply(reply: &str) -> AgentResponse {
    match extract_json(reply) {
        Some(value) if value.get("output").is_some() => {
            serde_json::from_value(value.clone()).unwrap_or(AgentResponse {
                output: value,
                thinking: None,
                logs: Vec::new(),
            })
        }
        Some(value) => AgentResponse { output: value, thinking: None, logs: Vec::new() },
        None => AgentResponse {
            output: json!({ "content": reply.trim() }),
            thinking: None,
            logs: Vec::new(),
        },
    }
}

/// Pull a JSON value out of a model reply, tolerating code fences and
/// surrounding prose.
fn extract_json(reply: &str) -> Option<Value> {
    let trimmed = reply.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .map(str::trim);
    if let Some(value) = unfenced.and_then(|s| serde_json::from_str(s).ok()) {
        return Some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

// Request/Response types

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct IntentReply {
    intent: Intent,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL.
    async fn serve_once(status: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                if request_complete(&buf) {
                    break;
                }
            }
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{addr}")
    }

    fn request_complete(buf: &[u8]) -> bool {
        let text = String::from_utf8_lossy(buf);
        let Some(header_end) = text.find("\r\n\r\n") else {
            return false;
        };
        let length = text[..header_end]
            .lines()
            .find_map(|line| {
                let (name, value) = line.split_once(':')?;
                name.eq_ignore_ascii_case("content-length").then(|| value.trim().parse().ok())?
            })
            .unwrap_or(0usize);
        buf.len() >= header_end + 4 + length
    }

    fn completion(content: &str) -> String {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]}).to_string()
    }

    fn request() -> AgentRequest {
        AgentRequest {
            agent_id: "ops-planner".into(),
            task_id: "task-1".into(),
            params: json!({"budget": 500_000}),
            system_prompt: "Plan.".into(),
        }
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"a":1}"#), Some(json!({"a": 1})));
        assert_eq!(extract_json("```json\n{\"a\":1}\n```"), Some(json!({"a": 1})));
        assert_eq!(extract_json("Sure! {\"a\":1} Hope it helps"), Some(json!({"a": 1})));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_agent_reply_shapes() {
        let full = parse_agent_reply(r#"{"output": {"x": 1}, "thinking": "hmm", "logs": ["a"]}"#);
        assert_eq!(full.output, json!({"x": 1}));
        assert_eq!(full.thinking.as_deref(), Some("hmm"));

        let bare = parse_agent_reply(r#"{"phases": []}"#);
        assert_eq!(bare.output, json!({"phases": []}));

        let text = parse_agent_reply("Just prose.");
        assert_eq!(text.output, json!({"content": "Just prose."}));
    }

    #[tokio::test]
    async fn test_without_key_falls_back() {
        let gateway = ChatCompletionGateway::new(None);
        assert!(!gateway.has_credentials());

        let recognition = gateway.recognize_intent("quarterly budget plan", &[]).await;
        assert_eq!(recognition.intent, Intent::Plan);

        let response = gateway.execute_agent(&request()).await.unwrap();
        assert_eq!(response.output["source"], "local");
    }

    #[tokio::test]
    async fn test_unreachable_backend_falls_back() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let gateway = ChatCompletionGateway::new(Some("sk-test".into()))
            .with_base_url(format!("http://{addr}"))
            .with_timeout(Duration::from_secs(2));

        let response = gateway.execute_agent(&request()).await.unwrap();
        assert_eq!(response.output["source"], "local");
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let base = serve_once("200 OK", completion(r#"{"phases": ["prep", "launch"]}"#)).await;
        let gateway = ChatCompletionGateway::new(Some("sk-test".into())).with_base_url(base);

        let response = gateway.execute_agent(&request()).await.unwrap();
        assert_eq!(response.output, json!({"phases": ["prep", "launch"]}));
        assert!(response.logs.iter().any(|l| l.starts_with("ops-planner answered via")));
    }

    #[tokio::test]
    async fn test_intent_from_backend() {
        let reply = r#"{"intent": "report", "confidence": 0.92, "summary": "Weekly status"}"#;
        let base = serve_once("200 OK", completion(reply)).await;
        let gateway = ChatCompletionGateway::new(Some("sk-test".into())).with_base_url(base);

        let recognition = gateway.recognize_intent("how are we doing", &[]).await;
        assert_eq!(recognition.intent, Intent::Report);
        assert!((recognition.confidence - 0.92).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_error_status_is_an_error() {
        let base = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#.to_string()).await;
        let gateway = ChatCompletionGateway::new(Some("sk-test".into())).with_base_url(base);

        let err = gateway.execute_agent(&request()).await.unwrap_err();
        assert!(matches!(err, AgentError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_an_error() {
        let base = serve_once("200 OK", r#"{"unexpected": true}"#.to_string()).await;
        let gateway = ChatCompletionGateway::new(Some("sk-test".into())).with_base_url(base);

        let err = gateway.execute_agent(&request()).await.unwrap_err();
        assert!(matches!(err, AgentError::MalformedResponse(_)));
    }
}
