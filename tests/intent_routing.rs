//! Intent Routing Integration Tests
//!
//! Requests classified, routed to a template and run to a deliverable.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use common::wait_for;
use opsflow::ai::{
    AgentError, AgentGateway, AgentRequest, AgentResponse, ChatCompletionGateway, ChatMessage,
    Dispatch, Intent, IntentRecognition, IntentRouter, LocalAgent,
};
use opsflow::core::Config;
use opsflow::integrations::{BlobStore, MarkdownRenderer, MemoryBlobStore};
use opsflow::workflow::{
    Context, ExecutionStatus, PromptLibrary, StepRegistry, StepStatus, WorkflowEngine,
    DOCUMENT_TEMPLATE, PLAN_TEMPLATE, REPORT_TEMPLATE,
};

fn local_router(engine: &WorkflowEngine) -> IntentRouter {
    IntentRouter::new(Arc::new(LocalAgent), Arc::clone(engine.catalog()))
}

fn started(dispatch: Dispatch) -> String {
    match dispatch {
        Dispatch::Started { execution_id, .. } => execution_id,
        Dispatch::NeedsClarification { question, .. } => panic!("unexpected clarification: {question}"),
    }
}

/// Gateway that always answers "document" and returns a fixed outline.
struct DocumentDesk;

#[async_trait]
impl AgentGateway for DocumentDesk {
    async fn recognize_intent(&self, _text: &str, history: &[ChatMessage]) -> IntentRecognition {
        assert!(history.len() <= 2, "history window not applied");
        IntentRecognition::new(Intent::Document, 0.9, "Onboarding guide")
    }

    async fn execute_agent(&self, request: &AgentRequest) -> Result<AgentResponse, AgentError> {
        Ok(AgentResponse {
            output: json!({
                "title": "Onboarding guide",
                "summary": format!("Prepared by {}", request.agent_id),
                "sections": [{ "heading": "Accounts", "body": "Request access on day one." }],
            }),
            thinking: None,
            logs: vec!["desk answered".to_string()],
        })
    }

    fn name(&self) -> &str {
        "document-desk"
    }
}

// ============================================================================
// Local Routing
// ============================================================================

mod local {
    use super::*;

    #[tokio::test]
    async fn test_plan_request_starts_plan_workflow() {
        let engine = WorkflowEngine::builder().build();
        let router = local_router(&engine);

        let dispatch = router
            .dispatch(
                &engine,
                "Draft a plan for the Q3 budget",
                &[],
                "task-7",
                Context::new().with("budget", 500_000),
            )
            .await
            .unwrap();

        let (execution_id, recognition, agent) = match dispatch {
            Dispatch::Started { execution_id, recognition, agent } => (execution_id, recognition, agent),
            Dispatch::NeedsClarification { .. } => panic!("expected a workflow"),
        };
        assert_eq!(recognition.intent, Intent::Plan);
        assert_eq!(agent.agent_id, "ops-planner");

        let mut sub = engine.subscribe(&execution_id).unwrap();
        let paused = wait_for(&mut sub, |e| e.status == ExecutionStatus::Paused).await;

        assert_eq!(paused.template_id, PLAN_TEMPLATE);
        assert_eq!(paused.task_id, "task-7");
        assert_eq!(paused.context.get_str("request"), Some("Draft a plan for the Q3 budget"));
        assert_eq!(paused.context.agent_id(), Some("ops-planner"));
        assert_eq!(paused.context.get_str("intent"), Some("plan"));
        assert_eq!(paused.context.get_f64("budget"), Some(500_000.0));
        assert_eq!(paused.current_step().map(|s| s.status), Some(StepStatus::WaitingHuman));

        let analysis = paused.context.analysis().unwrap();
        assert_eq!(analysis["agent"], "ops-planner");
        assert_eq!(analysis["source"], "local");
    }

    #[tokio::test]
    async fn test_unclear_request_asks_for_clarification() {
        let engine = WorkflowEngine::builder().build();
        let router = local_router(&engine);

        let dispatch = router.dispatch(&engine, "hello there", &[], "task-1", Context::new()).await.unwrap();

        match dispatch {
            Dispatch::NeedsClarification { recognition, question } => {
                assert_eq!(recognition.intent, Intent::Unclear);
                assert!(question.contains("plan, a report or a document"));
            }
            Dispatch::Started { .. } => panic!("expected clarification"),
        }
        assert!(engine.list_executions().is_empty());
    }

    #[tokio::test]
    async fn test_configured_threshold_applies() {
        let mut config = Config::default();
        config.gateway.intent_threshold = 0.8;
        let engine = WorkflowEngine::builder().build();
        let router = IntentRouter::from_config(Arc::new(LocalAgent), Arc::clone(engine.catalog()), &config.gateway);

        let weak = router.dispatch(&engine, "weekly numbers", &[], "task-1", Context::new()).await.unwrap();
        assert!(matches!(weak, Dispatch::NeedsClarification { .. }));

        let strong = router
            .dispatch(&engine, "weekly status report with kpi metrics", &[], "task-2", Context::new())
            .await
            .unwrap();
        let execution_id = started(strong);
        assert_eq!(engine.get_execution(&execution_id).unwrap().template_id, REPORT_TEMPLATE);
    }
}

// ============================================================================
// Gateway-Backed Routing
// ============================================================================

mod gateway {
    use super::*;

    #[tokio::test]
    async fn test_report_runs_to_submission_without_credentials() {
        let gateway: Arc<dyn AgentGateway> = Arc::new(ChatCompletionGateway::new(None));
        let blobs = Arc::new(MemoryBlobStore::new());
        let steps = StepRegistry::with_defaults(
            Arc::clone(&gateway),
            Arc::new(PromptLibrary::new()),
            Arc::new(MarkdownRenderer),
            blobs.clone(),
        );
        let engine = WorkflowEngine::builder().steps(steps).build();
        let router = IntentRouter::new(gateway, Arc::clone(engine.catalog()));

        let execution_id = started(
            router
                .dispatch(&engine, "Weekly status report for the platform team", &[], "task-3", Context::new())
                .await
                .unwrap(),
        );
        let mut sub = engine.subscribe(&execution_id).unwrap();
        let done = wait_for(&mut sub, |e| e.status.is_terminal()).await;

        assert_eq!(done.status, ExecutionStatus::Completed);
        assert_eq!(done.template_id, REPORT_TEMPLATE);

        let submission = done.steps.last().and_then(|s| s.output.clone()).unwrap();
        let blob_id = submission["blobId"].as_str().unwrap();
        let blob = blobs.get(blob_id).unwrap().unwrap();
        assert_eq!(submission["contentType"], blob.content_type.as_str());
        assert_eq!(blobs.len(), 1);
    }

    #[tokio::test]
    async fn test_custom_gateway_routes_to_document() {
        let gateway: Arc<dyn AgentGateway> = Arc::new(DocumentDesk);
        let blobs = Arc::new(MemoryBlobStore::new());
        let steps = StepRegistry::with_defaults(
            Arc::clone(&gateway),
            Arc::new(PromptLibrary::new()),
            Arc::new(MarkdownRenderer),
            blobs.clone(),
        );
        let engine = WorkflowEngine::builder().steps(steps).build();
        let router = IntentRouter::new(gateway, Arc::clone(engine.catalog())).with_history_window(2);

        let history = vec![
            ChatMessage::user("We hired three engineers"),
            ChatMessage::assistant("Congratulations"),
            ChatMessage::user("They start Monday"),
        ];
        let execution_id = started(
            router.dispatch(&engine, "Can you help them get going?", &history, "task-4", Context::new()).await.unwrap(),
        );

        let mut sub = engine.subscribe(&execution_id).unwrap();
        let paused = wait_for(&mut sub, |e| e.status == ExecutionStatus::Paused).await;
        assert_eq!(paused.template_id, DOCUMENT_TEMPLATE);
        assert_eq!(paused.context.agent_id(), Some("ops-writer"));

        engine.confirm_human_input(&execution_id, json!({"approved": true})).await.unwrap();
        let done = wait_for(&mut sub, |e| e.status.is_terminal()).await;
        assert_eq!(done.status, ExecutionStatus::Completed);

        let submission = done.steps.last().and_then(|s| s.output.clone()).unwrap();
        let blob = blobs.get(submission["blobId"].as_str().unwrap()).unwrap().unwrap();
        let text = String::from_utf8(blob.bytes).unwrap();
        assert!(text.starts_with("# Onboarding guide"));
        assert!(text.contains("Accounts"));
    }
}
