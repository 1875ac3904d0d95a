// crates/pilotnodes/tests/scenarios_test.rs

use async_trait::async_trait;
use pilotcore::services::{
    CodeEvaluator, CodeRequest, CompletionRequest, CompletionResponse, CompletionService,
    HttpClient, HttpRequest, HttpResponse,
};
use pilotcore::{
    CollaboratorError, EventKind, ExecutionEvent, NodeContext, NodeError, NodeHandler, NodeKind,
    NodeOutput, NodeSpec, RunReport, RunStatus, Value, Variables, Workflow,
};
use pilotnodes::services::EchoCompletionService;
use pilotnodes::{standard_registry, Services};
use pilotruntime::{ExecutorConfig, HandlerRegistry, RunRequest, WorkflowExecutor};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Mock collaborators
// ============================================================================

struct SlowCompletion(Duration);

#[async_trait]
impl CompletionService for SlowCompletion {
    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> Result<CompletionResponse, CollaboratorError> {
        tokio::time::sleep(self.0).await;
        EchoCompletionService::new().complete(request).await
    }
}

#[derive(Default)]
struct RecordingHttp {
    requests: Mutex<Vec<HttpRequest>>,
    status: u16,
}

#[async_trait]
impl HttpClient for RecordingHttp {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, CollaboratorError> {
        let body = request.body.clone().unwrap_or_else(|| "{\"echo\": null}".to_string());
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        Ok(HttpResponse {
            status: self.status,
            body,
        })
    }
}

/// Returns `n * 2` for the context variable `n`, or fails on demand
struct ScriptedCode;

#[async_trait]
impl CodeEvaluator for ScriptedCode {
    async fn evaluate(&self, request: CodeRequest) -> Result<Value, CollaboratorError> {
        if request.code.contains("raise") {
            return Err(CollaboratorError::Evaluation("ZeroDivisionError".into()));
        }
        let n = request.context.get("n").and_then(Value::as_f64).unwrap_or(0.0);
        Ok(Value::from(n * 2.0))
    }
}

fn services(completion: Arc<dyn CompletionService>, http: Arc<RecordingHttp>) -> Services {
    Services {
        completion,
        http,
        code: Arc::new(ScriptedCode),
    }
}

fn executor_with(registry: HandlerRegistry, timeout: Duration) -> WorkflowExecutor {
    WorkflowExecutor::new(
        Arc::new(registry),
        ExecutorConfig {
            node_timeout: timeout,
        },
    )
}

fn echo_executor() -> WorkflowExecutor {
    let registry = standard_registry(&services(
        Arc::new(EchoCompletionService::new()),
        Arc::new(RecordingHttp {
            status: 200,
            ..Default::default()
        }),
    ));
    executor_with(registry, Duration::from_secs(5))
}

fn summary(events: &[ExecutionEvent]) -> Vec<(EventKind, Option<&str>)> {
    events.iter().map(|e| (e.kind, e.node_id.as_deref())).collect()
}

fn input(pairs: &[(&str, Value)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

async fn run(executor: &WorkflowExecutor, workflow: Workflow, input: Variables) -> RunReport {
    executor
        .execute(
            RunRequest::new(workflow, input),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap()
}

fn model_pipeline() -> Workflow {
    let mut workflow = Workflow::new("summarize");
    workflow.add_node(NodeSpec::new("start", NodeKind::Start));
    workflow.add_node(
        NodeSpec::new("llm", NodeKind::ModelCall).with_config("prompt", "Summarize: {{user_input}}"),
    );
    workflow.add_node(NodeSpec::new("out", NodeKind::Output));
    workflow.connect("start", "llm");
    workflow.connect("llm", "out");
    workflow
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_linear_model_pipeline() {
    let executor = echo_executor();
    let (tx, mut rx) = mpsc::channel(4);
    let collector = tokio::spawn(async move {
        let mut live = Vec::new();
        while let Some(event) = rx.recv().await {
            live.push(event);
        }
        live
    });

    let report = executor
        .execute(
            RunRequest::new(
                model_pipeline(),
                input(&[("user_input", Value::from("the tides are lunar"))]),
            ),
            Some(tx),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let live = collector.await.unwrap();

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(
        summary(&report.events),
        vec![
            (EventKind::WorkflowStarted, None),
            (EventKind::NodeStarted, Some("start")),
            (EventKind::NodeCompleted, Some("start")),
            (EventKind::NodeStarted, Some("llm")),
            (EventKind::NodeCompleted, Some("llm")),
            (EventKind::NodeStarted, Some("out")),
            (EventKind::NodeCompleted, Some("out")),
            (EventKind::WorkflowCompleted, None),
        ]
    );
    assert_eq!(summary(&live), summary(&report.events));
    assert_eq!(
        report.output.get("output"),
        Some(&Value::from("Summarize: the tides are lunar"))
    );
    assert_eq!(report.total_tokens_used, 5);
    assert_eq!(report.events.last().unwrap().payload, Value::Object(report.output.clone()));

    let progress: Vec<f64> = report.events.iter().map(|e| e.progress).collect();
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_model_timeout_fails_run() {
    let registry = standard_registry(&services(
        Arc::new(SlowCompletion(Duration::from_secs(10))),
        Arc::new(RecordingHttp::default()),
    ));
    let executor = executor_with(registry, Duration::from_millis(100));

    let report = run(
        &executor,
        model_pipeline(),
        input(&[("user_input", Value::from("x"))]),
    )
    .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(
        summary(&report.events[3..]),
        vec![
            (EventKind::NodeStarted, Some("llm")),
            (EventKind::NodeFailed, Some("llm")),
            (EventKind::WorkflowFailed, None),
        ]
    );
    assert!(report.events.iter().all(|e| e.node_id.as_deref() != Some("out")));
    assert!(report.error.unwrap().contains("Timeout after 100ms"));
}

#[tokio::test]
async fn test_condition_selects_single_branch() {
    let mut workflow = Workflow::new("triage");
    workflow.add_node(NodeSpec::new("start", NodeKind::Start));
    workflow.add_node(
        NodeSpec::new("check", NodeKind::Condition).with_config("expression", "score > 0.5"),
    );
    workflow.add_node(
        NodeSpec::new("high", NodeKind::Output).with_config("template", "high {{score}}"),
    );
    workflow.add_node(NodeSpec::new("low", NodeKind::Output).with_config("template", "low"));
    workflow.connect("start", "check");
    workflow.connect_handle("check", "true", "high");
    workflow.connect_handle("check", "false", "low");

    let executor = echo_executor();
    let report = run(&executor, workflow.clone(), input(&[("score", Value::from(0.8))])).await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.output.get("output"), Some(&Value::from("high 0.8")));
    let skipped: Vec<_> = report
        .events
        .iter()
        .filter(|e| e.kind == EventKind::NodeSkipped)
        .filter_map(|e| e.node_id.as_deref())
        .collect();
    assert_eq!(skipped, vec!["low"]);

    let report = run(&executor, workflow, input(&[("score", Value::from(0.2))])).await;
    assert_eq!(report.output.get("output"), Some(&Value::from("low")));
    assert!(report
        .events
        .iter()
        .any(|e| e.kind == EventKind::NodeSkipped && e.node_id.as_deref() == Some("high")));
}

/// Start handler that requests cancellation while it runs
struct CancellingStart(CancellationToken);

#[async_trait]
impl NodeHandler for CancellingStart {
    fn kind(&self) -> NodeKind {
        NodeKind::Start
    }

    async fn execute(&self, _ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        self.0.cancel();
        Ok(NodeOutput::new())
    }
}

#[tokio::test]
async fn test_cancellation_after_first_node() {
    let cancel = CancellationToken::new();
    let mut registry = standard_registry(&services(
        Arc::new(EchoCompletionService::new()),
        Arc::new(RecordingHttp::default()),
    ));
    registry.register(Arc::new(CancellingStart(cancel.clone())));
    let executor = executor_with(registry, Duration::from_secs(5));

    let report = executor
        .execute(
            RunRequest::new(model_pipeline(), input(&[("user_input", Value::from("x"))])),
            None,
            cancel,
        )
        .await
        .unwrap();

    assert_eq!(report.status, RunStatus::Cancelled);
    assert_eq!(
        report
            .events
            .iter()
            .filter(|e| e.kind == EventKind::NodeCompleted)
            .count(),
        1
    );
    assert_eq!(report.events.last().unwrap().kind, EventKind::WorkflowCancelled);
}

#[tokio::test]
async fn test_http_and_variables_thread_through_context() {
    let http = Arc::new(RecordingHttp {
        status: 201,
        ..Default::default()
    });
    let registry = standard_registry(&services(Arc::new(EchoCompletionService::new()), http.clone()));
    let executor = executor_with(registry, Duration::from_secs(5));

    let body = Value::Object(input(&[
        ("city", Value::from("{{city}}")),
        ("days", Value::from("{{days}}")),
    ]));
    let mut workflow = Workflow::new("forecast");
    workflow.add_node(NodeSpec::new("start", NodeKind::Start));
    workflow.add_node(
        NodeSpec::new("vars", NodeKind::VariableSet)
            .with_config("name", "days")
            .with_config("value", 3i64),
    );
    workflow.add_node(
        NodeSpec::new("fetch", NodeKind::HttpRequest)
            .with_config("url", "https://api.example.com/{{city}}")
            .with_config("method", "post")
            .with_config("body", body),
    );
    workflow.add_node(NodeSpec::new("out", NodeKind::Output).with_config(
        "values",
        Value::Object(input(&[
            ("status", Value::from("fetch.status_code")),
            ("days", Value::from("{{fetch.body.days}}")),
        ])),
    ));
    workflow.connect("start", "vars");
    workflow.connect("vars", "fetch");
    workflow.connect("fetch", "out");

    let report = run(&executor, workflow, input(&[("city", Value::from("Oslo"))])).await;
    assert_eq!(report.status, RunStatus::Completed, "{:?}", report.error);

    let requests = http.requests.lock().unwrap();
    assert_eq!(requests[0].url, "https://api.example.com/Oslo");
    assert_eq!(requests[0].method, "POST");
    assert_eq!(
        requests[0].headers.get("Content-Type").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(report.output.get("status"), Some(&Value::from(201u16)));
    assert_eq!(report.output.get("days"), Some(&Value::from(3i64)));
}

#[tokio::test]
async fn test_template_transform_feeds_answer_node() {
    let executor = echo_executor();
    let json = r#"{
        "name": "greeter",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "greet", "type": "template-transform", "data": {"template": "hi {{q}}"}},
            {"id": "answer", "type": "answer", "data": {"template": "{{greet.output}}!"}}
        ],
        "edges": [
            {"source": "start", "target": "greet"},
            {"source": "greet", "target": "answer"}
        ]
    }"#;
    let workflow = Workflow::from_json(json).unwrap();

    let report = run(&executor, workflow, input(&[("q", Value::from("Ada"))])).await;
    assert_eq!(report.status, RunStatus::Completed, "{:?}", report.error);
    assert_eq!(report.output.len(), 1);
    assert_eq!(report.output.get("output"), Some(&Value::from("hi Ada!")));
}

#[tokio::test]
async fn test_code_failure_is_reported_not_raised() {
    let executor = echo_executor();
    let mut workflow = Workflow::new("compute");
    workflow.add_node(NodeSpec::new("start", NodeKind::Start));
    workflow.add_node(NodeSpec::new("double", NodeKind::Code).with_config("code", "result = n * 2"));
    workflow.add_node(NodeSpec::new("boom", NodeKind::Code).with_config("code", "raise"));
    workflow.connect("start", "double");
    workflow.connect("double", "boom");

    let report = run(&executor, workflow, input(&[("n", Value::from(21i64))])).await;
    assert_eq!(report.status, RunStatus::Failed);

    let completed = report
        .events
        .iter()
        .find(|e| e.kind == EventKind::NodeCompleted && e.node_id.as_deref() == Some("double"))
        .unwrap();
    assert_eq!(completed.payload.pointer("outputs.result"), Some(&Value::from(42i64)));

    let failed = report
        .events
        .iter()
        .find(|e| e.kind == EventKind::NodeFailed)
        .unwrap();
    assert!(failed.message.contains("ZeroDivisionError"));
    assert_eq!(failed.payload.pointer("retryable"), Some(&Value::Bool(false)));
}

#[tokio::test]
async fn test_graph_json_with_handles_and_aliases() {
    let json = r#"{
        "name": "support bot",
        "nodes": [
            {"id": "start", "type": "start", "title": "Start"},
            {"id": "llm", "type": "llm", "data": {"prompt": "Reply to {{question}}", "model": "gpt-4"}},
            {"id": "answer", "type": "answer", "data": {"values": ["reply"]}}
        ],
        "edges": [
            {"source": "start", "target": "llm"},
            {"source": "llm", "target": "answer", "sourceHandle": "text", "targetHandle": "reply"}
        ],
        "variables": [
            {"variable": "question", "type": "paragraph", "required": true}
        ]
    }"#;
    let workflow = Workflow::from_json(json).unwrap();
    let executor = echo_executor();

    let report = run(
        &executor,
        workflow.clone(),
        input(&[("question", Value::from("refunds"))]),
    )
    .await;
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.output.get("reply"), Some(&Value::from("Reply to refunds")));

    let err = executor
        .execute(
            RunRequest::new(workflow, Variables::new()),
            None,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("question"));
}
