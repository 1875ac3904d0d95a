use crate::order::resolve;
use crate::registry::HandlerRegistry;
use crate::validate::validate;
use pilotcore::{
    EventEmitter, EventKind, ExecutionContext, ExecutionEvent, FlowError, NodeContext, NodeError,
    NodeHandler, NodeId, NodeKind, NodeOutput, NodeSpec, Run, RunId, RunReport, RunStatus, Value,
    Variables, Workflow, WorkflowError,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Node config key overriding the executor's per-node timeout
pub const TIMEOUT_OVERRIDE_KEY: &str = "timeout_ms";

/// Configuration for the executor
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Wall-clock limit for a single handler invocation
    pub node_timeout: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            node_timeout: Duration::from_secs(60),
        }
    }
}

/// Input of one run
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    pub workflow: Arc<Workflow>,
    pub input: Variables,
}

impl RunRequest {
    pub fn new(workflow: impl Into<Arc<Workflow>>, input: Variables) -> Self {
        Self {
            run_id: pilotcore::new_run_id(),
            workflow: workflow.into(),
            input,
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = run_id.into();
        self
    }
}

/// Drives a workflow to completion one node at a time
///
/// The executor itself holds no per-run state, so one instance serves any
/// number of concurrent runs.
pub struct WorkflowExecutor {
    registry: Arc<HandlerRegistry>,
    config: ExecutorConfig,
}

/// Mutable bookkeeping of a single run
struct RunState {
    run: Run,
    context: ExecutionContext,
    emitter: EventEmitter,
    completed: HashSet<NodeId>,
    branches: HashMap<NodeId, String>,
    captured: Option<Variables>,
    last_outputs: Option<Variables>,
    resolved: usize,
    total: usize,
}

enum Outcome {
    Completed,
    Failed(String),
    Cancelled { before: NodeId },
}

impl WorkflowExecutor {
    pub fn new(registry: Arc<HandlerRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Everything checked before a run may leave `Pending`: structure,
    /// handler coverage, node configs, declared inputs and the order
    pub fn preflight<'w>(
        &self,
        workflow: &'w Workflow,
        input: Variables,
    ) -> Result<(Vec<&'w NodeSpec>, Variables), WorkflowError> {
        let report = validate(workflow);
        if !report.is_valid() {
            return Err(WorkflowError::Invalid(report));
        }
        self.registry.ensure_supported(workflow)?;
        let report = self.registry.check_configs(workflow);
        if !report.is_valid() {
            return Err(WorkflowError::Invalid(report));
        }
        let input = bind_inputs(workflow, input)?;
        let order = resolve(workflow)?;
        Ok((order, input))
    }

    /// Execute a run
    ///
    /// Pre-run problems return `Err` and emit nothing. Once started, the run
    /// always ends with exactly one terminal event and an `Ok` report, also
    /// when a node fails or the run is cancelled.
    pub async fn execute(
        &self,
        request: RunRequest,
        events: Option<mpsc::Sender<ExecutionEvent>>,
        cancel: CancellationToken,
    ) -> Result<RunReport, FlowError> {
        let RunRequest {
            run_id,
            workflow,
            input,
        } = request;

        let (order, input) = self.preflight(&workflow, input).map_err(|e| {
            tracing::warn!(run_id = %run_id, workflow_id = %workflow.id, "Run rejected: {}", e);
            e
        })?;
        let input = Arc::new(input);

        let mut state = RunState {
            run: Run::new(run_id.clone(), workflow.id.clone()),
            context: ExecutionContext::new((*input).clone()),
            emitter: EventEmitter::new(run_id.clone(), events),
            completed: HashSet::new(),
            branches: HashMap::new(),
            captured: None,
            last_outputs: None,
            resolved: 0,
            total: order.len(),
        };

        state.run.transition(RunStatus::Running)?;
        tracing::info!(
            run_id = %run_id,
            workflow_id = %workflow.id,
            nodes = state.total,
            "Starting workflow run"
        );
        state
            .emitter
            .emit(
                EventKind::WorkflowStarted,
                None,
                format!("Started executing workflow '{}'", workflow.name),
                object([
                    ("workflow_id", Value::from(workflow.id.as_str())),
                    ("total_nodes", Value::from(state.total as i64)),
                ]),
                0.0,
            )
            .await;

        let mut outcome = Outcome::Completed;
        for node in order {
            if cancel.is_cancelled() {
                outcome = Outcome::Cancelled {
                    before: node.id.clone(),
                };
                break;
            }

            if node.kind != NodeKind::Start && !is_eligible(&workflow, node, &state) {
                self.skip(node, &mut state).await;
                continue;
            }

            if let Err(message) = self.run_node(&workflow, node, &input, &mut state).await {
                outcome = Outcome::Failed(message);
                break;
            }
        }

        self.finish(&workflow, outcome, state).await
    }

    async fn skip(&self, node: &NodeSpec, state: &mut RunState) {
        state.resolved += 1;
        state.run.set_progress(state.resolved, state.total);
        tracing::debug!(run_id = %state.run.id, node_id = %node.id, "Skipping node on inactive branch");
        state
            .emitter
            .emit(
                EventKind::NodeSkipped,
                Some(node.id.as_str()),
                format!("Skipped node '{}': no active incoming edge", node.label()),
                Value::Null,
                state.run.progress,
            )
            .await;
    }

    /// Run one node; `Err` carries the failure message for the run
    async fn run_node(
        &self,
        workflow: &Workflow,
        node: &NodeSpec,
        input: &Arc<Variables>,
        state: &mut RunState,
    ) -> Result<(), String> {
        state.run.current_node_id = Some(node.id.clone());
        state
            .emitter
            .emit(
                EventKind::NodeStarted,
                Some(node.id.as_str()),
                format!("Executing node '{}'", node.label()),
                object([("kind", Value::from(node.kind.as_str()))]),
                state.run.progress,
            )
            .await;

        let started = Instant::now();
        let result = match self.registry.get(node.kind) {
            Some(handler) => self.invoke(handler, node, input, state).await,
            None => Err(NodeError::ExecutionFailed(format!(
                "no handler registered for '{}'",
                node.kind
            ))),
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => {
                tracing::debug!(
                    run_id = %state.run.id,
                    node_id = %node.id,
                    duration_ms,
                    "Node completed"
                );
                let payload = completion_payload(&output, duration_ms);
                apply_output(workflow, node, output, state);
                state.run.set_progress(state.resolved, state.total);
                state
                    .emitter
                    .emit(
                        EventKind::NodeCompleted,
                        Some(node.id.as_str()),
                        format!("Completed node '{}'", node.label()),
                        payload,
                        state.run.progress,
                    )
                    .await;
                Ok(())
            }
            Err(err) => {
                tracing::error!(run_id = %state.run.id, node_id = %node.id, "Node failed: {}", err);
                state
                    .emitter
                    .emit(
                        EventKind::NodeFailed,
                        Some(node.id.as_str()),
                        format!("Failed to execute node '{}': {}", node.label(), err),
                        object([
                            ("error", Value::from(err.to_string())),
                            ("retryable", Value::from(err.is_retryable())),
                            ("duration_ms", Value::from(duration_ms as i64)),
                        ]),
                        state.run.progress,
                    )
                    .await;
                Err(format!("Node {} failed: {}", node.id, err))
            }
        }
    }

    /// Invoke a handler on its own task under the node timeout
    ///
    /// Running on a spawned task turns a panicking handler into an ordinary
    /// node failure instead of tearing down the run loop.
    async fn invoke(
        &self,
        handler: Arc<dyn NodeHandler>,
        node: &NodeSpec,
        input: &Arc<Variables>,
        state: &mut RunState,
    ) -> Result<NodeOutput, NodeError> {
        let ctx = NodeContext::new(
            state.run.id.clone(),
            node.clone(),
            state.context.snapshot(),
            Arc::clone(input),
        );
        let log = ctx.log.clone();
        let limit = node_timeout(node, self.config.node_timeout);

        let mut task = tokio::spawn(async move { handler.execute(ctx).await });
        let result = match timeout(limit, &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) if join_error.is_panic() => Err(NodeError::ExecutionFailed(
                "handler panicked".to_string(),
            )),
            Ok(Err(join_error)) => Err(NodeError::ExecutionFailed(join_error.to_string())),
            Err(_) => {
                task.abort();
                Err(NodeError::Timeout {
                    ms: limit.as_millis() as u64,
                })
            }
        };

        for entry in log.drain() {
            state.context.log(entry);
        }
        result
    }

    async fn finish(
        &self,
        workflow: &Workflow,
        outcome: Outcome,
        mut state: RunState,
    ) -> Result<RunReport, FlowError> {
        let output = match &outcome {
            Outcome::Completed => final_output(workflow, &mut state),
            _ => state.captured.take().unwrap_or_default(),
        };

        let (kind, message, payload) = match outcome {
            Outcome::Completed => {
                state.run.transition(RunStatus::Completed)?;
                state.run.progress = 1.0;
                (
                    EventKind::WorkflowCompleted,
                    "Workflow execution completed successfully".to_string(),
                    Value::Object(output.clone()),
                )
            }
            Outcome::Failed(message) => {
                state.run.transition(RunStatus::Failed)?;
                state.run.error = Some(message.clone());
                (
                    EventKind::WorkflowFailed,
                    format!("Workflow execution failed: {}", message),
                    object([("error", Value::from(message))]),
                )
            }
            Outcome::Cancelled { before } => {
                state.run.transition(RunStatus::Cancelled)?;
                state.run.error = Some("cancelled".to_string());
                (
                    EventKind::WorkflowCancelled,
                    format!("Workflow execution cancelled before node '{}'", before),
                    object([("next_node_id", Value::from(before))]),
                )
            }
        };
        state
            .emitter
            .emit(kind, None, message, payload, state.run.progress)
            .await;

        let usage = state.context.usage();
        let duration_ms = state.context.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %state.run.id,
            status = %state.run.status,
            duration_ms,
            tokens = usage.tokens,
            "Workflow run finished"
        );

        Ok(RunReport {
            run_id: state.run.id.clone(),
            workflow_id: workflow.id.clone(),
            status: state.run.status,
            output,
            total_tokens_used: usage.tokens,
            total_cost: usage.cost,
            duration_ms,
            error: state.run.error.clone(),
            events: state.emitter.into_history(),
            logs: state.context.take_logs(),
        })
    }
}

/// Apply defaults of declared input variables; a required input with no
/// value and no default stops the run before it starts
fn bind_inputs(workflow: &Workflow, mut input: Variables) -> Result<Variables, WorkflowError> {
    for variable in workflow.input_variables() {
        if input.contains_key(&variable.name) {
            continue;
        }
        match &variable.default {
            Some(default) => {
                input.insert(variable.name.clone(), default.clone());
            }
            None if variable.required => {
                return Err(WorkflowError::MissingInput(variable.name.clone()))
            }
            None => {}
        }
    }
    Ok(input)
}

/// A node runs if any incoming edge is satisfied: its source completed and,
/// when the source chose a branch, the edge's handle names that branch
fn is_eligible(workflow: &Workflow, node: &NodeSpec, state: &RunState) -> bool {
    workflow.incoming(&node.id).any(|edge| {
        state.completed.contains(&edge.source)
            && match (state.branches.get(&edge.source), &edge.source_handle) {
                (Some(chosen), Some(handle)) => chosen == handle,
                _ => true,
            }
    })
}

fn node_timeout(node: &NodeSpec, default: Duration) -> Duration {
    node.config
        .get(TIMEOUT_OVERRIDE_KEY)
        .and_then(Value::as_u64)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

/// Merge a node's outputs into the run context
///
/// Every output is stored as `node_id.port` and as the bare port name.
/// Edges that name an output port as their source handle and carry a target
/// handle also bind the value under the target handle.
fn apply_output(workflow: &Workflow, node: &NodeSpec, output: NodeOutput, state: &mut RunState) {
    let NodeOutput {
        outputs,
        usage,
        branch,
        capture,
    } = output;

    for (port, value) in &outputs {
        state
            .context
            .set(format!("{}.{}", node.id, port), value.clone());
        state.context.set(port.clone(), value.clone());
    }
    for edge in workflow.outgoing(&node.id) {
        if let (Some(port), Some(binding)) = (&edge.source_handle, &edge.target_handle) {
            if let Some(value) = outputs.get(port) {
                state.context.set(binding.clone(), value.clone());
            }
        }
    }

    if let Some(usage) = usage {
        state.context.record_usage(usage);
    }
    if let Some(branch) = branch {
        state.branches.insert(node.id.clone(), branch);
    }
    if let Some(capture) = capture {
        state.captured.get_or_insert_with(Variables::new).extend(capture);
    }

    state.last_outputs = Some(outputs);
    state.completed.insert(node.id.clone());
    state.resolved += 1;
}

/// Values captured by output nodes; otherwise the declared output
/// variables; otherwise the last completed node's outputs
fn final_output(workflow: &Workflow, state: &mut RunState) -> Variables {
    if let Some(captured) = state.captured.take() {
        return captured;
    }
    if workflow.output_variables().next().is_some() {
        return workflow
            .output_variables()
            .filter_map(|v| {
                state
                    .context
                    .get(&v.name)
                    .map(|value| (v.name.clone(), value.clone()))
            })
            .collect();
    }
    state.last_outputs.take().unwrap_or_default()
}

fn completion_payload(output: &NodeOutput, duration_ms: u64) -> Value {
    let mut payload = Variables::new();
    payload.insert("outputs".to_string(), Value::Object(output.outputs.clone()));
    payload.insert("duration_ms".to_string(), Value::from(duration_ms as i64));
    if let Some(usage) = output.usage {
        payload.insert("tokens".to_string(), Value::from(usage.tokens as i64));
        payload.insert("cost".to_string(), Value::from(usage.cost));
    }
    if let Some(branch) = &output.branch {
        payload.insert("branch".to_string(), Value::from(branch.as_str()));
    }
    Value::Object(payload)
}

fn object<const N: usize>(entries: [(&str, Value); N]) -> Value {
    Value::Object(
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
    )
}
