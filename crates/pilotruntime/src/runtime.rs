use crate::executor::{ExecutorConfig, RunRequest, WorkflowExecutor};
use crate::registry::HandlerRegistry;
use crate::store::{InMemoryRunStore, RunStore};
use futures::Stream;
use pilotcore::{EventBus, ExecutionEvent, FlowError, RunId, RunReport};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Main runtime: starts runs as independent tasks, fans their events out on
/// a shared bus and keeps finished reports in a [`RunStore`]
pub struct PilotRuntime {
    executor: Arc<WorkflowExecutor>,
    event_bus: Arc<EventBus>,
    store: Arc<dyn RunStore>,
    active: Arc<RwLock<HashMap<RunId, CancellationToken>>>,
    config: RuntimeConfig,
}

impl PilotRuntime {
    /// Create a runtime over a fully populated registry
    pub fn new(registry: Arc<HandlerRegistry>, config: RuntimeConfig) -> Self {
        let executor = Arc::new(WorkflowExecutor::new(
            registry,
            ExecutorConfig {
                node_timeout: config.node_timeout,
            },
        ));
        let event_bus = Arc::new(EventBus::new(config.bus_capacity));

        Self {
            executor,
            event_bus,
            store: Arc::new(InMemoryRunStore::new()),
            active: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Replace the default in-memory run store
    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = store;
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        self.executor.registry()
    }

    pub fn executor(&self) -> &Arc<WorkflowExecutor> {
        &self.executor
    }

    /// Start a run in the background
    pub async fn start(&self, request: RunRequest) -> RunHandle {
        let run_id = request.run_id.clone();
        let cancel = CancellationToken::new();
        self.active
            .write()
            .await
            .insert(run_id.clone(), cancel.clone());

        let capacity = self.config.event_buffer_size.max(1);
        let (exec_tx, mut exec_rx) = mpsc::channel::<ExecutionEvent>(capacity);
        let (handle_tx, handle_rx) = mpsc::channel::<ExecutionEvent>(capacity);

        let bus = Arc::clone(&self.event_bus);
        tokio::spawn(async move {
            let mut handle_tx = Some(handle_tx);
            while let Some(event) = exec_rx.recv().await {
                bus.publish(event.clone());
                if let Some(tx) = &handle_tx {
                    if tx.send(event).await.is_err() {
                        handle_tx = None;
                    }
                }
            }
        });

        let executor = Arc::clone(&self.executor);
        let store = Arc::clone(&self.store);
        let active = Arc::clone(&self.active);
        let token = cancel.clone();
        let task_run_id = run_id.clone();
        let task = tokio::spawn(async move {
            let result = executor.execute(request, Some(exec_tx), token).await;
            active.write().await.remove(&task_run_id);
            let report = result?;
            if let Err(e) = store.save(report.clone()).await {
                tracing::warn!(run_id = %task_run_id, "Failed to store run report: {}", e);
            }
            Ok::<RunReport, FlowError>(report)
        });

        RunHandle {
            run_id,
            cancel,
            events: Some(handle_rx),
            task,
        }
    }

    /// Run to completion, discarding the live event stream
    pub async fn run(&self, request: RunRequest) -> Result<RunReport, FlowError> {
        self.start(request).await.wait().await
    }

    /// Request cooperative cancellation; false if the run is not active
    pub async fn cancel(&self, run_id: &str) -> bool {
        match self.active.read().await.get(run_id) {
            Some(token) => {
                tracing::info!(run_id = %run_id, "Cancelling run");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of runs that have started and not yet finished
    pub async fn active_runs(&self) -> Vec<RunId> {
        let mut ids: Vec<RunId> = self.active.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Subscribe to events of every run
    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }
}

/// A run in flight
pub struct RunHandle {
    run_id: RunId,
    cancel: CancellationToken,
    events: Option<mpsc::Receiver<ExecutionEvent>>,
    task: JoinHandle<Result<RunReport, FlowError>>,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Stop before the next node starts
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event of this run; `None` once the run has finished
    pub async fn next_event(&mut self) -> Option<ExecutionEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }

    /// Take the live events as a stream; later calls return `None`
    pub fn take_event_stream(&mut self) -> Option<impl Stream<Item = ExecutionEvent>> {
        let rx = self.events.take()?;
        Some(futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        }))
    }

    /// Wait for the final report
    ///
    /// Unread live events are dropped; the report carries the full history.
    pub async fn wait(self) -> Result<RunReport, FlowError> {
        let RunHandle { events, task, .. } = self;
        drop(events);
        task.await
            .map_err(|e| FlowError::Execution(format!("run task failed: {}", e)))?
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub node_timeout: Duration,
    /// Capacity of each run's event channel
    pub event_buffer_size: usize,
    /// Capacity of the shared broadcast bus
    pub bus_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            node_timeout: ExecutorConfig::default().node_timeout,
            event_buffer_size: 256,
            bus_capacity: 1000,
        }
    }
}
