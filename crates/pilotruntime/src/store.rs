use async_trait::async_trait;
use pilotcore::{FlowError, RunReport, RunStatus};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

/// Persistence for finished runs
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, report: RunReport) -> Result<(), FlowError>;

    async fn get(&self, run_id: &str) -> Result<Option<RunReport>, FlowError>;

    /// All stored runs, ordered by run id
    async fn list(&self) -> Result<Vec<RunReport>, FlowError>;
}

/// Process-local store; reports are lost on exit
#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<BTreeMap<String, RunReport>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count_by_status(&self, status: RunStatus) -> usize {
        self.runs
            .read()
            .await
            .values()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn save(&self, report: RunReport) -> Result<(), FlowError> {
        let mut runs = self.runs.write().await;
        runs.insert(report.run_id.clone(), report);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunReport>, FlowError> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn list(&self) -> Result<Vec<RunReport>, FlowError> {
        Ok(self.runs.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pilotcore::Variables;

    fn report(run_id: &str, status: RunStatus) -> RunReport {
        RunReport {
            run_id: run_id.to_string(),
            workflow_id: "wf".to_string(),
            status,
            output: Variables::new(),
            total_tokens_used: 0,
            total_cost: 0.0,
            duration_ms: 1,
            error: None,
            events: Vec::new(),
            logs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn saves_and_lists_in_id_order() {
        let store = InMemoryRunStore::new();
        store.save(report("b", RunStatus::Failed)).await.unwrap();
        store.save(report("a", RunStatus::Completed)).await.unwrap();

        let ids: Vec<String> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.run_id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.get("b").await.unwrap().unwrap().status, RunStatus::Failed);
        assert!(store.get("missing").await.unwrap().is_none());
        assert_eq!(store.count_by_status(RunStatus::Completed).await, 1);
    }
}
