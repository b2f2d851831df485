//! # Command Audit Trail
//!
//! Every dispatched command is appended to the audit store with result
//! `"dispatched"`, and correlated to its eventual `EXECUTION_RESULT` through
//! an in-process pending index mapping plan id to audit record id. The index
//! is deliberately not durable: a restart between dispatch and result loses the
//! correlation and the record stays `"dispatched"` forever, which the trail
//! reads as "never reported back".
//!
//! Store failures are logged and swallowed; the audit trail must never cost
//! a user their session.

use crate::error::{AgentError, AgentResult};
use crate::protocol::ActionPlan;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Durable log of one command.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// Nullable so records survive user deletion.
    pub user_id: Option<String>,
    pub command_text: String,
    /// The dispatched plan, serialized.
    pub plan: serde_json::Value,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

/// Boundary to the durable audit storage. The relational implementation
/// lives outside this service; the in-memory one below backs tests and
/// single-process deployments.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record, returning its id.
    async fn append(&self, record: AuditRecord) -> AgentResult<Uuid>;

    /// Patch a record's result. Called at most once per record.
    async fn update(&self, id: Uuid, result: &str, error: Option<&str>) -> AgentResult<()>;

    /// Fetch a record by id.
    async fn get(&self, id: Uuid) -> Option<AuditRecord>;
}

/// In-memory audit store.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: Mutex<HashMap<Uuid, AuditRecord>>,
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: AuditRecord) -> AgentResult<Uuid> {
        let id = record.id;
        self.records.lock().unwrap().insert(id, record);
        Ok(id)
    }

    async fn update(&self, id: Uuid, result: &str, error: Option<&str>) -> AgentResult<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| AgentError::Audit(format!("no audit record {}", id)))?;
        record.result = match error {
            Some(err) => format!("{}: {}", result, err),
            None => result.to_string(),
        };
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Option<AuditRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }
}

impl MemoryAuditStore {
    /// Look up a record by the plan id embedded in its serialized plan.
    pub fn get_by_plan(&self, plan_id: &str) -> Option<AuditRecord> {
        self.records
            .lock()
            .unwrap()
            .values()
            .find(|record| record.plan["plan_id"] == plan_id)
            .cloned()
    }
}

struct PendingEntry {
    audit_id: Uuid,
    user_id: String,
}

/// Appends command records and patches them when execution results arrive.
pub struct AuditRecorder {
    store: std::sync::Arc<dyn AuditStore>,
    pending: Mutex<HashMap<String, PendingEntry>>,
}

impl AuditRecorder {
    pub fn new(store: std::sync::Arc<dyn AuditStore>) -> Self {
        Self {
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Persist a dispatched command and index its plan id for correlation.
    pub async fn log_command(
        &self,
        user_id: &str,
        command_text: &str,
        plan: &ActionPlan,
    ) -> AgentResult<Uuid> {
        let record = AuditRecord {
            id: Uuid::new_v4(),
            user_id: Some(user_id.to_string()),
            command_text: command_text.to_string(),
            plan: serde_json::to_value(plan)
                .map_err(|e| AgentError::Audit(format!("plan serialization: {}", e)))?,
            result: "dispatched".to_string(),
            created_at: Utc::now(),
        };
        let audit_id = self.store.append(record).await?;

        self.pending.lock().unwrap().insert(
            plan.plan_id.clone(),
            PendingEntry {
                audit_id,
                user_id: user_id.to_string(),
            },
        );

        Ok(audit_id)
    }

    /// Resolve a pending plan id with its execution result.
    ///
    /// Returns `false` when the plan id is unknown (already resolved, swept,
    /// or never dispatched by this process); nothing is written in that case.
    /// Store failures are logged, never propagated.
    pub async fn complete(&self, plan_id: &str, result: &str, error: Option<&str>) -> bool {
        let entry = self.pending.lock().unwrap().remove(plan_id);
        let Some(entry) = entry else {
            debug!(plan_id = %plan_id, "Execution result for unknown plan id, ignoring");
            return false;
        };

        if let Err(err) = self.store.update(entry.audit_id, result, error).await {
            warn!(plan_id = %plan_id, audit_id = %entry.audit_id, error = %err,
                "Failed to patch audit record");
        }
        true
    }

    /// Drop all pending entries for a disconnecting user, marking their
    /// records abandoned so the trail shows the command never reported back.
    pub async fn sweep_user(&self, user_id: &str) {
        let swept: Vec<PendingEntry> = {
            let mut pending = self.pending.lock().unwrap();
            let plan_ids: Vec<String> = pending
                .iter()
                .filter(|(_, entry)| entry.user_id == user_id)
                .map(|(plan_id, _)| plan_id.clone())
                .collect();
            plan_ids
                .into_iter()
                .filter_map(|plan_id| pending.remove(&plan_id))
                .collect()
        };

        for entry in swept {
            if let Err(err) = self.store.update(entry.audit_id, "abandoned", None).await {
                warn!(audit_id = %entry.audit_id, error = %err,
                    "Failed to mark audit record abandoned");
            }
        }
    }

    /// Number of plan ids still awaiting an execution result.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PlanMeta, Step};
    use std::sync::Arc;

    fn plan(plan_id: &str) -> ActionPlan {
        ActionPlan {
            plan_id: plan_id.to_string(),
            steps: vec![Step::Speak {
                text: "Done.".to_string(),
            }],
            meta: PlanMeta::default(),
        }
    }

    fn recorder() -> (AuditRecorder, Arc<MemoryAuditStore>) {
        let store = Arc::new(MemoryAuditStore::default());
        (AuditRecorder::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_log_then_complete_patches_record() {
        let (recorder, store) = recorder();
        let audit_id = recorder.log_command("u1", "pay the bill", &plan("p1")).await.unwrap();

        assert_eq!(store.get(audit_id).await.unwrap().result, "dispatched");
        assert_eq!(recorder.pending_len(), 1);

        assert!(recorder.complete("p1", "success", None).await);
        assert_eq!(store.get(audit_id).await.unwrap().result, "success");
        assert_eq!(recorder.pending_len(), 0);
    }

    #[tokio::test]
    async fn test_complete_with_error_keeps_detail() {
        let (recorder, store) = recorder();
        let audit_id = recorder.log_command("u1", "transfer", &plan("p1")).await.unwrap();

        recorder.complete("p1", "failed", Some("element not found")).await;
        assert_eq!(
            store.get(audit_id).await.unwrap().result,
            "failed: element not found"
        );
    }

    #[tokio::test]
    async fn test_unknown_plan_id_is_ignored() {
        let (recorder, store) = recorder();
        let audit_id = recorder.log_command("u1", "balance", &plan("p1")).await.unwrap();

        assert!(!recorder.complete("p-unknown", "success", None).await);
        assert_eq!(store.get(audit_id).await.unwrap().result, "dispatched");
        assert_eq!(recorder.pending_len(), 1);
    }

    #[tokio::test]
    async fn test_complete_resolves_at_most_once() {
        let (recorder, store) = recorder();
        let audit_id = recorder.log_command("u1", "balance", &plan("p1")).await.unwrap();

        assert!(recorder.complete("p1", "success", None).await);
        assert!(!recorder.complete("p1", "failed", Some("late duplicate")).await);
        assert_eq!(store.get(audit_id).await.unwrap().result, "success");
    }

    #[tokio::test]
    async fn test_sweep_drops_only_that_users_entries() {
        let (recorder, store) = recorder();
        let id_a = recorder.log_command("u1", "balance", &plan("p1")).await.unwrap();
        let id_b = recorder.log_command("u2", "bills", &plan("p2")).await.unwrap();

        recorder.sweep_user("u1").await;

        assert_eq!(recorder.pending_len(), 1);
        assert_eq!(store.get(id_a).await.unwrap().result, "abandoned");
        assert_eq!(store.get(id_b).await.unwrap().result, "dispatched");
        assert!(recorder.complete("p2", "success", None).await);
    }
}
