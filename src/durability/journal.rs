use super::DurabilityPhase;
use crate::core::{ExceptionType, Replica};
use crate::transaction::TransactionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// One strategy-level call of a transaction phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationEvent {
    pub transaction_id: TransactionId,
    pub phase: DurabilityPhase,
    pub exception_type: ExceptionType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokerOutcome {
    Succeeded,
    Failed(String),
}

/// One replica-level call of a transaction phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokerEvent {
    pub transaction_id: TransactionId,
    pub phase: DurabilityPhase,
    pub replica: Replica,
    pub outcome: Option<InvokerOutcome>,
}

/// Receives durability bookkeeping.
pub trait DurabilityListener: Send + Sync {
    fn before_invocation(&self, event: &InvocationEvent);

    fn after_invocation(&self, event: &InvocationEvent);

    fn before_invoker(&self, event: &InvokerEvent);

    fn after_invoker(&self, event: &InvokerEvent);
}

/// Journal entry for an invocation that has started but not completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub event: InvocationEvent,
    pub started_at: DateTime<Utc>,
    /// `None` marks a replica call that never reported back.
    pub invokers: BTreeMap<Replica, Option<InvokerOutcome>>,
}

type RecordKey = (TransactionId, DurabilityPhase);

/// In-memory journal of in-flight invocations.
///
/// Completed invocations are dropped; whatever remains after a crash is the
/// set of phases recovery has to reconcile.
#[derive(Debug, Default)]
pub struct DurabilityJournal {
    records: Mutex<HashMap<RecordKey, InvocationRecord>>,
}

impl DurabilityJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of pending records, oldest first.
    pub fn pending(&self) -> Vec<InvocationRecord> {
        let records = self.lock_records();
        let mut pending: Vec<InvocationRecord> = records.values().cloned().collect();
        pending.sort_by_key(|record| record.started_at);
        pending
    }

    pub fn pending_for(&self, transaction_id: &TransactionId) -> Vec<InvocationRecord> {
        self.pending()
            .into_iter()
            .filter(|record| &record.event.transaction_id == transaction_id)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }

    fn lock_records(&self) -> std::sync::MutexGuard<'_, HashMap<RecordKey, InvocationRecord>> {
        // Entries are plain data; a panic elsewhere cannot leave them half-written.
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record_for<'a>(
        records: &'a mut HashMap<RecordKey, InvocationRecord>,
        transaction_id: &TransactionId,
        phase: DurabilityPhase,
    ) -> &'a mut InvocationRecord {
        records
            .entry((transaction_id.clone(), phase))
            .or_insert_with(|| InvocationRecord {
                event: InvocationEvent {
                    transaction_id: transaction_id.clone(),
                    phase,
                    exception_type: ExceptionType::Sql,
                },
                started_at: Utc::now(),
                invokers: BTreeMap::new(),
            })
    }
}

impl DurabilityListener for DurabilityJournal {
    fn before_invocation(&self, event: &InvocationEvent) {
        let mut records = self.lock_records();
        let record = Self::record_for(&mut records, &event.transaction_id, event.phase);
        record.event.exception_type = event.exception_type;
    }

    fn after_invocation(&self, event: &InvocationEvent) {
        let mut records = self.lock_records();
        records.remove(&(event.transaction_id.clone(), event.phase));
    }

    fn before_invoker(&self, event: &InvokerEvent) {
        let mut records = self.lock_records();
        let record = Self::record_for(&mut records, &event.transaction_id, event.phase);
        record.invokers.entry(event.replica.clone()).or_insert(None);
    }

    fn after_invoker(&self, event: &InvokerEvent) {
        let mut records = self.lock_records();
        if let Some(record) = records.get_mut(&(event.transaction_id.clone(), event.phase)) {
            record
                .invokers
                .insert(event.replica.clone(), event.outcome.clone());
        }
    }
}
