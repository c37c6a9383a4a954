// ============================================================================
// Durability Coordination
// ============================================================================
//
// Wraps strategies and invokers with phase bookkeeping. Whatever a wrapper
// journals before a call and has not cleared afterwards describes work that
// may have reached only part of the replica set, which is what recovery uses
// to resynchronize a crashed replica.
//
// ============================================================================

pub mod coarse;
pub mod fine;
pub mod journal;

pub use coarse::CoarseDurability;
pub use fine::FineDurability;
pub use journal::{
    DurabilityJournal, DurabilityListener, InvocationEvent, InvocationRecord, InvokerEvent,
    InvokerOutcome,
};

use crate::core::ExceptionFactory;
use crate::invocation::{InvocationStrategy, Invoker};
use crate::transaction::TransactionId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Stage of the durability protocol a wrapped call belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DurabilityPhase {
    Invoke,
    Commit,
    Rollback,
}

impl std::fmt::Display for DurabilityPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurabilityPhase::Invoke => write!(f, "INVOKE"),
            DurabilityPhase::Commit => write!(f, "COMMIT"),
            DurabilityPhase::Rollback => write!(f, "ROLLBACK"),
        }
    }
}

/// Durability coordinator consulted by the transaction layer.
pub trait Durability: Send + Sync + 'static {
    fn invocation_strategy<T, R>(
        &self,
        strategy: Arc<dyn InvocationStrategy<T, R>>,
        phase: DurabilityPhase,
        transaction_id: TransactionId,
    ) -> Arc<dyn InvocationStrategy<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static;

    fn invoker<T, R>(
        &self,
        invoker: Arc<dyn Invoker<T, R>>,
        phase: DurabilityPhase,
        transaction_id: TransactionId,
        exception_factory: Arc<dyn ExceptionFactory>,
    ) -> Arc<dyn Invoker<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static;
}

/// Journals nothing; calls pass through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDurability;

impl Durability for NoDurability {
    fn invocation_strategy<T, R>(
        &self,
        strategy: Arc<dyn InvocationStrategy<T, R>>,
        _phase: DurabilityPhase,
        _transaction_id: TransactionId,
    ) -> Arc<dyn InvocationStrategy<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        strategy
    }

    fn invoker<T, R>(
        &self,
        invoker: Arc<dyn Invoker<T, R>>,
        _phase: DurabilityPhase,
        _transaction_id: TransactionId,
        _exception_factory: Arc<dyn ExceptionFactory>,
    ) -> Arc<dyn Invoker<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        invoker
    }
}
