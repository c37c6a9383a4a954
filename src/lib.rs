// ============================================================================
// HA Cluster Library
// ============================================================================
//
// Transaction coordination for a cluster of identical database replicas:
// statements fan out to every replica under a cluster-wide shared lock,
// explicit transactions stick to the replica that served their first
// statement, and commit/rollback phases are journaled for recovery.
//
// ============================================================================

pub mod cluster;
pub mod core;
pub mod durability;
pub mod invocation;
pub mod lock;
pub mod transaction;

// Re-export main types for convenience
pub use core::{ClusterError, ExceptionFactory, ExceptionType, Replica, Result};

pub use cluster::{
    ClusterConfig, ClusterConnection, ClusterDurability, DatabaseCluster, DurabilityMode,
    TransactionIdMode,
};

pub use durability::{
    CoarseDurability, Durability, DurabilityJournal, DurabilityListener, DurabilityPhase,
    FineDurability, NoDurability,
};

pub use invocation::{
    InvocationStrategy, InvokeOnAllStrategy, InvokeOnContextStrategy, Invoker, ProxyFactory,
    ResultMap, invoker_fn,
};

pub use lock::{Condition, GuardedLock, Interrupt, LocalLockManager, Lock, LockAdapter, LockManager};

pub use transaction::{
    LocalTransactionContext, SimpleTransactionIdentifierFactory, TransactionId,
    TransactionIdentifierFactory, UuidTransactionIdentifierFactory,
};
