use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Opaque transaction identifier.
///
/// Keys the durability journal and marks a transaction context as active.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransactionId {
    Uuid(Uuid),
    Sequence(u64),
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionId::Uuid(uuid) => write!(f, "txn_{}", uuid),
            TransactionId::Sequence(value) => write!(f, "txn_{}", value),
        }
    }
}

/// Mints transaction identifiers.
pub trait TransactionIdentifierFactory: Send + Sync {
    fn create_transaction_identifier(&self) -> TransactionId;
}

/// Random v4 identifiers, unique across cluster nodes.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidTransactionIdentifierFactory;

impl TransactionIdentifierFactory for UuidTransactionIdentifierFactory {
    fn create_transaction_identifier(&self) -> TransactionId {
        TransactionId::Uuid(Uuid::new_v4())
    }
}

/// Process-local monotonic counter.
#[derive(Debug)]
pub struct SimpleTransactionIdentifierFactory {
    next: AtomicU64,
}

impl SimpleTransactionIdentifierFactory {
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SimpleTransactionIdentifierFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionIdentifierFactory for SimpleTransactionIdentifierFactory {
    fn create_transaction_identifier(&self) -> TransactionId {
        TransactionId::Sequence(self.next.fetch_add(1, Ordering::SeqCst))
    }
}
