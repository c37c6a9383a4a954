// ============================================================================
// Transaction Coordination
// ============================================================================
//
// Routes the statements of client-visible transactions across the replica
// set and wires each call into the durability protocol.
//
// ============================================================================

pub mod context;
pub mod id;

pub use context::LocalTransactionContext;
pub use id::{
    SimpleTransactionIdentifierFactory, TransactionId, TransactionIdentifierFactory,
    UuidTransactionIdentifierFactory,
};
