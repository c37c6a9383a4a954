// ============================================================================
// Local Transaction Context
// ============================================================================
//
// Per-transaction coordinator sitting between the proxy layer and the replica
// set. For every statement it:
//
// - holds the cluster guard lock (shared with other transactions, exclusive
//   against structural changes) for the duration of the call
// - in autocommit mode wraps the call with the COMMIT durability phase
// - in an explicit transaction pins the replica that answered the first
//   statement and routes every later statement to it
//
// State transitions of one statement:
// ```text
// idle ──lock()──> active(txn id) ──call──> unlock() ──> idle
// ```
//
// ============================================================================

use crate::core::{ClusterError, ExceptionType, Replica, Result};
use crate::durability::{Durability, DurabilityPhase};
use crate::invocation::{InvocationStrategy, InvokeOnContextStrategy, Invoker, ProxyFactory, ResultMap};
use crate::lock::Lock;
use crate::transaction::{TransactionId, TransactionIdentifierFactory};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::{Arc, Mutex, MutexGuard};

/// Mutable state of one transaction. Only that transaction's own call
/// sequence touches it.
#[derive(Debug, Default)]
struct TransactionState {
    transaction_id: Option<TransactionId>,
    pinned_replica: Option<Replica>,
}

pub struct LocalTransactionContext<D: Durability> {
    lock: Arc<dyn Lock>,
    durability: Arc<D>,
    transaction_ids: Arc<dyn TransactionIdentifierFactory>,
    state: Mutex<TransactionState>,
}

impl<D: Durability> LocalTransactionContext<D> {
    /// `lock` is the cluster guard lock, normally `LockManager::read_lock(None)`.
    pub fn new(
        lock: Arc<dyn Lock>,
        durability: Arc<D>,
        transaction_ids: Arc<dyn TransactionIdentifierFactory>,
    ) -> Arc<Self> {
        Arc::new(Self {
            lock,
            durability,
            transaction_ids,
            state: Mutex::new(TransactionState::default()),
        })
    }

    /// Identifier of the statement currently holding the guard lock.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        self.state().transaction_id.clone()
    }

    pub fn pinned_replica(&self) -> Option<Replica> {
        self.state().pinned_replica.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state().transaction_id.is_some()
    }

    /// Wraps the strategy of a statement about to run.
    ///
    /// Returns `strategy` untouched when called from inside a statement that
    /// already holds the guard lock.
    pub fn start<T, R>(
        self: &Arc<Self>,
        strategy: Arc<dyn InvocationStrategy<T, R>>,
        auto_commit: bool,
    ) -> Arc<dyn InvocationStrategy<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        if self.is_active() {
            return strategy;
        }

        if auto_commit {
            Arc::new(AutoCommitStrategy {
                context: Arc::clone(self),
                strategy,
            })
        } else {
            Arc::new(TransactionalStrategy {
                context: Arc::clone(self),
                strategy,
            })
        }
    }

    /// Adds per-call COMMIT bookkeeping to an autocommit statement's invoker.
    pub fn start_invoker<T, R>(
        &self,
        invoker: Arc<dyn Invoker<T, R>>,
        auto_commit: bool,
    ) -> Arc<dyn Invoker<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        if !auto_commit {
            return invoker;
        }

        match self.transaction_id() {
            Some(transaction_id) => self.durability.invoker(
                invoker,
                DurabilityPhase::Commit,
                transaction_id,
                ExceptionType::Sql.factory(),
            ),
            None => invoker,
        }
    }

    /// Wraps the strategy of a commit or rollback.
    ///
    /// Always wrapped, even if no statement ever ran, so the guard lock and
    /// durability bookkeeping look the same for every transaction end.
    pub fn end<T, R>(
        self: &Arc<Self>,
        strategy: Arc<dyn InvocationStrategy<T, R>>,
        phase: DurabilityPhase,
    ) -> Arc<dyn InvocationStrategy<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        Arc::new(EndTransactionStrategy {
            context: Arc::clone(self),
            strategy,
            phase,
        })
    }

    pub fn end_invoker<T, R>(
        &self,
        invoker: Arc<dyn Invoker<T, R>>,
        phase: DurabilityPhase,
    ) -> Arc<dyn Invoker<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        match self.transaction_id() {
            Some(transaction_id) => {
                self.durability
                    .invoker(invoker, phase, transaction_id, ExceptionType::Sql.factory())
            }
            None => invoker,
        }
    }

    /// Forgets the pinned replica and, if a statement still holds the guard
    /// lock, releases it. Safe to call repeatedly.
    pub fn close(&self) {
        let transaction_id = {
            let mut state = self.state();
            state.pinned_replica = None;
            state.transaction_id.clone()
        };

        if let Some(transaction_id) = transaction_id {
            warn!(
                "Transaction {} closed without commit or rollback, releasing cluster lock",
                transaction_id
            );
            self.unlock();
        }
    }

    /// Waits for the guard lock and mints a fresh transaction id.
    ///
    /// The returned handle releases the lock when dropped, unless `close()`
    /// got there first.
    pub(crate) async fn lock(&self) -> Result<HeldTransaction<'_, D>> {
        self.lock.lock().await?;

        let transaction_id = self.transaction_ids.create_transaction_identifier();
        self.state().transaction_id = Some(transaction_id.clone());
        debug!("Transaction {} acquired cluster lock", transaction_id);

        Ok(HeldTransaction {
            context: self,
            transaction_id,
            ends_transaction: false,
        })
    }

    fn unlock(&self) {
        self.lock.unlock();
        if let Some(transaction_id) = self.state().transaction_id.take() {
            debug!("Transaction {} released cluster lock", transaction_id);
        }
    }

    /// Releases the guard lock on behalf of the statement that took it as
    /// `transaction_id`. A no-op once `close()` has already released that
    /// statement, so a later statement keeps its own hold.
    fn release(&self, transaction_id: &TransactionId, ends_transaction: bool) {
        {
            let mut state = self.state();
            if state.transaction_id.as_ref() != Some(transaction_id) {
                debug!("Transaction {} already released", transaction_id);
                return;
            }
            state.transaction_id = None;
            if ends_transaction {
                state.pinned_replica = None;
            }
        }
        self.lock.unlock();
        debug!("Transaction {} released cluster lock", transaction_id);
    }

    fn pin(&self, replica: Replica) -> Replica {
        let mut state = self.state();
        let pinned = state.pinned_replica.get_or_insert(replica);
        pinned.clone()
    }

    fn state(&self) -> MutexGuard<'_, TransactionState> {
        // The state is two plain fields; a panicking holder cannot tear them.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<D: Durability> Drop for LocalTransactionContext<D> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Guard lock held by one statement. Releasing happens on drop, so errors
/// and dropped futures release it too.
pub(crate) struct HeldTransaction<'a, D: Durability> {
    context: &'a LocalTransactionContext<D>,
    transaction_id: TransactionId,
    ends_transaction: bool,
}

impl<D: Durability> HeldTransaction<'_, D> {
    pub(crate) fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }
}

impl<D: Durability> Drop for HeldTransaction<'_, D> {
    fn drop(&mut self) {
        self.context.release(&self.transaction_id, self.ends_transaction);
    }
}

struct AutoCommitStrategy<D: Durability, T, R> {
    context: Arc<LocalTransactionContext<D>>,
    strategy: Arc<dyn InvocationStrategy<T, R>>,
}

#[async_trait]
impl<D, T, R> InvocationStrategy<T, R> for AutoCommitStrategy<D, T, R>
where
    D: Durability,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(
        &self,
        proxy: &ProxyFactory<T>,
        invoker: Arc<dyn Invoker<T, R>>,
    ) -> Result<ResultMap<R>> {
        let held = self
            .context
            .lock()
            .await
            .map_err(|err| proxy.exception_factory().create_exception(err))?;

        let durable = self.context.durability.invocation_strategy(
            Arc::clone(&self.strategy),
            DurabilityPhase::Commit,
            held.transaction_id().clone(),
        );
        durable.invoke(proxy, invoker).await
    }
}

struct TransactionalStrategy<D: Durability, T, R> {
    context: Arc<LocalTransactionContext<D>>,
    strategy: Arc<dyn InvocationStrategy<T, R>>,
}

#[async_trait]
impl<D, T, R> InvocationStrategy<T, R> for TransactionalStrategy<D, T, R>
where
    D: Durability,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(
        &self,
        proxy: &ProxyFactory<T>,
        invoker: Arc<dyn Invoker<T, R>>,
    ) -> Result<ResultMap<R>> {
        let factory = proxy.exception_factory();
        let _held = self
            .context
            .lock()
            .await
            .map_err(|err| factory.create_exception(err))?;

        match self.context.pinned_replica() {
            Some(replica) => InvokeOnContextStrategy::new(replica)
                .invoke(proxy, invoker)
                .await
                .map_err(|err| factory.create_exception(err)),
            None => {
                let results = self
                    .strategy
                    .invoke(proxy, invoker)
                    .await
                    .map_err(|err| factory.create_exception(err))?;

                let first = results
                    .keys()
                    .next()
                    .cloned()
                    .ok_or_else(|| factory.create_exception(ClusterError::NoActiveReplicas))?;
                let pinned = self.context.pin(first);
                debug!("Transaction pinned to replica '{}'", pinned);
                Ok(results)
            }
        }
    }
}

struct EndTransactionStrategy<D: Durability, T, R> {
    context: Arc<LocalTransactionContext<D>>,
    strategy: Arc<dyn InvocationStrategy<T, R>>,
    phase: DurabilityPhase,
}

#[async_trait]
impl<D, T, R> InvocationStrategy<T, R> for EndTransactionStrategy<D, T, R>
where
    D: Durability,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(
        &self,
        proxy: &ProxyFactory<T>,
        invoker: Arc<dyn Invoker<T, R>>,
    ) -> Result<ResultMap<R>> {
        let mut held = self
            .context
            .lock()
            .await
            .map_err(|err| proxy.exception_factory().create_exception(err))?;
        held.ends_transaction = true;

        let target: Arc<dyn InvocationStrategy<T, R>> = match self.context.pinned_replica() {
            Some(replica) => Arc::new(InvokeOnContextStrategy::new(replica)),
            None => Arc::clone(&self.strategy),
        };

        let durable = self.context.durability.invocation_strategy(
            target,
            self.phase,
            held.transaction_id().clone(),
        );
        durable.invoke(proxy, invoker).await
    }
}
