use super::{Durability, DurabilityListener, DurabilityPhase, InvocationEvent};
use crate::core::{ExceptionFactory, Result};
use crate::invocation::{InvocationStrategy, Invoker, ProxyFactory, ResultMap};
use crate::transaction::TransactionId;
use async_trait::async_trait;
use std::sync::Arc;

/// Journals each strategy-level call; replica calls pass through untouched.
#[derive(Clone)]
pub struct CoarseDurability {
    listener: Arc<dyn DurabilityListener>,
}

impl CoarseDurability {
    pub fn new(listener: Arc<dyn DurabilityListener>) -> Self {
        Self { listener }
    }
}

impl Durability for CoarseDurability {
    fn invocation_strategy<T, R>(
        &self,
        strategy: Arc<dyn InvocationStrategy<T, R>>,
        phase: DurabilityPhase,
        transaction_id: TransactionId,
    ) -> Arc<dyn InvocationStrategy<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        Arc::new(JournaledStrategy {
            strategy,
            listener: Arc::clone(&self.listener),
            phase,
            transaction_id,
        })
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

/// Brackets a strategy call with before/after invocation events.
///
/// If the call never completes (crash, dropped future) the event stays in the
/// journal.
pub(crate) struct JournaledStrategy<T, R> {
    pub(crate) strategy: Arc<dyn InvocationStrategy<T, R>>,
    pub(crate) listener: Arc<dyn DurabilityListener>,
    pub(crate) phase: DurabilityPhase,
    pub(crate) transaction_id: TransactionId,
}

#[async_trait]
impl<T, R> InvocationStrategy<T, R> for JournaledStrategy<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(
        &self,
        proxy: &ProxyFactory<T>,
        invoker: Arc<dyn Invoker<T, R>>,
    ) -> Result<ResultMap<R>> {
        let event = InvocationEvent {
            transaction_id: self.transaction_id.clone(),
            phase: self.phase,
            exception_type: proxy.exception_factory().exception_type(),
        };

        self.listener.before_invocation(&event);
        let results = self.strategy.invoke(proxy, invoker).await;
        self.listener.after_invocation(&event);
        results
    }
}
