use super::coarse::CoarseDurability;
use super::{Durability, DurabilityListener, DurabilityPhase, InvokerEvent, InvokerOutcome};
use crate::core::{ExceptionFactory, Replica, Result};
use crate::invocation::{InvocationStrategy, Invoker};
use crate::transaction::TransactionId;
use async_trait::async_trait;
use std::sync::Arc;

/// Journals each strategy-level call like [`CoarseDurability`], and the
/// outcome of every replica call made through [`Durability::invoker`], so
/// recovery knows exactly which replicas completed a phase.
#[derive(Clone)]
pub struct FineDurability {
    coarse: CoarseDurability,
    listener: Arc<dyn DurabilityListener>,
}

impl FineDurability {
    pub fn new(listener: Arc<dyn DurabilityListener>) -> Self {
        Self {
            coarse: CoarseDurability::new(Arc::clone(&listener)),
            listener,
        }
    }
}

impl Durability for FineDurability {
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
        self.coarse.invocation_strategy(strategy, phase, transaction_id)
    }

    fn invoker<T, R>(
        &self,
        invoker: Arc<dyn Invoker<T, R>>,
        phase: DurabilityPhase,
        transaction_id: TransactionId,
        exception_factory: Arc<dyn ExceptionFactory>,
    ) -> Arc<dyn Invoker<T, R>>
    where
        T: Send + Sync + 'static,
        R: Send + 'static,
    {
        Arc::new(TrackedInvoker {
            invoker,
            listener: Arc::clone(&self.listener),
            phase,
            transaction_id,
            exception_factory,
        })
    }
}

struct TrackedInvoker<T, R> {
    invoker: Arc<dyn Invoker<T, R>>,
    listener: Arc<dyn DurabilityListener>,
    phase: DurabilityPhase,
    transaction_id: TransactionId,
    exception_factory: Arc<dyn ExceptionFactory>,
}

#[async_trait]
impl<T, R> Invoker<T, R> for TrackedInvoker<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(&self, replica: &Replica, target: &T) -> Result<R> {
        let mut event = InvokerEvent {
            transaction_id: self.transaction_id.clone(),
            phase: self.phase,
            replica: replica.clone(),
            outcome: None,
        };
        self.listener.before_invoker(&event);

        let result = self
            .invoker
            .invoke(replica, target)
            .await
            .map_err(|err| self.exception_factory.create_exception(err));

        event.outcome = Some(match &result {
            Ok(_) => InvokerOutcome::Succeeded,
            Err(err) => InvokerOutcome::Failed(err.to_string()),
        });
        self.listener.after_invoker(&event);
        result
    }
}
