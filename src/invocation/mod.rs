// ============================================================================
// Invocation Layer
// ============================================================================
//
// An `Invoker` performs one logical call against one replica. An
// `InvocationStrategy` decides which replicas receive that call and collects
// the per-replica outcomes into a map ordered by replica.
//
// ============================================================================

pub mod strategy;

pub use strategy::{InvokeOnAllStrategy, InvokeOnContextStrategy};

use crate::core::{ExceptionFactory, Replica, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Per-replica results of one logical call, ordered by replica.
pub type ResultMap<R> = BTreeMap<Replica, R>;

/// One call against one replica's target object (a connection, a statement...).
#[async_trait]
pub trait Invoker<T, R>: Send + Sync
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(&self, replica: &Replica, target: &T) -> Result<R>;
}

/// Routing policy for one logical call across the replica set.
#[async_trait]
pub trait InvocationStrategy<T, R>: Send + Sync
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(
        &self,
        proxy: &ProxyFactory<T>,
        invoker: Arc<dyn Invoker<T, R>>,
    ) -> Result<ResultMap<R>>;
}

/// The replica-side objects a call is dispatched to, plus the error
/// translation expected by the caller.
pub struct ProxyFactory<T> {
    targets: BTreeMap<Replica, T>,
    exception_factory: Arc<dyn ExceptionFactory>,
}

impl<T> ProxyFactory<T> {
    pub fn new(targets: BTreeMap<Replica, T>, exception_factory: Arc<dyn ExceptionFactory>) -> Self {
        Self {
            targets,
            exception_factory,
        }
    }

    pub fn targets(&self) -> &BTreeMap<Replica, T> {
        &self.targets
    }

    pub fn target(&self, replica: &Replica) -> Option<&T> {
        self.targets.get(replica)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &Replica> {
        self.targets.keys()
    }

    pub fn exception_factory(&self) -> &Arc<dyn ExceptionFactory> {
        &self.exception_factory
    }
}

/// Adapts a synchronous closure into an [`Invoker`].
pub struct FnInvoker<F, T, R> {
    f: F,
    _marker: PhantomData<fn(&T) -> R>,
}

#[async_trait]
impl<F, T, R> Invoker<T, R> for FnInvoker<F, T, R>
where
    F: Fn(&Replica, &T) -> Result<R> + Send + Sync,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(&self, replica: &Replica, target: &T) -> Result<R> {
        (self.f)(replica, target)
    }
}

/// Builds an invoker from a closure.
pub fn invoker_fn<F, T, R>(f: F) -> Arc<dyn Invoker<T, R>>
where
    F: Fn(&Replica, &T) -> Result<R> + Send + Sync + 'static,
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    Arc::new(FnInvoker {
        f,
        _marker: PhantomData,
    })
}
