use super::{InvocationStrategy, Invoker, ProxyFactory, ResultMap};
use crate::core::{ClusterError, Replica, Result};
use async_trait::async_trait;
use futures::future::join_all;
use log::warn;
use std::sync::Arc;

/// Fans the call out to every replica concurrently.
///
/// Replicas that fail while others succeed are left out of the result map and
/// logged; the call only fails when no replica succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct InvokeOnAllStrategy;

#[async_trait]
impl<T, R> InvocationStrategy<T, R> for InvokeOnAllStrategy
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(
        &self,
        proxy: &ProxyFactory<T>,
        invoker: Arc<dyn Invoker<T, R>>,
    ) -> Result<ResultMap<R>> {
        if proxy.targets().is_empty() {
            return Err(proxy
                .exception_factory()
                .create_exception(ClusterError::NoActiveReplicas));
        }

        let calls = proxy.targets().iter().map(|(replica, target)| {
            let invoker = Arc::clone(&invoker);
            async move { (replica, invoker.invoke(replica, target).await) }
        });

        let mut results = ResultMap::new();
        let mut failures = Vec::new();
        for (replica, outcome) in join_all(calls).await {
            match outcome {
                Ok(value) => {
                    results.insert(replica.clone(), value);
                }
                Err(err) => failures.push((replica, err)),
            }
        }

        if results.is_empty() {
            // Every replica failed: report the first one in replica order.
            let (_, err) = failures
                .into_iter()
                .next()
                .ok_or(ClusterError::NoActiveReplicas)?;
            return Err(proxy.exception_factory().create_exception(err));
        }

        for (replica, err) in failures {
            warn!("Replica '{}' diverged from the cluster: {}", replica, err);
        }

        Ok(results)
    }
}

/// Sends the call to one specific replica only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvokeOnContextStrategy {
    replica: Replica,
}

impl InvokeOnContextStrategy {
    pub fn new(replica: Replica) -> Self {
        Self { replica }
    }

    pub fn replica(&self) -> &Replica {
        &self.replica
    }
}

#[async_trait]
impl<T, R> InvocationStrategy<T, R> for InvokeOnContextStrategy
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(
        &self,
        proxy: &ProxyFactory<T>,
        invoker: Arc<dyn Invoker<T, R>>,
    ) -> Result<ResultMap<R>> {
        let factory = proxy.exception_factory();
        let target = proxy.target(&self.replica).ok_or_else(|| {
            factory.create_exception(ClusterError::ReplicaNotFound(self.replica.id().to_string()))
        })?;

        let value = invoker
            .invoke(&self.replica, target)
            .await
            .map_err(|err| factory.create_exception(err))?;

        let mut results = ResultMap::new();
        results.insert(self.replica.clone(), value);
        Ok(results)
    }
}
