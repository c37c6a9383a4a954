use super::ClusterDurability;
use crate::core::{ClusterError, Replica, Result};
use crate::durability::DurabilityPhase;
use crate::invocation::{InvocationStrategy, InvokeOnAllStrategy, Invoker, ProxyFactory, ResultMap};
use crate::transaction::LocalTransactionContext;
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

/// Client handle over every replica of a cluster
///
/// Statements fan out to all replicas in autocommit mode. With autocommit
/// off, the replica answering a transaction's first statement serves the
/// rest of it until `commit` or `rollback`.
pub struct ClusterConnection<T> {
    proxy: ProxyFactory<T>,
    context: Arc<LocalTransactionContext<ClusterDurability>>,
    auto_commit: bool,
    state: ConnectionState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Active,
    Closed,
}

impl<T> ClusterConnection<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(
        proxy: ProxyFactory<T>,
        context: Arc<LocalTransactionContext<ClusterDurability>>,
    ) -> Self {
        Self {
            proxy,
            context,
            auto_commit: true,
            state: ConnectionState::Active,
        }
    }

    pub fn auto_commit(&self) -> bool {
        self.auto_commit
    }

    /// Switch autocommit mode
    ///
    /// Turning autocommit back on commits the open transaction first.
    pub async fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.ensure_open()?;
        if enabled && !self.auto_commit {
            self.commit().await?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    /// Replica serving the open transaction, if any statement ran yet
    pub fn pinned_replica(&self) -> Option<Replica> {
        self.context.pinned_replica()
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    /// Run one statement
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let counts = conn
    ///     .execute(invoker_fn(|_: &Replica, db: &Database| db.count("orders")))
    ///     .await?;
    /// ```
    pub async fn execute<R>(&self, invoker: Arc<dyn Invoker<T, R>>) -> Result<ResultMap<R>>
    where
        R: Send + 'static,
    {
        self.ensure_open()?;

        let strategy = self
            .context
            .start::<T, R>(Arc::new(InvokeOnAllStrategy), self.auto_commit);
        let invoker = Arc::new(ContextInvoker {
            context: Arc::clone(&self.context),
            invoker,
            scope: InvokerScope::Statement(self.auto_commit),
        });
        strategy.invoke(&self.proxy, invoker).await
    }

    pub async fn commit(&self) -> Result<()> {
        self.end(DurabilityPhase::Commit).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.end(DurabilityPhase::Rollback).await
    }

    /// Close the connection
    ///
    /// An open transaction is abandoned, not rolled back.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.context.close();
        self.state = ConnectionState::Closed;
    }

    async fn end(&self, phase: DurabilityPhase) -> Result<()> {
        self.ensure_open()?;
        if self.auto_commit {
            return Err(ClusterError::Sql(format!(
                "Cannot {} while autocommit is enabled",
                phase.to_string().to_lowercase()
            )));
        }

        let strategy: Arc<dyn InvocationStrategy<T, ()>> =
            self.context.end(Arc::new(InvokeOnAllStrategy), phase);
        let invoker = Arc::new(ContextInvoker {
            context: Arc::clone(&self.context),
            invoker: crate::invocation::invoker_fn(|_: &Replica, _: &T| Ok(())),
            scope: InvokerScope::End(phase),
        });
        let results = strategy.invoke(&self.proxy, invoker).await?;
        debug!("{} completed on {} replica(s)", phase, results.len());
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            return Err(ClusterError::Sql("Connection is closed".into()));
        }
        Ok(())
    }
}

impl<T> Drop for ClusterConnection<T> {
    fn drop(&mut self) {
        if self.state != ConnectionState::Closed {
            self.context.close();
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum InvokerScope {
    /// Regular statement, carrying the autocommit flag at submission time.
    Statement(bool),
    End(DurabilityPhase),
}

/// Resolves the durability wrapping of a replica call once the guard lock is
/// held, since only then does the context carry a transaction id.
struct ContextInvoker<T, R> {
    context: Arc<LocalTransactionContext<ClusterDurability>>,
    invoker: Arc<dyn Invoker<T, R>>,
    scope: InvokerScope,
}

#[async_trait]
impl<T, R> Invoker<T, R> for ContextInvoker<T, R>
where
    T: Send + Sync + 'static,
    R: Send + 'static,
{
    async fn invoke(&self, replica: &Replica, target: &T) -> Result<R> {
        let invoker = match self.scope {
            InvokerScope::Statement(auto_commit) => self
                .context
                .start_invoker(Arc::clone(&self.invoker), auto_commit),
            InvokerScope::End(phase) => self.context.end_invoker(Arc::clone(&self.invoker), phase),
        };
        invoker.invoke(replica, target).await
    }
}
