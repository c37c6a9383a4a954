pub mod config;
pub mod connection;

pub use config::{ClusterConfig, DurabilityMode, TransactionIdMode};
pub use connection::ClusterConnection;

use crate::core::{ClusterError, ExceptionFactory, ExceptionType, Replica, Result};
use crate::durability::{
    CoarseDurability, Durability, DurabilityJournal, DurabilityPhase, FineDurability, NoDurability,
};
use crate::invocation::{InvocationStrategy, Invoker, ProxyFactory};
use crate::lock::{LocalLockManager, LockManager};
use crate::transaction::{
    LocalTransactionContext, SimpleTransactionIdentifierFactory, TransactionId,
    TransactionIdentifierFactory, UuidTransactionIdentifierFactory,
};
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

/// Durability implementation chosen by [`DurabilityMode`].
#[derive(Clone)]
pub enum ClusterDurability {
    None(NoDurability),
    Coarse(CoarseDurability),
    Fine(FineDurability),
}

impl ClusterDurability {
    pub fn from_mode(mode: DurabilityMode, journal: Arc<DurabilityJournal>) -> Self {
        match mode {
            DurabilityMode::None => ClusterDurability::None(NoDurability),
            DurabilityMode::Coarse => ClusterDurability::Coarse(CoarseDurability::new(journal)),
            DurabilityMode::Fine => ClusterDurability::Fine(FineDurability::new(journal)),
        }
    }
}

impl Durability for ClusterDurability {
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
        match self {
            ClusterDurability::None(d) => d.invocation_strategy(strategy, phase, transaction_id),
            ClusterDurability::Coarse(d) => d.invocation_strategy(strategy, phase, transaction_id),
            ClusterDurability::Fine(d) => d.invocation_strategy(strategy, phase, transaction_id),
        }
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
        match self {
            ClusterDurability::None(d) => {
                d.invoker(invoker, phase, transaction_id, exception_factory)
            }
            ClusterDurability::Coarse(d) => {
                d.invoker(invoker, phase, transaction_id, exception_factory)
            }
            ClusterDurability::Fine(d) => {
                d.invoker(invoker, phase, transaction_id, exception_factory)
            }
        }
    }
}

/// A set of replicas presented as one database.
///
/// Holds the collaborators every transaction context is built from. Replica
/// membership changes are structural: they take the cluster write lock and so
/// wait for every in-flight statement to release its shared guard lock.
///
/// # Examples
///
/// ```
/// use hacluster::{ClusterConfig, DatabaseCluster, Replica, invoker_fn};
///
/// # tokio_test::block_on(async {
/// let cluster = DatabaseCluster::new(
///     ClusterConfig::new("orders"),
///     [Replica::new("db1"), Replica::new("db2")],
/// )?;
///
/// let conn = cluster.connect(|replica| replica.id().to_string())?;
/// let results = conn
///     .execute(invoker_fn(|_: &Replica, name: &String| Ok(name.len())))
///     .await?;
/// assert_eq!(results.len(), 2);
///
/// cluster.add_replica(Replica::new("db3")).await?;
/// assert_eq!(cluster.replicas()?.len(), 3);
/// # Ok::<(), hacluster::ClusterError>(())
/// # }).unwrap();
/// ```
pub struct DatabaseCluster {
    config: ClusterConfig,
    replicas: RwLock<BTreeSet<Replica>>,
    lock_manager: Arc<dyn LockManager>,
    durability: Arc<ClusterDurability>,
    journal: Arc<DurabilityJournal>,
    transaction_ids: Arc<dyn TransactionIdentifierFactory>,
}

impl DatabaseCluster {
    pub fn new(config: ClusterConfig, replicas: impl IntoIterator<Item = Replica>) -> Result<Self> {
        Self::with_lock_manager(config, replicas, Arc::new(LocalLockManager::new()))
    }

    /// Builds a cluster over an externally provided lock manager, e.g. one
    /// shared between cluster nodes.
    pub fn with_lock_manager(
        config: ClusterConfig,
        replicas: impl IntoIterator<Item = Replica>,
        lock_manager: Arc<dyn LockManager>,
    ) -> Result<Self> {
        config.validate()?;

        let journal = Arc::new(DurabilityJournal::new());
        let durability = Arc::new(ClusterDurability::from_mode(
            config.durability,
            Arc::clone(&journal),
        ));
        let transaction_ids: Arc<dyn TransactionIdentifierFactory> = match config.transaction_ids {
            TransactionIdMode::Uuid => Arc::new(UuidTransactionIdentifierFactory),
            TransactionIdMode::Sequence => Arc::new(SimpleTransactionIdentifierFactory::new()),
        };
        let replicas: BTreeSet<Replica> = replicas.into_iter().collect();

        info!(
            "Cluster '{}' started with {} replica(s), durability {:?}",
            config.cluster_id,
            replicas.len(),
            config.durability
        );

        Ok(Self {
            config,
            replicas: RwLock::new(replicas),
            lock_manager,
            durability,
            journal,
            transaction_ids,
        })
    }

    pub fn id(&self) -> &str {
        &self.config.cluster_id
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn lock_manager(&self) -> &Arc<dyn LockManager> {
        &self.lock_manager
    }

    pub fn durability(&self) -> &Arc<ClusterDurability> {
        &self.durability
    }

    /// Phases that started but never completed.
    pub fn journal(&self) -> &Arc<DurabilityJournal> {
        &self.journal
    }

    pub fn transaction_identifier_factory(&self) -> &Arc<dyn TransactionIdentifierFactory> {
        &self.transaction_ids
    }

    pub fn replicas(&self) -> Result<Vec<Replica>> {
        Ok(self.replicas.read()?.iter().cloned().collect())
    }

    /// New transaction context guarded by the cluster-wide read lock.
    ///
    /// Fails outside a tokio runtime, since the lock handle needs one.
    pub fn transaction_context(&self) -> Result<Arc<LocalTransactionContext<ClusterDurability>>> {
        Ok(LocalTransactionContext::new(
            self.lock_manager.read_lock(None)?,
            Arc::clone(&self.durability),
            Arc::clone(&self.transaction_ids),
        ))
    }

    /// Binds one target object per current replica.
    pub fn proxy<T, F>(&self, exception_type: ExceptionType, mut connect: F) -> Result<ProxyFactory<T>>
    where
        F: FnMut(&Replica) -> T,
    {
        let targets: BTreeMap<Replica, T> = self
            .replicas
            .read()?
            .iter()
            .map(|replica| (replica.clone(), connect(replica)))
            .collect();
        Ok(ProxyFactory::new(targets, exception_type.factory()))
    }

    /// Opens an autocommit connection over the current replicas.
    pub fn connect<T, F>(&self, connect: F) -> Result<ClusterConnection<T>>
    where
        T: Send + Sync + 'static,
        F: FnMut(&Replica) -> T,
    {
        let proxy = self.proxy(ExceptionType::Sql, connect)?;
        Ok(ClusterConnection::new(proxy, self.transaction_context()?))
    }

    pub async fn add_replica(&self, replica: Replica) -> Result<()> {
        self.structural_change(|replicas| {
            if !replicas.insert(replica.clone()) {
                return Err(ClusterError::ReplicaExists(replica.id().to_string()));
            }
            info!("Replica '{}' joined cluster", replica);
            Ok(())
        })
        .await
    }

    pub async fn remove_replica(&self, replica: &Replica) -> Result<()> {
        self.structural_change(|replicas| {
            if !replicas.remove(replica) {
                return Err(ClusterError::ReplicaNotFound(replica.id().to_string()));
            }
            info!("Replica '{}' left cluster", replica);
            Ok(())
        })
        .await
    }

    async fn structural_change<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut BTreeSet<Replica>) -> Result<()>,
    {
        let lock = self.lock_manager.write_lock(None)?;
        match self.config.lock_timeout_duration() {
            Some(timeout) => {
                if !lock.try_lock_for(timeout).await? {
                    return Err(ClusterError::LockError(format!(
                        "cluster '{}' write lock not acquired within {:?}",
                        self.config.cluster_id, timeout
                    )));
                }
            }
            None => lock.lock().await?,
        }
        debug!("Cluster '{}' write lock acquired", self.config.cluster_id);

        let outcome = self
            .replicas
            .write()
            .map_err(ClusterError::from)
            .and_then(|mut replicas| change(&mut replicas));

        lock.unlock();
        outcome
    }
}
