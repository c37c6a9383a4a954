use async_trait::async_trait;
use hacluster::durability::{InvocationEvent, InvokerEvent};
use hacluster::{
    ClusterError, CoarseDurability, DurabilityListener, DurabilityPhase, ExceptionType,
    InvocationStrategy, InvokeOnAllStrategy, Invoker, LocalLockManager, LocalTransactionContext,
    LockManager, NoDurability, ProxyFactory, Replica, Result, SimpleTransactionIdentifierFactory,
    invoker_fn,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

fn proxy(replicas: &[&str]) -> ProxyFactory<()> {
    let targets: BTreeMap<Replica, ()> = replicas.iter().map(|id| (Replica::new(*id), ())).collect();
    ProxyFactory::new(targets, ExceptionType::Sql.factory())
}

fn context(
    manager: &LocalLockManager,
) -> Arc<LocalTransactionContext<NoDurability>> {
    LocalTransactionContext::new(
        manager.read_lock(None).unwrap(),
        Arc::new(NoDurability),
        Arc::new(SimpleTransactionIdentifierFactory::new()),
    )
}

fn echo() -> Arc<dyn Invoker<(), Replica>> {
    invoker_fn(|replica: &Replica, _: &()| Ok(replica.clone()))
}

async fn statement(
    context: &Arc<LocalTransactionContext<NoDurability>>,
    proxy: &ProxyFactory<()>,
    invoker: Arc<dyn Invoker<(), Replica>>,
) -> Result<BTreeMap<Replica, Replica>> {
    let strategy: Arc<dyn InvocationStrategy<(), Replica>> = Arc::new(InvokeOnAllStrategy);
    context.start(strategy, false).invoke(proxy, invoker).await
}

/// Invoker that blocks until released, to keep a statement in flight.
struct Parked {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Invoker<(), ()> for Parked {
    async fn invoke(&self, _replica: &Replica, _target: &()) -> Result<()> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingListener {
    invocations: Mutex<Vec<(DurabilityPhase, bool)>>,
}

impl DurabilityListener for RecordingListener {
    fn before_invocation(&self, event: &InvocationEvent) {
        self.invocations.lock().unwrap().push((event.phase, false));
    }

    fn after_invocation(&self, event: &InvocationEvent) {
        self.invocations.lock().unwrap().push((event.phase, true));
    }

    fn before_invoker(&self, _event: &InvokerEvent) {}

    fn after_invoker(&self, _event: &InvokerEvent) {}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transactions_stay_on_their_replica() {
    let manager = Arc::new(LocalLockManager::new());
    let proxy = Arc::new(proxy(&["db1", "db2"]));

    let mut handles = vec![];
    for _ in 0..2 {
        let manager = Arc::clone(&manager);
        let proxy = Arc::clone(&proxy);
        handles.push(tokio::spawn(async move {
            let context = context(&manager);
            let first = statement(&context, &proxy, echo()).await.unwrap();
            let pinned = first.keys().next().cloned().unwrap();

            for _ in 0..2 {
                let results = statement(&context, &proxy, echo()).await.unwrap();
                assert_eq!(results.keys().collect::<Vec<_>>(), vec![&pinned]);
            }
            assert_eq!(context.pinned_replica(), Some(pinned.clone()));
            pinned
        }));
    }

    for handle in handles {
        let pinned = timeout(WAIT, handle).await.unwrap().unwrap();
        assert_eq!(pinned, Replica::new("db1"));
    }
}

#[tokio::test]
async fn test_pinned_replica_is_first_successful_one() {
    let manager = LocalLockManager::new();
    let context = context(&manager);
    let proxy = proxy(&["db1", "db2", "db3"]);

    let first = statement(
        &context,
        &proxy,
        invoker_fn(|replica: &Replica, _: &()| {
            if replica.id() == "db1" {
                Err(ClusterError::replica(replica.id(), "connection refused"))
            } else {
                Ok(replica.clone())
            }
        }),
    )
    .await
    .unwrap();

    assert_eq!(first.len(), 2);
    assert_eq!(context.pinned_replica(), Some(Replica::new("db2")));

    let second = statement(&context, &proxy, echo()).await.unwrap();
    assert_eq!(second.keys().collect::<Vec<_>>(), vec![&Replica::new("db2")]);
}

#[tokio::test]
async fn test_failed_autocommit_statement_is_journaled_and_releases_lock() {
    let manager = LocalLockManager::new();
    let listener = Arc::new(RecordingListener::default());
    let context = LocalTransactionContext::new(
        manager.read_lock(None).unwrap(),
        Arc::new(CoarseDurability::new(listener.clone())),
        Arc::new(SimpleTransactionIdentifierFactory::new()),
    );
    let proxy = proxy(&["db1", "db2"]);

    let strategy: Arc<dyn InvocationStrategy<(), ()>> = Arc::new(InvokeOnAllStrategy);
    let failing = invoker_fn(|replica: &Replica, _: &()| -> Result<()> {
        Err(ClusterError::replica(replica.id(), "disk full"))
    });
    let err = context
        .start(strategy, true)
        .invoke(&proxy, failing)
        .await
        .unwrap_err();

    assert!(matches!(err, ClusterError::Sql(_)));
    assert_eq!(
        *listener.invocations.lock().unwrap(),
        vec![(DurabilityPhase::Commit, false), (DurabilityPhase::Commit, true)]
    );
    assert!(!context.is_active());

    let writer = manager.write_lock(None).unwrap();
    assert!(writer.try_lock_for(Duration::from_millis(500)).await.unwrap());
    writer.unlock();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_close_releases_lock_of_statement_in_flight() {
    let manager = Arc::new(LocalLockManager::new());
    let context = context(&manager);
    let proxy = Arc::new(proxy(&["db1"]));

    let entered = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());
    let parked: Arc<dyn Invoker<(), ()>> = Arc::new(Parked {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    });

    let in_flight = {
        let context = Arc::clone(&context);
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move {
            let strategy: Arc<dyn InvocationStrategy<(), ()>> = Arc::new(InvokeOnAllStrategy);
            context.start(strategy, true).invoke(&proxy, parked).await
        })
    };
    timeout(WAIT, entered.notified()).await.unwrap();
    assert!(context.is_active());

    let writer = manager.write_lock(None).unwrap();
    assert!(!writer.try_lock().await.unwrap());

    context.close();
    assert!(!context.is_active());
    assert!(writer.try_lock_for(WAIT).await.unwrap());
    writer.unlock();

    context.close();
    release.notify_one();
    assert!(timeout(WAIT, in_flight).await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn test_dropped_statement_releases_lock() {
    let manager = LocalLockManager::new();
    let context = context(&manager);
    let proxy = proxy(&["db1"]);

    let parked: Arc<dyn Invoker<(), ()>> = Arc::new(Parked {
        entered: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
    });
    let strategy: Arc<dyn InvocationStrategy<(), ()>> = Arc::new(InvokeOnAllStrategy);
    let wrapped = context.start(strategy, true);

    let abandoned = timeout(Duration::from_millis(50), wrapped.invoke(&proxy, parked)).await;
    assert!(abandoned.is_err());
    assert!(!context.is_active());

    let writer = manager.write_lock(None).unwrap();
    assert!(writer.try_lock_for(WAIT).await.unwrap());
    writer.unlock();
}

#[tokio::test]
async fn test_end_targets_pinned_replica_and_clears_it() {
    let manager = LocalLockManager::new();
    let context = context(&manager);
    let proxy = proxy(&["db1", "db2"]);

    statement(&context, &proxy, echo()).await.unwrap();
    assert_eq!(context.pinned_replica(), Some(Replica::new("db1")));

    let strategy: Arc<dyn InvocationStrategy<(), Replica>> = Arc::new(InvokeOnAllStrategy);
    let rollback = context.end(strategy, DurabilityPhase::Rollback);
    let results = rollback.invoke(&proxy, echo()).await.unwrap();

    assert_eq!(results.keys().collect::<Vec<_>>(), vec![&Replica::new("db1")]);
    assert_eq!(context.pinned_replica(), None);
    assert!(!context.is_active());

    // The next transaction fans out again.
    let next = statement(&context, &proxy, echo()).await.unwrap();
    assert_eq!(next.len(), 2);
}
