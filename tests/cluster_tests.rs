use async_trait::async_trait;
use hacluster::{
    ClusterConfig, ClusterError, DatabaseCluster, DurabilityMode, DurabilityPhase, ExceptionType,
    InvocationStrategy, InvokeOnAllStrategy, Invoker, Replica, Result, TransactionIdMode,
    invoker_fn,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

/// In-memory stand-in for one replica's database.
#[derive(Default)]
struct Database {
    rows: Mutex<BTreeMap<String, i64>>,
}

impl Database {
    fn put(&self, key: &str, value: i64) -> Result<usize> {
        let mut rows = self.rows.lock()?;
        rows.insert(key.to_string(), value);
        Ok(rows.len())
    }

    fn get(&self, key: &str) -> Option<i64> {
        self.rows.lock().ok()?.get(key).copied()
    }
}

fn replicas() -> Vec<Replica> {
    vec![Replica::new("db1"), Replica::new("db2")]
}

#[tokio::test]
async fn test_config_from_json_drives_cluster() {
    let config = ClusterConfig::from_json(
        r#"{
            "cluster_id": "orders",
            "durability": "coarse",
            "transaction_ids": "sequence",
            "lock_timeout_ms": 100
        }"#,
    )
    .unwrap();
    assert_eq!(config.durability, DurabilityMode::Coarse);
    assert_eq!(config.transaction_ids, TransactionIdMode::Sequence);

    let cluster = DatabaseCluster::new(config, replicas()).unwrap();
    assert_eq!(cluster.id(), "orders");
    assert_eq!(cluster.replicas().unwrap(), replicas());
    assert_eq!(
        cluster.config().lock_timeout_duration(),
        Some(Duration::from_millis(100))
    );
}

#[tokio::test]
async fn test_statements_write_every_replica() {
    let cluster = DatabaseCluster::new(ClusterConfig::new("orders"), replicas()).unwrap();
    let databases: BTreeMap<Replica, Arc<Database>> = replicas()
        .into_iter()
        .map(|replica| (replica, Arc::new(Database::default())))
        .collect();

    let conn = cluster
        .connect(|replica| Arc::clone(&databases[replica]))
        .unwrap();
    let counts = conn
        .execute(invoker_fn(|_: &Replica, db: &Arc<Database>| db.put("order-1", 42)))
        .await
        .unwrap();

    assert_eq!(counts.values().collect::<Vec<_>>(), vec![&1, &1]);
    for db in databases.values() {
        assert_eq!(db.get("order-1"), Some(42));
    }
    assert!(cluster.journal().is_empty());
}

#[tokio::test]
async fn test_explicit_transaction_round_trip() {
    let cluster = DatabaseCluster::new(ClusterConfig::new("orders"), replicas()).unwrap();
    let mut conn = cluster.connect(|_| Arc::new(Database::default())).unwrap();
    conn.set_auto_commit(false).await.unwrap();

    for value in 0..3 {
        conn.execute(invoker_fn(move |_: &Replica, db: &Arc<Database>| {
            db.put("counter", value)
        }))
        .await
        .unwrap();
        assert_eq!(conn.pinned_replica(), Some(Replica::new("db1")));
    }

    conn.rollback().await.unwrap();
    assert_eq!(conn.pinned_replica(), None);

    // Re-enabling autocommit with nothing pending still ends cleanly.
    conn.set_auto_commit(true).await.unwrap();
    assert!(conn.auto_commit());
}

/// Holds every replica call until told to continue.
struct Gate {
    entered: Arc<Notify>,
    open: Arc<Notify>,
}

#[async_trait]
impl Invoker<(), ()> for Gate {
    async fn invoke(&self, _replica: &Replica, _target: &()) -> Result<()> {
        self.entered.notify_one();
        self.open.notified().await;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_structural_change_waits_for_running_statement() {
    let cluster = Arc::new(DatabaseCluster::new(ClusterConfig::new("orders"), replicas()).unwrap());
    let entered = Arc::new(Notify::new());
    let open = Arc::new(Notify::new());

    let statement = {
        let cluster = Arc::clone(&cluster);
        let gate: Arc<dyn Invoker<(), ()>> = Arc::new(Gate {
            entered: Arc::clone(&entered),
            open: Arc::clone(&open),
        });
        tokio::spawn(async move {
            let conn = cluster.connect(|_| ()).unwrap();
            conn.execute(gate).await
        })
    };
    timeout(WAIT, entered.notified()).await.unwrap();

    let join = {
        let cluster = Arc::clone(&cluster);
        tokio::spawn(async move { cluster.add_replica(Replica::new("db3")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!join.is_finished());
    assert_eq!(cluster.replicas().unwrap().len(), 2);

    // Both replica calls are parked on the gate by now.
    open.notify_waiters();
    assert!(timeout(WAIT, statement).await.unwrap().unwrap().is_ok());

    timeout(WAIT, join).await.unwrap().unwrap().unwrap();
    assert_eq!(cluster.replicas().unwrap().len(), 3);
}

#[tokio::test]
async fn test_structural_change_times_out() {
    let config = ClusterConfig::new("orders").lock_timeout(Duration::from_millis(30));
    let cluster = DatabaseCluster::new(config, replicas()).unwrap();

    let context = cluster.transaction_context().unwrap();
    let proxy = cluster.proxy(ExceptionType::Sql, |_| ()).unwrap();
    let strategy: Arc<dyn InvocationStrategy<(), ()>> = Arc::new(InvokeOnAllStrategy);
    let parked = context.start(strategy, true);
    let gate: Arc<dyn Invoker<(), ()>> = Arc::new(Gate {
        entered: Arc::new(Notify::new()),
        open: Arc::new(Notify::new()),
    });

    let removal = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cluster.remove_replica(&Replica::new("db2")).await
    };
    let (statement, removal) = tokio::join!(
        timeout(Duration::from_millis(200), parked.invoke(&proxy, gate)),
        removal
    );

    assert!(statement.is_err());
    assert!(matches!(removal, Err(ClusterError::LockError(_))));
    assert_eq!(cluster.replicas().unwrap(), replicas());
}

#[tokio::test]
async fn test_commit_phase_leaves_no_pending_journal() {
    let config = ClusterConfig::new("orders").durability(DurabilityMode::Fine);
    let cluster = DatabaseCluster::new(config, replicas()).unwrap();
    let mut conn = cluster.connect(|_| ()).unwrap();
    conn.set_auto_commit(false).await.unwrap();

    conn.execute(invoker_fn(|_: &Replica, _: &()| Ok(()))).await.unwrap();
    conn.commit().await.unwrap();

    assert!(cluster.journal().is_empty());
    assert_eq!(format!("{}", DurabilityPhase::Commit), "COMMIT");
}

#[tokio::test]
async fn test_statement_on_removed_replica_set() {
    let cluster = DatabaseCluster::new(ClusterConfig::new("orders"), replicas()).unwrap();
    cluster.remove_replica(&Replica::new("db1")).await.unwrap();
    cluster.remove_replica(&Replica::new("db2")).await.unwrap();

    let conn = cluster.connect(|_| ()).unwrap();
    let result = conn.execute(invoker_fn(|_: &Replica, _: &()| Ok(()))).await;
    assert!(matches!(result, Err(ClusterError::Sql(_))));
}
