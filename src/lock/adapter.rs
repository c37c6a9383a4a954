//! Cross-context lock adapter.
//!
//! A [`GuardedLock`] must be released by whoever holds its guard. In a cluster
//! the request handler that decides to release a structural lock is often not
//! the one that asked for it, so [`LockAdapter`] parks the guard inside a
//! dedicated worker task and talks to it over two channels: acquire requests
//! (carrying the acquire method and a ready reply) and release requests.
//!
//! One acquisition cycle is in flight per adapter. The adapter is not
//! reentrant and does not arbitrate between concurrent callers of the same
//! instance.

use super::{Condition, GuardedLock, Interrupt, Lock};
use crate::core::{ClusterError, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AcquireMethod {
    Lock,
    LockInterruptibly,
    TryLock,
    TryLockFor(Duration),
}

struct AcquireRequest {
    method: AcquireMethod,
    ready: oneshot::Sender<bool>,
    abort: Option<oneshot::Receiver<()>>,
}

pub struct LockAdapter<L: GuardedLock> {
    lock: Arc<L>,
    held: Arc<AtomicBool>,
    requests: mpsc::UnboundedSender<AcquireRequest>,
    releases: mpsc::UnboundedSender<()>,
    worker: JoinHandle<()>,
}

impl<L: GuardedLock> LockAdapter<L> {
    /// Wraps `lock` and spawns its worker on the current tokio runtime.
    ///
    /// Fails with `ClusterError::LockError` outside a runtime.
    pub fn new(lock: L) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|err| {
            ClusterError::LockError(format!("lock worker needs a tokio runtime: {}", err))
        })?;

        let lock = Arc::new(lock);
        let held = Arc::new(AtomicBool::new(false));
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (releases, release_rx) = mpsc::unbounded_channel();

        let worker = runtime.spawn(run_worker(
            Arc::clone(&lock),
            Arc::clone(&held),
            request_rx,
            release_rx,
        ));

        Ok(Self {
            lock,
            held,
            requests,
            releases,
            worker,
        })
    }

    /// Whether the worker currently holds the wrapped lock.
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    fn submit(
        &self,
        method: AcquireMethod,
        abort: Option<oneshot::Receiver<()>>,
    ) -> Result<oneshot::Receiver<bool>> {
        let (ready, ready_rx) = oneshot::channel();
        self.requests
            .send(AcquireRequest {
                method,
                ready,
                abort,
            })
            .map_err(|_| ClusterError::LockError("lock worker has stopped".into()))?;
        Ok(ready_rx)
    }

    async fn acquire(&self, method: AcquireMethod) -> Result<bool> {
        let ready = self.submit(method, None)?;
        ready
            .await
            .map_err(|_| ClusterError::LockError("lock worker dropped the request".into()))
    }
}

#[async_trait]
impl<L: GuardedLock> Lock for LockAdapter<L> {
    async fn lock(&self) -> Result<()> {
        self.acquire(AcquireMethod::Lock).await?;
        Ok(())
    }

    async fn lock_interruptibly(&self, interrupt: &Interrupt) -> Result<()> {
        if interrupt.clear() {
            return Err(ClusterError::Interrupted);
        }

        let (abort, abort_rx) = oneshot::channel();
        let mut ready = self.submit(AcquireMethod::LockInterruptibly, Some(abort_rx))?;

        tokio::select! {
            biased;
            outcome = &mut ready => match outcome {
                Ok(true) => Ok(()),
                Ok(false) => Err(ClusterError::Interrupted),
                Err(_) => Err(ClusterError::LockError("lock worker dropped the request".into())),
            },
            _ = interrupt.interrupted() => {
                let _ = abort.send(());
                // After close() the worker can no longer report success, so it
                // releases on its own; a success sent before that is ours to undo.
                ready.close();
                if let Ok(true) = ready.try_recv() {
                    self.unlock();
                }
                interrupt.clear();
                Err(ClusterError::Interrupted)
            }
        }
    }

    async fn try_lock(&self) -> Result<bool> {
        self.acquire(AcquireMethod::TryLock).await
    }

    async fn try_lock_for(&self, timeout: Duration) -> Result<bool> {
        self.acquire(AcquireMethod::TryLockFor(timeout)).await
    }

    fn unlock(&self) {
        if self.held.swap(false, Ordering::SeqCst) {
            let _ = self.releases.send(());
        }
    }

    fn new_condition(&self) -> Condition {
        self.lock.new_condition()
    }
}

impl<L: GuardedLock> Drop for LockAdapter<L> {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

async fn run_worker<L: GuardedLock>(
    lock: Arc<L>,
    held: Arc<AtomicBool>,
    mut requests: mpsc::UnboundedReceiver<AcquireRequest>,
    mut releases: mpsc::UnboundedReceiver<()>,
) {
    while let Some(request) = requests.recv().await {
        trace!(method = ?request.method, "lock worker acquiring");

        let guard = match request.method {
            AcquireMethod::Lock => Some(lock.acquire().await),
            AcquireMethod::LockInterruptibly => match request.abort {
                Some(abort) => tokio::select! {
                    biased;
                    guard = lock.acquire() => Some(guard),
                    _ = abort => None,
                },
                None => Some(lock.acquire().await),
            },
            AcquireMethod::TryLock => lock.try_acquire(),
            AcquireMethod::TryLockFor(timeout) => {
                tokio::time::timeout(timeout, lock.acquire()).await.ok()
            }
        };

        let locked = guard.is_some();
        held.store(locked, Ordering::SeqCst);

        if request.ready.send(locked).is_err() {
            debug!("lock requester left before ready, releasing");
            // An unlock() that raced in has already queued a release for this cycle.
            if locked && !held.swap(false, Ordering::SeqCst) {
                let _ = releases.recv().await;
            }
            continue;
        }

        if let Some(guard) = guard {
            // `None` means the adapter is gone; release either way.
            let _ = releases.recv().await;
            drop(guard);
            trace!("lock worker released");
        }
    }
}
