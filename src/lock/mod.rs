// ============================================================================
// Cluster Locks
// ============================================================================
//
// Two lock shapes live here:
//
// - `GuardedLock`: an ordinary scoped lock. Acquiring it yields a guard and the
//   lock is released when that guard is dropped by whoever owns it.
// - `Lock`: a lock/unlock contract where release may be requested by a caller
//   other than the one that asked for the acquisition. `LockAdapter` turns any
//   `GuardedLock` into a `Lock` by parking the guard in a background worker.
//
// ============================================================================

pub mod adapter;
pub mod local;

pub use adapter::LockAdapter;
pub use local::{ExclusiveLock, KeyedLock, LocalLockManager, SharedLock};

use crate::core::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, watch};

/// Mutual-exclusion contract whose acquire and release are separate calls.
///
/// Acquire methods resolve once the acquisition attempt has an outcome;
/// `unlock` is a no-op when nothing is held.
#[async_trait]
pub trait Lock: Send + Sync {
    /// Waits until the lock is held.
    async fn lock(&self) -> Result<()>;

    /// Like [`Lock::lock`], but gives up with `ClusterError::Interrupted` once
    /// `interrupt` fires before the lock is obtained.
    async fn lock_interruptibly(&self, interrupt: &Interrupt) -> Result<()>;

    /// Single non-blocking attempt.
    async fn try_lock(&self) -> Result<bool>;

    /// Attempt bounded by `timeout`.
    async fn try_lock_for(&self, timeout: Duration) -> Result<bool>;

    fn unlock(&self);

    fn new_condition(&self) -> Condition;
}

/// A scoped lock: holding the returned guard is holding the lock.
#[async_trait]
pub trait GuardedLock: Send + Sync + 'static {
    type Guard: Send + 'static;

    async fn acquire(&self) -> Self::Guard;

    fn try_acquire(&self) -> Option<Self::Guard>;

    fn new_condition(&self) -> Condition {
        Condition::new()
    }
}

#[async_trait]
impl GuardedLock for Arc<tokio::sync::Mutex<()>> {
    type Guard = tokio::sync::OwnedMutexGuard<()>;

    async fn acquire(&self) -> Self::Guard {
        Arc::clone(self).lock_owned().await
    }

    fn try_acquire(&self) -> Option<Self::Guard> {
        Arc::clone(self).try_lock_owned().ok()
    }
}

/// Cluster lock provider.
///
/// `None` addresses the cluster-wide lock. Handles are fresh per call; creating
/// one outside a tokio runtime fails.
pub trait LockManager: Send + Sync {
    fn read_lock(&self, key: Option<&str>) -> Result<Arc<dyn Lock>>;

    fn write_lock(&self, key: Option<&str>) -> Result<Arc<dyn Lock>>;
}

/// Cancellation signal a caller hands to [`Lock::lock_interruptibly`].
///
/// Clones share the same flag, so another task can interrupt the waiter.
#[derive(Debug, Clone)]
pub struct Interrupt {
    flag: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    pub fn new() -> Self {
        let (flag, _) = watch::channel(false);
        Self {
            flag: Arc::new(flag),
        }
    }

    pub fn interrupt(&self) {
        self.flag.send_replace(true);
    }

    pub fn is_interrupted(&self) -> bool {
        *self.flag.borrow()
    }

    /// Clears the flag, returning whether it was set.
    pub fn clear(&self) -> bool {
        self.flag.send_replace(false)
    }

    /// Resolves once the flag is set.
    pub async fn interrupted(&self) {
        let mut rx = self.flag.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

/// Signalling primitive bound to a lock.
#[derive(Debug, Clone, Default)]
pub struct Condition {
    notify: Arc<Notify>,
}

impl Condition {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }

    pub fn signal(&self) {
        self.notify.notify_one();
    }

    pub fn signal_all(&self) {
        self.notify.notify_waiters();
    }
}
