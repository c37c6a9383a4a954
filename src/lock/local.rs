use super::{GuardedLock, Lock, LockAdapter, LockManager};
use crate::core::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Shared side of a read/write lock.
#[derive(Debug, Clone)]
pub struct SharedLock(Arc<RwLock<()>>);

#[async_trait]
impl GuardedLock for SharedLock {
    type Guard = OwnedRwLockReadGuard<()>;

    async fn acquire(&self) -> Self::Guard {
        Arc::clone(&self.0).read_owned().await
    }

    fn try_acquire(&self) -> Option<Self::Guard> {
        Arc::clone(&self.0).try_read_owned().ok()
    }
}

/// Exclusive side of a read/write lock.
#[derive(Debug, Clone)]
pub struct ExclusiveLock(Arc<RwLock<()>>);

#[async_trait]
impl GuardedLock for ExclusiveLock {
    type Guard = OwnedRwLockWriteGuard<()>;

    async fn acquire(&self) -> Self::Guard {
        Arc::clone(&self.0).write_owned().await
    }

    fn try_acquire(&self) -> Option<Self::Guard> {
        Arc::clone(&self.0).try_write_owned().ok()
    }
}

pub enum KeyGuard {
    Shared(OwnedRwLockReadGuard<()>),
    Exclusive(OwnedRwLockWriteGuard<()>),
}

/// Lock on a single key.
///
/// Holding any key lock also holds the shared side of the global lock, so a
/// global write lock excludes every keyed holder.
#[derive(Debug, Clone)]
pub struct KeyedLock {
    global: Arc<RwLock<()>>,
    key: Arc<RwLock<()>>,
    exclusive: bool,
}

#[async_trait]
impl GuardedLock for KeyedLock {
    type Guard = (OwnedRwLockReadGuard<()>, KeyGuard);

    async fn acquire(&self) -> Self::Guard {
        let global = Arc::clone(&self.global).read_owned().await;
        let key = if self.exclusive {
            KeyGuard::Exclusive(Arc::clone(&self.key).write_owned().await)
        } else {
            KeyGuard::Shared(Arc::clone(&self.key).read_owned().await)
        };
        (global, key)
    }

    fn try_acquire(&self) -> Option<Self::Guard> {
        let global = Arc::clone(&self.global).try_read_owned().ok()?;
        let key = if self.exclusive {
            KeyGuard::Exclusive(Arc::clone(&self.key).try_write_owned().ok()?)
        } else {
            KeyGuard::Shared(Arc::clone(&self.key).try_read_owned().ok()?)
        };
        Some((global, key))
    }
}

/// In-process lock manager.
///
/// Every call hands out a new [`LockAdapter`]; adapters over the same key
/// share the underlying read/write lock.
#[derive(Debug, Default)]
pub struct LocalLockManager {
    global: Arc<RwLock<()>>,
    keys: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LocalLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn key_lock(&self, key: &str) -> Arc<RwLock<()>> {
        // A poisoned map still holds valid locks.
        let mut keys = self.keys.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(keys.entry(key.to_string()).or_default())
    }

    fn keyed(&self, key: &str, exclusive: bool) -> Result<Arc<dyn Lock>> {
        let adapter = LockAdapter::new(KeyedLock {
            global: Arc::clone(&self.global),
            key: self.key_lock(key),
            exclusive,
        })?;
        Ok(Arc::new(adapter))
    }
}

impl LockManager for LocalLockManager {
    fn read_lock(&self, key: Option<&str>) -> Result<Arc<dyn Lock>> {
        match key {
            None => Ok(Arc::new(LockAdapter::new(SharedLock(Arc::clone(&self.global)))?)),
            Some(key) => self.keyed(key, false),
        }
    }

    fn write_lock(&self, key: Option<&str>) -> Result<Arc<dyn Lock>> {
        match key {
            None => Ok(Arc::new(LockAdapter::new(ExclusiveLock(Arc::clone(&self.global)))?)),
            Some(key) => self.keyed(key, true),
        }
    }
}
