//! Keyed locks
//!
//! One async mutex per entity id. Holders of the guard for an id have
//! exclusive access to that entity's read-modify-write cycle. An id's
//! mutex lives only while some task holds or waits for it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type LockMap = HashMap<Uuid, Arc<AsyncMutex<()>>>;

/// Lazily created per-id mutexes
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<LockMap>,
}

/// Exclusive access to one id. Dropping it releases the id and forgets its
/// mutex when nobody else is waiting.
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    owner: &'a KeyedLocks,
    id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self) -> MutexGuard<'_, LockMap> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn entry(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        self.map().entry(id).or_default().clone()
    }

    /// Wait for exclusive access to `id`
    pub async fn lock(&self, id: Uuid) -> KeyedGuard<'_> {
        let guard = self.entry(id).lock_owned().await;
        KeyedGuard {
            owner: self,
            id,
            guard: Some(guard),
        }
    }

    /// Lock several ids in ascending order, each once.
    /// Every multi-id caller goes through here so lock order is global.
    pub async fn lock_many(&self, ids: &[Uuid]) -> Vec<KeyedGuard<'_>> {
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for id in sorted {
            guards.push(self.lock(id).await);
        }
        guards
    }

    /// Number of ids currently held or awaited
    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Waiters clone the Arc under the map lock, so a count of one means
        // only the map still refers to this mutex.
        let mut locks = self.owner.map();
        if locks
            .get(&self.id)
            .is_some_and(|mutex| Arc::strong_count(mutex) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_id_is_exclusive() {
        let locks = Arc::new(KeyedLocks::new());
        let id = Uuid::new_v4();

        let guard = locks.lock(id).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_different_ids_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.lock(Uuid::new_v4()).await;
        let _b = tokio::time::timeout(Duration::from_millis(50), locks.lock(Uuid::new_v4()))
            .await
            .expect("independent ids must not contend");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_lock_many_dedups() {
        let locks = KeyedLocks::new();
        let id = Uuid::new_v4();
        let guards = locks.lock_many(&[id, Uuid::new_v4(), id]).await;
        assert_eq!(guards.len(), 2);
    }

    #[tokio::test]
    async fn test_released_ids_are_forgotten() {
        let locks = KeyedLocks::new();
        for _ in 0..100 {
            let _guard = locks.lock(Uuid::new_v4()).await;
        }
        assert!(locks.is_empty());

        let guards = locks.lock_many(&[Uuid::new_v4(), Uuid::new_v4()]).await;
        assert_eq!(locks.len(), 2);
        drop(guards);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_keeps_the_id_alive() {
        let locks = Arc::new(KeyedLocks::new());
        let id = Uuid::new_v4();
        let guard = locks.lock(id).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
