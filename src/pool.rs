//! Concurrency Pool (C6): a process-wide slot tracker allowing many
//! reactors to share a bounded worker budget without deadlock.
//!
//! Grounded directly on `mofa_kernel::budget::BudgetEnforcer`'s
//! `Arc<RwLock<HashMap<String, ...>>>` registry shape; `DashMap` is used in
//! place of a single `RwLock<HashMap>` since pool entries are independent
//! per-key and a process may host many concurrently-active pools.

use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;
use uuid::Uuid;

/// Opaque handle for a shared concurrency budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolKey(pub Uuid);

struct PoolEntry {
    available: AtomicU32,
    limit: u32,
}

static POOLS: Lazy<DashMap<PoolKey, PoolEntry>> = Lazy::new(DashMap::new);

/// Allocate a new pool with `limit` slots, owned by the caller. The
/// registry supervises owner liveness via the returned `PoolGuard`'s
/// `Drop` impl: when the guard is dropped (owner exits, panics, or is
/// dropped), the pool is released.
pub fn allocate_pool(limit: u32) -> PoolGuard {
    let key = PoolKey(Uuid::new_v4());
    POOLS.insert(
        key,
        PoolEntry {
            available: AtomicU32::new(limit),
            limit,
        },
    );
    debug!(pool_key = %key.0, limit, "pool allocated");
    PoolGuard { key }
}

/// Remove `key`'s registration. Outstanding holders of slots retain the
/// right to finish and call `release`, but `acquire` against a released
/// key grants nothing.
pub fn release_pool(key: PoolKey) {
    POOLS.remove(&key);
    debug!(pool_key = %key.0, "pool released");
}

/// Atomically take up to `n` slots; never blocks; may grant fewer than
/// requested (including zero if the pool doesn't exist).
pub fn acquire(key: PoolKey, n: u32) -> u32 {
    let Some(entry) = POOLS.get(&key) else {
        debug!(pool_key = %key.0, requested = n, "pool acquire against unknown key");
        return 0;
    };
    let mut granted = 0;
    loop {
        let current = entry.available.load(Ordering::Acquire);
        let take = current.min(n - granted);
        if take == 0 {
            break;
        }
        let new_value = current - take;
        if entry
            .available
            .compare_exchange(current, new_value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            granted += take;
            if granted >= n {
                break;
            }
        }
    }
    debug!(
        pool_key = %key.0,
        requested = n,
        granted,
        available = entry.available.load(Ordering::Acquire),
        "pool acquire"
    );
    granted
}

/// Return `n` slots to `key`, capped so `available` never exceeds `limit`.
pub fn release(key: PoolKey, n: u32) {
    let Some(entry) = POOLS.get(&key) else {
        debug!(pool_key = %key.0, n, "pool release against unknown key");
        return;
    };
    loop {
        let current = entry.available.load(Ordering::Acquire);
        let new_value = (current + n).min(entry.limit);
        if entry
            .available
            .compare_exchange(current, new_value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            break;
        }
    }
    debug!(
        pool_key = %key.0,
        released = n,
        available = entry.available.load(Ordering::Acquire),
        "pool release"
    );
}

/// Current `(available, limit)` for a pool, or `None` if it doesn't exist.
pub fn status(key: PoolKey) -> Option<(u32, u32)> {
    POOLS
        .get(&key)
        .map(|entry| (entry.available.load(Ordering::Acquire), entry.limit))
}

/// RAII owner guard: releases the pool when dropped. Held by a reactor
/// that allocated its own pool (i.e. was not given a `concurrency_key`);
/// a reactor sharing a parent's pool never holds one.
pub struct PoolGuard {
    key: PoolKey,
}

impl PoolGuard {
    pub fn key(&self) -> PoolKey {
        self.key
    }
}

impl Drop for PoolGuard {
    fn drop(&mut self) {
        release_pool(self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_never_grants_more_than_available() {
        let guard = allocate_pool(2);
        assert_eq!(acquire(guard.key(), 5), 2);
        assert_eq!(acquire(guard.key(), 1), 0);
    }

    #[test]
    fn release_is_capped_at_limit() {
        let guard = allocate_pool(2);
        release(guard.key(), 10);
        assert_eq!(status(guard.key()), Some((2, 2)));
    }

    #[test]
    fn pool_conservation_at_rest() {
        let guard = allocate_pool(4);
        let granted = acquire(guard.key(), 3);
        release(guard.key(), granted);
        assert_eq!(status(guard.key()), Some((4, 4)));
    }

    #[test]
    fn drop_releases_the_pool() {
        let key = {
            let guard = allocate_pool(1);
            guard.key()
        };
        assert_eq!(status(key), None);
    }

    #[test]
    fn acquire_against_released_pool_grants_nothing() {
        let guard = allocate_pool(1);
        let key = guard.key();
        release_pool(key);
        assert_eq!(acquire(key, 1), 0);
        std::mem::forget(guard);
    }
}
