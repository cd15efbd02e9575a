//! # Pool Registry
//!
//! Purpose: Cache one connection pool per store index, creating pools lazily
//! and evicting the ones that have gone unused for longer than the idle TTL.
//!
//! ## Design Principles
//! 1. **Read-Mostly Map**: Hits take only the shared read lock; the entry's
//!    last-touched stamp is atomic so it can be bumped under that lock.
//! 2. **Per-Index Creation Locks**: A miss serializes only creators of the
//!    same index, so two threads never build two pools for one index while
//!    other indices proceed unhindered.
//! 3. **No Negative Caching**: A failed pool construction inserts nothing;
//!    the next call simply tries again.
//! 4. **Background Sweep**: `start_sweeper` drives `sweep_idle` from its own
//!    thread on a fixed period, independent of individual entry ages.
//!
//! ## Structure Overview
//!
//! ```text
//! PoolRegistry
//!   ├── entries: RwLock<HashMap<StoreIndex, PoolEntry>>
//!   │     └── PoolEntry { pool: ConnectionPool, last_touched: AtomicU64 }
//!   └── create_locks: [Mutex<()>; 16]
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use ahash::RandomState;
use dbr_common::{StoreIndex, STORE_INDEX_COUNT};
use hashbrown::HashMap;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::config::RouterConfig;
use crate::connection::{Connector, RespConnector};
use crate::error::RouteResult;
use crate::pool::{ConnectionPool, PoolConfig};

struct PoolEntry<C: Connector> {
    pool: ConnectionPool<C>,
    // Nanoseconds since the registry epoch.
    last_touched: AtomicU64,
}

/// Lazily populated map from store index to connection pool.
pub struct PoolRegistry<C: Connector = RespConnector> {
    connector: Arc<C>,
    pool_config: PoolConfig,
    idle_ttl: Duration,
    epoch: Instant,
    entries: RwLock<HashMap<StoreIndex, PoolEntry<C>, RandomState>>,
    create_locks: [Mutex<()>; STORE_INDEX_COUNT],
}

impl PoolRegistry<RespConnector> {
    /// Builds a registry of TCP pools from router configuration.
    pub fn from_config(config: &RouterConfig) -> RouteResult<Self> {
        config.validate()?;
        Ok(PoolRegistry::new(
            RespConnector::new(config.connect_settings()),
            config.pool_config(),
            config.idle_ttl(),
        ))
    }
}

impl<C: Connector> PoolRegistry<C> {
    /// Creates an empty registry.
    pub fn new(connector: C, pool_config: PoolConfig, idle_ttl: Duration) -> Self {
        PoolRegistry {
            connector: Arc::new(connector),
            pool_config,
            idle_ttl,
            epoch: Instant::now(),
            entries: RwLock::new(HashMap::with_capacity_and_hasher(
                STORE_INDEX_COUNT,
                RandomState::new(),
            )),
            create_locks: std::array::from_fn(|_| Mutex::new(())),
        }
    }

    /// Returns the pool for `index`, creating it on first use.
    ///
    /// **Logic**:
    /// 1. Read-locked lookup; on a hit, touch the entry and return its pool.
    /// 2. On a miss, take the creation lock for this index and look again.
    /// 3. Still missing: build the pool outside the map lock, then insert it.
    ///
    /// # Errors
    /// `RouteError::PoolCreation` when the pool's first connection fails.
    pub fn get_or_create(&self, index: StoreIndex) -> RouteResult<ConnectionPool<C>> {
        if let Some(pool) = self.lookup(index) {
            return Ok(pool);
        }

        let _creating = self.create_locks[index.as_usize()].lock();
        if let Some(pool) = self.lookup(index) {
            return Ok(pool);
        }

        let pool = ConnectionPool::new(index, Arc::clone(&self.connector), self.pool_config.clone())?;
        let entry = PoolEntry {
            pool: pool.clone(),
            last_touched: AtomicU64::new(self.stamp(Instant::now())),
        };
        self.entries.write().insert(index, entry);
        tracing::info!(index = index.get(), "registered connection pool");
        Ok(pool)
    }

    fn lookup(&self, index: StoreIndex) -> Option<ConnectionPool<C>> {
        let entries = self.entries.read();
        let entry = entries.get(&index)?;
        entry
            .last_touched
            .store(self.stamp(Instant::now()), Ordering::Relaxed);
        Some(entry.pool.clone())
    }

    /// Removes every pool idle for longer than the TTL as of `now` and shuts
    /// it down. Returns the number of pools removed.
    pub fn sweep_idle(&self, now: Instant) -> usize {
        let now = self.stamp(now);
        let ttl = duration_nanos(self.idle_ttl);

        let mut expired = Vec::new();
        self.entries.write().retain(|_, entry| {
            let idle_for = now.saturating_sub(entry.last_touched.load(Ordering::Relaxed));
            if idle_for > ttl {
                expired.push(entry.pool.clone());
                false
            } else {
                true
            }
        });

        // Shut down outside the map lock; closing sockets may block.
        for pool in &expired {
            let closed = pool.shutdown();
            tracing::info!(index = pool.index().get(), closed, "evicted idle connection pool");
        }
        expired.len()
    }

    /// Spawns a thread running `sweep_idle` every `interval`.
    ///
    /// The thread holds only a weak reference and exits once the registry is
    /// dropped or the handle is stopped.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let interval = if interval.is_zero() {
            Duration::from_millis(1)
        } else {
            interval
        };

        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);
        let registry: Weak<Self> = Arc::downgrade(self);

        let join = std::thread::Builder::new()
            .name("dbr-pool-sweeper".into())
            .spawn(move || {
                let mut stopped = thread_signal.stopped.lock();
                while !*stopped {
                    if !thread_signal.wake.wait_for(&mut stopped, interval).timed_out() {
                        continue;
                    }
                    let Some(registry) = registry.upgrade() else {
                        break;
                    };
                    MutexGuard::unlocked(&mut stopped, || {
                        let removed = registry.sweep_idle(Instant::now());
                        tracing::debug!(removed, remaining = registry.len(), "pool sweep finished");
                    });
                }
            })
            .ok();

        if join.is_none() {
            tracing::warn!("failed to spawn pool sweeper thread; idle pools will not be evicted");
        }

        SweeperHandle { signal, join }
    }

    /// Removes and shuts down the pool for `index`. Returns true if one existed.
    pub fn evict(&self, index: StoreIndex) -> bool {
        let removed = self.entries.write().remove(&index);
        match removed {
            Some(entry) => {
                entry.pool.shutdown();
                true
            }
            None => false,
        }
    }

    /// Removes and shuts down every pool. Returns the number removed.
    pub fn shutdown(&self) -> usize {
        let drained: Vec<PoolEntry<C>> = self.entries.write().drain().map(|(_, entry)| entry).collect();
        for entry in &drained {
            entry.pool.shutdown();
        }
        drained.len()
    }

    pub fn contains(&self, index: StoreIndex) -> bool {
        self.entries.read().contains_key(&index)
    }

    /// Indices that currently have a live pool, ascending.
    pub fn indices(&self) -> Vec<StoreIndex> {
        let mut indices: Vec<StoreIndex> = self.entries.read().keys().copied().collect();
        indices.sort_unstable();
        indices
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }

    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool_config
    }

    fn stamp(&self, at: Instant) -> u64 {
        duration_nanos(at.saturating_duration_since(self.epoch))
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

#[derive(Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Handle for the background sweeper thread.
///
/// Dropping the handle stops the thread; `stop` does the same explicitly.
pub struct SweeperHandle {
    signal: Arc<StopSignal>,
    join: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for the thread to finish.
    pub fn stop(self) {
        drop(self);
    }

    fn halt(&mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.halt();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RouteError;
    use crate::testing::FakeConnector;
    use std::sync::Barrier;
    use std::thread;

    fn registry(ttl: Duration) -> PoolRegistry<FakeConnector> {
        let config = PoolConfig {
            max_total: 4,
            max_idle: 2,
            min_idle: 1,
            max_wait: Duration::from_millis(50),
            test_on_borrow: true,
        };
        PoolRegistry::new(FakeConnector::new(), config, ttl)
    }

    fn idx(raw: i64) -> StoreIndex {
        StoreIndex::new(raw).unwrap()
    }

    #[test]
    fn concurrent_get_or_create_builds_one_pool_per_index() {
        let registry = Arc::new(registry(Duration::from_secs(60)));
        let threads = 8;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    StoreIndex::all()
                        .map(|index| registry.get_or_create(index).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let results: Vec<Vec<_>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for pools in &results[1..] {
            for (a, b) in results[0].iter().zip(pools) {
                assert!(a.same_pool(b));
            }
        }
        assert_eq!(registry.len(), STORE_INDEX_COUNT);
        // One prefilled connection per pool.
        assert_eq!(registry.connector.connects(), STORE_INDEX_COUNT);
    }

    #[test]
    fn hit_returns_cached_pool() {
        let registry = registry(Duration::from_secs(60));
        let first = registry.get_or_create(idx(5)).unwrap();
        let second = registry.get_or_create(idx(5)).unwrap();
        assert!(first.same_pool(&second));
        assert_eq!(registry.indices(), vec![idx(5)]);
    }

    #[test]
    fn creation_failure_is_not_cached() {
        let registry = registry(Duration::from_secs(60));
        registry.connector.set_fail_connect(true);
        let err = registry.get_or_create(idx(2)).unwrap_err();
        assert!(matches!(err, RouteError::PoolCreation { .. }));
        assert!(!registry.contains(idx(2)));

        registry.connector.set_fail_connect(false);
        assert!(registry.get_or_create(idx(2)).is_ok());
        assert!(registry.contains(idx(2)));
    }

    #[test]
    fn sweep_evicts_idle_pools_and_recreates() {
        let ttl = Duration::from_millis(100);
        let registry = registry(ttl);
        let before = registry.get_or_create(idx(1)).unwrap();

        assert_eq!(registry.sweep_idle(Instant::now()), 0);
        assert_eq!(registry.sweep_idle(Instant::now() + ttl * 2), 1);
        assert!(registry.is_empty());
        assert!(before.status().closed);

        let after = registry.get_or_create(idx(1)).unwrap();
        assert!(!before.same_pool(&after));
    }

    #[test]
    fn touch_keeps_pool_alive() {
        let ttl = Duration::from_millis(30);
        let registry = registry(ttl);
        registry.get_or_create(idx(4)).unwrap();
        registry.get_or_create(idx(9)).unwrap();

        thread::sleep(Duration::from_millis(40));
        registry.get_or_create(idx(4)).unwrap();

        assert_eq!(registry.sweep_idle(Instant::now()), 1);
        assert_eq!(registry.indices(), vec![idx(4)]);
    }

    #[test]
    fn sweeper_thread_evicts() {
        let registry = Arc::new(registry(Duration::from_millis(1)));
        registry.get_or_create(idx(7)).unwrap();

        let handle = registry.start_sweeper(Duration::from_millis(5));
        let deadline = Instant::now() + Duration::from_secs(2);
        while !registry.is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        handle.stop();

        assert!(registry.is_empty());
    }

    #[test]
    fn stopping_sweeper_does_not_wait_for_interval() {
        let registry = Arc::new(registry(Duration::from_secs(60)));
        let handle = registry.start_sweeper(Duration::from_secs(3600));
        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    /// Connector whose connects to index 1 stall until released.
    #[derive(Default)]
    struct StallingConnector {
        stalled: std::sync::atomic::AtomicBool,
        release: parking_lot::Mutex<bool>,
        released: Condvar,
    }

    impl Connector for StallingConnector {
        type Connection = StoreIndex;

        fn connect(&self, index: StoreIndex) -> crate::error::ClientResult<StoreIndex> {
            if index.get() == 1 {
                self.stalled.store(true, Ordering::SeqCst);
                let mut release = self.release.lock();
                while !*release {
                    self.released.wait(&mut release);
                }
            }
            Ok(index)
        }

        fn check(&self, _conn: &mut StoreIndex) -> crate::error::ClientResult<()> {
            Ok(())
        }
    }

    #[test]
    fn slow_creation_blocks_only_its_own_index() {
        let config = PoolConfig {
            max_total: 1,
            max_idle: 1,
            min_idle: 1,
            max_wait: Duration::from_millis(50),
            test_on_borrow: false,
        };
        let registry = Arc::new(PoolRegistry::new(
            StallingConnector::default(),
            config,
            Duration::from_secs(60),
        ));

        let slow = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.get_or_create(idx(1)).map(|pool| pool.index()))
        };
        let deadline = Instant::now() + Duration::from_secs(5);
        while !registry.connector.stalled.load(Ordering::SeqCst) {
            assert!(Instant::now() < deadline, "creation of index 1 never started");
            thread::yield_now();
        }

        // Index 1 is mid-creation; index 2 must not wait for it.
        let (tx, rx) = std::sync::mpsc::channel();
        {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                let _ = tx.send(registry.get_or_create(idx(2)).map(|pool| pool.index()));
            });
        }
        let other = rx
            .recv_timeout(Duration::from_millis(500))
            .expect("index 2 waited on index 1's creation");
        assert_eq!(other.unwrap(), idx(2));
        assert!(!registry.contains(idx(1)));

        *registry.connector.release.lock() = true;
        registry.connector.released.notify_all();
        assert_eq!(slow.join().unwrap().unwrap(), idx(1));
        assert_eq!(registry.indices(), vec![idx(1), idx(2)]);
    }

    #[test]
    fn evict_and_shutdown() {
        let registry = registry(Duration::from_secs(60));
        let pool = registry.get_or_create(idx(0)).unwrap();
        registry.get_or_create(idx(1)).unwrap();

        assert!(registry.evict(idx(0)));
        assert!(!registry.evict(idx(0)));
        assert!(pool.status().closed);

        assert_eq!(registry.shutdown(), 1);
        assert!(registry.is_empty());
    }
}
