use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use dbr_client::{
    ClientError, ClientResult, ConnectionPool, Connector, Dispatcher, PoolConfig, PoolRegistry,
    RouteError,
};
use dbr_common::{CallContext, IndexDescriptor, StoreIndex};

/// Connection stand-in that only knows which database it belongs to.
struct Handle {
    id: usize,
    index: StoreIndex,
}

/// Hands out connections numbered in the order they were opened.
#[derive(Default)]
struct CountingConnector {
    opened: AtomicUsize,
}

impl Connector for CountingConnector {
    type Connection = Handle;

    fn connect(&self, index: StoreIndex) -> ClientResult<Handle> {
        let id = self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Handle { id, index })
    }

    fn check(&self, _conn: &mut Handle) -> ClientResult<()> {
        Ok(())
    }
}

#[derive(Debug)]
enum AppError {
    Route(RouteError),
    Business(&'static str),
}

impl From<RouteError> for AppError {
    fn from(err: RouteError) -> Self {
        AppError::Route(err)
    }
}

fn pool_config(max_total: usize) -> PoolConfig {
    PoolConfig {
        max_total,
        max_idle: max_total,
        min_idle: 1,
        max_wait: Duration::from_millis(100),
        test_on_borrow: true,
    }
}

fn dispatcher(max_total: usize, ttl: Duration) -> Dispatcher<CountingConnector> {
    let registry = PoolRegistry::new(CountingConnector::default(), pool_config(max_total), ttl);
    Dispatcher::new(Arc::new(registry))
}

fn pool_of(dispatcher: &Dispatcher<CountingConnector>, raw: i64) -> ConnectionPool<CountingConnector> {
    dispatcher
        .registry()
        .get_or_create(StoreIndex::new(raw).unwrap())
        .unwrap()
}

#[test]
fn concurrent_callers_share_one_pool_per_index() {
    let registry = Arc::new(PoolRegistry::new(
        CountingConnector::default(),
        pool_config(4),
        Duration::from_secs(60),
    ));
    let callers = 12;
    let barrier = Arc::new(Barrier::new(callers));

    let handles: Vec<_> = (0..callers)
        .map(|n| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                // Callers walk the indices in different orders.
                let mut indices: Vec<StoreIndex> = StoreIndex::all().collect();
                let len = indices.len();
                indices.rotate_left(n % len);
                indices
                    .into_iter()
                    .map(|index| (index, registry.get_or_create(index).unwrap()))
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let reference: Vec<_> = StoreIndex::all()
        .map(|index| registry.get_or_create(index).unwrap())
        .collect();
    for handle in handles {
        for (index, pool) in handle.join().unwrap() {
            assert!(pool.same_pool(&reference[index.as_usize()]));
        }
    }
    assert_eq!(registry.len(), 16);
}

#[test]
fn type_level_index_is_used_without_override() {
    let dispatcher = dispatcher(2, Duration::from_secs(60));
    let call = CallContext::new().with_type(IndexDescriptor::fixed(1));

    let index = dispatcher
        .execute(&call, |conn| Ok::<_, RouteError>(conn.connection().index))
        .unwrap();
    assert_eq!(index.get(), 1);
}

#[test]
fn out_of_range_binding_routes_to_zero() {
    let dispatcher = dispatcher(2, Duration::from_secs(60));
    let call = CallContext::new()
        .with_type(IndexDescriptor::fixed(1).with_param("dbNum"))
        .with_operation(IndexDescriptor::fixed(5).with_param("dbNum"))
        .arg("dbNum", 20);

    let index = dispatcher
        .execute(&call, |conn| Ok::<_, RouteError>(conn.index()))
        .unwrap();
    assert_eq!(index, StoreIndex::MIN);
}

#[test]
fn failed_unit_of_work_releases_once_and_keeps_its_error() {
    let dispatcher = dispatcher(1, Duration::from_secs(60));
    let call = CallContext::new().with_operation(IndexDescriptor::fixed(3));

    let result: Result<(), AppError> = dispatcher.execute(&call, |_| Err(AppError::Business("declined")));
    assert!(matches!(result, Err(AppError::Business("declined"))));

    let pool = pool_of(&dispatcher, 3);
    let stats = pool.stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.released, 1);
    assert_eq!(pool.status().idle, 1);

    // Capacity is 1, so a leaked connection would make this time out.
    dispatcher
        .execute(&call, |_| Ok::<_, AppError>(()))
        .unwrap();
}

#[test]
fn panicking_unit_of_work_still_releases() {
    let dispatcher = dispatcher(1, Duration::from_secs(60));
    let call = CallContext::new().with_type(IndexDescriptor::fixed(6));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        dispatcher.execute(&call, |_| -> Result<(), RouteError> { panic!("unit of work blew up") })
    }));
    assert!(outcome.is_err());

    let pool = pool_of(&dispatcher, 6);
    let stats = pool.stats();
    assert_eq!(stats.acquired, 1);
    assert_eq!(stats.released, 1);
    // The connection was discarded, freeing its slot for the next call.
    assert_eq!(pool.status().total, 0);
    let id = dispatcher
        .execute(&call, |conn| Ok::<_, RouteError>(conn.connection().id))
        .unwrap();
    assert_eq!(id, 1);
}

#[test]
fn acquire_timeout_reaches_caller_as_its_own_error() {
    let dispatcher = dispatcher(1, Duration::from_secs(60));
    let call = CallContext::new();

    let started = Instant::now();
    let result: Result<(), AppError> =
        dispatcher.execute(&call, |_| dispatcher.execute(&call, |_| Ok(())));
    match result {
        Err(AppError::Route(RouteError::AcquireTimeout { index, waited })) => {
            assert_eq!(index, StoreIndex::MIN);
            assert_eq!(waited, Duration::from_millis(100));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(started.elapsed() >= Duration::from_millis(100));
}

#[test]
fn concurrent_units_of_work_never_share_a_connection() {
    let dispatcher = Arc::new(dispatcher(4, Duration::from_secs(60)));
    let in_use = Arc::new(std::sync::Mutex::new(std::collections::HashSet::new()));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let dispatcher = Arc::clone(&dispatcher);
            let in_use = Arc::clone(&in_use);
            thread::spawn(move || {
                let call = CallContext::new().with_type(IndexDescriptor::fixed(2));
                for _ in 0..20 {
                    dispatcher
                        .execute(&call, |conn| {
                            let id = conn.connection().id;
                            assert!(in_use.lock().unwrap().insert(id), "connection {} shared", id);
                            thread::sleep(Duration::from_micros(200));
                            in_use.lock().unwrap().remove(&id);
                            Ok::<_, RouteError>(())
                        })
                        .or_else(|err| match err {
                            // Eight workers on four connections may occasionally wait too long.
                            RouteError::AcquireTimeout { .. } => Ok(()),
                            other => Err(other),
                        })
                        .unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let pool = pool_of(&dispatcher, 2);
    let stats = pool.stats();
    assert_eq!(stats.acquired, stats.released);
    assert!(pool.status().total <= 4);
}

#[test]
fn idle_pool_is_swept_and_rebuilt() {
    let ttl = Duration::from_millis(20);
    let dispatcher = dispatcher(2, ttl);
    let call = CallContext::new().with_type(IndexDescriptor::fixed(8));

    dispatcher.execute(&call, |_| Ok::<_, RouteError>(())).unwrap();
    let before = pool_of(&dispatcher, 8);

    let removed = dispatcher.registry().sweep_idle(Instant::now() + ttl * 3);
    assert_eq!(removed, 1);
    assert!(before.status().closed);

    dispatcher.execute(&call, |_| Ok::<_, RouteError>(())).unwrap();
    let after = pool_of(&dispatcher, 8);
    assert!(!before.same_pool(&after));
}

#[test]
fn pool_creation_error_propagates() {
    struct Refusing;

    impl Connector for Refusing {
        type Connection = ();

        fn connect(&self, _index: StoreIndex) -> ClientResult<()> {
            Err(ClientError::Io(std::io::ErrorKind::ConnectionRefused.into()))
        }

        fn check(&self, _conn: &mut ()) -> ClientResult<()> {
            Ok(())
        }
    }

    let registry = PoolRegistry::new(Refusing, pool_config(1), Duration::from_secs(60));
    let dispatcher = Dispatcher::new(Arc::new(registry));
    let result = dispatcher.execute_on(4, |_| Ok::<_, RouteError>(()));

    match result {
        Err(RouteError::PoolCreation { index, source: ClientError::Io(_) }) => assert_eq!(index.get(), 4),
        other => panic!("unexpected: {:?}", other),
    }
    assert!(dispatcher.registry().is_empty());
}
