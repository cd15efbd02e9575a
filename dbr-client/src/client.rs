//! # Routed Client API
//!
//! Purpose: Expose one-call-per-command helpers that pick their logical
//! database from a `db_num` argument, the way most application code wants to
//! use the router.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `RoutedClient` hides descriptors, pools and scoped
//!    connections behind plain method calls.
//! 2. **Declared Once**: Every method shares one type-level descriptor bound
//!    to the `dbNum` argument, so routing rules live in a single place.
//! 3. **Borrow-Friendly API**: Accept `&[u8]` to avoid unnecessary copies.

use dbr_common::{CallContext, IndexDescriptor};

use crate::config::RouterConfig;
use crate::connection::{Connector, Execute, RespConnector};
use crate::dispatcher::{Dispatcher, ScopedConnection};
use crate::error::{ClientResult, RouteError, RouteResult};
use crate::ops::Commands;

/// Argument name carrying the target database of every client call.
pub const DB_PARAM: &str = "dbNum";

/// Command facade routing each call by its `db_num` argument.
pub struct RoutedClient<C: Connector = RespConnector> {
    dispatcher: Dispatcher<C>,
    descriptor: IndexDescriptor,
}

impl RoutedClient<RespConnector> {
    /// Creates a client over TCP pools built from `config`.
    pub fn connect(config: &RouterConfig) -> RouteResult<Self> {
        Ok(RoutedClient::new(Dispatcher::from_config(config)?))
    }
}

impl<C> RoutedClient<C>
where
    C: Connector,
    C::Connection: Execute,
{
    pub fn new(dispatcher: Dispatcher<C>) -> Self {
        RoutedClient {
            dispatcher,
            descriptor: IndexDescriptor::param(DB_PARAM),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<C> {
        &self.dispatcher
    }

    fn run<T>(
        &self,
        db_num: i64,
        op: impl FnOnce(&mut ScopedConnection<C>) -> ClientResult<T>,
    ) -> RouteResult<T> {
        let call = CallContext::new()
            .with_type(self.descriptor.clone())
            .arg(DB_PARAM, db_num);
        self.dispatcher
            .execute(&call, |conn| op(conn).map_err(RouteError::from))
    }

    /// Stores `value` under `key`.
    pub fn save(&self, key: &[u8], value: &[u8], db_num: i64) -> RouteResult<()> {
        self.run(db_num, |conn| conn.set(key, value))
    }

    /// Fetches a value; `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8], db_num: i64) -> RouteResult<Option<Vec<u8>>> {
        self.run(db_num, |conn| conn.get(key))
    }

    pub fn delete(&self, key: &[u8], db_num: i64) -> RouteResult<bool> {
        self.run(db_num, |conn| conn.del(key))
    }

    pub fn hset(&self, key: &[u8], field: &[u8], value: &[u8], db_num: i64) -> RouteResult<bool> {
        self.run(db_num, |conn| conn.hset(key, field, value))
    }

    pub fn hmset(&self, key: &[u8], pairs: &[(&[u8], &[u8])], db_num: i64) -> RouteResult<()> {
        self.run(db_num, |conn| conn.hmset(key, pairs))
    }

    pub fn hget(&self, key: &[u8], field: &[u8], db_num: i64) -> RouteResult<Option<Vec<u8>>> {
        self.run(db_num, |conn| conn.hget(key, field))
    }

    pub fn hdel(&self, key: &[u8], db_num: i64, fields: &[&[u8]]) -> RouteResult<i64> {
        self.run(db_num, |conn| conn.hdel(key, fields))
    }

    pub fn lpush(&self, key: &[u8], db_num: i64, values: &[&[u8]]) -> RouteResult<i64> {
        self.run(db_num, |conn| conn.lpush(key, values))
    }

    pub fn rpush(&self, key: &[u8], db_num: i64, values: &[&[u8]]) -> RouteResult<i64> {
        self.run(db_num, |conn| conn.rpush(key, values))
    }

    pub fn lpop(&self, key: &[u8], db_num: i64) -> RouteResult<Option<Vec<u8>>> {
        self.run(db_num, |conn| conn.lpop(key))
    }

    pub fn rpop(&self, key: &[u8], db_num: i64) -> RouteResult<Option<Vec<u8>>> {
        self.run(db_num, |conn| conn.rpop(key))
    }

    pub fn sadd(&self, key: &[u8], db_num: i64, members: &[&[u8]]) -> RouteResult<i64> {
        self.run(db_num, |conn| conn.sadd(key, members))
    }

    pub fn srem(&self, key: &[u8], db_num: i64, members: &[&[u8]]) -> RouteResult<i64> {
        self.run(db_num, |conn| conn.srem(key, members))
    }

    pub fn sismember(&self, key: &[u8], member: &[u8], db_num: i64) -> RouteResult<bool> {
        self.run(db_num, |conn| conn.sismember(key, member))
    }

    pub fn zadd(&self, key: &[u8], score: f64, member: &[u8], db_num: i64) -> RouteResult<bool> {
        self.run(db_num, |conn| conn.zadd(key, score, member))
    }

    pub fn zrem(&self, key: &[u8], db_num: i64, members: &[&[u8]]) -> RouteResult<i64> {
        self.run(db_num, |conn| conn.zrem(key, members))
    }

    /// Updates a member's score; both commands run on one connection.
    pub fn zadd_score(&self, key: &[u8], score: f64, member: &[u8], db_num: i64) -> RouteResult<bool> {
        self.run(db_num, |conn| conn.zadd_score(key, score, member))
    }

    /// Removes every key of database `db_num`. Irreversible.
    pub fn clear_all(&self, db_num: i64) -> RouteResult<()> {
        self.run(db_num, |conn| conn.flushdb())
    }

    pub fn ping(&self, db_num: i64) -> RouteResult<Vec<u8>> {
        self.run(db_num, |conn| conn.ping())
    }
}
