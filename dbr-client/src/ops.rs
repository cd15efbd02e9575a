//! # Data Operations
//!
//! Thin typed wrappers over the primitive string, hash, list, set and
//! sorted-set commands. They work on anything implementing `Execute`, most
//! commonly the `ScopedConnection` handed to a unit of work:
//!
//! ```rust,ignore
//! use dbr_client::{Commands, Dispatcher, RouteError};
//! use dbr_common::{CallContext, IndexDescriptor};
//!
//! let call = CallContext::new()
//!     .with_operation(IndexDescriptor::param("dbNum"))
//!     .arg("dbNum", 3);
//! let value = dispatcher.execute(&call, |conn| {
//!     conn.set(b"greeting", b"hello")?;
//!     Ok::<_, RouteError>(conn.get(b"greeting")?)
//! })?;
//! ```

use crate::connection::Execute;
use crate::error::ClientResult;

/// Typed command helpers, implemented for every `Execute`.
pub trait Commands: Execute {
    /// `PING`; returns the reply payload.
    fn ping(&mut self) -> ClientResult<Vec<u8>> {
        self.exec(&[b"PING"])?.expect_status()
    }

    /// `GET key`; `None` when the key is missing.
    fn get(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.exec(&[b"GET", key])?.expect_bulk()
    }

    /// `SET key value`.
    fn set(&mut self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        self.exec(&[b"SET", key, value])?.expect_status()?;
        Ok(())
    }

    /// `DEL key`; true when a key was removed.
    fn del(&mut self, key: &[u8]) -> ClientResult<bool> {
        Ok(self.exec(&[b"DEL", key])?.expect_integer()? > 0)
    }

    /// `HSET key field value`; true when the field is new.
    fn hset(&mut self, key: &[u8], field: &[u8], value: &[u8]) -> ClientResult<bool> {
        Ok(self.exec(&[b"HSET", key, field, value])?.expect_integer()? > 0)
    }

    /// `HMSET key field value [field value ...]`.
    fn hmset(&mut self, key: &[u8], pairs: &[(&[u8], &[u8])]) -> ClientResult<()> {
        let mut args: Vec<&[u8]> = Vec::with_capacity(2 + pairs.len() * 2);
        args.push(b"HMSET");
        args.push(key);
        for &(field, value) in pairs {
            args.push(field);
            args.push(value);
        }
        self.exec(&args)?.expect_status()?;
        Ok(())
    }

    /// `HGET key field`.
    fn hget(&mut self, key: &[u8], field: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.exec(&[b"HGET", key, field])?.expect_bulk()
    }

    /// `HDEL key field [field ...]`; number of fields removed.
    fn hdel(&mut self, key: &[u8], fields: &[&[u8]]) -> ClientResult<i64> {
        self.exec(&keyed(b"HDEL", key, fields))?.expect_integer()
    }

    /// `LPUSH key value [value ...]`; list length afterwards.
    fn lpush(&mut self, key: &[u8], values: &[&[u8]]) -> ClientResult<i64> {
        self.exec(&keyed(b"LPUSH", key, values))?.expect_integer()
    }

    /// `RPUSH key value [value ...]`; list length afterwards.
    fn rpush(&mut self, key: &[u8], values: &[&[u8]]) -> ClientResult<i64> {
        self.exec(&keyed(b"RPUSH", key, values))?.expect_integer()
    }

    fn lpop(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.exec(&[b"LPOP", key])?.expect_bulk()
    }

    fn rpop(&mut self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        self.exec(&[b"RPOP", key])?.expect_bulk()
    }

    /// `SADD key member [member ...]`; number of members added.
    fn sadd(&mut self, key: &[u8], members: &[&[u8]]) -> ClientResult<i64> {
        self.exec(&keyed(b"SADD", key, members))?.expect_integer()
    }

    /// `SREM key member [member ...]`; number of members removed.
    fn srem(&mut self, key: &[u8], members: &[&[u8]]) -> ClientResult<i64> {
        self.exec(&keyed(b"SREM", key, members))?.expect_integer()
    }

    fn sismember(&mut self, key: &[u8], member: &[u8]) -> ClientResult<bool> {
        Ok(self.exec(&[b"SISMEMBER", key, member])?.expect_integer()? == 1)
    }

    /// `ZADD key score member`; true when the member is new.
    fn zadd(&mut self, key: &[u8], score: f64, member: &[u8]) -> ClientResult<bool> {
        let score = format_score(score);
        Ok(self.exec(&[b"ZADD", key, score.as_bytes(), member])?.expect_integer()? > 0)
    }

    /// `ZREM key member [member ...]`; number of members removed.
    fn zrem(&mut self, key: &[u8], members: &[&[u8]]) -> ClientResult<i64> {
        self.exec(&keyed(b"ZREM", key, members))?.expect_integer()
    }

    /// Replaces a member's score by removing and re-adding it.
    fn zadd_score(&mut self, key: &[u8], score: f64, member: &[u8]) -> ClientResult<bool> {
        self.zrem(key, &[member])?;
        self.zadd(key, score, member)
    }

    /// `FLUSHDB`: removes every key of the bound database.
    fn flushdb(&mut self) -> ClientResult<()> {
        self.exec(&[b"FLUSHDB"])?.expect_status()?;
        Ok(())
    }
}

impl<T: Execute + ?Sized> Commands for T {}

fn keyed<'a>(cmd: &'a [u8], key: &'a [u8], rest: &[&'a [u8]]) -> Vec<&'a [u8]> {
    let mut args = Vec::with_capacity(2 + rest.len());
    args.push(cmd);
    args.push(key);
    args.extend_from_slice(rest);
    args
}

fn format_score(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}
