//! In-memory connector for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use dbr_common::StoreIndex;

use crate::connection::{Connector, Execute};
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

pub(crate) struct FakeConnection {
    pub id: usize,
    pub index: StoreIndex,
}

impl Execute for FakeConnection {
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        match args.first().copied() {
            Some(b"BREAK") => Err(ClientError::Protocol),
            Some(b"PING") => Ok(RespValue::Simple(b"PONG".to_vec())),
            _ => Ok(RespValue::Simple(b"OK".to_vec())),
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    next_id: AtomicUsize,
    closes: AtomicUsize,
    fail_connect: AtomicBool,
    fail_check: AtomicBool,
    fail_recycle: AtomicBool,
}

impl FakeConnector {
    pub fn new() -> Self {
        FakeConnector::default()
    }

    pub fn connects(&self) -> usize {
        self.next_id.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_check(&self, fail: bool) {
        self.fail_check.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_recycle(&self, fail: bool) {
        self.fail_recycle.store(fail, Ordering::SeqCst);
    }
}

impl Connector for FakeConnector {
    type Connection = FakeConnection;

    fn connect(&self, index: StoreIndex) -> ClientResult<FakeConnection> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(ClientError::Io(std::io::ErrorKind::ConnectionRefused.into()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection { id, index })
    }

    fn check(&self, _conn: &mut FakeConnection) -> ClientResult<()> {
        if self.fail_check.load(Ordering::SeqCst) {
            return Err(ClientError::UnexpectedResponse);
        }
        Ok(())
    }

    fn recycle(&self, _conn: &mut FakeConnection) -> ClientResult<()> {
        if self.fail_recycle.load(Ordering::SeqCst) {
            return Err(ClientError::Protocol);
        }
        Ok(())
    }

    fn close(&self, _conn: FakeConnection) -> ClientResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
