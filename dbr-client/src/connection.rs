//! # Connections
//!
//! Purpose: Open, health-check, reset and close connections to one logical
//! database of a Redis-compatible server.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Connector` hides how connections are made so
//!    pools stay generic and tests can plug in an in-memory fake.
//! 2. **Buffer Reuse**: Each TCP connection owns its framing buffers.
//! 3. **Home Database**: A connection remembers the index it was opened for
//!    and is switched back before it is reused.

use std::io::{BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use dbr_common::StoreIndex;

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Anything that can run a raw RESP command.
pub trait Execute {
    /// Sends one command and returns the parsed reply.
    ///
    /// Error replies from the server are returned as `Ok(RespValue::Error)`;
    /// `Err` is reserved for transport and framing failures.
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue>;
}

impl<T: Execute + ?Sized> Execute for &mut T {
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        (**self).exec(args)
    }
}

/// Factory and lifecycle hooks for pooled connections.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Opens a new connection bound to `index`.
    fn connect(&self, index: StoreIndex) -> ClientResult<Self::Connection>;

    /// Health check run before an idle connection is handed out.
    fn check(&self, conn: &mut Self::Connection) -> ClientResult<()>;

    /// Restores per-connection state before it goes back to the idle set.
    fn recycle(&self, _conn: &mut Self::Connection) -> ClientResult<()> {
        Ok(())
    }

    /// Closes a connection that is leaving the pool.
    fn close(&self, conn: Self::Connection) -> ClientResult<()> {
        drop(conn);
        Ok(())
    }
}

/// Network settings used when opening TCP connections.
#[derive(Debug, Clone)]
pub struct ConnectSettings {
    pub host: String,
    pub port: u16,
    /// Sent with `AUTH` after connecting when present.
    pub password: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
}

/// Opens RESP2 connections over TCP.
#[derive(Debug, Clone)]
pub struct RespConnector {
    settings: ConnectSettings,
}

impl RespConnector {
    pub fn new(settings: ConnectSettings) -> Self {
        RespConnector { settings }
    }

    pub fn settings(&self) -> &ConnectSettings {
        &self.settings
    }
}

impl Connector for RespConnector {
    type Connection = Connection;

    fn connect(&self, index: StoreIndex) -> ClientResult<Connection> {
        let mut conn = Connection::open(&self.settings, index)?;
        if let Some(password) = &self.settings.password {
            conn.exec(&[b"AUTH", password.as_bytes()])?.expect_status()?;
        }
        if index != StoreIndex::MIN {
            conn.select(index)?;
        }
        tracing::debug!(index = index.get(), host = %self.settings.host, port = self.settings.port, "opened connection");
        Ok(conn)
    }

    fn check(&self, conn: &mut Connection) -> ClientResult<()> {
        let reply = conn.exec(&[b"PING"])?.expect_status()?;
        if reply.eq_ignore_ascii_case(b"PONG") {
            Ok(())
        } else {
            Err(ClientError::UnexpectedResponse)
        }
    }

    fn recycle(&self, conn: &mut Connection) -> ClientResult<()> {
        if conn.selected != conn.home {
            let home = conn.home;
            conn.select(home)?;
        }
        Ok(())
    }

    fn close(&self, conn: Connection) -> ClientResult<()> {
        match conn.reader.get_ref().shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already went away; nothing left to close.
            Err(err) if err.kind() == std::io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    home: StoreIndex,
    selected: StoreIndex,
}

impl Connection {
    fn open(settings: &ConnectSettings, home: StoreIndex) -> ClientResult<Self> {
        let stream = connect_stream(settings)?;
        stream.set_read_timeout(settings.read_timeout)?;
        stream.set_write_timeout(settings.write_timeout)?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Connection {
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            home,
            selected: StoreIndex::MIN,
        })
    }

    /// Database this connection was opened for.
    pub fn home(&self) -> StoreIndex {
        self.home
    }

    /// Database currently selected on the server side.
    pub fn selected(&self) -> StoreIndex {
        self.selected
    }

    fn select(&mut self, index: StoreIndex) -> ClientResult<()> {
        let db = index.get().to_string();
        self.exec(&[b"SELECT", db.as_bytes()])?.expect_status()?;
        Ok(())
    }
}

impl Execute for Connection {
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream.write_all(&self.write_buf)?;
        stream.flush()?;

        let reply = read_response(&mut self.reader, &mut self.line_buf)?;
        if let (Some(cmd), Some(db), RespValue::Simple(_)) = (args.first(), args.get(1), &reply) {
            if cmd.eq_ignore_ascii_case(b"SELECT") {
                if let Some(index) = parse_index(db) {
                    self.selected = index;
                }
            }
        }
        Ok(reply)
    }
}

fn parse_index(data: &[u8]) -> Option<StoreIndex> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .and_then(StoreIndex::new)
}

fn connect_stream(settings: &ConnectSettings) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (settings.host.as_str(), settings.port)
        .to_socket_addrs()
        .map_err(|_| ClientError::InvalidAddress(format!("{}:{}", settings.host, settings.port)))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let attempt = match settings.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    Err(match last_err {
        Some(err) => ClientError::Io(err),
        None => ClientError::InvalidAddress(format!("{}:{}", settings.host, settings.port)),
    })
}
