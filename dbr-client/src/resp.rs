//! # RESP2 Encoding and Parsing
//!
//! Purpose: Frame commands for a Redis-compatible server and parse its
//! replies. Only the client half of the protocol is implemented.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Typed Extraction**: `RespValue` helpers turn replies into the shapes
//!    command wrappers expect, mapping `-ERR` replies to `ClientError::Server`.

use std::io::BufRead;

use crate::error::{ClientError, ClientResult};

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays, with an empty vector for null arrays.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Converts an error reply into `ClientError::Server`.
    pub fn into_result(self) -> ClientResult<RespValue> {
        match self {
            RespValue::Error(message) => Err(ClientError::Server { message }),
            other => Ok(other),
        }
    }

    /// Expects a simple-string status reply such as `+OK`.
    pub fn expect_status(self) -> ClientResult<Vec<u8>> {
        match self.into_result()? {
            RespValue::Simple(text) => Ok(text),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expects an integer reply.
    pub fn expect_integer(self) -> ClientResult<i64> {
        match self.into_result()? {
            RespValue::Integer(value) => Ok(value),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Expects a bulk reply, where null maps to `None`.
    pub fn expect_bulk(self) -> ClientResult<Option<Vec<u8>>> {
        match self.into_result()? {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    push_header(out, b'*', args.len());
    for arg in args {
        push_header(out, b'$', arg.len());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Largest bulk payload accepted, matching the server's own 512 MiB cap.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Deepest array nesting accepted before the reply is treated as malformed.
const MAX_DEPTH: usize = 32;

/// Upper bound on capacity reserved up front for an array reply.
const ARRAY_PREALLOC: usize = 64;

/// Reads one RESP value from the buffered reader.
///
/// Length headers are validated before anything is allocated: negative
/// lengths other than `-1`, bulk strings over `MAX_BULK_LEN` and arrays
/// nested deeper than `MAX_DEPTH` fail with `ClientError::Protocol`.
pub fn read_response<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>) -> ClientResult<RespValue> {
    read_value(reader, line_buf, 0)
}

fn read_value<R: BufRead>(reader: &mut R, line_buf: &mut Vec<u8>, depth: usize) -> ClientResult<RespValue> {
    read_line(reader, line_buf)?;
    let (&prefix, rest) = line_buf.split_first().ok_or(ClientError::Protocol)?;

    match prefix {
        b'+' => Ok(RespValue::Simple(rest.to_vec())),
        b'-' => Ok(RespValue::Error(rest.to_vec())),
        b':' => Ok(RespValue::Integer(parse_i64(rest)?)),
        b'$' => {
            let len = parse_i64(rest)?;
            read_bulk(reader, len)
        }
        b'*' => {
            let len = parse_i64(rest)?;
            if len == -1 {
                return Ok(RespValue::Array(Vec::new()));
            }
            if len < -1 || depth >= MAX_DEPTH {
                return Err(ClientError::Protocol);
            }
            let len = usize::try_from(len).map_err(|_| ClientError::Protocol)?;
            let mut items = Vec::with_capacity(len.min(ARRAY_PREALLOC));
            for _ in 0..len {
                items.push(read_value(reader, line_buf, depth + 1)?);
            }
            Ok(RespValue::Array(items))
        }
        _ => Err(ClientError::Protocol),
    }
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> ClientResult<RespValue> {
    if len == -1 {
        return Ok(RespValue::Bulk(None));
    }
    if !(0..=MAX_BULK_LEN).contains(&len) {
        return Err(ClientError::Protocol);
    }
    let len = len as usize;
    // Payload plus trailing CRLF in one read.
    let mut data = vec![0u8; len + 2];
    reader.read_exact(&mut data)?;
    if !data.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    data.truncate(len);
    Ok(RespValue::Bulk(Some(data)))
}

fn read_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> ClientResult<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(ClientError::Protocol);
    }
    if !buf.ends_with(b"\r\n") {
        return Err(ClientError::Protocol);
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> ClientResult<i64> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or(ClientError::Protocol)
}

fn push_header(out: &mut Vec<u8>, prefix: u8, len: usize) {
    out.push(prefix);
    out.extend_from_slice(len.to_string().as_bytes());
    out.extend_from_slice(b"\r\n");
}
