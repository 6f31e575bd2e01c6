//! Frontend/backend message framing for the PostgreSQL simple-query protocol (v3).
//!
//! Only the subset of the wire protocol needed to authenticate and run simple
//! queries is implemented here — no extended protocol (Parse/Bind/Execute),
//! no COPY, no LISTEN/NOTIFY payload decoding beyond what `recv` needs to skip.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use super::Stream;

/// A decoded backend message, still holding its raw body for type-specific parsing.
pub(super) struct Backend {
    pub(super) tag: u8,
    pub(super) body: Vec<u8>,
}

/// Writes a startup packet: a 4-byte length, the protocol version (3.0), and
/// null-terminated key/value parameter pairs, terminated by an empty key.
pub(super) fn write_startup(stream: &mut Stream, params: &[(&str, &str)]) -> io::Result<()> {
    let mut body = Vec::new();
    body.extend_from_slice(&196608u32.to_be_bytes()); // protocol version 3.0
    for (k, v) in params {
        body.extend_from_slice(k.as_bytes());
        body.push(0);
        body.extend_from_slice(v.as_bytes());
        body.push(0);
    }
    body.push(0);
    let len = (body.len() + 4) as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(&body)?;
    stream.flush()
}

/// Writes a tagged frontend message: `tag, length(i32 be), body`.
pub(super) fn write_tagged(stream: &mut Stream, tag: u8, body: &[u8]) -> io::Result<()> {
    let len = (body.len() + 4) as u32;
    stream.write_all(&[tag])?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

/// Writes a simple-query message (`Q`).
pub(super) fn write_query(stream: &mut Stream, sql: &str) -> io::Result<()> {
    let mut body = Vec::with_capacity(sql.len() + 1);
    body.extend_from_slice(sql.as_bytes());
    body.push(0);
    write_tagged(stream, b'Q', &body)
}

/// Writes a password/SASL response message (`p`).
pub(super) fn write_password(stream: &mut Stream, payload: &[u8]) -> io::Result<()> {
    write_tagged(stream, b'p', payload)
}

/// Reads one tagged backend message.
pub(super) fn read_backend(stream: &mut Stream) -> io::Result<Backend> {
    let mut tag_buf = [0u8; 1];
    stream.read_exact(&mut tag_buf)?;
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len < 4 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "short message length"));
    }
    let mut body = vec![0u8; len - 4];
    stream.read_exact(&mut body)?;
    Ok(Backend { tag: tag_buf[0], body })
}

/// Parsed contents of an `ErrorResponse`/`NoticeResponse` body: a set of
/// identified fields (severity, SQLSTATE, message, ...) keyed by their
/// single-byte field type.
pub(super) fn parse_fields(body: &[u8]) -> HashMap<u8, String> {
    let mut fields = HashMap::new();
    let mut i = 0;
    while i < body.len() && body[i] != 0 {
        let field_type = body[i];
        i += 1;
        let start = i;
        while i < body.len() && body[i] != 0 {
            i += 1;
        }
        let value = String::from_utf8_lossy(&body[start..i]).into_owned();
        fields.insert(field_type, value);
        i += 1; // skip the NUL terminator
    }
    fields
}

/// A single column descriptor from a `RowDescription` (`T`) message.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    pub name: String,
    pub table_oid: u32,
    pub column_id: i16,
    pub type_oid: u32,
    pub type_size: i16,
    pub type_modifier: i32,
    pub format: i16,
}

pub(super) fn parse_row_description(body: &[u8]) -> io::Result<Vec<FieldDescription>> {
    let mut cursor = Cursor::new(body);
    let count = cursor.read_i16()?;
    let mut fields = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let name = cursor.read_cstr()?;
        let table_oid = cursor.read_u32()?;
        let column_id = cursor.read_i16()?;
        let type_oid = cursor.read_u32()?;
        let type_size = cursor.read_i16()?;
        let type_modifier = cursor.read_i32()?;
        let format = cursor.read_i16()?;
        fields.push(FieldDescription {
            name,
            table_oid,
            column_id,
            type_oid,
            type_size,
            type_modifier,
            format,
        });
    }
    Ok(fields)
}

/// One row's worth of raw field values: `None` for SQL NULL, otherwise the raw
/// (text-format) bytes as sent by the server.
pub(super) fn parse_data_row(body: &[u8]) -> io::Result<Vec<Option<Vec<u8>>>> {
    let mut cursor = Cursor::new(body);
    let count = cursor.read_i16()?;
    let mut values = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        let len = cursor.read_i32()?;
        if len < 0 {
            values.push(None);
        } else {
            values.push(Some(cursor.read_n(len as usize)?));
        }
    }
    Ok(values)
}

/// A tiny big-endian cursor over a message body — avoids pulling in `bytes`
/// for the handful of fixed-width reads the protocol needs.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_n(&mut self, n: usize) -> io::Result<Vec<u8>> {
        if self.pos + n > self.buf.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated message"));
        }
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    fn read_i16(&mut self) -> io::Result<i16> {
        let b = self.read_n(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    fn read_i32(&mut self) -> io::Result<i32> {
        let b = self.read_n(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u32(&mut self) -> io::Result<u32> {
        Ok(self.read_i32()? as u32)
    }

    fn read_cstr(&mut self) -> io::Result<String> {
        let start = self.pos;
        while self.pos < self.buf.len() && self.buf[self.pos] != 0 {
            self.pos += 1;
        }
        if self.pos >= self.buf.len() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "unterminated string"));
        }
        let s = String::from_utf8_lossy(&self.buf[start..self.pos]).into_owned();
        self.pos += 1;
        Ok(s)
    }
}
