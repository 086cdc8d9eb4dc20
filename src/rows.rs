//! A minimal RESULT/Rows decoder, scoped to exactly the two controller
//! queries spec.md §6 names (`system.local`, `system.peers`): text and
//! inet-typed columns only. General CQL value typing remains out of scope
//! (§1) — this is the narrow slice the cluster controller needs to read
//! its own bootstrap queries without depending on a full value codec.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::{
    conn::wire::{Frame, Opcode},
    error::{ErrorKind, Result},
    types::InetAddr,
};

const RESULT_KIND_ROWS: u32 = 0x0002;
const GLOBAL_TABLES_SPEC: u32 = 0x0001;

/// One decoded row: an ordered list of nullable raw column values, in the
/// order the column specs described them.
pub(crate) type Row = Vec<Option<Vec<u8>>>;

struct Cursor<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(body: &'a [u8]) -> Self {
        Self { body, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(|| ErrorKind::ParseError("rows cursor overflow".into()))?;
        let slice = self.body.get(self.pos..end).ok_or_else(|| ErrorKind::ParseError("truncated rows body".into()))?;
        self.pos = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    /// `[bytes]`: a 4-byte signed length, `-1` meaning null.
    fn bytes_opt(&mut self) -> Result<Option<Vec<u8>>> {
        let len = self.i32()?;
        if len < 0 {
            return Ok(None);
        }
        Ok(Some(self.take(len as usize)?.to_vec()))
    }
}

/// Column type ids this decoder needs to skip over in the metadata
/// section. Only the scalar ids (no extra payload beyond the id itself)
/// appear in `system.local`/`system.peers`; anything else is rejected
/// rather than mis-parsed, since silently misreading a collection/UDT type
/// id would desynchronize the rest of the column walk.
fn skip_option(cursor: &mut Cursor) -> Result<()> {
    let id = cursor.u16()?;
    match id {
        0x000D /* varchar */ | 0x000A /* text */ | 0x0010 /* inet */ | 0x0009 /* int */ => Ok(()),
        other => Err(ErrorKind::ParseError(format!("unsupported column type 0x{other:04x} in controller query result")).into()),
    }
}

/// Decodes a RESULT frame's Rows body into a flat list of rows, each a
/// list of raw (possibly null) column values in column-spec order.
pub(crate) fn decode_rows(frame: &Frame) -> Result<Vec<Row>> {
    let frame = crate::conn::wire::server_error(frame.clone())?;
    if frame.opcode != Opcode::Result {
        return Err(ErrorKind::ParseError("unexpected reply to controller query".into()).into());
    }

    let mut cursor = Cursor::new(&frame.body);
    let kind = cursor.u32()?;
    if kind != RESULT_KIND_ROWS {
        return Err(ErrorKind::ParseError(format!("expected Rows result, got kind 0x{kind:04x}")).into());
    }

    let flags = cursor.u32()?;
    let columns_count = cursor.u32()? as usize;
    let global_spec = flags & GLOBAL_TABLES_SPEC != 0;

    if global_spec {
        let _keyspace = cursor.string()?;
        let _table = cursor.string()?;
    }
    for _ in 0..columns_count {
        if !global_spec {
            let _keyspace = cursor.string()?;
            let _table = cursor.string()?;
        }
        let _name = cursor.string()?;
        skip_option(&mut cursor)?;
    }

    let rows_count = cursor.u32()? as usize;
    let mut rows = Vec::with_capacity(rows_count);
    for _ in 0..rows_count {
        let mut row = Vec::with_capacity(columns_count);
        for _ in 0..columns_count {
            row.push(cursor.bytes_opt()?);
        }
        rows.push(row);
    }
    Ok(rows)
}

pub(crate) fn column_as_string(value: &Option<Vec<u8>>) -> Result<String> {
    value
        .as_ref()
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| ErrorKind::ParseError("unexpected null column in controller query result".into()).into())
}

/// Decodes an `inet` column (raw 4- or 16-byte address, no port) paired
/// with `port` to produce a full [`InetAddr`].
pub(crate) fn column_as_inet(value: &Option<Vec<u8>>, port: u16) -> Result<InetAddr> {
    let bytes = value.as_ref().ok_or_else(|| -> crate::error::Error { ErrorKind::ParseError("unexpected null inet column".into()).into() })?;
    let ip: IpAddr = match bytes.len() {
        4 => Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]).into(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Ipv6Addr::from(octets).into()
        }
        other => return Err(ErrorKind::ParseError(format!("invalid inet column length {other}")).into()),
    };
    Ok(InetAddr::new(SocketAddr::new(ip, port)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::conn::wire::FrameFlags;
    use crate::types::ProtocolVersion;

    fn encode_string(s: &str) -> Vec<u8> {
        let mut out = (s.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn encode_bytes(b: &[u8]) -> Vec<u8> {
        let mut out = (b.len() as i32).to_be_bytes().to_vec();
        out.extend_from_slice(b);
        out
    }

    /// Builds a single-row Rows result with two varchar columns
    /// (data_center, rack), the shape `system.local`'s query returns.
    fn local_style_result(dc: &str, rack: &str) -> Frame {
        let mut body = RESULT_KIND_ROWS.to_be_bytes().to_vec();
        body.extend_from_slice(&GLOBAL_TABLES_SPEC.to_be_bytes());
        body.extend_from_slice(&2u32.to_be_bytes()); // columns_count
        body.extend_from_slice(&encode_string("system")); // keyspace
        body.extend_from_slice(&encode_string("local")); // table
        body.extend_from_slice(&encode_string("data_center"));
        body.extend_from_slice(&0x000Du16.to_be_bytes());
        body.extend_from_slice(&encode_string("rack"));
        body.extend_from_slice(&0x000Du16.to_be_bytes());
        body.extend_from_slice(&1u32.to_be_bytes()); // rows_count
        body.extend_from_slice(&encode_bytes(dc.as_bytes()));
        body.extend_from_slice(&encode_bytes(rack.as_bytes()));

        Frame::request(ProtocolVersion::V4, FrameFlags::empty(), 0, Opcode::Result, body)
    }

    #[test]
    fn decodes_a_single_row_of_text_columns() {
        let frame = local_style_result("dc1", "r1");
        let rows = decode_rows(&frame).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(column_as_string(&rows[0][0]).unwrap(), "dc1");
        assert_eq!(column_as_string(&rows[0][1]).unwrap(), "r1");
    }

    #[test]
    fn decodes_inet_columns_with_an_external_port() {
        let value = Some(vec![10, 0, 0, 7]);
        let addr = column_as_inet(&value, 9042).unwrap();
        assert_eq!(addr.socket_addr(), "10.0.0.7:9042".parse().unwrap());
    }

    #[test]
    fn null_column_is_an_error_when_a_string_is_required() {
        assert!(column_as_string(&None).is_err());
    }
}
