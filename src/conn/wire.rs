//! CQL native protocol framing: the 9-byte header described in spec.md §6,
//! and the opcodes the control connection and dispatcher need. Full CQL
//! *value* serialization remains out of scope (spec.md §1); this module
//! only packs/unpacks the envelope and the handful of request/response
//! shapes the core subsystems drive directly (STARTUP, OPTIONS, REGISTER,
//! QUERY, PREPARE, EXECUTE and their responses).

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::{
    error::{Error, ErrorKind, Result, ServerErrorKind},
    types::{Consistency, ProtocolVersion},
};

pub(crate) const HEADER_LEN: usize = 9;

/// Stream id reserved for server-initiated event frames.
pub(crate) const EVENT_STREAM_ID: i16 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Opcode {
    Error = 0x00,
    Startup = 0x01,
    Ready = 0x02,
    Authenticate = 0x03,
    Options = 0x05,
    Supported = 0x06,
    Query = 0x07,
    Result = 0x08,
    Prepare = 0x09,
    Execute = 0x0A,
    Register = 0x0B,
    Event = 0x0C,
    Batch = 0x0D,
    AuthChallenge = 0x0E,
    AuthResponse = 0x0F,
    AuthSuccess = 0x10,
}

impl Opcode {
    pub(crate) fn from_u8(b: u8) -> Result<Self> {
        use Opcode::*;
        Ok(match b {
            0x00 => Error,
            0x01 => Startup,
            0x02 => Ready,
            0x03 => Authenticate,
            0x05 => Options,
            0x06 => Supported,
            0x07 => Query,
            0x08 => Result,
            0x09 => Prepare,
            0x0A => Execute,
            0x0B => Register,
            0x0C => Event,
            0x0D => Batch,
            0x0E => AuthChallenge,
            0x0F => AuthResponse,
            0x10 => AuthSuccess,
            other => return Err(ErrorKind::ParseError(format!("unknown opcode 0x{other:02x}")).into()),
        })
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub(crate) struct FrameFlags: u8 {
        const COMPRESSION = 0x01;
        const TRACING     = 0x02;
    }
}

/// A fully-framed request or response: 9-byte header plus body.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub(crate) version: u8,
    pub(crate) flags: FrameFlags,
    pub(crate) stream: i16,
    pub(crate) opcode: Opcode,
    pub(crate) body: Vec<u8>,
}

impl Frame {
    pub(crate) fn request(
        version: ProtocolVersion,
        flags: FrameFlags,
        stream: i16,
        opcode: Opcode,
        body: Vec<u8>,
    ) -> Self {
        Self {
            version: version.as_u8(),
            flags,
            stream,
            opcode,
            body,
        }
    }

    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.body.len());
        out.push(self.version);
        out.push(self.flags.bits());
        out.extend_from_slice(&self.stream.to_be_bytes());
        out.push(self.opcode as u8);
        out.extend_from_slice(&(self.body.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.body);
        out
    }

    /// Read one frame from `stream`: 9 bytes of header, then `body_len`
    /// more bytes, matching the reader task's loop in spec.md §4.1.
    pub(crate) async fn read_from<R: tokio::io::AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await?;

        let version = header[0];
        let flags = FrameFlags::from_bits_truncate(header[1]);
        let stream = i16::from_be_bytes([header[2], header[3]]);
        let opcode = Opcode::from_u8(header[4])?;
        let body_len = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;

        let mut body = vec![0u8; body_len];
        reader.read_exact(&mut body).await?;

        Ok(Self {
            version,
            flags,
            stream,
            opcode,
            body,
        })
    }

    pub(crate) async fn write_to<W: tokio::io::AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Server-pushed event frame (stream id -1). Parsing the full CQL event
/// body is a value-codec concern outside this crate's scope; the frame is
/// handed to subscribers opaque and the control connection decodes the
/// handful of fields (topology/status/schema change type and address) it
/// needs directly from the raw body.
#[derive(Debug, Clone)]
pub(crate) struct EventFrame {
    pub(crate) body: Vec<u8>,
}

impl From<Frame> for EventFrame {
    fn from(f: Frame) -> Self {
        Self { body: f.body }
    }
}

/// Decodes the 4-byte CQL error code out of an ERROR frame's body into a
/// [`ServerErrorKind`], without consuming the frame. Returns `None` for a
/// non-ERROR frame. Used by callers that must classify a server error
/// while still holding onto the original frame, so it can be handed back
/// to the caller as a `Response` rather than raised as an exception
/// (spec.md §4.10 steps 6-7 / §7 / §8).
///
/// Error codes are the CQL native protocol's fixed taxonomy; unrecognised
/// codes fall back to `ServerError` rather than failing to parse, since a
/// future server version adding a new code should not break this client's
/// ability to surface *some* error kind.
pub(crate) fn classify_error(frame: &Frame) -> Result<Option<ServerErrorKind>> {
    if frame.opcode != Opcode::Error {
        return Ok(None);
    }
    let code = frame
        .body
        .get(0..4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ErrorKind::ParseError("truncated ERROR frame".to_string()))?;
    Ok(Some(match code {
        0x0000 => ServerErrorKind::ServerError,
        0x000A => ServerErrorKind::ProtocolError,
        0x0100 => ServerErrorKind::AuthenticationError,
        0x1000 => ServerErrorKind::Unavailable,
        0x1001 => ServerErrorKind::Overloaded,
        0x1002 => ServerErrorKind::IsBootstrapping,
        0x1003 => ServerErrorKind::TruncateError,
        0x1100 => ServerErrorKind::WriteTimeout,
        0x1200 => ServerErrorKind::ReadTimeout,
        0x1300 => ServerErrorKind::ReadFailure,
        0x1400 => ServerErrorKind::FunctionFailure,
        0x1500 => ServerErrorKind::WriteFailure,
        0x2000 => ServerErrorKind::SyntaxError,
        0x2100 => ServerErrorKind::Unauthorized,
        0x2200 => ServerErrorKind::Invalid,
        0x2300 => ServerErrorKind::ConfigError,
        0x2400 => ServerErrorKind::AlreadyExists,
        0x2500 => ServerErrorKind::Unprepared,
        _ => ServerErrorKind::ServerError,
    }))
}

/// Maps a RESULT-opcode-or-ERROR response frame to `Err` iff it is an
/// ERROR frame. A non-ERROR frame passes through unchanged, so callers can
/// write `server_error(frame?).map(...)`. Used by call sites (bootstrap
/// queries) that want a server error to fail outright rather than be
/// handed back as a response; the request dispatcher uses
/// [`classify_error`] instead so it can preserve the frame.
pub(crate) fn server_error(frame: Frame) -> Result<Frame> {
    match classify_error(&frame)? {
        Some(kind) => Err(ErrorKind::Server(kind).into()),
        None => Ok(frame),
    }
}

/// Encodes a QUERY body for a parameterless CQL string: `[long string]
/// query`, `[short] consistency`, `[byte] flags` (no bound values, no
/// paging). Shared by the cluster controller's bootstrap queries
/// (`system.local`/`system.peers`) and the handshake's `USE` statement.
pub(crate) fn encode_query(query: &str, consistency: Consistency) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + query.len() + 3);
    body.extend_from_slice(&(query.len() as u32).to_be_bytes());
    body.extend_from_slice(query.as_bytes());
    body.extend_from_slice(&(consistency as u16).to_be_bytes());
    body.push(0x00);
    body
}

pub(crate) fn map_io_err(addr_display: impl std::fmt::Display, e: Error) -> Error {
    match e.kind() {
        ErrorKind::Io(_) => ErrorKind::ParseError(format!("io error talking to {addr_display}")).into(),
        _ => e,
    }
}

/// Monotonically increasing counter used when a caller needs a value
/// distinguishable from the stream id space (e.g. connection ids).
pub(crate) struct IdGenerator(AtomicU32);

impl IdGenerator {
    pub(crate) const fn new() -> Self {
        Self(AtomicU32::new(1))
    }

    pub(crate) fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn error_frame(code: u32) -> Frame {
        let mut body = code.to_be_bytes().to_vec();
        body.extend_from_slice(&0u16.to_be_bytes()); // empty message
        Frame {
            version: ProtocolVersion::V4.as_u8(),
            flags: FrameFlags::empty(),
            stream: 0,
            opcode: Opcode::Error,
            body,
        }
    }

    #[test]
    fn non_error_frame_passes_through() {
        let frame = Frame::request(ProtocolVersion::V4, FrameFlags::empty(), 0, Opcode::Result, vec![]);
        assert!(server_error(frame).is_ok());
    }

    #[test]
    fn unprepared_code_maps_to_unprepared_kind() {
        let err = server_error(error_frame(0x2500)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Server(ServerErrorKind::Unprepared)));
    }

    #[test]
    fn unavailable_code_maps_to_unavailable_kind() {
        let err = server_error(error_frame(0x1000)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Server(ServerErrorKind::Unavailable)));
    }

    #[test]
    fn unknown_code_falls_back_to_server_error() {
        let err = server_error(error_frame(0xBEEF)).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Server(ServerErrorKind::ServerError)));
    }
}
