//! CQL frame body compression: the two algorithms the CQL native protocol
//! negotiates (`snappy`, `lz4`), each gated behind its own Cargo feature
//! so an unused codec and its dependency compile out entirely.

use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    #[cfg(feature = "snappy-compression")]
    Snappy,
    #[cfg(feature = "lz4-compression")]
    Lz4,
}

impl Compression {
    pub fn name(self) -> &'static str {
        match self {
            #[cfg(feature = "snappy-compression")]
            Compression::Snappy => "snappy",
            #[cfg(feature = "lz4-compression")]
            Compression::Lz4 => "lz4",
        }
    }

    pub(crate) fn compress(self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            #[cfg(feature = "snappy-compression")]
            Compression::Snappy => Ok(snap::raw::Encoder::new()
                .compress_vec(body)
                .map_err(|e| ErrorKind::InternalError(e.to_string()))?),
            #[cfg(feature = "lz4-compression")]
            Compression::Lz4 => {
                // CQL's lz4 framing prefixes the compressed payload with the
                // big-endian uncompressed length, unlike lz4_flex's default
                // varint-prefixed block format.
                let compressed = lz4_flex::compress(body);
                let mut out = Vec::with_capacity(4 + compressed.len());
                out.extend_from_slice(&(body.len() as u32).to_be_bytes());
                out.extend_from_slice(&compressed);
                Ok(out)
            }
        }
    }

    pub(crate) fn decompress(self, body: &[u8]) -> Result<Vec<u8>> {
        match self {
            #[cfg(feature = "snappy-compression")]
            Compression::Snappy => Ok(snap::raw::Decoder::new()
                .decompress_vec(body)
                .map_err(|e| ErrorKind::ParseError(e.to_string()))?),
            #[cfg(feature = "lz4-compression")]
            Compression::Lz4 => {
                if body.len() < 4 {
                    return Err(ErrorKind::ParseError("truncated lz4 frame".into()).into());
                }
                let uncompressed_len =
                    u32::from_be_bytes([body[0], body[1], body[2], body[3]]) as usize;
                lz4_flex::decompress(&body[4..], uncompressed_len)
                    .map_err(|e| ErrorKind::ParseError(e.to_string()).into())
            }
        }
    }
}

#[cfg(all(test, feature = "snappy-compression"))]
mod test {
    use super::*;

    #[test]
    fn snappy_round_trips() {
        let body = b"SELECT * FROM system.local".repeat(4);
        let compressed = Compression::Snappy.compress(&body).unwrap();
        let decompressed = Compression::Snappy.decompress(&compressed).unwrap();
        assert_eq!(decompressed, body);
    }
}
