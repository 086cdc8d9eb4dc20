//! Core data-model types shared across the crate: [`InetAddr`], [`Host`],
//! [`ProtocolVersion`] and [`Consistency`].

use std::{
    fmt,
    hash::{Hash, Hasher},
    net::SocketAddr,
};

/// An immutable value wrapping a socket address. Hashable, `Copy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub struct InetAddr(SocketAddr);

impl InetAddr {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for InetAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

/// A known cluster member. Equality and ordering are by address alone, per
/// the data model: a host's datacenter/rack metadata can be refreshed
/// in-place without the host "becoming a different host" for the purposes of
/// a `HashSet`/`BTreeMap` key.
#[derive(Debug, Clone)]
pub struct Host {
    pub addr: InetAddr,
    pub datacenter: String,
    pub rack: String,
}

impl Host {
    pub fn new(addr: InetAddr, datacenter: impl Into<String>, rack: impl Into<String>) -> Self {
        Self {
            addr,
            datacenter: datacenter.into(),
            rack: rack.into(),
        }
    }
}

impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.addr == other.addr
    }
}

impl Eq for Host {}

impl Hash for Host {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr.hash(state)
    }
}

impl PartialOrd for Host {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Host {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.addr.socket_addr().cmp(&other.addr.socket_addr())
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{})", self.addr, self.datacenter, self.rack)
    }
}

/// Negotiated CQL native protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V3,
    V4,
}

impl ProtocolVersion {
    pub fn as_u8(self) -> u8 {
        match self {
            ProtocolVersion::V3 => 0x03,
            ProtocolVersion::V4 => 0x04,
        }
    }

    /// The protocol ceiling for stream ids: v3 bounds the stream-id space to
    /// a signed byte's positive half (the original implementation used a
    /// single byte per stream id on the wire for v3), v4 widens it to the
    /// full positive range of a signed 16-bit integer. This resolves the
    /// open question in spec.md §9: `maxStreams` is validated against the
    /// negotiated version rather than silently truncated.
    pub fn max_stream_ceiling(self) -> u16 {
        match self {
            ProtocolVersion::V3 => 128,
            ProtocolVersion::V4 => 32768,
        }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V3 => write!(f, "3.0.0"),
            ProtocolVersion::V4 => write!(f, "4.0.0"),
        }
    }
}

/// A membership or reachability change, emitted by the cluster controller
/// and consumed by the load-balancing policy and the public topology event
/// stream.
#[derive(Debug, Clone)]
pub enum HostEvent {
    New(Host),
    Gone(InetAddr),
    Up(InetAddr),
    Down(InetAddr),
}

/// CQL consistency level, as carried on the wire in Query/Execute/Batch
/// frames. Only the subset the retry engine needs to rewrite is modeled;
/// the numeric values match the native protocol encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Consistency {
    Any = 0x0000,
    One = 0x0001,
    Two = 0x0002,
    Three = 0x0003,
    Quorum = 0x0004,
    All = 0x0005,
    LocalQuorum = 0x0006,
    EachQuorum = 0x0007,
    Serial = 0x0008,
    LocalSerial = 0x0009,
    LocalOne = 0x000A,
}
