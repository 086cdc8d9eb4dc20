//! Decodes the handful of server-pushed event frames the cluster
//! controller cares about (spec.md §4.9): topology changes, status
//! changes, and schema changes (the latter carried through only to be
//! ignored, per spec.md).

use crate::{
    error::{ErrorKind, Result},
    types::InetAddr,
};

#[derive(Debug, Clone)]
pub(crate) enum ServerEvent {
    TopologyChange(TopologyChangeKind, InetAddr),
    StatusChange(StatusChangeKind, InetAddr),
    SchemaChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TopologyChangeKind {
    NewNode,
    RemovedNode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusChangeKind {
    Up,
    Down,
}

fn read_string(body: &[u8], pos: &mut usize) -> Result<String> {
    let len = body
        .get(*pos..*pos + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
        .ok_or_else(|| ErrorKind::ParseError("truncated event string".into()))?;
    *pos += 2;
    let s = body
        .get(*pos..*pos + len)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .ok_or_else(|| ErrorKind::ParseError("truncated event string".into()))?;
    *pos += len;
    Ok(s)
}

fn read_inet(body: &[u8], pos: &mut usize) -> Result<InetAddr> {
    let addr_len = *body
        .get(*pos)
        .ok_or_else(|| ErrorKind::ParseError("truncated event inet".into()))? as usize;
    *pos += 1;
    let ip_bytes = body
        .get(*pos..*pos + addr_len)
        .ok_or_else(|| ErrorKind::ParseError("truncated event inet".into()))?;
    *pos += addr_len;
    let port = body
        .get(*pos..*pos + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| ErrorKind::ParseError("truncated event port".into()))?;
    *pos += 4;

    let ip: std::net::IpAddr = match ip_bytes.len() {
        4 => std::net::Ipv4Addr::new(ip_bytes[0], ip_bytes[1], ip_bytes[2], ip_bytes[3]).into(),
        16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(ip_bytes);
            std::net::Ipv6Addr::from(octets).into()
        }
        other => return Err(ErrorKind::ParseError(format!("invalid inet address length {other}")).into()),
    };
    Ok(InetAddr::new(std::net::SocketAddr::new(ip, port as u16)))
}

pub(crate) fn decode(body: &[u8]) -> Result<ServerEvent> {
    let mut pos = 0usize;
    let event_type = read_string(body, &mut pos)?;
    match event_type.as_str() {
        "TOPOLOGY_CHANGE" => {
            let change = read_string(body, &mut pos)?;
            let addr = read_inet(body, &mut pos)?;
            let kind = match change.as_str() {
                "NEW_NODE" => TopologyChangeKind::NewNode,
                "REMOVED_NODE" => TopologyChangeKind::RemovedNode,
                other => return Err(ErrorKind::ParseError(format!("unknown topology change {other}")).into()),
            };
            Ok(ServerEvent::TopologyChange(kind, addr))
        }
        "STATUS_CHANGE" => {
            let change = read_string(body, &mut pos)?;
            let addr = read_inet(body, &mut pos)?;
            let kind = match change.as_str() {
                "UP" => StatusChangeKind::Up,
                "DOWN" => StatusChangeKind::Down,
                other => return Err(ErrorKind::ParseError(format!("unknown status change {other}")).into()),
            };
            Ok(ServerEvent::StatusChange(kind, addr))
        }
        "SCHEMA_CHANGE" => Ok(ServerEvent::SchemaChange),
        other => Err(ErrorKind::ParseError(format!("unknown event type {other}")).into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encode_string(s: &str) -> Vec<u8> {
        let mut out = (s.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn encode_inet(addr: std::net::SocketAddr) -> Vec<u8> {
        let mut out = Vec::new();
        match addr.ip() {
            std::net::IpAddr::V4(v4) => {
                out.push(4);
                out.extend_from_slice(&v4.octets());
            }
            std::net::IpAddr::V6(v6) => {
                out.push(16);
                out.extend_from_slice(&v6.octets());
            }
        }
        out.extend_from_slice(&(addr.port() as u32).to_be_bytes());
        out
    }

    #[test]
    fn decodes_status_change_down() {
        let addr: std::net::SocketAddr = "10.0.0.7:9042".parse().unwrap();
        let mut body = encode_string("STATUS_CHANGE");
        body.extend(encode_string("DOWN"));
        body.extend(encode_inet(addr));

        match decode(&body).unwrap() {
            ServerEvent::StatusChange(StatusChangeKind::Down, got) => {
                assert_eq!(got.socket_addr(), addr);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decodes_topology_change_new_node() {
        let addr: std::net::SocketAddr = "10.0.0.9:9042".parse().unwrap();
        let mut body = encode_string("TOPOLOGY_CHANGE");
        body.extend(encode_string("NEW_NODE"));
        body.extend(encode_inet(addr));

        match decode(&body).unwrap() {
            ServerEvent::TopologyChange(TopologyChangeKind::NewNode, got) => {
                assert_eq!(got.socket_addr(), addr);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn schema_change_decodes_but_carries_no_data() {
        let body = encode_string("SCHEMA_CHANGE");
        assert!(matches!(decode(&body).unwrap(), ServerEvent::SchemaChange));
    }
}
