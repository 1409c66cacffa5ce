//! Membership events as delivered by the gossip layer.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// What happened to the members carried by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Join,
    /// Graceful departure.
    Leave,
    /// Failure detector declared the member dead.
    Failed,
    /// A failed or departed member was purged from gossip state.
    Reaped,
}

impl EventKind {
    /// Whether members carried by this event should leave the ring.
    pub fn is_departure(self) -> bool {
        !matches!(self, EventKind::Join)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Join => "member-join",
            EventKind::Leave => "member-leave",
            EventKind::Failed => "member-failed",
            EventKind::Reaped => "member-reap",
        };
        f.write_str(s)
    }
}

/// One peer as the gossip layer describes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipMember {
    /// Unique node name within the gossip cluster.
    pub name: String,
    /// Address the peer gossips from.
    pub addr: IpAddr,
    pub tags: HashMap<String, String>,
}

impl GossipMember {
    pub fn new(name: impl Into<String>, addr: IpAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            tags: HashMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// `ip:port` this peer serves requests on.
    pub fn service_address(&self, service_port: u16) -> String {
        SocketAddr::new(self.addr, service_port).to_string()
    }
}

/// A batch of members that changed state together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEvent {
    pub kind: EventKind,
    pub members: Vec<GossipMember>,
}

impl MemberEvent {
    pub fn new(kind: EventKind, members: Vec<GossipMember>) -> Self {
        Self { kind, members }
    }

    pub fn single(kind: EventKind, member: GossipMember) -> Self {
        Self::new(kind, vec![member])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_service_address() {
        let v4 = GossipMember::new("a", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(v4.service_address(3478), "10.0.0.1:3478");
        let v6 = GossipMember::new("b", IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(v6.service_address(3478), "[::1]:3478");
    }

    #[test]
    fn test_departures() {
        assert!(!EventKind::Join.is_departure());
        assert!(EventKind::Leave.is_departure());
        assert!(EventKind::Failed.is_departure());
        assert!(EventKind::Reaped.is_departure());
    }
}
