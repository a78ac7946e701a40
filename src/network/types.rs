// network/types.rs - Shared network-layer types
use std::fmt;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;

/// IP version selection. `Both` is the default when the user asks for
/// neither or both of `--inet`/`--inet6`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
    Both,
}

impl IpVersion {
    /// Whether a packet of the given version passes this selection.
    pub fn accepts(self, other: IpVersion) -> bool {
        matches!(
            (self, other),
            (IpVersion::Both, _) | (IpVersion::V4, IpVersion::V4) | (IpVersion::V6, IpVersion::V6)
        )
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpVersion::V4 => write!(f, "IPv4"),
            IpVersion::V6 => write!(f, "IPv6"),
            IpVersion::Both => write!(f, "IPv4/IPv6"),
        }
    }
}

/// Transport protocol carried by a parsed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    Tcp,
    Udp,
    Other,
}

impl Transport {
    pub fn from_protocol(protocol: u8) -> Self {
        match protocol {
            IPPROTO_TCP => Transport::Tcp,
            IPPROTO_UDP => Transport::Udp,
            _ => Transport::Other,
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => write!(f, "TCP"),
            Transport::Udp => write!(f, "UDP"),
            Transport::Other => write!(f, "-"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_accepts() {
        assert!(IpVersion::Both.accepts(IpVersion::V4));
        assert!(IpVersion::Both.accepts(IpVersion::V6));
        assert!(IpVersion::V4.accepts(IpVersion::V4));
        assert!(!IpVersion::V4.accepts(IpVersion::V6));
        assert!(!IpVersion::V6.accepts(IpVersion::V4));
    }

    #[test]
    fn test_transport_from_protocol() {
        assert_eq!(Transport::from_protocol(6), Transport::Tcp);
        assert_eq!(Transport::from_protocol(17), Transport::Udp);
        assert_eq!(Transport::from_protocol(1), Transport::Other);
        assert_eq!(Transport::from_protocol(58), Transport::Other);
    }
}
