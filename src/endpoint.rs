use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

/// A peer's data endpoint as the swarm sees it. The host is always the
/// address observed by whoever recorded the endpoint, never self-reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerEndpoint {
    pub host: IpAddr,
    pub data_port: u16,
}

impl PeerEndpoint {
    pub fn new(host: IpAddr, data_port: u16) -> Self {
        Self { host, data_port }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.data_port)
    }
}

impl From<SocketAddr> for PeerEndpoint {
    fn from(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip(),
            data_port: addr.port(),
        }
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.data_port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackerEndpoint {
    pub host: String,
    pub port: u16,
}

impl TrackerEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for TrackerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for TrackerEndpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("expected host:port, got {s:?}"))?;

        if host.is_empty() {
            return Err(format!("expected host:port, got {s:?}"));
        }

        let port = port.parse::<u16>().map_err(|e| format!("bad port: {e}"))?;

        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::{PeerEndpoint, TrackerEndpoint};
    use std::net::SocketAddr;

    #[test]
    fn peer_endpoint_equality_is_by_both_fields() {
        let a = PeerEndpoint::new("10.0.0.1".parse().unwrap(), 4000);
        let b = PeerEndpoint::new("10.0.0.1".parse().unwrap(), 4000);
        let c = PeerEndpoint::new("10.0.0.1".parse().unwrap(), 4001);
        let d = PeerEndpoint::new("10.0.0.2".parse().unwrap(), 4000);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn peer_endpoint_from_socket_addr() {
        let addr: SocketAddr = "192.168.1.7:6199".parse().unwrap();
        let ep = PeerEndpoint::from(addr);

        assert_eq!(addr.ip(), ep.host);
        assert_eq!(6199, ep.data_port);
        assert_eq!(addr, ep.socket_addr());
    }

    #[test]
    fn tracker_endpoint_parses_host_and_port() {
        let ep: TrackerEndpoint = "tracker.example.org:6969".parse().unwrap();

        assert_eq!("tracker.example.org", ep.host);
        assert_eq!(6969, ep.port);
        assert_eq!("tracker.example.org:6969", ep.to_string());
    }

    #[test]
    fn tracker_endpoint_rejects_garbage() {
        assert!("no-port-here".parse::<TrackerEndpoint>().is_err());
        assert!(":6969".parse::<TrackerEndpoint>().is_err());
        assert!("host:notaport".parse::<TrackerEndpoint>().is_err());
    }
}
