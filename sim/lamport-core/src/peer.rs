use serde::{Deserialize, Serialize};
use std::{fmt::Display, str::FromStr};

/// The address of another machine, used as a dial target when sending.
///
/// In the event log a peer is written as a `[host, port]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "(String, u16)", from = "(String, u16)")]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl From<PeerAddress> for (String, u16) {
    fn from(peer: PeerAddress) -> Self {
        (peer.host, peer.port)
    }
}

impl From<(String, u16)> for PeerAddress {
    fn from((host, port): (String, u16)) -> Self {
        Self { host, port }
    }
}

impl Display for PeerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for PeerAddress {
    type Err = PeerParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| PeerParseError::MissingPort(s.to_string()))?;
        if host.is_empty() {
            return Err(PeerParseError::MissingHost(s.to_string()));
        }
        let port = port
            .parse()
            .map_err(|_| PeerParseError::InvalidPort(s.to_string()))?;
        Ok(Self::new(host, port))
    }
}

/// Parses a comma-separated list of `host:port` entries, keeping their order.
pub fn parse_peer_list(list: &str) -> Result<Vec<PeerAddress>, PeerParseError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum PeerParseError {
    #[error("Peer '{0}' is missing a ':port' suffix")]
    MissingPort(String),
    #[error("Peer '{0}' is missing a host")]
    MissingHost(String),
    #[error("Peer '{0}' does not have a valid port number")]
    InvalidPort(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_and_port() {
        let peer: PeerAddress = "192.168.1.10:5002".parse().unwrap();
        assert_eq!(peer, PeerAddress::new("192.168.1.10", 5002));
        assert_eq!(peer.to_string(), "192.168.1.10:5002");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert_eq!(
            "localhost".parse::<PeerAddress>(),
            Err(PeerParseError::MissingPort("localhost".into()))
        );
        assert_eq!(
            ":5001".parse::<PeerAddress>(),
            Err(PeerParseError::MissingHost(":5001".into()))
        );
        assert_eq!(
            "localhost:99999".parse::<PeerAddress>(),
            Err(PeerParseError::InvalidPort("localhost:99999".into()))
        );
    }

    #[test]
    fn peer_list_keeps_order() {
        let peers = parse_peer_list(" localhost:5002, localhost:5003 ").unwrap();
        assert_eq!(
            peers,
            vec![
                PeerAddress::new("localhost", 5002),
                PeerAddress::new("localhost", 5003)
            ]
        );
        assert!(parse_peer_list("").unwrap().is_empty());
    }

    #[test]
    fn serializes_as_pair() {
        let json = serde_json::to_string(&PeerAddress::new("localhost", 5002)).unwrap();
        assert_eq!(json, r#"["localhost",5002]"#);
        let back: PeerAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(back, PeerAddress::new("localhost", 5002));
    }
}
