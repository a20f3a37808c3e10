use crate::{peer::PeerAddress, Shutdown};
use std::{path::PathBuf, time::Duration};

/// Everything needed to create a [`Machine`](crate::Machine).
///
/// ```
/// use lamport_core::{MachineConfig, PeerAddress};
/// use std::time::Duration;
///
/// let config = MachineConfig::new(1)
///     .port(5001)
///     .peers([PeerAddress::new("localhost", 5002)])
///     .log_path("logs/machine_1.log")
///     .duration(Duration::from_secs(60));
/// assert_eq!(config.peers.len(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub id: u64,
    /// Port to listen on. Zero lets the operating system choose.
    pub port: u16,
    /// Machines to send to, in order. The first two are the targets of
    /// directed sends.
    pub peers: Vec<PeerAddress>,
    pub log_path: PathBuf,
    /// How long the tick loop runs.
    pub duration: Duration,
    /// Seeds the machine's random source. Without a seed it is drawn from
    /// the operating system.
    pub seed: Option<u64>,
    /// An externally owned handle that can stop the machine early.
    pub shutdown: Option<Shutdown>,
}

impl MachineConfig {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            port: 0,
            peers: Vec::new(),
            log_path: PathBuf::from("machine.log"),
            duration: Duration::from_secs(60),
            seed: None,
            shutdown: None,
        }
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn peers(mut self, peers: impl IntoIterator<Item = PeerAddress>) -> Self {
        self.peers = peers.into_iter().collect();
        self
    }

    pub fn log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }
}
