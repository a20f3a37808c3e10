use lamport_core::{Machine, MachineConfig, MachineError, PeerAddress, RunSummary, Shutdown};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::task::JoinSet;

/// Describes a set of machines that all know about each other.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Host that every machine uses to reach the others.
    pub host: String,
    /// One port per machine. Machine ids are assigned from 1 in this order.
    pub ports: Vec<u16>,
    pub logs_dir: PathBuf,
    pub duration: Duration,
    /// Base seed; machine `id` is seeded with `seed + id`.
    pub seed: Option<u64>,
}

impl ClusterConfig {
    /// `machines` machines on consecutive ports starting at `base_port`.
    /// Fails if the last port would be past `u16::MAX`.
    pub fn new(machines: u16, base_port: u16) -> Result<Self, ClusterError> {
        let ports = (0..machines)
            .map(|offset| base_port.checked_add(offset))
            .collect::<Option<Vec<u16>>>()
            .ok_or(ClusterError::PortRange {
                machines,
                base_port,
            })?;
        Ok(Self::with_ports(ports))
    }

    pub fn with_ports(ports: Vec<u16>) -> Self {
        Self {
            host: "localhost".into(),
            ports,
            logs_dir: PathBuf::from("logs"),
            duration: Duration::from_secs(60),
            seed: None,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn logs_dir(mut self, logs_dir: impl Into<PathBuf>) -> Self {
        self.logs_dir = logs_dir.into();
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

    /// The path machine `id` writes its event log to.
    pub fn log_path(&self, id: u64) -> PathBuf {
        machine_log_path(&self.logs_dir, id)
    }

    /// Builds a fully connected peer table: every machine lists every other
    /// machine, in id order.
    pub fn machine_configs(&self) -> Vec<MachineConfig> {
        let addresses: Vec<PeerAddress> = self
            .ports
            .iter()
            .map(|port| PeerAddress::new(self.host.clone(), *port))
            .collect();
        self.ports
            .iter()
            .enumerate()
            .map(|(index, port)| {
                let id = index as u64 + 1;
                let peers = addresses
                    .iter()
                    .enumerate()
                    .filter(|(other, _)| *other != index)
                    .map(|(_, peer)| peer.clone());
                let config = MachineConfig::new(id)
                    .port(*port)
                    .peers(peers)
                    .log_path(self.log_path(id))
                    .duration(self.duration);
                match self.seed {
                    Some(seed) => config.seed(seed.wrapping_add(id)),
                    None => config,
                }
            })
            .collect()
    }
}

pub fn machine_log_path(logs_dir: &Path, id: u64) -> PathBuf {
    logs_dir.join(format!("machine_{id}.log"))
}

/// A group of machines run side by side in one process.
///
/// Every machine is bound before any of them starts ticking, so no early send
/// is refused just because its target has not opened its port yet.
///
/// When a `Cluster` is dropped, all of its machines are shut down.
pub struct Cluster {
    machines: Vec<Machine>,
    /// Shared by every machine; stopping it stops them all.
    shutdown: Shutdown,
}

impl Cluster {
    /// Binds every machine in `configs`.
    pub async fn bind(configs: Vec<MachineConfig>) -> Result<Self, MachineError> {
        let shutdown = Shutdown::new();
        let mut machines = Vec::with_capacity(configs.len());
        for config in configs {
            machines.push(Machine::bind(config.shutdown(shutdown.clone())).await?);
        }
        Ok(Self { machines, shutdown })
    }

    /// Creates the log directory and binds a fully connected cluster.
    pub async fn from_config(config: &ClusterConfig) -> Result<Self, ClusterError> {
        std::fs::create_dir_all(&config.logs_dir).map_err(|source| ClusterError::LogsDir {
            path: config.logs_dir.clone(),
            source,
        })?;
        Ok(Self::bind(config.machine_configs()).await?)
    }

    /// Gets a [`Shutdown`] that stops every machine in the cluster.
    pub fn get_shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    pub fn len(&self) -> usize {
        self.machines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.machines.is_empty()
    }

    /// Runs every machine to completion and returns their summaries ordered
    /// by machine id.
    pub async fn run(mut self) -> Result<Vec<RunSummary>, ClusterError> {
        let mut tasks = JoinSet::new();
        for machine in self.machines.drain(..) {
            tracing::info!(
                machine_id = machine.id(),
                clock_rate = machine.clock_rate().get(),
                "starting machine"
            );
            tasks.spawn(machine.run());
        }

        let mut summaries = Vec::with_capacity(tasks.len());
        while let Some(result) = tasks.join_next().await {
            summaries.push(result??);
        }
        summaries.sort_by_key(|summary| summary.machine_id);
        Ok(summaries)
    }
}

impl Drop for Cluster {
    fn drop(&mut self) {
        self.shutdown.shut_down();
    }
}

impl std::fmt::Debug for Cluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Cluster ")?;
        f.debug_list().entries(self.machines.iter()).finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Failed to create log directory {}", .path.display())]
    LogsDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{machines} machines starting at port {base_port} run past the last port")]
    PortRange { machines: u16, base_port: u16 },
    #[error(transparent)]
    Machine(#[from] MachineError),
    #[error("A machine task panicked or was cancelled")]
    Task(#[from] tokio::task::JoinError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_table_is_fully_connected() {
        let configs = ClusterConfig::new(3, 5001).unwrap().logs_dir("logs").machine_configs();
        assert_eq!(configs.len(), 3);

        let ids: Vec<u64> = configs.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        assert_eq!(
            configs[1].peers,
            vec![
                PeerAddress::new("localhost", 5001),
                PeerAddress::new("localhost", 5003)
            ]
        );
        for config in &configs {
            assert_eq!(config.peers.len(), 2);
            assert!(config
                .peers
                .iter()
                .all(|peer| peer.port != config.port));
        }
        assert_eq!(configs[2].log_path, PathBuf::from("logs/machine_3.log"));
    }

    #[test]
    fn seeds_differ_per_machine() {
        let configs = ClusterConfig::new(2, 6000).unwrap().seed(10).machine_configs();
        assert_eq!(configs[0].seed, Some(11));
        assert_eq!(configs[1].seed, Some(12));
        assert!(ClusterConfig::new(2, 6000).unwrap().machine_configs()[0].seed.is_none());
    }

    #[test]
    fn ports_past_the_last_are_rejected() {
        assert!(matches!(
            ClusterConfig::new(3, u16::MAX - 1),
            Err(ClusterError::PortRange {
                machines: 3,
                base_port: 65534
            })
        ));
        let config = ClusterConfig::new(2, u16::MAX - 1).unwrap();
        assert_eq!(config.ports, vec![u16::MAX - 1, u16::MAX]);
    }
}
