//! The runtime for a single simulated machine in an asynchronous distributed
//! system.
//!
//! Machines run at different speeds, exchange their logical clocks over TCP
//! and order their events with Lamport clocks. Running several of them side
//! by side shows how clocks drift apart and how message queues back up when
//! one machine is much slower than its peers.
//!
//! # Organization
//! - [`Machine`] owns the tick loop and the lifecycle of one machine
//! - [`transport`] accepts connections, decodes timestamps and sends them
//! - [`InboundQueue`] carries received timestamps from the network to the tick
//!   loop
//! - [`EventLog`] writes one JSON record per event for later analysis
//! - [`LamportClock`] and [`ClockRate`] describe logical and physical time
//!
//! # Running a machine
//!
//! ```no_run
//! use lamport_core::{Machine, MachineConfig, PeerAddress};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), lamport_core::MachineError> {
//! let config = MachineConfig::new(1)
//!     .port(5001)
//!     .peers([PeerAddress::new("localhost", 5002)])
//!     .log_path("machine_1.log")
//!     .duration(Duration::from_secs(10));
//! let summary = Machine::bind(config).await?.run().await?;
//! println!("final clock: {}", summary.final_clock);
//! # Ok(())
//! # }
//! ```

mod logging;

pub mod clock;
pub use clock::{ClockRate, LamportClock};

pub mod config;
pub use config::MachineConfig;

pub mod event_log;
pub use event_log::{Event, EventKind, EventLog};

mod machine;
pub use machine::{Action, Machine, MachineError, MachineId, MachineState, RunSummary};

pub mod peer;
pub use peer::{parse_peer_list, PeerAddress};

pub mod queues;
pub use queues::InboundQueue;

pub mod shutdown;
pub use shutdown::{ExitStatus, Shutdown};

pub mod transport;
