use crate::{
    clock::{ClockRate, LamportClock},
    config::MachineConfig,
    event_log::{self, Event, EventKind, EventLog},
    logging,
    peer::PeerAddress,
    queues::InboundQueue,
    shutdown::{ExitStatus, Shutdown},
    transport::{self, Acceptor},
};
use rand::{rngs::SmallRng, Rng, RngCore, SeedableRng};
use std::{io, net::SocketAddr, path::PathBuf, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle, time::Instant};

/// An identifier for a particular [`Machine`] in the simulation.
pub type MachineId = u64;

/// Where a machine is in its life. Machines only ever move forward through
/// these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MachineState {
    /// Bound and logging, but not yet accepting connections or ticking.
    Init,
    Running,
    Stopping,
    Stopped,
}

/// What a tick does when there is nothing to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Send to the first peer only.
    SendFirst,
    /// Send to the second peer only.
    SendSecond,
    /// Send to every peer.
    Broadcast,
    Internal,
}

impl Action {
    /// Rolls are drawn uniformly from `1..=ROLL_SIDES`.
    pub const ROLL_SIDES: u8 = 10;

    /// Maps a roll to an action. Rolls 1, 2 and 3 send when there are enough
    /// peers to make the send meaningful; everything else is internal.
    pub fn choose(roll: u8, peer_count: usize) -> Self {
        match roll {
            1 if peer_count >= 1 => Action::SendFirst,
            2 if peer_count >= 2 => Action::SendSecond,
            3 if peer_count >= 2 => Action::Broadcast,
            _ => Action::Internal,
        }
    }

    /// Draws a roll from `rng` and maps it to an action.
    pub fn roll<R: Rng + ?Sized>(rng: &mut R, peer_count: usize) -> Self {
        Self::choose(rng.gen_range(1..=Self::ROLL_SIDES), peer_count)
    }
}

/// The outcome of [`Machine::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub machine_id: MachineId,
    pub clock_rate: u32,
    pub final_clock: u64,
    /// Number of ticks executed, which is also the number of SEND, RECEIVE
    /// and INTERNAL events logged by the tick loop.
    pub ticks: usize,
    pub status: ExitStatus,
}

#[derive(Debug, thiserror::Error)]
pub enum MachineError {
    #[error("Failed to listen on port {port}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("Failed to create event log {}", .path.display())]
    CreateLog {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to write to the event log")]
    Record(#[source] io::Error),
}

/// A simulated machine with its own speed and logical clock.
///
/// A machine listens for timestamps from its peers while a tick loop runs at
/// [`clock_rate`](Machine::clock_rate) ticks per second. Each tick produces
/// exactly one event: a RECEIVE if a message is waiting, otherwise a SEND or
/// an INTERNAL event chosen at random. The clock rate is chosen once, when the
/// machine is created, and never changes.
///
/// Creating a machine binds its port and writes the STARTUP record. Dropping
/// one that was never stopped writes the END record.
pub struct Machine {
    id: MachineId,
    clock_rate: ClockRate,
    clock: LamportClock,
    peers: Vec<PeerAddress>,
    duration: Duration,
    queue: InboundQueue,
    log: EventLog,
    rng: Box<dyn RngCore + Send>,
    shutdown: Shutdown,
    state: MachineState,
    local_addr: SocketAddr,
    /// Held until [`start`](Machine::start) hands it to the accept loop.
    listener: Option<Box<dyn Acceptor>>,
    listener_task: Option<JoinHandle<()>>,
    ticks: usize,
}

impl Machine {
    /// Creates a machine whose random source is seeded from the config, or
    /// from the operating system when the config has no seed.
    pub async fn bind(config: MachineConfig) -> Result<Self, MachineError> {
        match config.seed {
            Some(seed) => Self::bind_with_rng(config, SmallRng::seed_from_u64(seed)).await,
            None => Self::bind_with_rng(config, SmallRng::from_entropy()).await,
        }
    }

    /// Creates a machine drawing its clock rate and tick actions from `rng`.
    ///
    /// Fails without writing anything if the port cannot be bound.
    pub async fn bind_with_rng(
        config: MachineConfig,
        mut rng: impl RngCore + Send + 'static,
    ) -> Result<Self, MachineError> {
        let port = config.port;
        let listener = TcpListener::bind(("0.0.0.0", port))
            .await
            .map_err(|source| MachineError::Bind { port, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| MachineError::Bind { port, source })?;
        let log = EventLog::create(&config.log_path).map_err(|source| MachineError::CreateLog {
            path: config.log_path.clone(),
            source,
        })?;

        let clock_rate = ClockRate::random(&mut rng);
        let mut machine = Self {
            id: config.id,
            clock_rate,
            clock: LamportClock::new(),
            peers: config.peers,
            duration: config.duration,
            queue: InboundQueue::new(),
            log,
            rng: Box::new(rng),
            shutdown: config.shutdown.map(|s| s.child()).unwrap_or_default(),
            state: MachineState::Init,
            local_addr,
            listener: Some(Box::new(listener)),
            listener_task: None,
            ticks: 0,
        };
        machine.record(EventKind::Startup {
            clock_rate: clock_rate.get(),
        })?;
        logging::machine_creation_event(machine.id, clock_rate.get(), local_addr);
        Ok(machine)
    }

    pub fn id(&self) -> MachineId {
        self.id
    }

    pub fn clock_rate(&self) -> ClockRate {
        self.clock_rate
    }

    /// The current value of the logical clock.
    pub fn clock(&self) -> u64 {
        self.clock.now()
    }

    pub fn peers(&self) -> &[PeerAddress] {
        &self.peers
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    /// A handle onto the machine's inbound queue.
    pub fn queue(&self) -> InboundQueue {
        self.queue.clone()
    }

    /// A handle that stops this machine, and only this machine.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Starts accepting connections in the background. Does nothing unless
    /// the machine is still in [`MachineState::Init`].
    pub fn start(&mut self) {
        if self.state != MachineState::Init {
            return;
        }
        if let Some(listener) = self.listener.take() {
            self.listener_task = Some(transport::spawn_listener(
                self.id,
                listener,
                self.queue.clone(),
                self.shutdown.clone(),
            ));
        }
        self.state = MachineState::Running;
    }

    /// Runs the machine to completion: starts the listener, ticks until the
    /// configured duration elapses or the machine is shut down, then stops.
    pub async fn run(mut self) -> Result<RunSummary, MachineError> {
        self.start();
        let ticked = self.tick_loop().await;
        let stopped = self.stop().await;
        let status = ticked?;
        stopped?;

        logging::machine_stopped_event(self.id, self.clock.now(), self.ticks, status);
        Ok(RunSummary {
            machine_id: self.id,
            clock_rate: self.clock_rate.get(),
            final_clock: self.clock.now(),
            ticks: self.ticks,
            status,
        })
    }

    async fn tick_loop(&mut self) -> Result<ExitStatus, MachineError> {
        let period = self.clock_rate.tick_period();
        let shutdown = self.shutdown.clone();
        let started = Instant::now();
        loop {
            if shutdown.is_shut_down() {
                return Ok(ExitStatus::Stopped);
            }
            if started.elapsed() >= self.duration {
                return Ok(ExitStatus::Elapsed);
            }
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => return Ok(ExitStatus::Stopped),
                _ = tokio::time::sleep(period) => {}
            }
            self.tick().await?;
        }
    }

    /// Executes a single tick and returns the event it logged.
    pub async fn tick(&mut self) -> Result<EventKind, MachineError> {
        let event = match self.handle_receive()? {
            Some(event) => event,
            None => self.handle_no_message().await?,
        };
        self.ticks += 1;
        Ok(event)
    }

    /// Takes the oldest message off the queue and applies the receive rule.
    /// Returns `None`, logging nothing, if the queue is empty.
    pub fn handle_receive(&mut self) -> Result<Option<EventKind>, MachineError> {
        let Some((timestamp, queue_len)) = self.queue.pop() else {
            return Ok(None);
        };
        let old_clock = self.clock.now();
        let new_clock = self.clock.receive(timestamp);
        let event = EventKind::Receive {
            old_clock,
            new_clock,
            queue_len,
        };
        self.record(event.clone())?;
        Ok(Some(event))
    }

    /// Rolls for an action and performs it.
    pub async fn handle_no_message(&mut self) -> Result<EventKind, MachineError> {
        let action = Action::roll(&mut *self.rng, self.peers.len());
        self.perform(action).await
    }

    /// Performs `action`. A send with no peer to go to becomes an internal
    /// event.
    pub async fn perform(&mut self, action: Action) -> Result<EventKind, MachineError> {
        let recipients: Vec<PeerAddress> = match action {
            Action::SendFirst => self.peers.iter().take(1).cloned().collect(),
            Action::SendSecond => self.peers.iter().skip(1).take(1).cloned().collect(),
            Action::Broadcast => self.peers.clone(),
            Action::Internal => Vec::new(),
        };
        if recipients.is_empty() {
            self.internal_event()
        } else {
            self.send_message(recipients).await
        }
    }

    /// Advances the clock once and sends the new value to every recipient.
    ///
    /// Delivery is best effort: each recipient is tried once, and failures
    /// are logged as diagnostics and otherwise ignored. The SEND record lists
    /// every recipient attempted.
    pub async fn send_message(
        &mut self,
        recipients: Vec<PeerAddress>,
    ) -> Result<EventKind, MachineError> {
        let system_time = event_log::system_time();
        let old_clock = self.clock.now();
        let new_clock = self.clock.tick();

        for peer in &recipients {
            if let Err(e) = transport::send_clock(peer, new_clock).await {
                logging::send_failure_event(self.id, peer, &e);
            }
        }

        let event = EventKind::Send {
            old_clock,
            new_clock,
            recipients,
        };
        self.write(Event {
            kind: event.clone(),
            system_time,
            machine_id: self.id,
        })?;
        Ok(event)
    }

    pub fn internal_event(&mut self) -> Result<EventKind, MachineError> {
        let old_clock = self.clock.now();
        let new_clock = self.clock.tick();
        let event = EventKind::Internal {
            old_clock,
            new_clock,
        };
        self.record(event.clone())?;
        Ok(event)
    }

    /// Stops the machine: signals the listener, waits for it to close its
    /// port, then writes END and closes the event log. Stopping a stopped
    /// machine does nothing.
    pub async fn stop(&mut self) -> Result<(), MachineError> {
        if self.state == MachineState::Stopped {
            return Ok(());
        }
        self.state = MachineState::Stopping;
        self.shutdown.shut_down();
        drop(self.listener.take());
        if let Some(task) = self.listener_task.take() {
            if let Err(e) = task.await {
                tracing::warn!(machine_id = self.id, %e, "listener task did not finish cleanly");
            }
        }
        self.finish()
    }

    fn finish(&mut self) -> Result<(), MachineError> {
        self.state = MachineState::Stopped;
        let recorded = self.record(EventKind::End {
            final_clock: self.clock.now(),
        });
        let closed = self.log.close().map_err(MachineError::Record);
        recorded.and(closed)
    }

    fn record(&mut self, kind: EventKind) -> Result<(), MachineError> {
        self.write(Event::now(self.id, kind))
    }

    fn write(&mut self, event: Event) -> Result<(), MachineError> {
        self.log.record(&event).map_err(MachineError::Record)
    }
}

impl Drop for Machine {
    fn drop(&mut self) {
        if self.state == MachineState::Stopped {
            return;
        }
        self.shutdown.shut_down();
        if let Err(e) = self.finish() {
            tracing::error!(machine_id = self.id, %e, "failed to record END while dropping machine");
        }
    }
}

impl std::fmt::Debug for Machine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Machine")
            .field("id", &self.id)
            .field("clock_rate", &self.clock_rate)
            .field("clock", &self.clock)
            .field("peers", &self.peers)
            .field("state", &self.state)
            .field("local_addr", &self.local_addr)
            .finish()
    }
}
