//! Wrapper functions for diagnostic logging through `tracing`.
//!
//! These are separate from the machine's [event log](crate::event_log): the
//! event log is the data a run produces, while these report on the health of
//! the run itself. Installing a subscriber is left to the binary.

use crate::{peer::PeerAddress, shutdown::ExitStatus};
use std::{io, net::SocketAddr};
use tracing::{event, Level};

/// Logged once a machine has bound its port and chosen its clock rate.
pub(crate) fn machine_creation_event(machine_id: u64, clock_rate: u32, local_addr: SocketAddr) {
    event!(Level::INFO, machine_id, clock_rate, %local_addr, "machine created");
}

/// Logged when the listener dies. Receiving stops, ticking continues.
pub(crate) fn accept_error_event(machine_id: u64, error: &io::Error) {
    event!(Level::ERROR, machine_id, %error, "error accepting connection, listener stopped");
}

/// Logged for each recipient a send could not reach.
pub(crate) fn send_failure_event(machine_id: u64, peer: &PeerAddress, error: &io::Error) {
    event!(Level::DEBUG, machine_id, %peer, %error, "failed to deliver clock");
}

pub(crate) fn machine_stopped_event(machine_id: u64, final_clock: u64, ticks: usize, status: ExitStatus) {
    event!(Level::INFO, machine_id, final_clock, ticks, ?status, "machine stopped");
}
