//! Front end for the Lamport clock simulator: a command line for running one
//! machine or a whole cluster, and tooling that summarizes the event logs a
//! run leaves behind.

pub mod analysis;
pub mod cli;
pub mod cluster;
