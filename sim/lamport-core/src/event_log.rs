//! The structured event log a machine writes while it runs.
//!
//! Each event is one JSON object on its own line. A line is handed to the
//! underlying writer in a single call and flushed before `record` returns, so
//! anything tailing the file sees whole records as soon as they happen.
//!
//! ```text
//! {"event":"STARTUP","clock_rate":3,"system_time":1700000000.25,"machine_id":1}
//! {"event":"INTERNAL","old_clock":0,"new_clock":1,"system_time":1700000000.58,"machine_id":1}
//! {"event":"SEND","old_clock":1,"new_clock":2,"recipients":[["localhost",5002]],"system_time":1700000000.91,"machine_id":1}
//! ```

use crate::peer::PeerAddress;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{self, Write},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

/// A single entry in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub kind: EventKind,
    /// Wall-clock seconds since the Unix epoch.
    pub system_time: f64,
    pub machine_id: u64,
}

impl Event {
    /// Stamps `kind` with the current wall-clock time.
    pub fn now(machine_id: u64, kind: EventKind) -> Self {
        Self {
            kind,
            system_time: system_time(),
            machine_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Startup {
        clock_rate: u32,
    },
    Send {
        old_clock: u64,
        new_clock: u64,
        /// The peers a send was attempted to, whether or not it arrived.
        recipients: Vec<PeerAddress>,
    },
    Receive {
        old_clock: u64,
        new_clock: u64,
        /// Messages still waiting after this one was taken off the queue.
        queue_len: usize,
    },
    Internal {
        old_clock: u64,
        new_clock: u64,
    },
    End {
        final_clock: u64,
    },
}

impl EventKind {
    /// The clock before and after the event, for the kinds produced by a tick.
    pub fn clock_change(&self) -> Option<(u64, u64)> {
        match *self {
            EventKind::Send {
                old_clock,
                new_clock,
                ..
            }
            | EventKind::Receive {
                old_clock,
                new_clock,
                ..
            }
            | EventKind::Internal {
                old_clock,
                new_clock,
            } => Some((old_clock, new_clock)),
            EventKind::Startup { .. } | EventKind::End { .. } => None,
        }
    }

    /// The name written in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Startup { .. } => "STARTUP",
            EventKind::Send { .. } => "SEND",
            EventKind::Receive { .. } => "RECEIVE",
            EventKind::Internal { .. } => "INTERNAL",
            EventKind::End { .. } => "END",
        }
    }
}

/// Append-only sink for [`Event`]s.
pub struct EventLog {
    writer: Option<Box<dyn Write + Send>>,
}

impl EventLog {
    /// Creates (or truncates) the log file at `path`.
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(File::create(path)?))
    }

    /// Writes the log into an arbitrary writer.
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Some(Box::new(writer)),
        }
    }

    /// Serializes and flushes one event.
    pub fn record(&mut self, event: &Event) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(closed)?;
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        writer.write_all(&line)?;
        writer.flush()
    }

    /// Flushes and releases the underlying writer. Later calls to `record`
    /// fail; closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "the event log is closed")
}

pub(crate) fn system_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| since.as_secs_f64())
        .unwrap_or_default()
}
