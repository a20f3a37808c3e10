//! Post-run analysis of machine event logs.
//!
//! Reads the JSON logs written by each machine and summarizes them: clock
//! rates, final clocks, how far the clock jumps per event, how long the
//! inbound queue got, and the drift between the fastest and slowest final
//! clocks.

use lamport_core::{Event, EventKind, MachineId};
use std::{
    collections::BTreeMap,
    fmt,
    fs,
    path::{Path, PathBuf},
};

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("Failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}:{line}: not a valid event record", .path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads every record of one event log. Blank lines are skipped.
pub fn read_log(path: &Path) -> Result<Vec<Event>, AnalysisError> {
    let contents = fs::read_to_string(path).map_err(|source| AnalysisError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line).map_err(|source| AnalysisError::Parse {
                path: path.to_path_buf(),
                line: index + 1,
                source,
            })
        })
        .collect()
}

/// Per-machine figures from one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MachineSummary {
    pub machine_id: MachineId,
    pub clock_rate: Option<u32>,
    pub final_clock: Option<u64>,
    /// Mean of `new_clock - old_clock` over SEND, RECEIVE and INTERNAL.
    pub avg_jump: Option<f64>,
    /// Largest `queue_len` seen on a RECEIVE, zero without any.
    pub max_queue_len: usize,
    pub sends: usize,
    pub receives: usize,
    pub internals: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    /// Ordered by machine id.
    pub machines: Vec<MachineSummary>,
    /// Largest final clock minus smallest final clock.
    pub drift: u64,
}

/// Summarizes events from any number of machines.
pub fn analyze(events: impl IntoIterator<Item = Event>) -> Analysis {
    let mut machines: BTreeMap<MachineId, MachineSummary> = BTreeMap::new();
    let mut jumps: BTreeMap<MachineId, (u64, usize)> = BTreeMap::new();

    for event in events {
        let summary = machines
            .entry(event.machine_id)
            .or_insert_with(|| MachineSummary {
                machine_id: event.machine_id,
                ..Default::default()
            });
        if let Some((old_clock, new_clock)) = event.kind.clock_change() {
            let (total, count) = jumps.entry(event.machine_id).or_default();
            *total += new_clock.saturating_sub(old_clock);
            *count += 1;
        }
        match event.kind {
            EventKind::Startup { clock_rate } => summary.clock_rate = Some(clock_rate),
            EventKind::End { final_clock } => summary.final_clock = Some(final_clock),
            EventKind::Send { .. } => summary.sends += 1,
            EventKind::Receive { queue_len, .. } => {
                summary.receives += 1;
                summary.max_queue_len = summary.max_queue_len.max(queue_len);
            }
            EventKind::Internal { .. } => summary.internals += 1,
        }
    }

    for (machine_id, (total, count)) in jumps {
        if let Some(summary) = machines.get_mut(&machine_id) {
            summary.avg_jump = Some(total as f64 / count as f64);
        }
    }

    let finals: Vec<u64> = machines.values().filter_map(|m| m.final_clock).collect();
    let drift = match (finals.iter().max(), finals.iter().min()) {
        (Some(max), Some(min)) => max - min,
        _ => 0,
    };

    Analysis {
        machines: machines.into_values().collect(),
        drift,
    }
}

/// Reads and summarizes several logs together.
pub fn analyze_files<P: AsRef<Path>>(paths: &[P]) -> Result<Analysis, AnalysisError> {
    let mut events = Vec::new();
    for path in paths {
        events.extend(read_log(path.as_ref())?);
    }
    Ok(analyze(events))
}

impl Analysis {
    /// Renders the summary as a Markdown report.
    pub fn to_markdown(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Analysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# Analysis Summary\n\n## Summary Table\n")?;
        writeln!(
            f,
            "| machine_id | clock_rate | final_clock | avg_jump_size | max_queue_len | sends | receives | internals |"
        )?;
        writeln!(f, "|---|---|---|---|---|---|---|---|")?;
        for m in &self.machines {
            writeln!(
                f,
                "| {} | {} | {} | {} | {} | {} | {} | {} |",
                m.machine_id,
                optional(m.clock_rate),
                optional(m.final_clock),
                m.avg_jump
                    .map(|jump| format!("{jump:.3}"))
                    .unwrap_or_else(|| "-".into()),
                m.max_queue_len,
                m.sends,
                m.receives,
                m.internals,
            )?;
        }
        writeln!(f, "\n**Final Drift (max - min final_clock)**: {}", self.drift)
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lamport_core::PeerAddress;

    fn event(machine_id: u64, kind: EventKind) -> Event {
        Event {
            kind,
            system_time: 0.0,
            machine_id,
        }
    }

    fn sample() -> Vec<Event> {
        vec![
            event(1, EventKind::Startup { clock_rate: 2 }),
            event(2, EventKind::Startup { clock_rate: 5 }),
            event(
                1,
                EventKind::Send {
                    old_clock: 0,
                    new_clock: 1,
                    recipients: vec![PeerAddress::new("localhost", 5002)],
                },
            ),
            event(
                2,
                EventKind::Internal {
                    old_clock: 0,
                    new_clock: 1,
                },
            ),
            event(
                2,
                EventKind::Receive {
                    old_clock: 1,
                    new_clock: 2,
                    queue_len: 0,
                },
            ),
            event(
                1,
                EventKind::Receive {
                    old_clock: 1,
                    new_clock: 8,
                    queue_len: 3,
                },
            ),
            event(1, EventKind::End { final_clock: 8 }),
            event(2, EventKind::End { final_clock: 2 }),
        ]
    }

    #[test]
    fn summarizes_each_machine() {
        let analysis = analyze(sample());
        assert_eq!(analysis.machines.len(), 2);

        let first = &analysis.machines[0];
        assert_eq!(first.machine_id, 1);
        assert_eq!(first.clock_rate, Some(2));
        assert_eq!(first.final_clock, Some(8));
        assert_eq!(first.avg_jump, Some(4.0));
        assert_eq!(first.max_queue_len, 3);
        assert_eq!((first.sends, first.receives, first.internals), (1, 1, 0));

        let second = &analysis.machines[1];
        assert_eq!(second.avg_jump, Some(1.0));
        assert_eq!(second.max_queue_len, 0);

        assert_eq!(analysis.drift, 6);
    }

    #[test]
    fn drift_needs_two_finished_machines() {
        let analysis = analyze(vec![
            event(1, EventKind::Startup { clock_rate: 1 }),
            event(1, EventKind::End { final_clock: 4 }),
        ]);
        assert_eq!(analysis.drift, 0);
        assert_eq!(analysis.machines[0].avg_jump, None);
        assert_eq!(analyze(Vec::new()).drift, 0);
    }

    #[test]
    fn markdown_lists_machines_and_drift() {
        let report = analyze(sample()).to_markdown();
        assert!(report.contains("| 1 | 2 | 8 | 4.000 | 3 | 1 | 1 | 0 |"));
        assert!(report.contains("**Final Drift (max - min final_clock)**: 6"));
    }

    #[test]
    fn reports_bad_line_with_position() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machine_1.log");
        std::fs::write(
            &path,
            "{\"event\":\"END\",\"final_clock\":3,\"system_time\":1.0,\"machine_id\":1}\n\nnot json\n",
        )
        .unwrap();
        match read_log(&path) {
            Err(AnalysisError::Parse { line, .. }) => assert_eq!(line, 3),
            other => panic!("expected a parse error, got {other:?}"),
        }
    }
}
