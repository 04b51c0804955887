//! Append-only JSON-lines log of orchestrator events.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;

use scout_core::OrchestratorEvent;

pub struct EventLog {
    writer: Mutex<BufWriter<File>>,
}

#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    #[serde(flatten)]
    event: &'a OrchestratorEvent,
}

impl EventLog {
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Write one event as a line. Failures are dropped so logging never
    /// interrupts a run.
    pub fn record(&self, event: &OrchestratorEvent) {
        let entry = LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            event,
        };

        if let Ok(mut writer) = self.writer.lock() {
            if let Ok(json) = serde_json::to_string(&entry) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }
    }
}
