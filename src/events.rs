//! JSON-lines event stream for `joblink watch --events`.
//!
//! Each change notification and each resulting refresh becomes one line
//! on stdout or in an append-only file.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::Table;
use crate::error::{Error, Result};

pub const EVENT_SCHEMA_VERSION: &str = "joblink.event.v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDestination {
    Stdout,
    File(PathBuf),
}

impl EventDestination {
    /// `-` means stdout; blank means no stream.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        let trimmed = raw?.trim();
        match trimmed {
            "" => None,
            "-" => Some(EventDestination::Stdout),
            path => Some(EventDestination::File(PathBuf::from(path))),
        }
    }

    pub fn open(&self) -> Result<EventSink> {
        match self {
            EventDestination::Stdout => Ok(EventSink::stdout()),
            EventDestination::File(path) => EventSink::file(path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    WatchStarted,
    TableChanged,
    Refreshed,
    RefreshFailed,
    WatchStopped,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub schema_version: &'static str,
    pub event: EventKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table: Option<Table>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Event {
    pub fn new(event: EventKind) -> Self {
        Self {
            schema_version: EVENT_SCHEMA_VERSION,
            event,
            timestamp: Utc::now(),
            table: None,
            data: None,
        }
    }

    pub fn for_table(mut self, table: Table) -> Self {
        self.table = Some(table);
        self
    }

    pub fn with_data<T: Serialize>(mut self, data: T) -> Result<Self> {
        self.data = Some(serde_json::to_value(data)?);
        Ok(self)
    }
}

pub struct EventSink {
    writer: Box<dyn Write + Send>,
}

impl EventSink {
    pub fn stdout() -> Self {
        Self {
            writer: Box::new(std::io::stdout()),
        }
    }

    /// Append to `path`, creating it if necessary.
    pub fn file(path: &Path) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        Ok(Self::writer(file))
    }

    pub fn writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Box::new(writer),
        }
    }

    pub fn emit(&mut self, event: &Event) -> Result<()> {
        let serialized = serde_json::to_vec(event)?;
        self.writer.write_all(&serialized)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_parsing() {
        assert_eq!(EventDestination::parse(None), None);
        assert_eq!(EventDestination::parse(Some("  ")), None);
        assert_eq!(
            EventDestination::parse(Some("-")),
            Some(EventDestination::Stdout)
        );
        assert_eq!(
            EventDestination::parse(Some("events.jsonl")),
            Some(EventDestination::File(PathBuf::from("events.jsonl")))
        );
    }

    #[test]
    fn file_sink_appends_json_lines() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("events.jsonl");
        let mut sink = EventDestination::File(path.clone()).open().expect("open sink");

        sink.emit(&Event::new(EventKind::WatchStarted)).expect("emit");
        sink.emit(&Event::new(EventKind::TableChanged).for_table(Table::TaskLogs))
            .expect("emit");

        let written = std::fs::read_to_string(&path).expect("read events");
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).expect("json line"))
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "watch_started");
        assert_eq!(lines[1]["table"], "task_logs");
        assert_eq!(lines[1]["schema_version"], EVENT_SCHEMA_VERSION);
    }
}
