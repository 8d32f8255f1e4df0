//! Activity-log decoding.
//!
//! The backend `task_logs` table carries both ordinary action events and,
//! by convention, sticky-note updates smuggled through the `user_email`
//! column. Rows are decoded exactly once here into [`LogEntry`], an
//! explicitly tagged variant, so nothing downstream sniffs string prefixes.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};

use crate::model::{deserialize_id_string, TaskId};

pub const NOTE_PREFIX: &str = "NOTE|";
pub const NOTE_DELETE_PAYLOAD: &str = "NOTE_DELETE";
pub const GLOBAL_NOTE_PREFIX: &str = "GLOBAL_NOTE|";

/// Default number of log rows fetched per refresh.
pub const DEFAULT_LOG_FETCH_LIMIT: usize = 50;

/// Characters escaped by JavaScript's `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogId(#[serde(deserialize_with = "deserialize_id_string")] String);

impl LogId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Provisional ids are assigned locally before the backend confirms a row.
    pub fn is_provisional(&self) -> bool {
        self.0.starts_with("tmp-")
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Wire shape of a `task_logs` row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawLogRecord {
    pub id: LogId,
    #[serde(default)]
    pub action: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub user_email: Option<String>,
}

/// Insert payload for a `task_logs` row.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewLogRecord {
    pub task_id: Option<TaskId>,
    pub action: String,
    pub user_id: String,
    pub user_email: String,
}

/// The action tag of an ordinary log row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Applied,
    Finished,
    Reopened,
    Deleted,
    Created,
    Other(String),
}

impl ActionKind {
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "applied" => ActionKind::Applied,
            "finished" => ActionKind::Finished,
            "reopened" => ActionKind::Reopened,
            "deleted" => ActionKind::Deleted,
            "created" => ActionKind::Created,
            _ => ActionKind::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Applied => "applied",
            ActionKind::Finished => "finished",
            ActionKind::Reopened => "reopened",
            ActionKind::Deleted => "deleted",
            ActionKind::Created => "created",
            ActionKind::Other(tag) => tag,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ordinary, displayable activity event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRecord {
    pub id: LogId,
    pub action: ActionKind,
    pub created_at: DateTime<Utc>,
    pub task_id: Option<TaskId>,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    Action(ActionRecord),
    NoteUpsert {
        task_id: TaskId,
        text: String,
        at: DateTime<Utc>,
    },
    NoteDelete {
        task_id: TaskId,
        at: DateTime<Utc>,
    },
    GlobalNote {
        text: String,
        at: DateTime<Utc>,
    },
    /// A per-task note encoding that arrived without a task id.
    Orphaned { id: LogId },
}

impl LogEntry {
    pub fn task_id(&self) -> Option<&TaskId> {
        match self {
            LogEntry::Action(record) => record.task_id.as_ref(),
            LogEntry::NoteUpsert { task_id, .. } | LogEntry::NoteDelete { task_id, .. } => {
                Some(task_id)
            }
            LogEntry::GlobalNote { .. } | LogEntry::Orphaned { .. } => None,
        }
    }
}

/// The latest note event for one task.
#[derive(Debug, Clone, PartialEq)]
pub enum NoteEvent {
    Upsert { text: String, at: DateTime<Utc> },
    Delete { at: DateTime<Utc> },
}

impl NoteEvent {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            NoteEvent::Upsert { at, .. } | NoteEvent::Delete { at } => *at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalNoteEvent {
    pub text: String,
    pub at: DateTime<Utc>,
}

/// A decoded log batch, partitioned by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBatch {
    /// Ordinary records in input order (newest first).
    pub actions: Vec<ActionRecord>,
    /// Latest note event per task.
    pub task_notes: HashMap<TaskId, NoteEvent>,
    /// Latest global note event.
    pub global: Option<GlobalNoteEvent>,
    /// Latest event timestamp of any kind per task.
    pub last_activity: HashMap<TaskId, DateTime<Utc>>,
}

pub fn decode_record(record: RawLogRecord) -> LogEntry {
    let RawLogRecord {
        id,
        action,
        created_at,
        task_id,
        user_email,
    } = record;
    let actor = user_email.unwrap_or_default();

    if actor == NOTE_DELETE_PAYLOAD {
        return match task_id {
            Some(task_id) => LogEntry::NoteDelete {
                task_id,
                at: created_at,
            },
            None => LogEntry::Orphaned { id },
        };
    }

    if let Some(encoded) = actor.strip_prefix(GLOBAL_NOTE_PREFIX) {
        return LogEntry::GlobalNote {
            text: decode_payload(&id, encoded),
            at: created_at,
        };
    }

    if let Some(encoded) = actor.strip_prefix(NOTE_PREFIX) {
        return match task_id {
            Some(task_id) => LogEntry::NoteUpsert {
                task_id,
                text: decode_payload(&id, encoded),
                at: created_at,
            },
            None => LogEntry::Orphaned { id },
        };
    }

    let actor = if actor.trim().is_empty() {
        None
    } else {
        Some(actor)
    };
    LogEntry::Action(ActionRecord {
        id,
        action: ActionKind::parse(&action),
        created_at,
        task_id,
        actor,
    })
}

pub fn decode_batch(records: impl IntoIterator<Item = RawLogRecord>) -> DecodedBatch {
    let mut batch = DecodedBatch::default();

    for record in records {
        let entry = decode_record(record);
        if let (Some(task_id), Some(at)) = (entry.task_id(), entry_time(&entry)) {
            bump_latest(&mut batch.last_activity, task_id, at);
        }

        match entry {
            LogEntry::Action(record) => batch.actions.push(record),
            LogEntry::NoteUpsert { task_id, text, at } => {
                keep_latest(&mut batch.task_notes, task_id, NoteEvent::Upsert { text, at });
            }
            LogEntry::NoteDelete { task_id, at } => {
                keep_latest(&mut batch.task_notes, task_id, NoteEvent::Delete { at });
            }
            LogEntry::GlobalNote { text, at } => {
                let newer = batch
                    .global
                    .as_ref()
                    .map(|current| at > current.at)
                    .unwrap_or(true);
                if newer {
                    batch.global = Some(GlobalNoteEvent { text, at });
                }
            }
            LogEntry::Orphaned { id } => {
                tracing::warn!(log_id = %id, "note record without task id ignored");
            }
        }
    }

    batch
}

pub fn encode_note_payload(text: &str) -> String {
    format!("{NOTE_PREFIX}{}", utf8_percent_encode(text, COMPONENT))
}

pub fn encode_global_note_payload(text: &str) -> String {
    format!("{GLOBAL_NOTE_PREFIX}{}", utf8_percent_encode(text, COMPONENT))
}

/// Percent-decode a note payload; malformed input yields `None`.
pub fn decode_component(encoded: &str) -> Option<String> {
    let bytes = encoded.as_bytes();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%' {
            let valid = bytes
                .get(idx + 1..idx + 3)
                .map(|pair| pair.iter().all(u8::is_ascii_hexdigit))
                .unwrap_or(false);
            if !valid {
                return None;
            }
            idx += 3;
        } else {
            idx += 1;
        }
    }
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|text| text.into_owned())
}

fn decode_payload(id: &LogId, encoded: &str) -> String {
    decode_component(encoded).unwrap_or_else(|| {
        tracing::warn!(log_id = %id, "malformed note payload decoded as empty text");
        String::new()
    })
}

fn entry_time(entry: &LogEntry) -> Option<DateTime<Utc>> {
    match entry {
        LogEntry::Action(record) => Some(record.created_at),
        LogEntry::NoteUpsert { at, .. }
        | LogEntry::NoteDelete { at, .. }
        | LogEntry::GlobalNote { at, .. } => Some(*at),
        LogEntry::Orphaned { .. } => None,
    }
}

// Strictly newer wins, so on equal timestamps the first record seen is kept.
fn keep_latest(map: &mut HashMap<TaskId, NoteEvent>, task_id: TaskId, event: NoteEvent) {
    match map.get(&task_id) {
        Some(current) if event.at() <= current.at() => {}
        _ => {
            map.insert(task_id, event);
        }
    }
}

fn bump_latest(map: &mut HashMap<TaskId, DateTime<Utc>>, task_id: &TaskId, at: DateTime<Utc>) {
    let slot = map.entry(task_id.clone()).or_insert(at);
    if at > *slot {
        *slot = at;
    }
}
