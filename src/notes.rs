//! Sticky-note state derived from the activity log.
//!
//! Notes are never merged incrementally: every fetch rebuilds the
//! [`NoteBook`] from the decoded batch. The per-task freshness map is the
//! one piece of derived state that does survive across fetches.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::activity::{DecodedBatch, NoteEvent};
use crate::model::TaskId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Note {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// The team-wide note. Empty text is a valid, displayed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalNote {
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NoteBook {
    pub task_notes: HashMap<TaskId, Note>,
    pub global: Option<GlobalNote>,
}

impl NoteBook {
    pub fn reconcile(batch: &DecodedBatch) -> Self {
        let task_notes = batch
            .task_notes
            .iter()
            .filter_map(|(task_id, event)| match event {
                NoteEvent::Upsert { text, at } if !text.is_empty() => Some((
                    task_id.clone(),
                    Note {
                        text: text.clone(),
                        created_at: *at,
                    },
                )),
                _ => None,
            })
            .collect();

        let global = batch.global.as_ref().map(|event| GlobalNote {
            text: event.text.clone(),
            created_at: event.at,
        });

        Self { task_notes, global }
    }

    pub fn note(&self, task_id: &TaskId) -> Option<&Note> {
        self.task_notes.get(task_id)
    }

    pub fn has_note(&self, task_id: &TaskId) -> bool {
        self.task_notes.contains_key(task_id)
    }
}

/// Latest log activity per task, used to bias the created-time sort.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FreshnessMap {
    latest: HashMap<TaskId, DateTime<Utc>>,
}

impl FreshnessMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, task_id: &TaskId) -> Option<DateTime<Utc>> {
        self.latest.get(task_id).copied()
    }

    /// Fold a decoded batch in, keeping the later timestamp per task.
    pub fn merge(&mut self, batch: &DecodedBatch) {
        for (task_id, at) in &batch.last_activity {
            self.bump(task_id, *at);
        }
    }

    pub fn bump(&mut self, task_id: &TaskId, at: DateTime<Utc>) {
        match self.latest.get_mut(task_id) {
            Some(current) if *current >= at => {}
            Some(current) => *current = at,
            None => {
                self.latest.insert(task_id.clone(), at);
            }
        }
    }

    pub fn forget(&mut self, task_id: &TaskId) {
        self.latest.remove(task_id);
    }

    pub fn len(&self) -> usize {
        self.latest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::{decode_batch, LogId, RawLogRecord};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn log(id: &str, task: Option<&str>, actor: &str, secs: i64) -> RawLogRecord {
        RawLogRecord {
            id: LogId::new(id),
            action: "reopened".to_string(),
            created_at: ts(secs),
            task_id: task.map(TaskId::from),
            user_email: Some(actor.to_string()),
        }
    }

    #[test]
    fn later_delete_removes_note() {
        let batch = decode_batch(vec![
            log("1", Some("1"), "NOTE|hello%20world", 10),
            log("2", Some("1"), "NOTE_DELETE", 20),
        ]);
        let book = NoteBook::reconcile(&batch);
        assert!(book.note(&TaskId::from("1")).is_none());
    }

    #[test]
    fn latest_upsert_wins_regardless_of_order() {
        let batch = decode_batch(vec![
            log("1", Some("2"), "NOTE|a", 5),
            log("2", Some("2"), "NOTE|b", 15),
        ]);
        let book = NoteBook::reconcile(&batch);
        assert_eq!(book.note(&TaskId::from("2")).map(|n| n.text.as_str()), Some("b"));
    }

    #[test]
    fn earlier_delete_does_not_hide_later_note() {
        let batch = decode_batch(vec![
            log("2", Some("3"), "NOTE|back", 30),
            log("1", Some("3"), "NOTE_DELETE", 20),
        ]);
        let book = NoteBook::reconcile(&batch);
        assert!(book.has_note(&TaskId::from("3")));
    }

    #[test]
    fn empty_task_note_is_absent_but_empty_global_is_kept() {
        let batch = decode_batch(vec![
            log("1", Some("4"), "NOTE|", 10),
            log("2", None, "GLOBAL_NOTE|", 12),
            log("3", None, "GLOBAL_NOTE|older", 8),
        ]);
        let book = NoteBook::reconcile(&batch);
        assert!(!book.has_note(&TaskId::from("4")));
        let global = book.global.expect("global note set");
        assert_eq!(global.text, "");
        assert_eq!(global.created_at, ts(12));
    }

    #[test]
    fn global_is_none_when_never_set() {
        let book = NoteBook::reconcile(&decode_batch(vec![log("1", Some("1"), "a@b.c", 1)]));
        assert!(book.global.is_none());
    }

    #[test]
    fn freshness_merges_max_wise_and_forgets() {
        let mut freshness = FreshnessMap::new();
        freshness.merge(&decode_batch(vec![log("1", Some("1"), "a@b.c", 50)]));
        freshness.merge(&decode_batch(vec![log("2", Some("1"), "NOTE|x", 20)]));
        assert_eq!(freshness.get(&TaskId::from("1")), Some(ts(50)));

        freshness.bump(&TaskId::from("1"), ts(60));
        assert_eq!(freshness.get(&TaskId::from("1")), Some(ts(60)));

        freshness.forget(&TaskId::from("1"));
        assert!(freshness.is_empty());
    }
}
