//! "New" badges for sticky notes.
//!
//! Per-task notes are compared against the wall-clock time the viewer last
//! opened them. The global note is compared by version (its created
//! timestamp) so a reload never re-triggers the badge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::local::LocalStore;
use crate::model::TaskId;
use crate::notes::NoteBook;

pub const SEEN_KEY: &str = "seen";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenState {
    #[serde(default)]
    pub notes: HashMap<TaskId, DateTime<Utc>>,
    #[serde(default)]
    pub global_version: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct SeenTracker {
    state: SeenState,
    store: Option<LocalStore>,
}

impl SeenTracker {
    pub fn load(store: LocalStore) -> Result<Self> {
        let state = store.read(SEEN_KEY)?;
        Ok(Self {
            state,
            store: Some(store),
        })
    }

    /// A tracker that is never persisted.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SeenState {
        &self.state
    }

    pub fn is_note_new(&self, task_id: &TaskId, notes: &NoteBook) -> bool {
        let Some(note) = notes.note(task_id) else {
            return false;
        };
        match self.state.notes.get(task_id) {
            Some(seen_at) => note.created_at > *seen_at,
            None => true,
        }
    }

    pub fn mark_note_seen(&mut self, task_id: &TaskId, now: DateTime<Utc>) -> Result<()> {
        self.state.notes.insert(task_id.clone(), now);
        self.persist()
    }

    pub fn is_global_new(&self, notes: &NoteBook) -> bool {
        match notes.global.as_ref() {
            Some(global) if !global.text.is_empty() => {
                self.state.global_version != Some(global.created_at)
            }
            _ => false,
        }
    }

    pub fn mark_global_seen(&mut self, notes: &NoteBook) -> Result<()> {
        let Some(global) = notes.global.as_ref() else {
            return Ok(());
        };
        self.state.global_version = Some(global.created_at);
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        match &self.store {
            Some(store) => store.write(SEEN_KEY, &self.state),
            None => Ok(()),
        }
    }
}
