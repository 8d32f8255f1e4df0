//! The displayed activity feed.
//!
//! Two producers write into the feed: local actions push provisional
//! entries as soon as they are submitted, and fetches install the
//! authoritative log. A provisional entry disappears when a fetch that
//! began after its submission is applied, when a confirmed entry with the
//! same logical key shows up, or when its action fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use ulid::Ulid;

use crate::activity::{ActionKind, ActionRecord, LogId};
use crate::model::TaskId;

pub const DEFAULT_FEED_CAP: usize = 10;

/// Width of the time bucket used to match provisional and confirmed entries.
pub const DEDUPE_BUCKET_SECS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedEntry {
    pub id: LogId,
    pub action: ActionKind,
    pub task_id: Option<TaskId>,
    pub task_title: Option<String>,
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub provisional: bool,
}

impl FeedEntry {
    pub fn confirmed(record: ActionRecord, task_title: Option<String>) -> Self {
        Self {
            id: record.id,
            action: record.action,
            task_id: record.task_id,
            task_title,
            actor: record.actor,
            created_at: record.created_at,
            provisional: false,
        }
    }

    fn same_event(&self, other: &FeedEntry) -> bool {
        let bucket = |entry: &FeedEntry| entry.created_at.timestamp().div_euclid(DEDUPE_BUCKET_SECS);
        self.task_id == other.task_id
            && self.action == other.action
            && (bucket(self) - bucket(other)).abs() <= 1
    }
}

/// Handle for a provisional entry, used to retract it if the action fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTicket {
    id: LogId,
}

impl PendingTicket {
    pub fn id(&self) -> &LogId {
        &self.id
    }
}

/// Identifies one fetch; tokens increase monotonically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FetchToken(u64);

#[derive(Debug, Clone)]
struct Provisional {
    seq: u64,
    entry: FeedEntry,
}

#[derive(Debug, Clone)]
pub struct ActivityFeed {
    cap: usize,
    clock: u64,
    last_applied: u64,
    provisional: Vec<Provisional>,
    confirmed: Vec<FeedEntry>,
}

impl Default for ActivityFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAP)
    }
}

impl ActivityFeed {
    pub fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            clock: 0,
            last_applied: 0,
            provisional: Vec::new(),
            confirmed: Vec::new(),
        }
    }

    pub fn cap(&self) -> usize {
        self.cap
    }

    pub fn push_provisional(
        &mut self,
        action: ActionKind,
        task_id: Option<TaskId>,
        task_title: Option<String>,
        actor: Option<String>,
        now: DateTime<Utc>,
    ) -> PendingTicket {
        self.clock += 1;
        let id = LogId::new(format!("tmp-{}", Ulid::new()));
        let entry = FeedEntry {
            id: id.clone(),
            action,
            task_id,
            task_title,
            actor,
            created_at: now,
            provisional: true,
        };
        self.provisional.insert(
            0,
            Provisional {
                seq: self.clock,
                entry,
            },
        );
        self.provisional.truncate(self.cap);
        tracing::debug!(entry_id = %id, "provisional feed entry added");
        PendingTicket { id }
    }

    pub fn resolve_failed(&mut self, ticket: &PendingTicket) {
        self.provisional.retain(|pending| pending.entry.id != ticket.id);
    }

    pub fn begin_fetch(&mut self) -> FetchToken {
        self.clock += 1;
        FetchToken(self.clock)
    }

    /// Install a fetched log. Returns `false` when a newer fetch was already applied.
    pub fn apply_fetch(&mut self, token: FetchToken, confirmed: Vec<FeedEntry>) -> bool {
        if token.0 <= self.last_applied {
            tracing::debug!(token = token.0, last = self.last_applied, "stale fetch ignored");
            return false;
        }
        self.last_applied = token.0;

        let mut confirmed = confirmed;
        confirmed.truncate(self.cap);
        self.provisional.retain(|pending| {
            pending.seq > token.0
                && !confirmed
                    .iter()
                    .any(|entry| entry.same_event(&pending.entry))
        });
        self.confirmed = confirmed;
        true
    }

    /// Provisional entries (newest first) followed by confirmed ones, capped.
    pub fn entries(&self) -> Vec<&FeedEntry> {
        self.provisional
            .iter()
            .map(|pending| &pending.entry)
            .chain(self.confirmed.iter())
            .take(self.cap)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.provisional.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_010 + secs, 0).unwrap()
    }

    fn confirmed(id: &str, task: &str, action: ActionKind, secs: i64) -> FeedEntry {
        FeedEntry {
            id: LogId::new(id),
            action,
            task_id: Some(TaskId::from(task)),
            task_title: None,
            actor: Some("ann@example.com".to_string()),
            created_at: ts(secs),
            provisional: false,
        }
    }

    fn push(feed: &mut ActivityFeed, task: &str, action: ActionKind, secs: i64) -> PendingTicket {
        feed.push_provisional(action, Some(TaskId::from(task)), None, None, ts(secs))
    }

    #[test]
    fn provisional_entries_lead_the_feed() {
        let mut feed = ActivityFeed::new(10);
        let token = feed.begin_fetch();
        feed.apply_fetch(token, vec![confirmed("1", "a", ActionKind::Created, 0)]);
        let ticket = push(&mut feed, "b", ActionKind::Finished, 5);

        let entries = feed.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].provisional);
        assert_eq!(&entries[0].id, ticket.id());
        assert!(ticket.id().is_provisional());
    }

    #[test]
    fn failure_removes_only_that_entry() {
        let mut feed = ActivityFeed::new(10);
        let keep = push(&mut feed, "a", ActionKind::Finished, 0);
        let drop = push(&mut feed, "b", ActionKind::Deleted, 1);
        feed.resolve_failed(&drop);
        let entries = feed.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(&entries[0].id, keep.id());
    }

    #[test]
    fn fetch_started_after_submission_clears_provisional() {
        let mut feed = ActivityFeed::new(10);
        push(&mut feed, "a", ActionKind::Finished, 0);
        let token = feed.begin_fetch();
        assert!(feed.apply_fetch(token, Vec::new()));
        assert_eq!(feed.pending_count(), 0);
    }

    #[test]
    fn earlier_fetch_dedupes_by_logical_key() {
        let mut feed = ActivityFeed::new(10);
        let early = feed.begin_fetch();
        push(&mut feed, "a", ActionKind::Finished, 29);
        push(&mut feed, "b", ActionKind::Finished, 29);

        // The change feed echoed task a's record before our own refresh ran.
        feed.apply_fetch(early, vec![confirmed("9", "a", ActionKind::Finished, 31)]);
        let entries = feed.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].task_id, Some(TaskId::from("b")));
        assert!(!entries[1].provisional);
    }

    #[test]
    fn distant_confirmation_does_not_match() {
        let mut feed = ActivityFeed::new(10);
        let early = feed.begin_fetch();
        push(&mut feed, "a", ActionKind::Finished, 0);
        feed.apply_fetch(early, vec![confirmed("9", "a", ActionKind::Finished, 300)]);
        assert_eq!(feed.pending_count(), 1);
    }

    #[test]
    fn stale_fetch_is_ignored() {
        let mut feed = ActivityFeed::new(10);
        let first = feed.begin_fetch();
        let second = feed.begin_fetch();
        assert!(feed.apply_fetch(second, vec![confirmed("2", "a", ActionKind::Reopened, 10)]));
        assert!(!feed.apply_fetch(first, vec![confirmed("1", "a", ActionKind::Created, 0)]));
        assert_eq!(feed.entries()[0].id, LogId::new("2"));
    }

    #[test]
    fn length_is_capped_including_provisional() {
        let mut feed = ActivityFeed::new(3);
        let token = feed.begin_fetch();
        let rows = (0..5)
            .map(|i| confirmed(&i.to_string(), "x", ActionKind::Created, -i))
            .collect();
        feed.apply_fetch(token, rows);
        push(&mut feed, "y", ActionKind::Finished, 100);
        push(&mut feed, "z", ActionKind::Finished, 100 + Duration::minutes(5).num_seconds());

        let entries = feed.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries.iter().filter(|entry| entry.provisional).count(), 2);
    }
}
