//! The dashboard controller.
//!
//! One [`Dashboard`] owns the read replica of the task table and every
//! piece of derived state. Mutations follow the same shape: guard, apply
//! the change locally, push a provisional feed entry, send the request,
//! then either re-fetch everything or undo the local change.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;

use crate::activity::{
    decode_batch, encode_global_note_payload, encode_note_payload, ActionKind, NewLogRecord,
    RawLogRecord, NOTE_DELETE_PAYLOAD,
};
use crate::backend::{AuthService, ChangeNotification, DataStore};
use crate::config::DashboardConfig;
use crate::daily::DailyTargetCache;
use crate::error::{Error, Result};
use crate::model::{find_task, NewTask, Priority, Task, TaskId, TaskStatus};
use crate::notes::{FreshnessMap, GlobalNote, Note, NoteBook};
use crate::notice::{Notice, NoticeLevel};
use crate::overlay::{ActivityFeed, FeedEntry, FetchToken};
use crate::seen::SeenTracker;
use crate::session::{require_admin, require_member, Role, SessionKeeper, User};
use crate::stats::{DailyProgress, TaskCounts, TaskStats};
use crate::view::{self, Page, ViewQuery};

/// The signed-in user the dashboard acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Viewer {
    pub user: User,
    pub role: Role,
}

impl Viewer {
    pub fn new(user: User, role: Role) -> Self {
        Self { user, role }
    }

    fn email(&self) -> String {
        self.user.email.clone().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DashboardOptions {
    pub log_fetch_limit: usize,
    pub feed_cap: usize,
}

impl Default for DashboardOptions {
    fn default() -> Self {
        Self::from(&DashboardConfig::default())
    }
}

impl From<&DashboardConfig> for DashboardOptions {
    fn from(config: &DashboardConfig) -> Self {
        Self {
            log_fetch_limit: config.log_fetch_limit,
            feed_cap: config.feed_cap,
        }
    }
}

/// Raw rows from one full fetch.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub tasks: Vec<Task>,
    pub logs: Vec<RawLogRecord>,
}

impl Snapshot {
    pub async fn fetch<B>(store: &B, log_limit: usize) -> Result<Self>
    where
        B: DataStore + ?Sized,
    {
        let (tasks, logs) = tokio::try_join!(store.fetch_tasks(), store.fetch_logs(log_limit))?;
        Ok(Self { tasks, logs })
    }
}

/// Undo information for one optimistic change.
#[derive(Debug, Clone)]
enum Rollback {
    Status {
        id: TaskId,
        status: TaskStatus,
        finished_at: Option<DateTime<Utc>>,
    },
    Removed {
        index: usize,
        task: Task,
    },
}

impl Rollback {
    fn revert(self, tasks: &mut Vec<Task>) {
        match self {
            Rollback::Status {
                id,
                status,
                finished_at,
            } => {
                if let Some(task) = tasks.iter_mut().find(|task| task.id == id) {
                    task.status = status;
                    task.finished_at = finished_at;
                }
            }
            Rollback::Removed { index, task } => {
                let index = index.min(tasks.len());
                tasks.insert(index, task);
            }
        }
    }
}

pub struct Dashboard<B: DataStore + ?Sized> {
    store: Arc<B>,
    viewer: Viewer,
    options: DashboardOptions,
    tasks: Vec<Task>,
    notes: NoteBook,
    freshness: FreshnessMap,
    feed: ActivityFeed,
    stats: TaskStats,
    counts: TaskCounts,
    progress: DailyProgress,
    daily_target: DailyTargetCache,
    seen: SeenTracker,
}

impl<B: DataStore + ?Sized> Dashboard<B> {
    pub fn new(store: Arc<B>, viewer: Viewer, options: DashboardOptions) -> Self {
        Self {
            store,
            viewer,
            options,
            tasks: Vec::new(),
            notes: NoteBook::default(),
            freshness: FreshnessMap::new(),
            feed: ActivityFeed::new(options.feed_cap),
            stats: TaskStats::default(),
            counts: TaskCounts::default(),
            progress: DailyProgress::default(),
            daily_target: DailyTargetCache::in_memory(today()),
            seen: SeenTracker::in_memory(),
        }
    }

    /// Use persisted seen-state and daily target instead of in-memory ones.
    pub fn with_local_state(mut self, seen: SeenTracker, daily_target: DailyTargetCache) -> Self {
        self.seen = seen;
        self.daily_target = daily_target;
        self
    }

    pub fn store(&self) -> Arc<B> {
        Arc::clone(&self.store)
    }

    pub fn viewer(&self) -> &Viewer {
        &self.viewer
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        find_task(&self.tasks, id)
    }

    pub fn notes(&self) -> &NoteBook {
        &self.notes
    }

    pub fn freshness(&self) -> &FreshnessMap {
        &self.freshness
    }

    pub fn feed(&self) -> Vec<&FeedEntry> {
        self.feed.entries()
    }

    pub fn stats(&self) -> &TaskStats {
        &self.stats
    }

    pub fn counts(&self) -> TaskCounts {
        self.counts
    }

    pub fn progress(&self) -> DailyProgress {
        self.progress
    }

    pub fn cached_daily_target(&self) -> u32 {
        self.daily_target.target(today())
    }

    pub fn priority_locked(&self) -> bool {
        view::priority_lock_active(self.viewer.role, &self.tasks)
    }

    pub fn page(&self, query: &ViewQuery) -> Page<'_> {
        view::render(
            &self.tasks,
            query,
            &self.freshness,
            self.priority_locked(),
            &Local::now(),
        )
    }

    pub fn is_note_new(&self, id: &TaskId) -> bool {
        self.seen.is_note_new(id, &self.notes)
    }

    pub fn is_global_new(&self) -> bool {
        self.seen.is_global_new(&self.notes)
    }

    // =========================================================================
    // Fetching
    // =========================================================================

    pub fn begin_fetch(&mut self) -> FetchToken {
        self.feed.begin_fetch()
    }

    /// Install a fetch result. Returns `false` if a newer fetch already landed.
    pub fn apply_snapshot(&mut self, token: FetchToken, snapshot: Snapshot) -> Result<bool> {
        let Snapshot { tasks, logs } = snapshot;
        let batch = decode_batch(logs);

        let entries = batch
            .actions
            .iter()
            .cloned()
            .map(|record| {
                let title = record
                    .task_id
                    .as_ref()
                    .and_then(|id| find_task(&tasks, id))
                    .map(|task| task.title.clone());
                FeedEntry::confirmed(record, title)
            })
            .collect();
        if !self.feed.apply_fetch(token, entries) {
            return Ok(false);
        }

        self.notes = NoteBook::reconcile(&batch);
        self.freshness.merge(&batch);
        self.tasks = tasks;
        self.recompute()?;
        tracing::debug!(
            tasks = self.tasks.len(),
            notes = self.notes.task_notes.len(),
            "dashboard refreshed"
        );
        Ok(true)
    }

    fn recompute(&mut self) -> Result<()> {
        let now = Local::now();
        self.stats = TaskStats::compute(&self.tasks, &now);
        self.counts = TaskCounts::compute(&self.tasks);
        self.progress = DailyProgress::compute(&self.tasks, &now);
        self.daily_target.set(now.date_naive(), self.progress.target)
    }

    pub async fn try_refresh(&mut self) -> Result<Notice> {
        let token = self.begin_fetch();
        let snapshot = Snapshot::fetch(self.store.as_ref(), self.options.log_fetch_limit).await?;
        self.apply_snapshot(token, snapshot)?;
        Ok(Notice::info("Dashboard refreshed"))
    }

    pub async fn refresh(&mut self) -> Notice {
        self.try_refresh()
            .await
            .unwrap_or_else(|err| Notice::from_error(&err))
    }

    /// Every change notification means "re-fetch everything".
    pub async fn handle_change(&mut self, notification: ChangeNotification) -> Notice {
        tracing::debug!(table = %notification.table, "change notification");
        self.refresh().await
    }

    async fn refresh_after_mutation(&mut self) {
        if let Err(err) = self.try_refresh().await {
            tracing::warn!(error = %err, "refresh after mutation failed");
        }
    }

    // =========================================================================
    // Task actions
    // =========================================================================

    /// Member submission: marks an open task finished and logs "applied".
    pub async fn try_apply(&mut self, id: &TaskId) -> Result<Notice> {
        require_member(self.viewer.role, "apply")?;
        let task = self.require_task(id)?;
        if !task.is_open() {
            return Err(Error::InvalidArgument(format!("task {id} is not open")));
        }
        if self.priority_locked() && !task.is_open_high() {
            tracing::info!(task_id = %id, "apply rejected by priority lock");
            return Err(Error::PriorityLocked(id.to_string()));
        }
        let outcome = self
            .transition(id, TaskStatus::Finished, ActionKind::Applied)
            .await?;
        Ok(outcome.into_notice(|before| self.finish_notice(before, "Task submitted for review")))
    }

    pub async fn try_finish(&mut self, id: &TaskId) -> Result<Notice> {
        require_admin(self.viewer.role, "finish")?;
        let task = self.require_task(id)?;
        if task.status == TaskStatus::Finished {
            return Err(Error::InvalidArgument(format!("task {id} is already finished")));
        }
        let outcome = self
            .transition(id, TaskStatus::Finished, ActionKind::Finished)
            .await?;
        Ok(outcome.into_notice(|before| {
            self.finish_notice(before, "Task manually marked as finished")
        }))
    }

    pub async fn try_reopen(&mut self, id: &TaskId) -> Result<Notice> {
        require_admin(self.viewer.role, "reopen")?;
        let task = self.require_task(id)?;
        if task.status == TaskStatus::Open {
            return Err(Error::InvalidArgument(format!("task {id} is already open")));
        }
        let outcome = self
            .transition(id, TaskStatus::Open, ActionKind::Reopened)
            .await?;
        Ok(outcome.into_notice(|_| {
            Notice::info("Sent back").with_message("Task reopened for member")
        }))
    }

    pub async fn try_delete(&mut self, id: &TaskId) -> Result<Notice> {
        require_admin(self.viewer.role, "delete")?;
        let index = self
            .tasks
            .iter()
            .position(|task| &task.id == id)
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;

        let now = Utc::now();
        let task = self.tasks.remove(index);
        let created_today = local_date(task.created_at) == today();
        let rollback = Rollback::Removed {
            index,
            task: task.clone(),
        };
        let ticket = self.feed.push_provisional(
            ActionKind::Deleted,
            Some(id.clone()),
            Some(task.title.clone()),
            Some(self.viewer.email()),
            now,
        );

        if let Err(err) = self.store.delete_task(id).await {
            rollback.revert(&mut self.tasks);
            self.feed.resolve_failed(&ticket);
            return Err(err);
        }

        self.freshness.forget(id);
        if created_today {
            self.daily_target.decrement(today())?;
        }
        let logged = self.log_action(id, ActionKind::Deleted).await;
        if logged.is_err() {
            self.feed.resolve_failed(&ticket);
        }
        self.refresh_after_mutation().await;
        match logged {
            Ok(()) => Ok(Notice::success("Task Deleted")),
            Err(err @ Error::AlreadyRecorded(_)) => Ok(Notice::from_error(&err)),
            Err(err) => Ok(Notice::success("Task Deleted").with_warning(log_warning(&err))),
        }
    }

    pub async fn try_add_task(&mut self, title: &str, link: &str, priority: Priority) -> Result<Notice> {
        require_admin(self.viewer.role, "add")?;
        let task = NewTask::validated(title, link, priority)?;
        self.store.insert_task(&task).await?;
        self.daily_target.increment(today())?;
        self.refresh_after_mutation().await;
        Ok(Notice::success("Task added").with_message(task.title))
    }

    // =========================================================================
    // Notes
    // =========================================================================

    pub async fn try_save_note(&mut self, id: &TaskId, text: &str) -> Result<Notice> {
        require_admin(self.viewer.role, "note")?;
        self.require_task(id)?;
        self.insert_note(Some(id.clone()), encode_note_payload(text))
            .await?;
        Ok(Notice::success("Note saved"))
    }

    pub async fn try_delete_note(&mut self, id: &TaskId) -> Result<Notice> {
        require_admin(self.viewer.role, "note")?;
        self.insert_note(Some(id.clone()), NOTE_DELETE_PAYLOAD.to_string())
            .await?;
        Ok(Notice::success("Note deleted"))
    }

    /// Saving does not mark the note seen, so everyone gets the badge.
    pub async fn try_save_global_note(&mut self, text: &str) -> Result<Notice> {
        require_admin(self.viewer.role, "global-note")?;
        self.insert_note(None, encode_global_note_payload(text))
            .await?;
        Ok(Notice::success("Sticky note saved"))
    }

    pub fn open_note(&mut self, id: &TaskId) -> Result<Option<Note>> {
        let note = self.notes.note(id).cloned();
        self.seen.mark_note_seen(id, Utc::now())?;
        Ok(note)
    }

    pub fn open_global_note(&mut self) -> Result<Option<GlobalNote>> {
        self.seen.mark_global_seen(&self.notes)?;
        Ok(self.notes.global.clone())
    }

    // =========================================================================
    // Notice-returning wrappers
    // =========================================================================

    pub async fn apply(&mut self, id: &TaskId) -> Notice {
        notice_or_error(self.try_apply(id).await)
    }

    pub async fn finish(&mut self, id: &TaskId) -> Notice {
        notice_or_error(self.try_finish(id).await)
    }

    pub async fn reopen(&mut self, id: &TaskId) -> Notice {
        notice_or_error(self.try_reopen(id).await)
    }

    pub async fn delete(&mut self, id: &TaskId) -> Notice {
        notice_or_error(self.try_delete(id).await)
    }

    pub async fn add_task(&mut self, title: &str, link: &str, priority: Priority) -> Notice {
        notice_or_error(self.try_add_task(title, link, priority).await)
    }

    pub async fn save_note(&mut self, id: &TaskId, text: &str) -> Notice {
        notice_or_error(self.try_save_note(id, text).await)
    }

    pub async fn delete_note(&mut self, id: &TaskId) -> Notice {
        notice_or_error(self.try_delete_note(id).await)
    }

    pub async fn save_global_note(&mut self, text: &str) -> Notice {
        notice_or_error(self.try_save_global_note(text).await)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn require_task(&self, id: &TaskId) -> Result<Task> {
        self.task(id)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound(id.to_string()))
    }

    /// Optimistically move a task to `status` and log `action`.
    async fn transition(
        &mut self,
        id: &TaskId,
        status: TaskStatus,
        action: ActionKind,
    ) -> Result<Transition> {
        let now = Utc::now();
        let finished_at = (status == TaskStatus::Finished).then_some(now);
        let before = self.progress;

        let Some(task) = self.tasks.iter_mut().find(|task| &task.id == id) else {
            return Err(Error::TaskNotFound(id.to_string()));
        };
        let from = task.status;
        let rollback = Rollback::Status {
            id: id.clone(),
            status: from,
            finished_at: task.finished_at,
        };
        task.status = status;
        task.finished_at = finished_at;
        let title = task.title.clone();

        self.freshness.bump(id, now);
        let ticket = self.feed.push_provisional(
            action.clone(),
            Some(id.clone()),
            Some(title),
            Some(self.viewer.email()),
            now,
        );

        match self
            .store
            .update_task_status(id, from, status, finished_at)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                // Someone else moved the task first; our view was stale.
                tracing::info!(task_id = %id, %from, "task no longer in expected status");
                rollback.revert(&mut self.tasks);
                self.feed.resolve_failed(&ticket);
                self.refresh_after_mutation().await;
                let err = Error::AlreadyRecorded(format!("task {id} is no longer {from}"));
                return Ok(Transition::Soft(Notice::from_error(&err)));
            }
            Err(err) => {
                tracing::warn!(task_id = %id, error = %err, "status update failed, rolling back");
                rollback.revert(&mut self.tasks);
                self.feed.resolve_failed(&ticket);
                return Err(err);
            }
        }

        let logged = self.log_action(id, action).await;
        if logged.is_err() {
            self.feed.resolve_failed(&ticket);
        }
        self.refresh_after_mutation().await;
        match logged {
            Ok(()) => Ok(Transition::Done {
                before,
                warning: None,
            }),
            Err(err @ Error::AlreadyRecorded(_)) => Ok(Transition::Soft(Notice::from_error(&err))),
            Err(err) => Ok(Transition::Done {
                before,
                warning: Some(log_warning(&err)),
            }),
        }
    }

    async fn log_action(&self, id: &TaskId, action: ActionKind) -> Result<()> {
        let record = NewLogRecord {
            task_id: Some(id.clone()),
            action: action.as_str().to_string(),
            user_id: self.viewer.user.id.clone(),
            user_email: self.viewer.email(),
        };
        self.store.insert_log(&record).await
    }

    async fn insert_note(&mut self, task_id: Option<TaskId>, payload: String) -> Result<()> {
        // Notes ride on the log table with a neutral action tag.
        let record = NewLogRecord {
            task_id,
            action: ActionKind::Reopened.as_str().to_string(),
            user_id: self.viewer.user.id.clone(),
            user_email: payload,
        };
        self.store.insert_log(&record).await?;
        self.refresh_after_mutation().await;
        Ok(())
    }

    fn finish_notice(&self, before: DailyProgress, message: &str) -> Notice {
        let after = self.progress;
        let target = before.target.max(after.target);
        if target > 0 && before.count < target && after.count >= target {
            Notice::new(NoticeLevel::Success, "Daily target hit!")
                .with_message(format!("You finished {} today", after.count))
        } else {
            Notice::success("Task finished!").with_message(message)
        }
    }
}

impl<B: DataStore + AuthService + ?Sized> Dashboard<B> {
    /// Renew the session when it is about to run out.
    pub async fn keep_alive(&mut self, keeper: &mut SessionKeeper) -> Result<bool> {
        if !keeper.is_due(Utc::now()) {
            return Ok(false);
        }
        keeper.renew(self.store.as_ref()).await?;
        Ok(true)
    }

    /// Refresh, renewing the session and retrying once if the token was rejected.
    pub async fn refresh_renewing(&mut self, keeper: &mut SessionKeeper) -> Notice {
        match self.try_refresh().await {
            Err(err) if err.is_unauthorized() => {
                tracing::info!("access token rejected, renewing session");
                if let Err(err) = keeper.renew(self.store.as_ref()).await {
                    return Notice::from_error(&err);
                }
                self.refresh().await
            }
            result => notice_or_error(result),
        }
    }
}

/// How a status transition ended once the status update went through.
enum Transition {
    /// Carries the daily progress from before the change.
    Done {
        before: DailyProgress,
        warning: Option<String>,
    },
    /// Duplicate or stale submission.
    Soft(Notice),
}

impl Transition {
    fn into_notice(self, done: impl FnOnce(DailyProgress) -> Notice) -> Notice {
        match self {
            Transition::Done { before, warning } => {
                let notice = done(before);
                match warning {
                    Some(warning) => notice.with_warning(warning),
                    None => notice,
                }
            }
            Transition::Soft(notice) => notice,
        }
    }
}

fn log_warning(err: &Error) -> String {
    tracing::warn!(error = %err, "activity log write failed");
    format!("Activity log not updated: {err}")
}

fn notice_or_error(result: Result<Notice>) -> Notice {
    result.unwrap_or_else(|err| Notice::from_error(&err))
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn local_date(at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&Local).date_naive()
}
