//! Backend collaborators
//!
//! The dashboard talks to a hosted backend through two traits: [`DataStore`]
//! for the `tasks`, `task_logs` and `users_roles` tables, and
//! [`AuthService`] for sign-in and session management. [`rest`] implements
//! both over HTTP; [`memory`] is an in-process double used by tests and the
//! demo command. [`feed`] turns table fingerprints into change notifications.

pub mod feed;
pub mod memory;
pub mod rest;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::activity::{NewLogRecord, RawLogRecord};
use crate::error::Result;
use crate::model::{NewTask, Task, TaskId, TaskStatus};
use crate::session::{Session, User};

pub use feed::{ChangeFeed, ChangeSubscription};
pub use memory::MemoryBackend;
pub use rest::{BackendSettings, RestBackend};

pub const TASKS_TABLE: &str = "tasks";
pub const TASK_LOGS_TABLE: &str = "task_logs";
pub const ROLES_TABLE: &str = "users_roles";

/// Tables the change feed watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Tasks,
    TaskLogs,
}

impl Table {
    pub const WATCHED: [Table; 2] = [Table::Tasks, Table::TaskLogs];

    pub fn name(self) -> &'static str {
        match self {
            Table::Tasks => TASKS_TABLE,
            Table::TaskLogs => TASK_LOGS_TABLE,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Something changed in `table`. The payload is never consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChangeNotification {
    pub table: Table,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuthEvent {
    SignedIn { user: User },
    SignedOut,
    PasswordRecovery,
    TokenRefreshed,
    UserUpdated,
}

/// Fan-out for session changes.
#[derive(Debug, Clone)]
pub struct AuthEvents {
    sender: broadcast::Sender<AuthEvent>,
}

impl Default for AuthEvents {
    fn default() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }
}

impl AuthEvents {
    pub fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: AuthEvent) {
        // No receivers is fine.
        let _ = self.sender.send(event);
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// All tasks, newest created first.
    async fn fetch_tasks(&self) -> Result<Vec<Task>>;

    /// The most recent `limit` log rows, newest first.
    async fn fetch_logs(&self, limit: usize) -> Result<Vec<RawLogRecord>>;

    async fn insert_task(&self, task: &NewTask) -> Result<()>;

    /// Move a task from `from` to `to`. Returns `false` when no row was in
    /// `from`, so a stale client never rewrites `finished_at`.
    async fn update_task_status(
        &self,
        id: &TaskId,
        from: TaskStatus,
        to: TaskStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    async fn delete_task(&self, id: &TaskId) -> Result<()>;

    async fn insert_log(&self, record: &NewLogRecord) -> Result<()>;

    /// Role string for a user, if the role table has one.
    async fn lookup_role(&self, user_id: &str) -> Result<Option<String>>;

    /// Opaque value that changes whenever `table` changes.
    async fn fingerprint(&self, table: Table) -> Result<String>;

    /// Act as `session` for every later table request, including requests
    /// from clones sharing this store.
    fn use_session(&self, session: &Session);
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn sign_in_password(&self, email: &str, password: &str) -> Result<Session>;

    async fn send_magic_link(&self, email: &str, redirect_to: Option<&str>) -> Result<()>;

    fn oauth_authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<String>;

    /// Returns a session when the project does not require email confirmation.
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        redirect_to: Option<&str>,
    ) -> Result<Option<Session>>;

    async fn sign_out(&self, session: &Session) -> Result<()>;

    async fn request_password_reset(&self, email: &str, redirect_to: Option<&str>) -> Result<()>;

    async fn update_password(&self, session: &Session, password: &str) -> Result<User>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session>;

    async fn current_user(&self, session: &Session) -> Result<User>;

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}
