//! In-process backend used by tests and `joblink demo`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::broadcast;
use ulid::Ulid;

use super::{AuthEvent, AuthEvents, AuthService, DataStore, Table};
use crate::activity::{LogId, NewLogRecord, RawLogRecord};
use crate::error::{Error, Result, UNIQUE_VIOLATION_CODE};
use crate::model::{NewTask, Task, TaskId, TaskStatus};
use crate::session::{Session, User};

/// Backend calls that can be counted or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    FetchTasks,
    FetchLogs,
    InsertTask,
    UpdateTask,
    DeleteTask,
    InsertLog,
    LookupRole,
    SignIn,
}

/// A canned backend error.
#[derive(Debug, Clone)]
pub struct Failure {
    pub status: u16,
    pub code: Option<String>,
    pub message: String,
}

impl Failure {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
        }
    }

    pub fn unique_violation() -> Self {
        Self {
            status: 409,
            code: Some(UNIQUE_VIOLATION_CODE.to_string()),
            message: "duplicate key value violates unique constraint".to_string(),
        }
    }

    fn into_error(self) -> Error {
        Error::from_backend(self.status, self.code, self.message)
    }
}

#[derive(Debug, Default)]
struct Account {
    password: String,
    user: User,
}

#[derive(Debug, Default)]
struct State {
    tasks: Vec<Task>,
    logs: Vec<RawLogRecord>,
    log_users: HashMap<LogId, String>,
    roles: HashMap<String, String>,
    accounts: HashMap<String, Account>,
    tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, User>,
    bound_token: Option<String>,
    enforce_tokens: bool,
    next_task_id: u64,
    next_log_id: u64,
    revisions: HashMap<Table, u64>,
    failures: HashMap<Operation, VecDeque<Failure>>,
    calls: HashMap<Operation, usize>,
    clock: Option<DateTime<Utc>>,
    outbox: Vec<String>,
}

impl State {
    fn now(&mut self) -> DateTime<Utc> {
        match self.clock.as_mut() {
            Some(clock) => {
                *clock += Duration::seconds(1);
                *clock
            }
            None => Utc::now(),
        }
    }

    fn enter(&mut self, op: Operation) -> Result<()> {
        *self.calls.entry(op).or_insert(0) += 1;
        if op != Operation::SignIn {
            self.authorize()?;
        }
        match self.failures.get_mut(&op).and_then(VecDeque::pop_front) {
            Some(failure) => Err(failure.into_error()),
            None => Ok(()),
        }
    }

    /// Table requests need a live bound token once enforcement is on.
    fn authorize(&self) -> Result<()> {
        if !self.enforce_tokens {
            return Ok(());
        }
        match &self.bound_token {
            Some(token) if self.tokens.contains_key(token) => Ok(()),
            _ => Err(Error::from_backend(401, None, "JWT expired")),
        }
    }

    fn touch(&mut self, table: Table) {
        *self.revisions.entry(table).or_insert(0) += 1;
    }

    fn issue_session(&mut self, user: User) -> Session {
        let token = format!("mem-{}", Ulid::new());
        let now = self.now();
        if let Some(email) = user.email.clone() {
            self.tokens.insert(token.clone(), email);
        }
        let refresh_token = format!("mem-refresh-{}", Ulid::new());
        self.refresh_tokens.insert(refresh_token.clone(), user.clone());
        Session {
            access_token: token,
            refresh_token: Some(refresh_token),
            expires_at: Some(now + Duration::hours(1)),
            user,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<State>,
    events: AuthEvents,
    unique_applied: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            unique_applied: true,
            ..Self::default()
        }
    }

    /// Make backend timestamps deterministic: each write advances one second.
    pub fn with_clock(self, start: DateTime<Utc>) -> Self {
        self.state().clock = Some(start);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_task(&self, task: Task) {
        let mut state = self.state();
        state.tasks.push(task);
        state.touch(Table::Tasks);
    }

    pub fn add_log(&self, record: RawLogRecord) {
        let mut state = self.state();
        state.logs.push(record);
        state.touch(Table::TaskLogs);
    }

    pub fn set_role(&self, user_id: &str, role: &str) {
        self.state()
            .roles
            .insert(user_id.to_string(), role.to_string());
    }

    pub fn add_account(&self, email: &str, password: &str, user_id: &str) {
        let account = Account {
            password: password.to_string(),
            user: User {
                id: user_id.to_string(),
                email: Some(email.to_string()),
            },
        };
        self.state().accounts.insert(email.to_ascii_lowercase(), account);
    }

    pub fn fail_next(&self, op: Operation, failure: Failure) {
        self.state().failures.entry(op).or_default().push_back(failure);
    }

    pub fn calls(&self, op: Operation) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.state().tasks.clone()
    }

    pub fn logs(&self) -> Vec<RawLogRecord> {
        self.state().logs.clone()
    }

    /// Emails the auth service would have sent (magic links, resets).
    pub fn outbox(&self) -> Vec<String> {
        self.state().outbox.clone()
    }

    /// Simulate a change made by another client.
    pub fn touch(&self, table: Table) {
        self.state().touch(table);
    }

    /// Reject table requests unless the bound session's token is live.
    pub fn require_session(self) -> Self {
        self.state().enforce_tokens = true;
        self
    }

    /// Expire every access token issued so far. Refresh tokens stay valid.
    pub fn expire_access_tokens(&self) {
        self.state().tokens.clear();
    }
}

#[async_trait]
impl DataStore for MemoryBackend {
    async fn fetch_tasks(&self) -> Result<Vec<Task>> {
        let mut state = self.state();
        state.enter(Operation::FetchTasks)?;
        let mut tasks = state.tasks.clone();
        tasks.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        Ok(tasks)
    }

    async fn fetch_logs(&self, limit: usize) -> Result<Vec<RawLogRecord>> {
        let mut state = self.state();
        state.enter(Operation::FetchLogs)?;
        let mut logs = state.logs.clone();
        logs.sort_by(|left, right| right.created_at.cmp(&left.created_at));
        logs.truncate(limit);
        Ok(logs)
    }

    async fn insert_task(&self, task: &NewTask) -> Result<()> {
        let mut state = self.state();
        state.enter(Operation::InsertTask)?;
        state.next_task_id += 1;
        let id = TaskId::new(format!("mem-{}", state.next_task_id));
        let created_at = state.now();
        state.tasks.push(Task {
            id,
            title: task.title.clone(),
            link: task.link.clone(),
            status: TaskStatus::Open,
            priority: task.priority,
            created_at,
            finished_at: None,
        });
        state.touch(Table::Tasks);
        Ok(())
    }

    async fn update_task_status(
        &self,
        id: &TaskId,
        from: TaskStatus,
        to: TaskStatus,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let mut state = self.state();
        state.enter(Operation::UpdateTask)?;
        let Some(task) = state
            .tasks
            .iter_mut()
            .find(|task| &task.id == id && task.status == from)
        else {
            return Ok(false);
        };
        task.status = to;
        task.finished_at = finished_at;
        state.touch(Table::Tasks);
        Ok(true)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<()> {
        let mut state = self.state();
        state.enter(Operation::DeleteTask)?;
        state.tasks.retain(|task| &task.id != id);
        state.touch(Table::Tasks);
        Ok(())
    }

    async fn insert_log(&self, record: &NewLogRecord) -> Result<()> {
        let mut state = self.state();
        state.enter(Operation::InsertLog)?;

        if self.unique_applied && record.action == "applied" {
            let duplicate = state.logs.iter().any(|existing| {
                existing.action == "applied"
                    && existing.task_id == record.task_id
                    && state.log_users.get(&existing.id) == Some(&record.user_id)
            });
            if duplicate {
                return Err(Failure::unique_violation().into_error());
            }
        }

        state.next_log_id += 1;
        let id = LogId::new(state.next_log_id.to_string());
        let created_at = state.now();
        state.log_users.insert(id.clone(), record.user_id.clone());
        state.logs.push(RawLogRecord {
            id,
            action: record.action.clone(),
            created_at,
            task_id: record.task_id.clone(),
            user_email: Some(record.user_email.clone()),
        });
        state.touch(Table::TaskLogs);
        Ok(())
    }

    async fn lookup_role(&self, user_id: &str) -> Result<Option<String>> {
        let mut state = self.state();
        state.enter(Operation::LookupRole)?;
        Ok(state.roles.get(user_id).cloned())
    }

    async fn fingerprint(&self, table: Table) -> Result<String> {
        let state = self.state();
        state.authorize()?;
        Ok(state.revisions.get(&table).copied().unwrap_or(0).to_string())
    }

    fn use_session(&self, session: &Session) {
        self.state().bound_token = Some(session.access_token.clone());
    }
}

#[async_trait]
impl AuthService for MemoryBackend {
    async fn sign_in_password(&self, email: &str, password: &str) -> Result<Session> {
        let session = {
            let mut state = self.state();
            state.enter(Operation::SignIn)?;
            let user = match state.accounts.get(&email.to_ascii_lowercase()) {
                Some(account) if account.password == password => account.user.clone(),
                _ => {
                    return Err(Error::from_backend(400, None, "Invalid login credentials"));
                }
            };
            state.issue_session(user)
        };
        self.events.emit(AuthEvent::SignedIn {
            user: session.user.clone(),
        });
        Ok(session)
    }

    async fn send_magic_link(&self, email: &str, _redirect_to: Option<&str>) -> Result<()> {
        self.state().outbox.push(format!("magic-link:{email}"));
        Ok(())
    }

    fn oauth_authorize_url(&self, provider: &str, redirect_to: Option<&str>) -> Result<String> {
        Ok(format!(
            "memory://authorize?provider={provider}&redirect_to={}",
            redirect_to.unwrap_or_default()
        ))
    }

    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        _redirect_to: Option<&str>,
    ) -> Result<Option<Session>> {
        let session = {
            let mut state = self.state();
            let key = email.to_ascii_lowercase();
            if state.accounts.contains_key(&key) {
                return Err(Error::from_backend(422, None, "User already registered"));
            }
            let user = User {
                id: format!("user-{}", Ulid::new()),
                email: Some(email.to_string()),
            };
            state.accounts.insert(
                key,
                Account {
                    password: password.to_string(),
                    user: user.clone(),
                },
            );
            state.issue_session(user)
        };
        self.events.emit(AuthEvent::SignedIn {
            user: session.user.clone(),
        });
        Ok(Some(session))
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        self.state().tokens.remove(&session.access_token);
        self.events.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn request_password_reset(&self, email: &str, _redirect_to: Option<&str>) -> Result<()> {
        self.state().outbox.push(format!("reset:{email}"));
        self.events.emit(AuthEvent::PasswordRecovery);
        Ok(())
    }

    async fn update_password(&self, session: &Session, password: &str) -> Result<User> {
        let user = {
            let mut state = self.state();
            let email = state
                .tokens
                .get(&session.access_token)
                .cloned()
                .ok_or(Error::NotSignedIn)?;
            let account = state
                .accounts
                .get_mut(&email.to_ascii_lowercase())
                .ok_or(Error::NotSignedIn)?;
            account.password = password.to_string();
            account.user.clone()
        };
        self.events.emit(AuthEvent::UserUpdated);
        Ok(user)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session> {
        let session = {
            let mut state = self.state();
            // Refresh tokens rotate: each one works once.
            let user = state
                .refresh_tokens
                .remove(refresh_token)
                .ok_or_else(|| Error::from_backend(400, None, "Invalid Refresh Token"))?;
            state.issue_session(user)
        };
        self.events.emit(AuthEvent::TokenRefreshed);
        Ok(session)
    }

    async fn current_user(&self, session: &Session) -> Result<User> {
        let state = self.state();
        let email = state
            .tokens
            .get(&session.access_token)
            .ok_or(Error::NotSignedIn)?;
        state
            .accounts
            .get(&email.to_ascii_lowercase())
            .map(|account| account.user.clone())
            .ok_or(Error::NotSignedIn)
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Priority;

    fn log(task: &str, action: &str) -> NewLogRecord {
        NewLogRecord {
            task_id: Some(TaskId::from(task)),
            action: action.to_string(),
            user_id: "u1".into(),
            user_email: "ann@example.com".into(),
        }
    }

    #[tokio::test]
    async fn inserted_rows_come_back_newest_first() {
        let start = Utc::now();
        let backend = MemoryBackend::new().with_clock(start);
        for title in ["first", "second"] {
            let task = NewTask::validated(title, "https://jobs.test", Priority::Low).unwrap();
            backend.insert_task(&task).await.unwrap();
        }
        let tasks = backend.fetch_tasks().await.unwrap();
        assert_eq!(tasks[0].title, "second");
        assert!(tasks.iter().all(Task::is_open));
    }

    #[tokio::test]
    async fn duplicate_apply_is_a_unique_violation() {
        let backend = MemoryBackend::new();
        backend.insert_log(&log("1", "applied")).await.unwrap();
        let err = backend.insert_log(&log("1", "applied")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyRecorded(_)));
        backend.insert_log(&log("1", "finished")).await.unwrap();
    }

    #[tokio::test]
    async fn injected_failures_fire_once() {
        let backend = MemoryBackend::new();
        backend.fail_next(Operation::FetchTasks, Failure::new(503, "unavailable"));
        assert!(backend.fetch_tasks().await.is_err());
        assert!(backend.fetch_tasks().await.is_ok());
        assert_eq!(backend.calls(Operation::FetchTasks), 2);
    }

    #[tokio::test]
    async fn sign_in_emits_event() {
        let backend = MemoryBackend::new();
        backend.add_account("ann@example.com", "pw", "u1");
        let mut events = backend.auth_events();

        assert!(backend.sign_in_password("ann@example.com", "nope").await.is_err());
        let session = backend.sign_in_password("Ann@Example.com", "pw").await.unwrap();
        assert_eq!(session.user.id, "u1");
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::SignedIn { .. }));
        assert_eq!(backend.current_user(&session).await.unwrap().id, "u1");
    }

    #[tokio::test]
    async fn fingerprint_changes_on_write() {
        let backend = MemoryBackend::new();
        let before = backend.fingerprint(Table::TaskLogs).await.unwrap();
        backend.insert_log(&log("1", "finished")).await.unwrap();
        assert_ne!(before, backend.fingerprint(Table::TaskLogs).await.unwrap());
    }
}
