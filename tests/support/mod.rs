#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use joblink::activity::{LogId, RawLogRecord};
use joblink::backend::MemoryBackend;
use joblink::dashboard::{Dashboard, DashboardOptions, Viewer};
use joblink::model::{Priority, Task, TaskId, TaskStatus};
use joblink::session::{Role, User};

pub fn ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}

pub fn task(id: &str, priority: Priority, created_at: DateTime<Utc>) -> Task {
    Task {
        id: TaskId::from(id),
        title: format!("Job {id}"),
        link: format!("https://jobs.example.com/{id}"),
        status: TaskStatus::Open,
        priority,
        created_at,
        finished_at: None,
    }
}

pub fn finished(mut task: Task, at: DateTime<Utc>) -> Task {
    task.status = TaskStatus::Finished;
    task.finished_at = Some(at);
    task
}

pub fn log(id: &str, action: &str, task_id: Option<&str>, email: &str, at: DateTime<Utc>) -> RawLogRecord {
    RawLogRecord {
        id: LogId::new(id),
        action: action.to_string(),
        created_at: at,
        task_id: task_id.map(TaskId::from),
        user_email: Some(email.to_string()),
    }
}

pub fn admin() -> Viewer {
    Viewer::new(
        User {
            id: "admin-1".to_string(),
            email: Some("admin@example.com".to_string()),
        },
        Role::Admin,
    )
}

pub fn member() -> Viewer {
    Viewer::new(
        User {
            id: "member-1".to_string(),
            email: Some("member@example.com".to_string()),
        },
        Role::Member,
    )
}

pub fn dashboard(backend: &Arc<MemoryBackend>, viewer: Viewer) -> Dashboard<MemoryBackend> {
    Dashboard::new(Arc::clone(backend), viewer, DashboardOptions::default())
}

/// A dashboard over `backend` that has already completed one refresh.
pub async fn refreshed(backend: &Arc<MemoryBackend>, viewer: Viewer) -> Dashboard<MemoryBackend> {
    let mut board = dashboard(backend, viewer);
    board.try_refresh().await.expect("initial refresh");
    board
}
