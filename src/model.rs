//! Task model shared by the dashboard pipeline.
//!
//! Tasks are owned by the backend `tasks` table; the client only holds a
//! read replica that is replaced wholesale on every fetch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};

pub const TASK_STATUSES: [&str; 2] = ["open", "finished"];
pub const TASK_PRIORITIES: [&str; 3] = ["high", "medium", "low"];

/// Opaque task identifier.
///
/// The backend may key tasks by bigint or uuid, so both JSON numbers and
/// strings are accepted; the value is always carried as a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for TaskId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserialize_id_string(deserializer).map(TaskId)
    }
}

/// Accept a row identifier encoded as either a JSON string or integer.
pub(crate) fn deserialize_id_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(text) => text,
        RawId::Int(value) => value.to_string(),
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    Finished,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(TaskStatus::Open),
            "finished" => Ok(TaskStatus::Finished),
            other => Err(Error::InvalidArgument(format!(
                "unknown status '{other}' (expected {})",
                TASK_STATUSES.join("|")
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    /// Sort rank: high sorts before medium before low.
    pub fn rank(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(Error::InvalidArgument(format!(
                "unknown priority '{other}' (expected {})",
                TASK_PRIORITIES.join("|")
            ))),
        }
    }
}

/// A row of the backend `tasks` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub link: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn is_open(&self) -> bool {
        self.status == TaskStatus::Open
    }

    pub fn is_open_high(&self) -> bool {
        self.is_open() && self.priority == Priority::High
    }
}

/// Insert payload for a new task; status and timestamps are server-assigned.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub link: String,
    pub priority: Priority,
}

impl NewTask {
    /// Validate form input the way the quick-add form does before submitting.
    pub fn validated(title: &str, link: &str, priority: Priority) -> Result<Self> {
        let title = title.trim();
        let link = link.trim();
        if title.is_empty() {
            return Err(Error::Validation("title is required".to_string()));
        }
        if link.is_empty() {
            return Err(Error::Validation("link is required".to_string()));
        }
        let parsed = reqwest::Url::parse(link)
            .map_err(|err| Error::Validation(format!("link is not a valid URL: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Validation(
                "link must use http or https".to_string(),
            ));
        }
        Ok(Self {
            title: title.to_string(),
            link: link.to_string(),
            priority,
        })
    }
}

pub fn find_task<'a>(tasks: &'a [Task], id: &TaskId) -> Option<&'a Task> {
    tasks.iter().find(|task| &task.id == id)
}
