//! Transient user-facing notices.
//!
//! Every dashboard action ends in exactly one [`Notice`]; failures are
//! caught at the action boundary and never abort the session.

use std::fmt;

use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Success,
    Info,
    Warning,
    Error,
}

impl NoticeLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            NoticeLevel::Success => "success",
            NoticeLevel::Info => "info",
            NoticeLevel::Warning => "warning",
            NoticeLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Side effects that failed after the action itself went through.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl Notice {
    pub fn new(level: NoticeLevel, title: impl Into<String>) -> Self {
        Self {
            level,
            title: title.into(),
            message: None,
            warnings: Vec::new(),
        }
    }

    pub fn success(title: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Success, title)
    }

    pub fn info(title: impl Into<String>) -> Self {
        Self::new(NoticeLevel::Info, title)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.level, NoticeLevel::Warning | NoticeLevel::Error)
    }

    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::AlreadyRecorded(_) => {
                Notice::info("Already recorded").with_message("This action was already submitted.")
            }
            Error::PriorityLocked(_) => Notice::new(NoticeLevel::Warning, "Finish High priority first")
                .with_message("Please complete all High priority tasks before other tasks."),
            Error::PermissionDenied(_) | Error::NotSignedIn => {
                Notice::new(NoticeLevel::Warning, "Not allowed").with_message(err.to_string())
            }
            Error::Validation(message) => {
                Notice::new(NoticeLevel::Error, "Check the form").with_message(message.clone())
            }
            Error::Backend { message, .. } => {
                Notice::new(NoticeLevel::Error, "Error").with_message(message.clone())
            }
            other => Notice::new(NoticeLevel::Error, "Error").with_message(other.to_string()),
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.title, message),
            None => f.write_str(&self.title),
        }
    }
}
