//! joblink - shared job link task board
//!
//! Admins post job links as tasks, members submit them, and everyone sees
//! per-task notes, a sticky note, completion stats and recent activity.
//! Notes and activity are not stored in tables of their own: they are
//! derived from the append-only activity log on every refresh.
//!
//! # Module Organization
//!
//! - `activity`: activity log records and the note payload codec
//! - `notes`: note reconciliation and per-task freshness
//! - `stats`: completion windows and daily progress
//! - `overlay`: the activity feed with provisional entries
//! - `view`: filter, sort and paginate the task table
//! - `seen`: which notes the viewer has already opened
//! - `daily`: the cached daily target
//! - `local`, `lock`: locked JSON files under the state directory
//! - `session`: session persistence and role resolution
//! - `backend`: data and auth traits with REST and in-memory implementations
//! - `dashboard`: the controller tying everything together
//! - `notice`: user-facing action outcomes
//! - `cli`, `output`, `events`: the command-line surface

pub mod activity;
pub mod backend;
pub mod cli;
pub mod config;
pub mod daily;
pub mod dashboard;
pub mod error;
pub mod events;
pub mod local;
pub mod lock;
pub mod model;
pub mod notes;
pub mod notice;
pub mod output;
pub mod overlay;
pub mod seen;
pub mod session;
pub mod stats;
pub mod view;

pub use error::{Error, Result};
