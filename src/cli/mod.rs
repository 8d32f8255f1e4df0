//! Command-line interface for joblink
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::backend::rest::{BACKEND_KEY_ENV, BACKEND_URL_ENV};
use crate::config::Config;
use crate::error::Result;
use crate::local::{LocalStore, STATE_DIR_ENV};
use crate::output::OutputOptions;

mod auth;
mod board;
mod context;
mod demo;
mod notes;
mod tasks;

pub(crate) use context::Context;

/// joblink - shared job link task board
///
/// Tracks job links for a small team: admins add and review tasks,
/// members submit them, and everyone sees notes and recent activity.
#[derive(Parser, Debug)]
#[command(name = "joblink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Backend project URL
    #[arg(long, global = true, env = BACKEND_URL_ENV)]
    pub backend_url: Option<String>,

    /// Backend public (anon) key
    #[arg(long, global = true, env = BACKEND_KEY_ENV, hide_env_values = true)]
    pub backend_key: Option<String>,

    /// Directory for session, seen-state and daily target files
    #[arg(long, global = true, env = STATE_DIR_ENV)]
    pub state_dir: Option<PathBuf>,

    /// Config file (defaults to ./.joblink.toml when present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in with a password, or request a one-time link without one
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "JOBLINK_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account
    Signup {
        #[arg(long)]
        email: String,

        #[arg(long)]
        password: String,
    },

    /// Email a one-time sign-in link
    MagicLink {
        #[arg(long)]
        email: String,
    },

    /// Print the OAuth authorize URL for a provider
    OauthUrl {
        #[arg(long, default_value = "google")]
        provider: String,
    },

    /// Sign out and forget the local session
    Logout,

    /// Request a password reset email
    ForgotPassword {
        #[arg(long)]
        email: String,
    },

    /// Set a new password for the signed-in user
    SetPassword {
        #[arg(long)]
        password: String,
    },

    /// Show the signed-in user and role
    Whoami,

    /// List tasks with filters, sorting and pagination
    Tasks {
        /// Tab: all, open, finished, today, week, month
        #[arg(long, default_value = "all")]
        tab: String,

        /// Status filter: open, finished
        #[arg(long)]
        status: Option<String>,

        /// Priority filter: high, medium, low
        #[arg(long)]
        priority: Option<String>,

        /// Case-insensitive title search
        #[arg(long)]
        search: Option<String>,

        /// Sort key: title, priority, status, created
        #[arg(long)]
        sort: Option<String>,

        /// Sort ascending
        #[arg(long, conflicts_with = "desc")]
        asc: bool,

        /// Sort descending
        #[arg(long)]
        desc: bool,

        #[arg(long, default_value_t = 1)]
        page: usize,

        /// Rows per page: 5, 10, 20 or 50
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Add a task (admin)
    Add {
        #[arg(long)]
        title: String,

        #[arg(long)]
        link: String,

        #[arg(long, default_value = "medium")]
        priority: String,
    },

    /// Submit a task as done
    Apply { id: String },

    /// Mark a task finished (admin)
    Finish { id: String },

    /// Send a finished task back to open (admin)
    Reopen { id: String },

    /// Delete a task (admin)
    Delete { id: String },

    /// Per-task notes
    #[command(subcommand)]
    Note(NoteCommands),

    /// The board-wide sticky note
    #[command(subcommand)]
    GlobalNote(GlobalNoteCommands),

    /// Completion statistics and today's progress
    Stats,

    /// Recent activity
    Feed,

    /// Follow table changes and refresh on each one
    Watch {
        /// Write JSONL events to a file, or `-` for stdout
        #[arg(long)]
        events: Option<String>,

        /// Poll interval (defaults to dashboard.poll_interval_secs)
        #[arg(long)]
        interval_secs: Option<u64>,

        /// Stop after this many refreshes
        #[arg(long)]
        max_refreshes: Option<usize>,
    },

    /// Run a scripted session against an in-process backend
    Demo,
}

#[derive(Subcommand, Debug)]
pub enum NoteCommands {
    /// Show a task's note and mark it seen
    Show { id: String },

    /// Save a task's note (admin)
    Set { id: String, text: String },

    /// Delete a task's note (admin)
    Rm { id: String },
}

#[derive(Subcommand, Debug)]
pub enum GlobalNoteCommands {
    /// Show the sticky note and mark it seen
    Show,

    /// Replace the sticky note (admin)
    Set { text: String },
}

impl Cli {
    /// `watch --events -` owns stdout, so errors must stay human-readable.
    pub fn events_to_stdout(&self) -> bool {
        match &self.command {
            Commands::Watch { events, .. } => events
                .as_deref()
                .map(|value| value.trim() == "-")
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Execute the CLI command
    pub fn run(self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.execute())
    }

    async fn execute(self) -> Result<()> {
        let output = OutputOptions {
            json: self.json,
            quiet: self.quiet,
        };
        if let Commands::Demo = self.command {
            return demo::run(output).await;
        }

        let config = Config::resolve(self.config.as_ref())?;
        let local = LocalStore::open(self.state_dir)?;
        let ctx = Context::new(output, config, local, self.backend_url, self.backend_key);

        match self.command {
            Commands::Login { email, password } => auth::run_login(&ctx, &email, password).await,
            Commands::Signup { email, password } => auth::run_signup(&ctx, &email, &password).await,
            Commands::MagicLink { email } => auth::run_magic_link(&ctx, &email).await,
            Commands::OauthUrl { provider } => auth::run_oauth_url(&ctx, &provider),
            Commands::Logout => auth::run_logout(&ctx).await,
            Commands::ForgotPassword { email } => auth::run_forgot_password(&ctx, &email).await,
            Commands::SetPassword { password } => auth::run_set_password(&ctx, &password).await,
            Commands::Whoami => auth::run_whoami(&ctx).await,
            Commands::Tasks {
                tab,
                status,
                priority,
                search,
                sort,
                asc,
                desc,
                page,
                page_size,
            } => {
                let options = tasks::ListOptions {
                    tab,
                    status,
                    priority,
                    search,
                    sort,
                    asc,
                    desc,
                    page,
                    page_size: page_size.unwrap_or(ctx.config.dashboard.page_size),
                };
                let dashboard = ctx.dashboard().await?;
                tasks::run_list(&dashboard, options, ctx.output)
            }
            Commands::Add {
                title,
                link,
                priority,
            } => {
                let mut dashboard = ctx.dashboard().await?;
                tasks::run_add(&mut dashboard, &title, &link, &priority, ctx.output).await
            }
            Commands::Apply { id } => {
                let mut dashboard = ctx.dashboard().await?;
                tasks::run_action(&mut dashboard, tasks::Action::Apply, &id, ctx.output).await
            }
            Commands::Finish { id } => {
                let mut dashboard = ctx.dashboard().await?;
                tasks::run_action(&mut dashboard, tasks::Action::Finish, &id, ctx.output).await
            }
            Commands::Reopen { id } => {
                let mut dashboard = ctx.dashboard().await?;
                tasks::run_action(&mut dashboard, tasks::Action::Reopen, &id, ctx.output).await
            }
            Commands::Delete { id } => {
                let mut dashboard = ctx.dashboard().await?;
                tasks::run_action(&mut dashboard, tasks::Action::Delete, &id, ctx.output).await
            }
            Commands::Note(cmd) => {
                let mut dashboard = ctx.dashboard().await?;
                match cmd {
                    NoteCommands::Show { id } => notes::run_show(&mut dashboard, &id, ctx.output),
                    NoteCommands::Set { id, text } => {
                        notes::run_set(&mut dashboard, &id, &text, ctx.output).await
                    }
                    NoteCommands::Rm { id } => notes::run_rm(&mut dashboard, &id, ctx.output).await,
                }
            }
            Commands::GlobalNote(cmd) => {
                let mut dashboard = ctx.dashboard().await?;
                match cmd {
                    GlobalNoteCommands::Show => notes::run_global_show(&mut dashboard, ctx.output),
                    GlobalNoteCommands::Set { text } => {
                        notes::run_global_set(&mut dashboard, &text, ctx.output).await
                    }
                }
            }
            Commands::Stats => {
                let dashboard = ctx.dashboard().await?;
                board::run_stats(&dashboard, ctx.output)
            }
            Commands::Feed => {
                let dashboard = ctx.dashboard().await?;
                board::run_feed(&dashboard, ctx.output)
            }
            Commands::Watch {
                events,
                interval_secs,
                max_refreshes,
            } => {
                let (dashboard, keeper) = ctx.signed_in().await?;
                board::run_watch(
                    dashboard,
                    keeper,
                    board::WatchOptions {
                        events,
                        interval_secs: interval_secs.unwrap_or(ctx.config.dashboard.poll_interval_secs),
                        max_refreshes,
                    },
                    ctx.output,
                )
                .await
            }
            Commands::Demo => demo::run(output).await,
        }
    }
}
