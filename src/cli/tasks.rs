//! Task listing and per-task actions.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::DataStore;
use crate::dashboard::Dashboard;
use crate::error::Result;
use crate::model::{Priority, Task, TaskId, TaskStatus};
use crate::output::{emit_notice, emit_success, HumanOutput, OutputOptions};
use crate::stats::TaskCounts;
use crate::view::{PageSize, SortDirection, SortKey, SortState, Tab, ViewQuery};

pub struct ListOptions {
    pub tab: String,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
    pub asc: bool,
    pub desc: bool,
    pub page: usize,
    pub page_size: usize,
}

impl ListOptions {
    pub fn query(&self) -> Result<ViewQuery> {
        let mut query = ViewQuery::default();
        query.set_tab(self.tab.parse::<Tab>()?);
        query.set_status_filter(
            self.status
                .as_deref()
                .map(str::parse::<TaskStatus>)
                .transpose()?,
        );
        query.set_priority_filter(
            self.priority
                .as_deref()
                .map(str::parse::<Priority>)
                .transpose()?,
        );
        if let Some(search) = &self.search {
            query.set_search(search.clone());
        }

        let key = match self.sort.as_deref() {
            Some(raw) => Some(raw.parse::<SortKey>()?),
            None => None,
        };
        let sort = match (key, self.asc, self.desc) {
            (None, false, false) => SortState::default(),
            (key, _, desc) => SortState {
                key: key.unwrap_or(SortKey::Created),
                direction: if desc {
                    SortDirection::Desc
                } else {
                    SortDirection::Asc
                },
            },
        };
        query.set_sort(sort);
        query.set_page_size(PageSize::new(self.page_size)?);
        query.set_page(self.page);
        Ok(query)
    }
}

#[derive(Serialize)]
struct Row<'a> {
    #[serde(flatten)]
    task: &'a Task,
    has_note: bool,
    note_is_new: bool,
    last_activity: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct Listing<'a> {
    query: &'a ViewQuery,
    page: usize,
    page_size: usize,
    total_pages: usize,
    total_count: usize,
    priority_locked: bool,
    counts: TaskCounts,
    tasks: Vec<Row<'a>>,
}

pub fn run_list<B>(dashboard: &Dashboard<B>, options: ListOptions, output: OutputOptions) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let query = options.query()?;
    let page = dashboard.page(&query);
    let rows: Vec<Row<'_>> = page
        .tasks
        .iter()
        .copied()
        .map(|task| Row {
            task,
            has_note: dashboard.notes().has_note(&task.id),
            note_is_new: dashboard.is_note_new(&task.id),
            last_activity: dashboard.freshness().get(&task.id),
        })
        .collect();

    let counts = dashboard.counts();
    let mut human = HumanOutput::new(format!(
        "Tasks ({}): page {}/{} of {}",
        query.tab(),
        page.page,
        page.total_pages.max(1),
        page.total_count
    ));
    human.push_summary("open", counts.open.to_string());
    human.push_summary("finished", counts.finished.to_string());
    for row in &rows {
        human.push_detail(format_row(row));
    }
    if page.priority_locked {
        human.push_warning("Finish High priority tasks first; other tasks are locked");
    }
    if dashboard.is_global_new() {
        human.push_next_step("joblink global-note show");
    }
    if page.page < page.total_pages {
        human.push_next_step(format!("joblink tasks --page {}", page.page + 1));
    }

    let listing = Listing {
        query: &query,
        page: page.page,
        page_size: page.page_size,
        total_pages: page.total_pages,
        total_count: page.total_count,
        priority_locked: page.priority_locked,
        counts,
        tasks: rows,
    };
    emit_success(output, "tasks", &listing, Some(&human))
}

fn format_row(row: &Row<'_>) -> String {
    let task = row.task;
    let note = match (row.has_note, row.note_is_new) {
        (true, true) => " [note*]",
        (true, false) => " [note]",
        _ => "",
    };
    format!(
        "#{} {:<6} {:<8} {}{}  {}",
        task.id,
        task.priority.as_str(),
        task.status.as_str(),
        task.title,
        note,
        task.link
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Apply,
    Finish,
    Reopen,
    Delete,
}

impl Action {
    fn command(self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Finish => "finish",
            Action::Reopen => "reopen",
            Action::Delete => "delete",
        }
    }
}

pub async fn run_action<B>(
    dashboard: &mut Dashboard<B>,
    action: Action,
    id: &str,
    output: OutputOptions,
) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let id = TaskId::new(id.trim());
    let notice = match action {
        Action::Apply => dashboard.try_apply(&id).await?,
        Action::Finish => dashboard.try_finish(&id).await?,
        Action::Reopen => dashboard.try_reopen(&id).await?,
        Action::Delete => dashboard.try_delete(&id).await?,
    };
    emit_notice(output, action.command(), &notice)
}

pub async fn run_add<B>(
    dashboard: &mut Dashboard<B>,
    title: &str,
    link: &str,
    priority: &str,
    output: OutputOptions,
) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let priority = priority.parse::<Priority>()?;
    let notice = dashboard.try_add_task(title, link, priority).await?;
    emit_notice(output, "add", &notice)
}
