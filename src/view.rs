//! Filter, sort and paginate the task table for display.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{Priority, Task, TaskStatus};
use crate::notes::FreshnessMap;
use crate::session::Role;

pub const PAGE_SIZES: [usize; 4] = [5, 10, 20, 50];
pub const DEFAULT_SEARCH_DEBOUNCE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tab {
    #[default]
    All,
    Open,
    Finished,
    Today,
    Week,
    Month,
}

impl Tab {
    pub fn as_str(self) -> &'static str {
        match self {
            Tab::All => "all",
            Tab::Open => "open",
            Tab::Finished => "finished",
            Tab::Today => "today",
            Tab::Week => "week",
            Tab::Month => "month",
        }
    }
}

impl FromStr for Tab {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match normalize_text(value).as_str() {
            "all" => Ok(Tab::All),
            "open" => Ok(Tab::Open),
            "finished" => Ok(Tab::Finished),
            "today" => Ok(Tab::Today),
            "week" => Ok(Tab::Week),
            "month" => Ok(Tab::Month),
            other => Err(Error::InvalidArgument(format!(
                "unknown tab '{other}' (expected all|open|finished|today|week|month)"
            ))),
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Title,
    Priority,
    Status,
    Created,
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match normalize_text(value).as_str() {
            "title" => Ok(SortKey::Title),
            "priority" => Ok(SortKey::Priority),
            "status" => Ok(SortKey::Status),
            "created" | "created_at" => Ok(SortKey::Created),
            other => Err(Error::InvalidArgument(format!(
                "unknown sort key '{other}' (expected title|priority|status|created)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SortState {
    pub key: SortKey,
    pub direction: SortDirection,
}

impl Default for SortState {
    fn default() -> Self {
        Self {
            key: SortKey::Created,
            direction: SortDirection::Desc,
        }
    }
}

impl SortState {
    /// Selecting the same ascending key flips to descending; anything else starts ascending.
    pub fn toggle(self, key: SortKey) -> Self {
        let direction = if self.key == key && self.direction == SortDirection::Asc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        Self { key, direction }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PageSize(usize);

impl PageSize {
    pub fn new(size: usize) -> Result<Self> {
        if PAGE_SIZES.contains(&size) {
            Ok(Self(size))
        } else {
            Err(Error::InvalidArgument(format!(
                "page size must be one of {PAGE_SIZES:?}, got {size}"
            )))
        }
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self(PAGE_SIZES[0])
    }
}

/// The viewer's current choices. Filter setters always return to page 1.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ViewQuery {
    tab: Tab,
    status: Option<TaskStatus>,
    priority: Option<Priority>,
    search: String,
    sort: SortState,
    page: usize,
    page_size: PageSize,
}

impl Default for ViewQuery {
    fn default() -> Self {
        Self {
            tab: Tab::All,
            status: None,
            priority: None,
            search: String::new(),
            sort: SortState::default(),
            page: 1,
            page_size: PageSize::default(),
        }
    }
}

impl ViewQuery {
    pub fn tab(&self) -> Tab {
        self.tab
    }

    pub fn status(&self) -> Option<TaskStatus> {
        self.status
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn sort(&self) -> SortState {
        self.sort
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    pub fn set_tab(&mut self, tab: Tab) {
        self.tab = tab;
        self.page = 1;
    }

    pub fn set_status_filter(&mut self, status: Option<TaskStatus>) {
        self.status = status;
        self.page = 1;
    }

    pub fn set_priority_filter(&mut self, priority: Option<Priority>) {
        self.priority = priority;
        self.page = 1;
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.search = search.into();
        self.page = 1;
    }

    pub fn select_sort(&mut self, key: SortKey) {
        self.sort = self.sort.toggle(key);
    }

    pub fn set_sort(&mut self, sort: SortState) {
        self.sort = sort;
    }

    pub fn set_page(&mut self, page: usize) {
        self.page = page.max(1);
    }

    pub fn set_page_size(&mut self, page_size: PageSize) {
        self.page_size = page_size;
        self.page = 1;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<'a> {
    pub tasks: Vec<&'a Task>,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_count: usize,
    pub priority_locked: bool,
}

/// Members must clear open high-priority work before other orderings apply.
pub fn priority_lock_active(role: Role, tasks: &[Task]) -> bool {
    role != Role::Admin && tasks.iter().any(Task::is_open_high)
}

pub fn render<'a, Tz: TimeZone>(
    tasks: &'a [Task],
    query: &ViewQuery,
    freshness: &FreshnessMap,
    priority_locked: bool,
    now: &DateTime<Tz>,
) -> Page<'a> {
    let mut indices = filter_task_indices(tasks, query, now);
    if priority_locked {
        sort_locked(tasks, &mut indices);
    } else {
        sort_indices(tasks, &mut indices, query.sort, freshness);
    }

    let size = query.page_size.get();
    let total_count = indices.len();
    let total_pages = total_count.div_ceil(size);
    let page = query.page.clamp(1, total_pages.max(1));
    let tasks = indices
        .into_iter()
        .skip((page - 1) * size)
        .take(size)
        .map(|idx| &tasks[idx])
        .collect();

    Page {
        tasks,
        page,
        page_size: size,
        total_pages,
        total_count,
        priority_locked,
    }
}

pub fn filter_task_indices<Tz: TimeZone>(
    tasks: &[Task],
    query: &ViewQuery,
    now: &DateTime<Tz>,
) -> Vec<usize> {
    let zone = now.timezone();
    let today = now.date_naive();
    let this_week = today.iso_week();
    // Blank input means no search; otherwise the text is matched as typed.
    let search_norm = if query.search.trim().is_empty() {
        String::new()
    } else {
        query.search.to_lowercase()
    };

    let mut indices = Vec::new();
    for (idx, task) in tasks.iter().enumerate() {
        let created = task.created_at.with_timezone(&zone).date_naive();
        let in_tab = match query.tab {
            Tab::All => true,
            Tab::Open => task.status == TaskStatus::Open,
            Tab::Finished => task.status == TaskStatus::Finished,
            Tab::Today => created == today,
            Tab::Week => {
                let week = created.iso_week();
                week.week() == this_week.week() && week.year() == this_week.year()
            }
            Tab::Month => created.year() == today.year() && created.month() == today.month(),
        };
        if !in_tab {
            continue;
        }
        if query.status.is_some_and(|status| task.status != status) {
            continue;
        }
        if query.priority.is_some_and(|priority| task.priority != priority) {
            continue;
        }
        if !search_norm.is_empty() {
            let haystack = format!("{} {}", task.title, task.link).to_lowercase();
            if !haystack.contains(&search_norm) {
                continue;
            }
        }
        indices.push(idx);
    }
    indices
}

pub fn sort_indices(
    tasks: &[Task],
    indices: &mut [usize],
    sort: SortState,
    freshness: &FreshnessMap,
) {
    let effective_created = |task: &Task| -> DateTime<Utc> {
        freshness
            .get(&task.id)
            .map(|fresh| fresh.max(task.created_at))
            .unwrap_or(task.created_at)
    };

    indices.sort_by(|left, right| {
        let (left, right) = (&tasks[*left], &tasks[*right]);
        let ordering = match sort.key {
            SortKey::Title => normalize_text(&left.title)
                .cmp(&normalize_text(&right.title))
                .then_with(|| left.title.cmp(&right.title)),
            SortKey::Priority => left.priority.rank().cmp(&right.priority.rank()),
            SortKey::Status => left.status.as_str().cmp(right.status.as_str()),
            SortKey::Created => effective_created(left).cmp(&effective_created(right)),
        };
        match sort.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    });
}

fn sort_locked(tasks: &[Task], indices: &mut [usize]) {
    indices.sort_by(|left, right| {
        let (left, right) = (&tasks[*left], &tasks[*right]);
        match (left.is_open_high(), right.is_open_high()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => right.created_at.cmp(&left.created_at),
        }
    });
}

fn normalize_text(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Holds search input until it has been stable for the debounce delay.
#[derive(Debug, Clone)]
pub struct SearchDebounce {
    delay: Duration,
    pending: Option<(String, Instant)>,
    settled: String,
}

impl Default for SearchDebounce {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_DEBOUNCE)
    }
}

impl SearchDebounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            settled: String::new(),
        }
    }

    pub fn input(&mut self, text: impl Into<String>, now: Instant) {
        self.pending = Some((text.into(), now));
    }

    /// Returns the newly settled text once the input has been quiet long enough.
    pub fn poll(&mut self, now: Instant) -> Option<&str> {
        let ready = self
            .pending
            .as_ref()
            .is_some_and(|(_, at)| now.saturating_duration_since(*at) >= self.delay);
        if !ready {
            return None;
        }
        let (text, _) = self.pending.take()?;
        if text == self.settled {
            return None;
        }
        self.settled = text;
        Some(&self.settled)
    }

    pub fn settled(&self) -> &str {
        &self.settled
    }
}
