use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, TimeZone};
use serde::Serialize;

use crate::model::{Priority, Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayCount {
    pub date: NaiveDate,
    pub count: usize,
}

/// Time-windowed counts over the whole task table, in the viewer's zone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub finished_today: usize,
    pub finished_this_week: usize,
    pub finished_this_month: usize,
    pub high_priority_open: usize,
    pub finished_per_day: Vec<DayCount>,
    pub status_counts: Vec<StatusCount>,
}

impl TaskStats {
    pub fn compute<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>) -> Self {
        let zone = now.timezone();
        let today = now.date_naive();
        let this_week = today.iso_week();

        let mut stats = TaskStats::default();
        let mut per_day: BTreeMap<NaiveDate, usize> = BTreeMap::new();

        for task in tasks {
            if task.is_open_high() {
                stats.high_priority_open += 1;
            }

            let Some(finished_at) = task.finished_at else {
                continue;
            };
            let day = finished_at.with_timezone(&zone).date_naive();
            *per_day.entry(day).or_insert(0) += 1;

            if day == today {
                stats.finished_today += 1;
            }
            let week = day.iso_week();
            if week.week() == this_week.week() && week.year() == this_week.year() {
                stats.finished_this_week += 1;
            }
            if day.year() == today.year() && day.month() == today.month() {
                stats.finished_this_month += 1;
            }
        }

        stats.finished_per_day = per_day
            .into_iter()
            .map(|(date, count)| DayCount { date, count })
            .collect();
        stats.status_counts = count_statuses(tasks.iter().map(|task| task.status.as_str()));
        stats
    }

    pub fn total(&self) -> usize {
        self.status_counts.iter().map(|entry| entry.count).sum()
    }
}

/// Tasks created today versus tasks finished today.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DailyProgress {
    pub target: u32,
    pub count: u32,
}

impl DailyProgress {
    pub fn compute<Tz: TimeZone>(tasks: &[Task], now: &DateTime<Tz>) -> Self {
        let zone = now.timezone();
        let today = now.date_naive();
        let on_today = |at: &DateTime<chrono::Utc>| at.with_timezone(&zone).date_naive() == today;

        let target = tasks.iter().filter(|task| on_today(&task.created_at)).count();
        let count = tasks
            .iter()
            .filter(|task| task.finished_at.as_ref().is_some_and(on_today))
            .count();

        Self {
            target: clamp_u32(target),
            count: clamp_u32(count),
        }
    }

    pub fn percent(&self) -> u32 {
        if self.target > 0 {
            let pct = u64::from(self.count) * 100 / u64::from(self.target);
            pct.min(100) as u32
        } else if self.count > 0 {
            100
        } else {
            0
        }
    }

    pub fn target_hit(&self) -> bool {
        self.target > 0 && self.count >= self.target
    }
}

/// Totals shown beside the dashboard tabs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub total: usize,
    pub open: usize,
    pub finished: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl TaskCounts {
    pub fn compute(tasks: &[Task]) -> Self {
        let mut counts = TaskCounts {
            total: tasks.len(),
            ..TaskCounts::default()
        };
        for task in tasks {
            match task.status {
                TaskStatus::Open => counts.open += 1,
                TaskStatus::Finished => counts.finished += 1,
            }
            match task.priority {
                Priority::High => counts.high += 1,
                Priority::Medium => counts.medium += 1,
                Priority::Low => counts.low += 1,
            }
        }
        counts
    }
}

fn count_statuses<'a>(statuses: impl Iterator<Item = &'a str>) -> Vec<StatusCount> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for status in statuses {
        *counts.entry(status.to_string()).or_insert(0) += 1;
    }

    counts
        .into_iter()
        .map(|(status, count)| StatusCount { status, count })
        .collect()
}

fn clamp_u32(value: usize) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}
