//! Board-level views: stats, the activity feed, and `watch`.

use std::time::Duration;

use serde::Serialize;

use crate::backend::{AuthService, ChangeFeed, DataStore};
use crate::dashboard::Dashboard;
use crate::error::Result;
use crate::events::{Event, EventDestination, EventKind};
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::overlay::FeedEntry;
use crate::session::SessionKeeper;
use crate::stats::{DailyProgress, TaskCounts, TaskStats};

#[derive(Serialize)]
struct StatsReport<'a> {
    stats: &'a TaskStats,
    counts: TaskCounts,
    daily: DailyReport,
}

#[derive(Serialize)]
struct DailyReport {
    #[serde(flatten)]
    progress: DailyProgress,
    percent: u32,
    target_hit: bool,
}

impl From<DailyProgress> for DailyReport {
    fn from(progress: DailyProgress) -> Self {
        Self {
            progress,
            percent: progress.percent(),
            target_hit: progress.target_hit(),
        }
    }
}

pub fn run_stats<B>(dashboard: &Dashboard<B>, output: OutputOptions) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let stats = dashboard.stats();
    let counts = dashboard.counts();
    let daily = DailyReport::from(dashboard.progress());

    let mut human = HumanOutput::new(format!(
        "Today: {}/{} ({}%)",
        daily.progress.count, daily.progress.target, daily.percent
    ));
    human.push_summary("finished today", stats.finished_today.to_string());
    human.push_summary("finished this week", stats.finished_this_week.to_string());
    human.push_summary("finished this month", stats.finished_this_month.to_string());
    human.push_summary("open high priority", stats.high_priority_open.to_string());
    human.push_summary(
        "by priority",
        format!("high {} / medium {} / low {}", counts.high, counts.medium, counts.low),
    );
    for entry in &stats.status_counts {
        human.push_detail(format!("{}: {}", entry.status, entry.count));
    }
    for day in stats.finished_per_day.iter().rev().take(7) {
        human.push_detail(format!("{} finished {}", day.date, day.count));
    }

    emit_success(
        output,
        "stats",
        &StatsReport {
            stats,
            counts,
            daily,
        },
        Some(&human),
    )
}

pub fn run_feed<B>(dashboard: &Dashboard<B>, output: OutputOptions) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let entries = dashboard.feed();
    let mut human = HumanOutput::new(format!("Recent activity ({})", entries.len()));
    for entry in &entries {
        human.push_detail(format_entry(entry));
    }
    emit_success(output, "feed", &entries, Some(&human))
}

pub fn format_entry(entry: &FeedEntry) -> String {
    let target = match (&entry.task_title, &entry.task_id) {
        (Some(title), _) => title.clone(),
        (None, Some(id)) => format!("task #{id}"),
        (None, None) => "board".to_string(),
    };
    let actor = entry.actor.as_deref().unwrap_or("someone");
    let pending = if entry.provisional { " (pending)" } else { "" };
    format!(
        "{} {} {} {}{}",
        entry.created_at.format("%Y-%m-%d %H:%M"),
        actor,
        entry.action.as_str(),
        target,
        pending
    )
}

pub struct WatchOptions {
    pub events: Option<String>,
    pub interval_secs: u64,
    pub max_refreshes: Option<usize>,
}

#[derive(Serialize)]
struct WatchSummary {
    refreshes: usize,
    failures: usize,
    renewals: usize,
}

pub async fn run_watch<B>(
    mut dashboard: Dashboard<B>,
    mut keeper: SessionKeeper,
    options: WatchOptions,
    output: OutputOptions,
) -> Result<()>
where
    B: DataStore + AuthService + ?Sized + 'static,
{
    let destination = EventDestination::parse(options.events.as_deref());
    let events_to_stdout = destination == Some(EventDestination::Stdout);
    let mut sink = destination.as_ref().map(EventDestination::open).transpose()?;
    let echo = !output.json && !output.quiet && !events_to_stdout;

    let interval = Duration::from_secs(options.interval_secs.max(1));
    let mut subscription = ChangeFeed::new(interval).subscribe(dashboard.store());
    if let Some(sink) = sink.as_mut() {
        sink.emit(&Event::new(EventKind::WatchStarted))?;
    }
    if echo {
        println!("Watching for changes every {}s (Ctrl-C to stop)", interval.as_secs());
    }

    let mut summary = WatchSummary {
        refreshes: 0,
        failures: 0,
        renewals: 0,
    };
    let mut renewal_check = tokio::time::interval(interval);
    renewal_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        if options
            .max_refreshes
            .is_some_and(|max| summary.refreshes >= max)
        {
            break;
        }
        let notification = tokio::select! {
            received = subscription.recv() => match received {
                Some(notification) => notification,
                None => break,
            },
            _ = renewal_check.tick() => {
                // Polls fail silently once the token lapses, so renew ahead of time.
                match dashboard.keep_alive(&mut keeper).await {
                    Ok(true) => summary.renewals += 1,
                    Ok(false) => {}
                    Err(err) => tracing::warn!(error = %err, "session renewal failed"),
                }
                continue;
            }
            _ = tokio::signal::ctrl_c() => break,
        };
        let coalesced = subscription.drain();

        tracing::debug!(table = %notification.table, "change notification");
        let before = keeper.session().access_token.clone();
        let notice = dashboard.refresh_renewing(&mut keeper).await;
        if keeper.session().access_token != before {
            summary.renewals += 1;
        }
        summary.refreshes += 1;
        if notice.is_failure() {
            summary.failures += 1;
        }

        if let Some(sink) = sink.as_mut() {
            sink.emit(
                &Event::new(EventKind::TableChanged)
                    .for_table(notification.table)
                    .with_data(serde_json::json!({ "coalesced": coalesced }))?,
            )?;
            let kind = if notice.is_failure() {
                EventKind::RefreshFailed
            } else {
                EventKind::Refreshed
            };
            sink.emit(&Event::new(kind).with_data(serde_json::json!({
                "notice": notice,
                "counts": dashboard.counts(),
                "feed": dashboard.feed().first(),
            }))?)?;
        }
        if echo {
            println!(
                "{} {} changed: {}",
                notification.observed_at.format("%H:%M:%S"),
                notification.table,
                notice
            );
        }
    }

    subscription.close();
    if let Some(sink) = sink.as_mut() {
        sink.emit(&Event::new(EventKind::WatchStopped).with_data(&summary)?)?;
    }
    if events_to_stdout {
        return Ok(());
    }
    let human = HumanOutput::new(format!(
        "Stopped after {} refreshes ({} failed)",
        summary.refreshes, summary.failures
    ));
    emit_success(output, "watch", &summary, Some(&human))
}
