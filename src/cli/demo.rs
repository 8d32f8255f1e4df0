//! `joblink demo`: a scripted admin/member session against the in-process
//! backend. Needs no environment and touches no local files.

use std::sync::Arc;

use serde::Serialize;

use super::board::format_entry;
use crate::backend::MemoryBackend;
use crate::dashboard::{Dashboard, DashboardOptions, Viewer};
use crate::error::{Error, Result};
use crate::model::{Priority, TaskId};
use crate::notice::Notice;
use crate::output::{emit_success, HumanOutput, OutputOptions};
use crate::session::{Role, User};
use crate::stats::{DailyProgress, TaskCounts};

#[derive(Serialize)]
struct Step {
    actor: &'static str,
    action: String,
    notice: Notice,
}

#[derive(Serialize)]
struct DemoReport {
    steps: Vec<Step>,
    counts: TaskCounts,
    progress: DailyProgress,
    feed: Vec<String>,
}

pub async fn run(output: OutputOptions) -> Result<()> {
    let backend = Arc::new(MemoryBackend::new());
    let options = DashboardOptions::default();
    let mut admin = Dashboard::new(
        Arc::clone(&backend),
        Viewer::new(user("demo-admin", "admin@demo.test"), Role::Admin),
        options,
    );
    let mut member = Dashboard::new(
        Arc::clone(&backend),
        Viewer::new(user("demo-member", "member@demo.test"), Role::Member),
        options,
    );
    // Same member on a second device, with a view that goes stale.
    let mut member_phone = Dashboard::new(
        Arc::clone(&backend),
        Viewer::new(user("demo-member", "member@demo.test"), Role::Member),
        options,
    );
    let mut steps = Vec::new();

    for (title, priority) in [
        ("Backend engineer, remote", Priority::High),
        ("Platform SRE", Priority::Medium),
        ("Data tooling contractor", Priority::Low),
    ] {
        let link = format!("https://jobs.demo.test/{}", title.len());
        let notice = admin.add_task(title, &link, priority).await;
        steps.push(step("admin", format!("add {title}"), notice));
    }

    member.refresh().await;
    member_phone.refresh().await;
    let high = first_with_priority(&member, Priority::High)?;
    let medium = first_with_priority(&member, Priority::Medium)?;

    let notice = member.apply(&medium).await;
    steps.push(step("member", format!("apply #{medium}"), notice));
    let notice = member.apply(&high).await;
    steps.push(step("member", format!("apply #{high}"), notice));
    let notice = member_phone.apply(&high).await;
    steps.push(step("member", format!("apply #{high} from a stale view"), notice));
    let notice = member.apply(&medium).await;
    steps.push(step("member", format!("apply #{medium}"), notice));

    admin.refresh().await;
    let notice = admin.reopen(&medium).await;
    steps.push(step("admin", format!("reopen #{medium}"), notice));
    let notice = admin
        .save_note(&medium, "Add the portfolio link before resubmitting")
        .await;
    steps.push(step("admin", format!("note #{medium}"), notice));
    let notice = admin.save_global_note("Standup moved to 10:30").await;
    steps.push(step("admin", "sticky note".to_string(), notice));

    member.refresh().await;
    let badge = member.is_global_new();
    member.open_global_note()?;
    steps.push(step(
        "member",
        "open sticky note".to_string(),
        Notice::info(if badge { "Sticky note was new" } else { "Sticky note already seen" }),
    ));

    let report = DemoReport {
        steps,
        counts: member.counts(),
        progress: member.progress(),
        feed: member.feed().into_iter().map(format_entry).collect(),
    };

    let mut human = HumanOutput::new(format!(
        "Demo: {} tasks, {}/{} finished today",
        report.counts.total, report.progress.count, report.progress.target
    ));
    for step in &report.steps {
        human.push_detail(format!("{} {}: {}", step.actor, step.action, step.notice));
    }
    for line in &report.feed {
        human.push_summary("feed", line.clone());
    }
    emit_success(output, "demo", &report, Some(&human))
}

fn user(id: &str, email: &str) -> User {
    User {
        id: id.to_string(),
        email: Some(email.to_string()),
    }
}

fn step(actor: &'static str, action: String, notice: Notice) -> Step {
    Step {
        actor,
        action,
        notice,
    }
}

fn first_with_priority(dashboard: &Dashboard<MemoryBackend>, priority: Priority) -> Result<TaskId> {
    dashboard
        .tasks()
        .iter()
        .find(|task| task.priority == priority)
        .map(|task| task.id.clone())
        .ok_or_else(|| Error::OperationFailed(format!("demo has no {priority} task")))
}
