//! Per-task notes and the board-wide sticky note.

use serde::Serialize;

use crate::backend::DataStore;
use crate::dashboard::Dashboard;
use crate::error::{Error, Result};
use crate::model::TaskId;
use crate::notes::{GlobalNote, Note};
use crate::output::{emit_notice, emit_success, HumanOutput, OutputOptions};

#[derive(Serialize)]
struct NoteView<'a> {
    task_id: &'a TaskId,
    note: Option<Note>,
}

pub fn run_show<B>(dashboard: &mut Dashboard<B>, id: &str, output: OutputOptions) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let id = TaskId::new(id.trim());
    let title = dashboard
        .task(&id)
        .map(|task| task.title.clone())
        .ok_or_else(|| Error::TaskNotFound(id.to_string()))?;
    let note = dashboard.open_note(&id)?;

    let mut human = HumanOutput::new(format!("Note for #{id} {title}"));
    match &note {
        Some(note) => {
            human.push_detail(note.text.clone());
            human.push_summary("updated", note.created_at.to_rfc3339());
        }
        None => human.push_detail("(no note)"),
    }
    emit_success(output, "note show", &NoteView { task_id: &id, note }, Some(&human))
}

pub async fn run_set<B>(
    dashboard: &mut Dashboard<B>,
    id: &str,
    text: &str,
    output: OutputOptions,
) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let id = TaskId::new(id.trim());
    let notice = dashboard.try_save_note(&id, text).await?;
    emit_notice(output, "note set", &notice)
}

pub async fn run_rm<B>(dashboard: &mut Dashboard<B>, id: &str, output: OutputOptions) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let id = TaskId::new(id.trim());
    let notice = dashboard.try_delete_note(&id).await?;
    emit_notice(output, "note rm", &notice)
}

#[derive(Serialize)]
struct GlobalView {
    was_new: bool,
    note: Option<GlobalNote>,
}

pub fn run_global_show<B>(dashboard: &mut Dashboard<B>, output: OutputOptions) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let was_new = dashboard.is_global_new();
    let note = dashboard.open_global_note()?;

    let header = if was_new { "Sticky note (new)" } else { "Sticky note" };
    let mut human = HumanOutput::new(header);
    match note.as_ref().filter(|note| !note.text.is_empty()) {
        Some(note) => human.push_detail(note.text.clone()),
        None => human.push_detail("(empty)"),
    }
    emit_success(
        output,
        "global-note show",
        &GlobalView { was_new, note },
        Some(&human),
    )
}

pub async fn run_global_set<B>(
    dashboard: &mut Dashboard<B>,
    text: &str,
    output: OutputOptions,
) -> Result<()>
where
    B: DataStore + ?Sized,
{
    let notice = dashboard.try_save_global_note(text).await?;
    emit_notice(output, "global-note set", &notice)
}
