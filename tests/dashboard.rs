mod support;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use joblink::activity::ActionKind;
use joblink::backend::memory::{Failure, Operation};
use joblink::backend::{AuthEvent, AuthService, ChangeFeed, DataStore, MemoryBackend, Table};
use joblink::dashboard::Snapshot;
use joblink::error::Error;
use joblink::model::{Priority, TaskId, TaskStatus};
use joblink::notice::NoticeLevel;
use joblink::session::SessionKeeper;
use joblink::view::{SortKey, ViewQuery};

use support::{admin, ago, dashboard, finished, member, refreshed, task};

fn id(raw: &str) -> TaskId {
    TaskId::from(raw)
}

fn seeded() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_task(task("h1", Priority::High, ago(30)));
    backend.add_task(task("m1", Priority::Medium, ago(20)));
    backend
}

#[tokio::test]
async fn member_apply_on_medium_is_rejected_while_high_is_open() {
    let backend = seeded();
    let mut board = refreshed(&backend, member()).await;
    assert!(board.priority_locked());

    let err = board.try_apply(&id("m1")).await.expect_err("locked");
    assert!(matches!(err, Error::PriorityLocked(_)));
    assert_eq!(err.exit_code(), 3);

    let notice = board.apply(&id("m1")).await;
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(notice.title, "Finish High priority first");

    assert_eq!(backend.calls(Operation::UpdateTask), 0);
    assert_eq!(backend.calls(Operation::InsertLog), 0);
    assert!(board.task(&id("m1")).expect("m1").is_open());
    assert!(board.feed().is_empty());
}

#[tokio::test]
async fn member_apply_on_high_finishes_and_logs() {
    let backend = seeded();
    let mut board = refreshed(&backend, member()).await;

    let notice = board.try_apply(&id("h1")).await.expect("apply");
    assert_eq!(notice.level, NoticeLevel::Success);

    let stored = backend.tasks();
    let h1 = stored.iter().find(|t| t.id == id("h1")).expect("h1");
    assert_eq!(h1.status, TaskStatus::Finished);
    assert!(h1.finished_at.is_some());

    let logs = backend.logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].action, "applied");
    assert_eq!(logs[0].user_email.as_deref(), Some("member@example.com"));

    assert!(!board.priority_locked());
    let feed = board.feed();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].action, ActionKind::Applied);
    assert!(!feed[0].provisional);
    assert_eq!(feed[0].task_title.as_deref(), Some("Job h1"));
    assert!(board.freshness().get(&id("h1")).is_some());
}

#[tokio::test]
async fn duplicate_submission_is_informational() {
    let backend = seeded();
    let mut laptop = refreshed(&backend, member()).await;
    let mut phone = refreshed(&backend, member()).await;

    laptop.try_apply(&id("h1")).await.expect("first apply");
    let first_finish = backend
        .tasks()
        .into_iter()
        .find(|t| t.id == id("h1"))
        .and_then(|t| t.finished_at)
        .expect("finished_at set");

    let notice = phone.try_apply(&id("h1")).await.expect("stale apply");
    assert_eq!(notice.level, NoticeLevel::Info);
    assert_eq!(notice.title, "Already recorded");

    let h1 = backend
        .tasks()
        .into_iter()
        .find(|t| t.id == id("h1"))
        .expect("h1");
    assert_eq!(h1.finished_at, Some(first_finish));
    assert_eq!(backend.calls(Operation::InsertLog), 1);
    assert_eq!(backend.logs().len(), 1);
    assert!(phone.feed().iter().all(|entry| !entry.provisional));
    assert_eq!(phone.task(&id("h1")).expect("h1").status, TaskStatus::Finished);
}

#[tokio::test]
async fn apply_on_a_finished_task_is_rejected_locally() {
    let backend = Arc::new(MemoryBackend::new());
    let done_at = Utc::now() - Duration::days(3);
    backend.add_task(finished(task("old", Priority::Low, done_at - Duration::hours(1)), done_at));
    let mut board = refreshed(&backend, member()).await;
    let finished_today = board.stats().finished_today;

    let err = board.try_apply(&id("old")).await.expect_err("not open");
    assert!(matches!(err, Error::InvalidArgument(_)), "{err:?}");
    assert_eq!(err.exit_code(), 2);

    assert_eq!(backend.calls(Operation::UpdateTask), 0);
    assert_eq!(backend.calls(Operation::InsertLog), 0);
    assert_eq!(board.task(&id("old")).expect("old").finished_at, Some(done_at));
    assert_eq!(board.stats().finished_today, finished_today);
}

#[tokio::test]
async fn admins_cannot_apply() {
    let backend = seeded();
    let mut board = refreshed(&backend, admin()).await;

    let err = board.try_apply(&id("m1")).await.expect_err("admin apply");
    assert!(matches!(err, Error::PermissionDenied("apply")), "{err:?}");
    assert_eq!(err.exit_code(), 3);

    assert_eq!(backend.calls(Operation::UpdateTask), 0);
    assert_eq!(backend.calls(Operation::InsertLog), 0);
    assert!(board.task(&id("m1")).expect("m1").is_open());
}

#[tokio::test]
async fn log_failure_after_a_status_change_is_a_warning() {
    let backend = seeded();
    let mut board = refreshed(&backend, member()).await;
    backend.fail_next(Operation::InsertLog, Failure::new(500, "log table unavailable"));

    let notice = board.try_apply(&id("h1")).await.expect("status change went through");
    assert_eq!(notice.level, NoticeLevel::Success);
    assert_eq!(notice.warnings.len(), 1);
    assert!(notice.warnings[0].contains("log table unavailable"));

    assert_eq!(board.task(&id("h1")).expect("h1").status, TaskStatus::Finished);
    assert!(backend.logs().is_empty());
    assert!(board.feed().is_empty());
}

#[tokio::test]
async fn log_failure_after_delete_is_a_warning() {
    let backend = seeded();
    let mut board = refreshed(&backend, admin()).await;
    backend.fail_next(Operation::InsertLog, Failure::new(500, "log table unavailable"));

    let notice = board.try_delete(&id("m1")).await.expect("delete went through");
    assert_eq!(notice.title, "Task Deleted");
    assert_eq!(notice.warnings.len(), 1);
    assert!(board.task(&id("m1")).is_none());
    assert!(board.feed().is_empty());
}

#[tokio::test]
async fn failed_status_update_rolls_back() {
    let backend = seeded();
    let mut board = refreshed(&backend, member()).await;
    backend.fail_next(Operation::UpdateTask, Failure::new(500, "database unavailable"));

    let notice = board.apply(&id("h1")).await;
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message.as_deref(), Some("database unavailable"));

    assert!(board.task(&id("h1")).expect("h1").is_open());
    assert!(board.feed().is_empty());
    assert_eq!(backend.calls(Operation::InsertLog), 0);
}

#[tokio::test]
async fn failed_delete_restores_the_row() {
    let backend = seeded();
    let mut board = refreshed(&backend, admin()).await;
    let before: Vec<TaskId> = board.tasks().iter().map(|t| t.id.clone()).collect();
    backend.fail_next(Operation::DeleteTask, Failure::new(403, "permission denied for table tasks"));

    let err = board.try_delete(&id("m1")).await.expect_err("delete fails");
    assert_eq!(err.exit_code(), 4);

    let after: Vec<TaskId> = board.tasks().iter().map(|t| t.id.clone()).collect();
    assert_eq!(before, after);
    assert!(board.feed().is_empty());
}

#[tokio::test]
async fn delete_removes_task_and_logs() {
    let backend = seeded();
    let mut board = refreshed(&backend, admin()).await;

    let notice = board.try_delete(&id("m1")).await.expect("delete");
    assert_eq!(notice.title, "Task Deleted");
    assert!(board.task(&id("m1")).is_none());
    assert_eq!(backend.tasks().len(), 1);
    assert_eq!(backend.logs()[0].action, "deleted");
    assert_eq!(board.feed()[0].action, ActionKind::Deleted);
    assert_eq!(board.feed()[0].task_title, None);
}

#[tokio::test]
async fn members_cannot_run_admin_operations() {
    let backend = seeded();
    let mut board = refreshed(&backend, member()).await;

    for err in [
        board.try_finish(&id("h1")).await.expect_err("finish"),
        board.try_delete(&id("h1")).await.expect_err("delete"),
        board
            .try_add_task("Job", "https://jobs.example.com/x", Priority::Low)
            .await
            .expect_err("add"),
        board.try_save_global_note("hi").await.expect_err("global"),
    ] {
        assert!(matches!(err, Error::PermissionDenied(_)), "{err:?}");
    }
    assert_eq!(backend.calls(Operation::UpdateTask), 0);
    assert_eq!(backend.calls(Operation::InsertTask), 0);
    assert_eq!(backend.calls(Operation::InsertLog), 0);
}

#[tokio::test]
async fn add_task_validates_before_sending() {
    let backend = Arc::new(MemoryBackend::new());
    let mut board = refreshed(&backend, admin()).await;

    let missing_title = board
        .try_add_task("  ", "https://jobs.example.com/1", Priority::High)
        .await
        .expect_err("title");
    let bad_scheme = board
        .try_add_task("Job", "ftp://jobs.example.com/1", Priority::High)
        .await
        .expect_err("scheme");
    assert!(matches!(missing_title, Error::Validation(_)));
    assert!(matches!(bad_scheme, Error::Validation(_)));
    assert_eq!(backend.calls(Operation::InsertTask), 0);

    let notice = board
        .try_add_task("Staff engineer", "https://jobs.example.com/2", Priority::High)
        .await
        .expect("add");
    assert_eq!(notice.title, "Task added");
    assert_eq!(board.tasks().len(), 1);
    assert_eq!(board.cached_daily_target(), 1);
}

#[tokio::test]
async fn one_unfinished_task_today_sets_target_one_and_zero_percent() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_task(task("t1", Priority::Medium, Utc::now()));
    let board = refreshed(&backend, admin()).await;

    let progress = board.progress();
    assert_eq!(progress.target, 1);
    assert_eq!(progress.count, 0);
    assert_eq!(progress.percent(), 0);
    assert_eq!(board.cached_daily_target(), 1);
}

#[tokio::test]
async fn finishing_the_last_task_of_the_day_hits_the_target() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_task(task("t1", Priority::Medium, Utc::now()));
    let mut board = refreshed(&backend, admin()).await;

    let notice = board.try_finish(&id("t1")).await.expect("finish");
    assert_eq!(notice.title, "Daily target hit!");
    assert!(board.progress().target_hit());
}

#[tokio::test]
async fn finishing_below_target_is_a_plain_notice() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_task(task("t1", Priority::Medium, Utc::now()));
    backend.add_task(task("t2", Priority::Medium, Utc::now()));
    let mut board = refreshed(&backend, admin()).await;

    let notice = board.try_finish(&id("t1")).await.expect("finish");
    assert_eq!(notice.title, "Task finished!");
    assert_eq!(board.progress().count, 1);
    assert_eq!(board.progress().target, 2);
}

#[tokio::test]
async fn reopen_sends_a_task_back() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_task(finished(task("t1", Priority::Low, ago(60)), ago(10)));
    let mut board = refreshed(&backend, admin()).await;

    let err = board.try_finish(&id("t1")).await.expect_err("already finished");
    assert_eq!(err.exit_code(), 2);

    let notice = board.try_reopen(&id("t1")).await.expect("reopen");
    assert_eq!(notice.title, "Sent back");
    let t1 = board.task(&id("t1")).expect("t1");
    assert_eq!(t1.status, TaskStatus::Open);
    assert!(t1.finished_at.is_none());
    assert_eq!(backend.logs()[0].action, "reopened");
}

#[tokio::test]
async fn notes_round_trip_through_the_log() {
    let backend = Arc::new(MemoryBackend::new().with_clock(Utc::now() - Duration::hours(2)));
    backend.add_task(task("t1", Priority::Medium, ago(180)));
    let mut admin_board = refreshed(&backend, admin()).await;

    admin_board
        .try_save_note(&id("t1"), "hello world")
        .await
        .expect("save note");
    let stored = backend.logs();
    assert_eq!(stored[0].action, "reopened");
    assert_eq!(stored[0].user_email.as_deref(), Some("NOTE|hello%20world"));
    assert_eq!(
        admin_board.notes().note(&id("t1")).map(|n| n.text.as_str()),
        Some("hello world")
    );

    let mut member_board = refreshed(&backend, member()).await;
    assert!(member_board.is_note_new(&id("t1")));
    let note = member_board.open_note(&id("t1")).expect("open").expect("note");
    assert_eq!(note.text, "hello world");
    assert!(!member_board.is_note_new(&id("t1")));
    // Note records never show up as feed activity.
    assert!(member_board.feed().is_empty());

    admin_board.try_delete_note(&id("t1")).await.expect("delete note");
    assert!(admin_board.notes().note(&id("t1")).is_none());
}

#[tokio::test]
async fn global_note_badge_follows_versions() {
    let backend = Arc::new(MemoryBackend::new().with_clock(Utc::now() - Duration::hours(2)));
    let mut admin_board = refreshed(&backend, admin()).await;
    admin_board
        .try_save_global_note("Standup moved to 10:30")
        .await
        .expect("save");

    let mut member_board = refreshed(&backend, member()).await;
    assert!(member_board.is_global_new());
    let note = member_board.open_global_note().expect("open").expect("note");
    assert_eq!(note.text, "Standup moved to 10:30");
    assert!(!member_board.is_global_new());

    member_board.try_refresh().await.expect("refresh");
    assert!(!member_board.is_global_new());

    admin_board.try_save_global_note("Standup cancelled").await.expect("save");
    member_board.try_refresh().await.expect("refresh");
    assert!(member_board.is_global_new());
}

#[tokio::test]
async fn stale_fetch_results_are_dropped() {
    let backend = seeded();
    let mut board = dashboard(&backend, admin());

    let older = board.begin_fetch();
    let newer = board.begin_fetch();
    let snapshot = Snapshot::fetch(backend.as_ref(), 50).await.expect("fetch");
    assert!(board.apply_snapshot(newer, snapshot).expect("apply newer"));
    assert_eq!(board.tasks().len(), 2);

    assert!(!board.apply_snapshot(older, Snapshot::default()).expect("apply older"));
    assert_eq!(board.tasks().len(), 2);
}

#[tokio::test]
async fn refresh_failure_becomes_an_error_notice() {
    let backend = seeded();
    let mut board = dashboard(&backend, admin());
    backend.fail_next(Operation::FetchTasks, Failure::new(401, "JWT expired"));

    let notice = board.refresh().await;
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message.as_deref(), Some("JWT expired"));
    assert!(board.tasks().is_empty());
}

#[tokio::test]
async fn locked_first_page_lists_open_high_tasks_first() {
    let backend = Arc::new(MemoryBackend::new());
    backend.add_task(task("h1", Priority::High, ago(50)));
    backend.add_task(task("h2", Priority::High, ago(40)));
    for n in 0..6 {
        backend.add_task(task(&format!("m{n}"), Priority::Medium, ago(30 - n)));
    }
    let member_board = refreshed(&backend, member()).await;

    let mut query = ViewQuery::default();
    query.select_sort(SortKey::Title);
    let page = member_board.page(&query);
    assert!(page.priority_locked);
    assert_eq!(page.tasks.len(), 5);
    assert_eq!(page.tasks[0].id, id("h2"));
    assert_eq!(page.tasks[1].id, id("h1"));
    assert!(page.tasks[2..].iter().all(|t| t.priority == Priority::Medium));

    let admin_board = refreshed(&backend, admin()).await;
    assert!(!admin_board.page(&query).priority_locked);
}

#[tokio::test]
async fn change_notification_triggers_a_full_refresh() {
    let backend = Arc::new(MemoryBackend::new());
    let mut member_board = refreshed(&backend, member()).await;
    let mut subscription =
        ChangeFeed::new(StdDuration::from_millis(20)).subscribe(member_board.store());
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    let mut admin_board = refreshed(&backend, admin()).await;
    admin_board
        .try_add_task("Remote SRE", "https://jobs.example.com/sre", Priority::High)
        .await
        .expect("add");

    let notification = tokio::time::timeout(StdDuration::from_secs(2), subscription.recv())
        .await
        .expect("notified in time")
        .expect("feed open");
    let notice = member_board.handle_change(notification).await;
    assert!(!notice.is_failure());
    assert_eq!(member_board.tasks().len(), 1);
    assert!(member_board.priority_locked());
    subscription.close();
}

#[tokio::test]
async fn expired_token_is_renewed_while_watching() {
    let backend = Arc::new(MemoryBackend::new().require_session());
    backend.add_task(task("t1", Priority::Medium, ago(30)));
    backend.add_account("member@example.com", "pw", "member-1");
    let session = backend
        .sign_in_password("member@example.com", "pw")
        .await
        .expect("sign in");
    backend.use_session(&session);
    let mut keeper = SessionKeeper::new(session.clone());
    let mut auth_events = backend.auth_events();

    let mut board = refreshed(&backend, member()).await;
    let mut subscription = ChangeFeed::new(StdDuration::from_millis(20)).subscribe(board.store());
    tokio::time::sleep(StdDuration::from_millis(60)).await;

    backend.expire_access_tokens();
    let err = board.try_refresh().await.expect_err("token expired");
    assert!(err.is_unauthorized());

    let notice = board.refresh_renewing(&mut keeper).await;
    assert!(!notice.is_failure(), "{notice}");
    assert_ne!(keeper.session().access_token, session.access_token);
    assert!(matches!(auth_events.recv().await, Ok(AuthEvent::TokenRefreshed)));

    // The poller shares the store, so it is back on a live token too.
    backend.touch(Table::TaskLogs);
    let notification = tokio::time::timeout(StdDuration::from_secs(2), subscription.recv())
        .await
        .expect("notified in time")
        .expect("feed open");
    assert_eq!(notification.table, Table::TaskLogs);
    subscription.close();
}
