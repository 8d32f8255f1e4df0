mod support;

use chrono::{Duration, TimeZone, Utc};
use joblink::activity::decode_batch;
use joblink::model::{Priority, TaskId, TaskStatus};
use joblink::notes::{FreshnessMap, NoteBook};
use joblink::stats::TaskStats;
use joblink::view::{self, PageSize, Tab, ViewQuery};

use support::{finished, log, task};

fn at(secs: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).single().expect("timestamp")
}

#[test]
fn note_followed_by_delete_leaves_no_note() {
    let batch = decode_batch(vec![
        log("1", "reopened", Some("1"), "NOTE|hello%20world", at(10)),
        log("2", "reopened", Some("1"), "NOTE_DELETE", at(20)),
    ]);
    assert!(NoteBook::reconcile(&batch).note(&TaskId::from("1")).is_none());
}

#[test]
fn latest_note_wins_regardless_of_arrival_order() {
    let batch = decode_batch(vec![
        log("2", "reopened", Some("2"), "NOTE|b", at(15)),
        log("1", "reopened", Some("2"), "NOTE|a", at(5)),
    ]);
    let notes = NoteBook::reconcile(&batch);
    assert_eq!(notes.note(&TaskId::from("2")).map(|n| n.text.as_str()), Some("b"));
}

#[test]
fn empty_note_text_counts_as_absent() {
    let batch = decode_batch(vec![
        log("1", "reopened", Some("3"), "NOTE|keep", at(5)),
        log("2", "reopened", Some("3"), "NOTE|", at(15)),
    ]);
    assert!(!NoteBook::reconcile(&batch).has_note(&TaskId::from("3")));
}

#[test]
fn malformed_payloads_never_fail_the_batch() {
    let batch = decode_batch(vec![
        log("1", "reopened", Some("4"), "NOTE|%E0%A4%A", at(5)),
        log("2", "applied", Some("4"), "member@example.com", at(6)),
        log("3", "reopened", None, "NOTE|orphan", at(7)),
    ]);
    assert_eq!(batch.actions.len(), 1);
    let mut freshness = FreshnessMap::new();
    freshness.merge(&batch);
    assert_eq!(freshness.get(&TaskId::from("4")), Some(at(6)));
}

#[test]
fn status_histogram_sums_to_task_count_and_is_stable() {
    let now = Utc::now();
    let tasks = vec![
        task("1", Priority::High, now - Duration::days(3)),
        finished(task("2", Priority::Low, now - Duration::days(2)), now),
        finished(task("3", Priority::Medium, now - Duration::days(40)), now - Duration::days(35)),
        task("4", Priority::Medium, now),
    ];

    let stats = TaskStats::compute(&tasks, &now);
    assert_eq!(stats.total(), tasks.len());
    assert!(stats.finished_today <= stats.finished_this_month);
    assert_eq!(stats.high_priority_open, 1);
    assert_eq!(TaskStats::compute(&tasks, &now), stats);
}

#[test]
fn open_tab_with_high_filter_is_exactly_open_and_high() {
    let now = Utc::now();
    let tasks = vec![
        task("1", Priority::High, now - Duration::hours(5)),
        finished(task("2", Priority::High, now - Duration::hours(4)), now),
        task("3", Priority::Low, now - Duration::hours(3)),
        task("4", Priority::High, now - Duration::hours(2)),
    ];
    let mut query = ViewQuery::default();
    query.set_tab(Tab::Open);
    query.set_priority_filter(Some(Priority::High));
    query.set_page_size(PageSize::new(50).expect("page size"));

    let page = view::render(&tasks, &query, &FreshnessMap::new(), false, &now);
    let ids: Vec<&str> = page.tasks.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["4", "1"]);
    assert!(page
        .tasks
        .iter()
        .all(|t| t.status == TaskStatus::Open && t.priority == Priority::High));
}

#[test]
fn search_changes_neither_page_size_nor_sort() {
    let mut query = ViewQuery::default();
    query.set_page_size(PageSize::new(20).expect("page size"));
    query.set_page(3);
    let (size, sort) = (query.page_size(), query.sort());

    query.set_search("engineer");
    assert_eq!(query.page_size(), size);
    assert_eq!(query.sort(), sort);
    assert_eq!(query.page(), 1);
}
