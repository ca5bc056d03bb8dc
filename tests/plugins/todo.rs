use std::fs;
use tempfile::tempdir;
use wakeguard::core::error::WakeguardError;
use wakeguard::core::schemas;
use wakeguard::plugins::todo::{
    TaskStatus, add_task, block, complete, get_task, initialize_ledger_db, ledger_db_path,
    list_by_status, list_tasks, rebuild_from_events, reopen, supersede,
};

#[test]
fn test_ledger_lifecycle() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    initialize_ledger_db(root).unwrap();

    let id = add_task(root, "Answer the weekly digest").unwrap();
    assert!(id.starts_with("T_"));
    let task = get_task(root, &id).unwrap().expect("task should exist");
    assert_eq!(task.status, TaskStatus::Todo);
    assert_eq!(task.description, "Answer the weekly digest");
    assert!(task.completed_at.is_none());

    let task = complete(root, &id, "sent reply").unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.result_or_reason.as_deref(), Some("sent reply"));
    assert!(task.completed_at.is_some());
}

#[test]
fn test_done_is_terminal() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let id = add_task(root, "finish").unwrap();
    complete(root, &id, "ok").unwrap();

    for err in [
        complete(root, &id, "again").unwrap_err(),
        block(root, &id, "late").unwrap_err(),
        reopen(root, &id).unwrap_err(),
    ] {
        match err {
            WakeguardError::InvalidTransition { from, .. } => assert_eq!(from, "DONE"),
            other => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(get_task(root, &id).unwrap().unwrap().status, TaskStatus::Done);
}

#[test]
fn test_reopen_requires_blocked() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let id = add_task(root, "needs retry").unwrap();

    assert!(matches!(
        reopen(root, &id),
        Err(WakeguardError::InvalidTransition { .. })
    ));
}

#[test]
fn test_block_reopen_complete_keeps_last_result() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let id = add_task(root, "fetch feed").unwrap();

    let task = block(root, &id, "network down").unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    assert_eq!(task.result_or_reason.as_deref(), Some("network down"));

    let task = reopen(root, &id).unwrap();
    assert_eq!(task.status, TaskStatus::Todo);

    let task = complete(root, &id, "fetched 12 items").unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.result_or_reason.as_deref(), Some("fetched 12 items"));
}

#[test]
fn test_unknown_task() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    initialize_ledger_db(root).unwrap();

    assert!(matches!(
        complete(root, "T_NOPE", "x"),
        Err(WakeguardError::UnknownTask(id)) if id == "T_NOPE"
    ));
    assert!(matches!(block(root, "T_NOPE", "x"), Err(WakeguardError::UnknownTask(_))));
    assert!(matches!(reopen(root, "T_NOPE"), Err(WakeguardError::UnknownTask(_))));
    assert!(get_task(root, "T_NOPE").unwrap().is_none());
}

#[test]
fn test_list_by_status_keeps_insertion_order() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let a = add_task(root, "a").unwrap();
    let b = add_task(root, "b").unwrap();
    let c = add_task(root, "c").unwrap();
    let d = add_task(root, "d").unwrap();
    complete(root, &b, "done").unwrap();
    block(root, &c, "waiting").unwrap();

    let ids = |status| -> Vec<String> {
        list_by_status(root, status)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect()
    };
    assert_eq!(ids(TaskStatus::Todo), vec![a.clone(), d.clone()]);
    assert_eq!(ids(TaskStatus::Done), vec![b.clone()]);
    assert_eq!(ids(TaskStatus::Blocked), vec![c.clone()]);

    let all: Vec<_> = list_tasks(root, None).unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(all, vec![a, b, c, d]);
}

#[test]
fn test_supersede_marks_without_erasing() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let old = add_task(root, "draft plan v1").unwrap();
    complete(root, &old, "drafted").unwrap();
    let new = add_task(root, "draft plan v2").unwrap();

    let task = supersede(root, &old, &new).unwrap();
    assert_eq!(task.superseded_by.as_deref(), Some(new.as_str()));
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(list_tasks(root, None).unwrap().len(), 2);

    assert!(matches!(
        supersede(root, &old, &new),
        Err(WakeguardError::InvalidTransition { .. })
    ));
    assert!(matches!(
        supersede(root, &new, &new),
        Err(WakeguardError::InvalidTransition { .. })
    ));
    assert!(matches!(
        supersede(root, &new, "T_MISSING"),
        Err(WakeguardError::UnknownTask(_))
    ));
}

#[test]
fn test_rebuild_from_events_matches_live_ledger() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let a = add_task(root, "a").unwrap();
    let b = add_task(root, "b").unwrap();
    block(root, &a, "stuck").unwrap();
    reopen(root, &a).unwrap();
    complete(root, &a, "unstuck").unwrap();
    supersede(root, &b, &a).unwrap();
    let live = list_tasks(root, None).unwrap();

    fs::remove_file(ledger_db_path(root)).unwrap();
    let replayed = rebuild_from_events(root).unwrap();
    assert_eq!(replayed, 6);
    assert_eq!(list_tasks(root, None).unwrap(), live);
    assert!(!root.join(format!(".{}.tmp", schemas::LEDGER_DB_NAME)).exists());
}

#[test]
fn test_rebuild_without_events_creates_empty_ledger() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    assert_eq!(rebuild_from_events(root).unwrap(), 0);
    assert!(ledger_db_path(root).exists());
    assert!(list_tasks(root, None).unwrap().is_empty());
}

#[test]
fn test_ledger_survives_reopen_of_database() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let id = add_task(root, "persist me").unwrap();
    block(root, &id, "waiting on human").unwrap();

    // A fresh process sees the same state: nothing is cached in memory.
    let task = get_task(root, &id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    let events = fs::read_to_string(root.join(schemas::LEDGER_EVENTS_NAME)).unwrap();
    assert_eq!(events.lines().count(), 2);
    assert!(!root.join("ledger.db-journal").exists());
}

#[test]
fn test_rebuild_without_event_log_keeps_existing_entries() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let id = add_task(root, "keep me").unwrap();
    block(root, &id, "waiting on mail").unwrap();
    fs::remove_file(root.join(schemas::LEDGER_EVENTS_NAME)).unwrap();

    assert_eq!(rebuild_from_events(root).unwrap(), 0);
    let tasks = list_tasks(root, None).unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, id);
    assert_eq!(tasks[0].status, TaskStatus::Blocked);
    assert_eq!(tasks[0].result_or_reason.as_deref(), Some("waiting on mail"));
}

#[test]
fn test_complete_from_blocked_records_result() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let id = add_task(root, "sync calendar").unwrap();
    block(root, &id, "token expired").unwrap();

    let task = complete(root, &id, "synced after refresh").unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.result_or_reason.as_deref(), Some("synced after refresh"));
    assert!(task.completed_at.is_some());
}

#[test]
fn test_block_from_blocked_replaces_reason() {
    let tmp = tempdir().unwrap();
    let root = tmp.path();
    let id = add_task(root, "post summary").unwrap();
    block(root, &id, "rate limited").unwrap();

    let task = block(root, &id, "account suspended").unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);
    assert_eq!(task.result_or_reason.as_deref(), Some("account suspended"));
    assert!(task.completed_at.is_none());
    assert_eq!(list_by_status(root, TaskStatus::Blocked).unwrap().len(), 1);
}
