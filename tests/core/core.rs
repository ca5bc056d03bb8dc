use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Barrier};
use tempfile::tempdir;
use wakeguard::core::broker::{StateBroker, StateLock};
use wakeguard::core::config::{CONFIG_FILE_NAME, WakeguardConfig};
use wakeguard::core::db;
use wakeguard::core::error::WakeguardError;
use wakeguard::core::prompt::{EnvSecret, FixedSecret, SecretProvider};
use wakeguard::core::store::Store;
use wakeguard::core::time;

#[test]
fn store_open_without_config_uses_conventional_layout() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::open(tmp.path()).expect("open");

    assert_eq!(store.root, tmp.path().join("."));
    assert_eq!(store.backups_dir, tmp.path().join("backups"));
    assert_eq!(store.manifest.len(), 5);
    assert_eq!(
        store.core_files,
        vec![PathBuf::from("state.json"), PathBuf::from("index.json")]
    );
    assert_eq!(store.lock_path(), tmp.path().join("backups").join(".wakeguard.lock"));
}

#[test]
fn store_open_resolves_config_paths_against_home() {
    let tmp = tempdir().expect("tempdir");
    fs::write(
        tmp.path().join(CONFIG_FILE_NAME),
        r#"
state_root = "agent"
backups_dir = "/srv/agent-backups"
manifest = ["state.json", "scripts/run.py"]
kdf_iterations = 5000
stale_backup_hours = 6
scheduler_marker = "agent-wake"
mailbox_dir = "mail"
"#,
    )
    .expect("write config");

    let store = Store::open(tmp.path()).expect("open");
    assert_eq!(store.root, tmp.path().join("agent"));
    assert_eq!(store.backups_dir, PathBuf::from("/srv/agent-backups"));
    assert_eq!(
        store.manifest,
        vec![PathBuf::from("state.json"), PathBuf::from("scripts/run.py")]
    );
    assert_eq!(store.kdf_iterations, 5000);
    assert_eq!(store.stale_backup_hours, 6);
    assert_eq!(store.scheduler_marker, "agent-wake");
    assert_eq!(store.mailbox_dir, Some(tmp.path().join("mail")));
}

#[test]
fn config_rejects_unknown_keys_and_bad_values() {
    assert!(matches!(
        WakeguardConfig::parse("passphrase = \"nope\""),
        Err(WakeguardError::TomlError(_))
    ));
    assert!(matches!(
        WakeguardConfig::parse("kdf_iterations = 0"),
        Err(WakeguardError::Config(_))
    ));
    assert!(matches!(
        WakeguardConfig::parse("core_files = [\"/etc/passwd\"]"),
        Err(WakeguardError::Config(_))
    ));
    assert!(matches!(
        WakeguardConfig::parse("manifest = []"),
        Err(WakeguardError::Config(_))
    ));
}

#[test]
fn with_manifest_validates_entries() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path(), tmp.path().join("backups"));
    assert!(store.clone().with_manifest(["a.json", "dir/b.md"]).is_ok());
    assert!(matches!(
        store.with_manifest(["../escape"]),
        Err(WakeguardError::Config(_))
    ));
}

#[test]
fn db_connect_uses_rollback_journal_and_full_sync() {
    let tmp = tempdir().expect("tempdir");
    let conn = db::db_connect(&tmp.path().join("nested/ledger.db")).expect("connect");

    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("journal_mode");
    assert_eq!(mode.to_lowercase(), "delete");
    let sync: i64 = conn
        .query_row("PRAGMA synchronous;", [], |row| row.get(0))
        .expect("synchronous");
    assert_eq!(sync, 2);
}

#[test]
fn broker_lock_blocks_concurrent_operation_across_threads() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path(), tmp.path().join("backups"));
    let lock_path = store.lock_path();

    let held = StateLock::acquire(&lock_path).expect("first lock");
    let barrier = Arc::new(Barrier::new(2));
    let worker = {
        let barrier = Arc::clone(&barrier);
        let store = store.clone();
        std::thread::spawn(move || {
            let result: Result<(), WakeguardError> =
                StateBroker::new(&store).with_lock("test", "backup.create", || Ok(()));
            barrier.wait();
            result
        })
    };
    barrier.wait();
    let result = worker.join().expect("worker thread");
    assert!(matches!(result, Err(WakeguardError::Locked(_))));

    drop(held);
    let ok: Result<u8, WakeguardError> =
        StateBroker::new(&store).with_lock("test", "backup.create", || Ok(1));
    assert_eq!(ok.expect("lock after release"), 1);
}

#[test]
fn broker_audit_log_lives_in_backups_dir() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path().join("state"), tmp.path().join("backups"));
    let broker = StateBroker::new(&store);
    let _: Result<(), WakeguardError> = broker.with_lock("agent", "restore", || Ok(()));

    let events = broker.events().expect("events");
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.actor == "agent" && e.op == "restore"));
    assert!(tmp.path().join("backups/broker.events.jsonl").exists());
    assert!(!tmp.path().join("state").exists());
}

#[test]
fn secret_providers() {
    let fixed = FixedSecret("correct-horse".to_string())
        .passphrase("backup")
        .expect("fixed");
    assert_eq!(fixed.expose(), b"correct-horse");

    let missing = EnvSecret {
        var: "WAKEGUARD_CORE_TEST_UNSET_PASSPHRASE".to_string(),
    };
    assert!(matches!(
        missing.passphrase("backup"),
        Err(WakeguardError::Config(_))
    ));
}

#[test]
fn command_envelope_merges_fields() {
    let env = time::command_envelope("backup.create", "ok", serde_json::json!({ "files": 3 }));
    assert_eq!(env["cmd"], "backup.create");
    assert_eq!(env["status"], "ok");
    assert_eq!(env["files"], 3);
    assert!(env["ts"].as_str().expect("ts").ends_with('Z'));
}
