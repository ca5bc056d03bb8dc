use std::fs;
use std::path::Path;
use tempfile::tempdir;
use wakeguard::core::broker::StateLock;
use wakeguard::core::error::WakeguardError;
use wakeguard::core::prompt::Passphrase;
use wakeguard::core::store::Store;
use wakeguard::plugins::backup::{
    self, create_backup, find_artifacts, is_backup_artifact, list_backups, verify_backup,
};
use wakeguard::plugins::{archive, crypto};

fn seeded_store(home: &Path) -> Store {
    fs::write(home.join("state.json"), "{\"v\":1}").unwrap();
    fs::write(home.join("index.json"), "[\"state.json\"]").unwrap();
    fs::write(home.join("IDENTITY.md"), "# who").unwrap();
    Store::new(home, home.join("backups")).with_kdf_iterations(1_000)
}

fn snapshot_dir(dir: &Path) -> Vec<(String, Vec<u8>)> {
    let mut out: Vec<_> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.is_file())
        .map(|p| {
            (
                p.file_name().unwrap().to_string_lossy().to_string(),
                fs::read(&p).unwrap(),
            )
        })
        .collect();
    out.sort();
    out
}

#[test]
fn test_create_backup_writes_self_contained_artifact() {
    let tmp = tempdir().unwrap();
    let store = seeded_store(tmp.path());
    let passphrase = Passphrase::new("correct-horse");

    let record = create_backup(&store, &passphrase).unwrap();
    assert!(is_backup_artifact(&record.file));
    assert_eq!(record.files, 3);

    let artifact = store.backups_dir.join(&record.file);
    let sealed = fs::read(&artifact).unwrap();
    assert_eq!(record.bytes, sealed.len() as u64);
    assert_eq!(record.sha256, backup::hash_bytes(&sealed));

    let plain = crypto::decrypt(&sealed, &passphrase).unwrap();
    assert_eq!(
        archive::read_entry(&plain, "state.json").unwrap().as_deref(),
        Some(&b"{\"v\":1}"[..])
    );
    // The backups directory sits inside the state root but is never archived.
    let listing = archive::validate(&plain).unwrap();
    assert!(!listing.entries.iter().any(|e| e.path.starts_with("backups")));
}

#[test]
fn test_create_backup_does_not_modify_state_root() {
    let tmp = tempdir().unwrap();
    let home = tmp.path().join("home");
    fs::create_dir_all(&home).unwrap();
    let store = Store::new(&home, tmp.path().join("backups")).with_kdf_iterations(1_000);
    fs::write(home.join("state.json"), "{\"v\":1}").unwrap();
    fs::write(home.join("index.json"), "[]").unwrap();

    let before = snapshot_dir(&home);
    create_backup(&store, &Passphrase::new("correct-horse")).unwrap();
    assert_eq!(snapshot_dir(&home), before);
}

#[test]
fn test_failed_backup_leaves_no_artifact_and_no_record() {
    let tmp = tempdir().unwrap();
    let store = seeded_store(tmp.path()).with_kdf_iterations(0);

    let err = create_backup(&store, &Passphrase::new("correct-horse")).unwrap_err();
    assert!(matches!(err, WakeguardError::Config(_)));
    assert!(find_artifacts(&store.backups_dir, is_backup_artifact).unwrap().is_empty());
    assert!(backup::read_records(&store).unwrap().is_empty());
    let leftovers: Vec<_> = fs::read_dir(&store.backups_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(".partial-"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn test_backup_refused_while_state_is_locked() {
    let tmp = tempdir().unwrap();
    let store = seeded_store(tmp.path());
    let _held = StateLock::acquire(&store.lock_path()).unwrap();

    let err = create_backup(&store, &Passphrase::new("correct-horse")).unwrap_err();
    assert!(matches!(err, WakeguardError::Locked(_)));
    assert!(find_artifacts(&store.backups_dir, is_backup_artifact).unwrap().is_empty());
}

#[test]
fn test_list_backups_merges_index_and_disk() {
    let tmp = tempdir().unwrap();
    let store = seeded_store(tmp.path());
    let passphrase = Passphrase::new("correct-horse");

    let first = create_backup(&store, &passphrase).unwrap();
    let second = create_backup(&store, &passphrase).unwrap();
    assert!(first.file < second.file);

    fs::write(
        store.backups_dir.join("backup-20200101T000000000Z.tar.zst.enc"),
        b"copied in by hand",
    )
    .unwrap();
    fs::remove_file(store.backups_dir.join(&first.file)).unwrap();

    let listed = list_backups(&store).unwrap();
    assert_eq!(listed.len(), 3);
    assert_eq!(listed[0].file, "backup-20200101T000000000Z.tar.zst.enc");
    assert!(!listed[0].recorded && listed[0].present && listed[0].sha256.is_none());
    let gone = listed.iter().find(|b| b.file == first.file).unwrap();
    assert!(gone.recorded && !gone.present);
    let kept = listed.iter().find(|b| b.file == second.file).unwrap();
    assert!(kept.recorded && kept.present);
}

#[test]
fn test_verify_backup_round_trip_and_drift() {
    let tmp = tempdir().unwrap();
    let store = seeded_store(tmp.path());
    let passphrase = Passphrase::new("correct-horse");
    let record = create_backup(&store, &passphrase).unwrap();
    let artifact = store.backups_dir.join(&record.file);

    let check = verify_backup(&store, &artifact, &passphrase).unwrap();
    assert!(check.passed());
    assert_eq!(check.hash_matches(), Some(true));
    assert_eq!(check.matched, vec!["state.json", "index.json", "IDENTITY.md"]);

    fs::write(tmp.path().join("state.json"), "{\"v\":2}").unwrap();
    fs::write(tmp.path().join("experience.py"), "print('new')").unwrap();
    let check = verify_backup(&store, &artifact, &passphrase).unwrap();
    assert!(!check.passed());
    assert_eq!(check.mismatched, vec!["state.json"]);
    assert_eq!(check.missing, vec!["experience.py"]);
}

#[test]
fn test_verify_backup_detects_tampering_and_wrong_passphrase() {
    let tmp = tempdir().unwrap();
    let store = seeded_store(tmp.path());
    let passphrase = Passphrase::new("correct-horse");
    let record = create_backup(&store, &passphrase).unwrap();
    let artifact = store.backups_dir.join(&record.file);

    assert!(matches!(
        verify_backup(&store, &artifact, &Passphrase::new("wrong")),
        Err(WakeguardError::WrongPassphraseOrCorrupt)
    ));

    let mut bytes = fs::read(&artifact).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    fs::write(&artifact, &bytes).unwrap();
    assert!(matches!(
        verify_backup(&store, &artifact, &passphrase),
        Err(WakeguardError::WrongPassphraseOrCorrupt)
    ));
}
