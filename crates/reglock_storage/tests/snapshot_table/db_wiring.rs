#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use reglock_kernel_contracts::snapshot::{DirectoryUser, SnapshotLookup, UserId, UserSnapshot};
use reglock_storage::repo::UserSnapshotRepo;
use reglock_storage::snapshot_store::{SnapshotStore, SNAPSHOT_TABLE};
use reglock_storage::StorageError;

fn user(id: u64, login: &str, role: &str) -> DirectoryUser {
    DirectoryUser {
        user_id: UserId(id),
        login: login.to_string(),
        password_hash: format!("$P$B{login}"),
        email: format!("{login}@example.test"),
        registered_at: "2021-06-01 12:00:00".to_string(),
        roles: vec![role.to_string()],
        capabilities: BTreeMap::from([(role.to_string(), true)]),
        effective_capabilities: BTreeMap::from([
            ("read".to_string(), true),
            (role.to_string(), true),
        ]),
    }
}

fn snapshot(id: u64, login: &str, role: &str) -> UserSnapshot {
    let raw = format!("a:1:{{s:{}:\"{}\";b:1;}}", role.len(), role);
    UserSnapshot::capture(&user(id, login, role), raw, "0".to_string(), String::new()).unwrap()
}

#[test]
fn at_snapshot_db_01_insert_requires_schema() {
    let mut store = SnapshotStore::new_in_memory();
    let err = store
        .insert_snapshot_row(1, &snapshot(1, "alice", "administrator"))
        .unwrap_err();
    assert_eq!(
        err,
        StorageError::TableMissing {
            table: SNAPSHOT_TABLE
        }
    );
}

#[test]
fn at_snapshot_db_02_create_schema_is_idempotent_and_keeps_rows() {
    let mut store = SnapshotStore::new_in_memory();
    assert!(store.create_snapshot_schema("1.0.0").unwrap());
    store
        .insert_snapshot_row(1, &snapshot(1, "alice", "administrator"))
        .unwrap();

    assert!(!store.create_snapshot_schema("1.0.0").unwrap());
    assert!(store.create_snapshot_schema("1.1.0").unwrap());
    assert_eq!(store.snapshot_schema_version().as_deref(), Some("1.1.0"));
    assert_eq!(store.snapshot_row_count(), 1);
}

#[test]
fn at_snapshot_db_03_user_id_is_unique_per_generation() {
    let mut store = SnapshotStore::new_in_memory();
    store.create_snapshot_schema("1.0.0").unwrap();
    store
        .insert_snapshot_row(1, &snapshot(5, "erin", "editor"))
        .unwrap();
    let err = store
        .insert_snapshot_row(1, &snapshot(5, "erin", "editor"))
        .unwrap_err();
    assert!(matches!(err, StorageError::DuplicateKey { .. }));

    assert_eq!(store.truncate_snapshot_rows().unwrap(), 1);
    let id = store
        .insert_snapshot_row(2, &snapshot(5, "erin", "editor"))
        .unwrap();
    assert_eq!(id, 2);
}

#[test]
fn at_snapshot_db_04_lookup_decodes_json_columns_and_raw_metadata() {
    let mut store = SnapshotStore::new_in_memory();
    store.create_snapshot_schema("1.0.0").unwrap();
    store
        .insert_snapshot_row(1, &snapshot(2, "bob", "author"))
        .unwrap();

    let row = store.row_for_user(UserId(2)).unwrap();
    assert_eq!(row.roles_json, "[\"author\"]");
    assert_eq!(row.capabilities_raw, "a:1:{s:6:\"author\";b:1;}");

    let decoded = store.snapshot_for_user(UserId(2)).unwrap();
    assert_eq!(decoded, snapshot(2, "bob", "author"));
    assert!(store.snapshot_for_user(UserId(3)).is_none());
}

#[test]
fn at_snapshot_db_05_drop_schema_removes_everything() {
    let mut store = SnapshotStore::new_in_memory();
    store.create_snapshot_schema("1.0.0").unwrap();
    store
        .insert_snapshot_row(1, &snapshot(1, "alice", "administrator"))
        .unwrap();
    assert!(store.drop_snapshot_schema().unwrap());
    assert!(!store.drop_snapshot_schema().unwrap());
    assert!(store.snapshot_schema_version().is_none());
    assert!(!store.has_snapshot_row(UserId(1)));
    assert!(store.snapshot_generation_digest(1).is_err());
}

#[test]
fn at_snapshot_db_06_digest_tracks_row_content() {
    let mut store = SnapshotStore::new_in_memory();
    store.create_snapshot_schema("1.0.0").unwrap();
    store
        .insert_snapshot_row(1, &snapshot(1, "alice", "administrator"))
        .unwrap();
    let before = store.snapshot_generation_digest(1).unwrap();

    store.truncate_snapshot_rows().unwrap();
    store
        .insert_snapshot_row(1, &snapshot(1, "alice", "subscriber"))
        .unwrap();
    assert_ne!(before, store.snapshot_generation_digest(1).unwrap());
}
