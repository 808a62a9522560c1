#![forbid(unsafe_code)]

use serde_json::json;

use reglock_kernel_contracts::lockcfg::{LockBaseline, LockConfig, SetupState};
use reglock_kernel_contracts::version::PluginVersion;
use reglock_kernel_contracts::UnixTimeSecs;
use reglock_storage::config_store::{ConfigStore, InMemoryConfigStore};
use reglock_storage::lock_options::LockOptions;
use reglock_storage::StorageError;

fn options() -> LockOptions {
    LockOptions::new("user-registration-lock")
}

fn fresh_config() -> LockConfig {
    LockConfig::begin_setup(
        &PluginVersion::new("1.0.0").unwrap(),
        LockBaseline {
            users_can_register: Some(json!("1")),
            default_role: Some(json!("author")),
            ..LockBaseline::default()
        },
    )
}

#[test]
fn at_lock_options_01_create_if_absent_only_wins_once() {
    let mut store = InMemoryConfigStore::new_in_memory();
    assert!(options().create_if_absent(&mut store, &fresh_config()).unwrap());

    let mut second = fresh_config();
    second.baseline.default_role = Some(json!("registration-locked"));
    assert!(!options().create_if_absent(&mut store, &second).unwrap());

    let loaded = options().load(&store).unwrap().unwrap();
    assert_eq!(loaded.baseline.default_role, Some(json!("author")));
}

#[test]
fn at_lock_options_02_state_lives_in_one_entry() {
    let mut store = InMemoryConfigStore::new_in_memory();
    options().create_if_absent(&mut store, &fresh_config()).unwrap();
    assert_eq!(store.entries().len(), 1);
    let raw = store.get("user-registration-lock").unwrap().unwrap();
    assert_eq!(raw["version"], json!("1.0.0"));
    assert_eq!(raw["save_users_can_register"], json!("1"));
}

#[test]
fn at_lock_options_03_unchanged_save_does_not_write() {
    let mut store = InMemoryConfigStore::new_in_memory();
    let cfg = fresh_config();
    options().create_if_absent(&mut store, &cfg).unwrap();
    let writes = store.write_count();
    assert!(!options().save(&mut store, &cfg).unwrap());
    assert_eq!(store.write_count(), writes);
}

#[test]
fn at_lock_options_04_update_only_touches_existing_entry() {
    let mut store = InMemoryConfigStore::new_in_memory();
    let none = options()
        .update(&mut store, |c| c.last_audit_run = Some(UnixTimeSecs(5)))
        .unwrap();
    assert!(none.is_none());
    assert!(store.entries().is_empty());

    options().create_if_absent(&mut store, &fresh_config()).unwrap();
    let updated = options()
        .update(&mut store, |c| {
            c.last_audit_run = Some(UnixTimeSecs(5));
            c.setup_state = SetupState::Active;
        })
        .unwrap()
        .unwrap();
    assert_eq!(updated.last_audit_run, Some(UnixTimeSecs(5)));
    assert_eq!(
        options().load(&store).unwrap().unwrap().setup_state,
        SetupState::Active
    );
}

#[test]
fn at_lock_options_05_corrupted_entry_is_a_contract_violation() {
    let mut store = InMemoryConfigStore::new_in_memory();
    store.set("user-registration-lock", json!("oops")).unwrap();
    assert!(matches!(
        options().load(&store),
        Err(StorageError::ContractViolation(_))
    ));
}

#[test]
fn at_lock_options_06_delete_all_removes_entry() {
    let mut store = InMemoryConfigStore::new_in_memory();
    options().create_if_absent(&mut store, &fresh_config()).unwrap();
    assert!(options().delete_all(&mut store).unwrap());
    assert!(options().load(&store).unwrap().is_none());
    assert!(!options().delete_all(&mut store).unwrap());
}

#[test]
fn at_lock_options_07_failing_store_rejects_writes_but_still_reads() {
    let mut store = InMemoryConfigStore::new_in_memory();
    options().create_if_absent(&mut store, &fresh_config()).unwrap();
    store.set_writes_failing(true);

    let now = UnixTimeSecs(1_700_000_000);
    assert!(matches!(
        options().update(&mut store, |c| c.last_audit_run = Some(now)),
        Err(StorageError::Unavailable(_))
    ));
    assert!(matches!(
        options().delete_all(&mut store),
        Err(StorageError::Unavailable(_))
    ));
    let loaded = options().load(&store).unwrap().unwrap();
    assert_eq!(loaded.last_audit_run, None);

    store.set_writes_failing(false);
    options()
        .update(&mut store, |c| c.last_audit_run = Some(now))
        .unwrap();
    assert_eq!(options().load(&store).unwrap().unwrap().last_audit_run, Some(now));
}
