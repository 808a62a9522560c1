#![forbid(unsafe_code)]

use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value;
use tracing::{debug, error, info, warn};

use reglock_engines::drift::DriftAuditRuntime;
use reglock_engines::lock_enforcer::{LockEnforcer, LockedRole, SettingInterceptor};
use reglock_engines::mutation_guard::{MutationGuardConfig, MutationGuardRuntime, UserMutationGuard};
use reglock_kernel_contracts::lockcfg::{LockBaseline, LockConfig, SetupState};
use reglock_kernel_contracts::notice::Notice;
use reglock_kernel_contracts::settings::{
    display_value, SETTING_DEFAULT_ROLE, SETTING_USERS_CAN_REGISTER,
};
use reglock_kernel_contracts::snapshot::UserSnapshot;
use reglock_kernel_contracts::version::PluginVersion;
use reglock_kernel_contracts::{ContractViolation, UnixTimeSecs, Validate};
use reglock_storage::config_store::ConfigStore;
use reglock_storage::lock_options::LockOptions;
use reglock_storage::repo::UserSnapshotRepo;
use reglock_storage::StorageError;

use crate::config::RegLockConfig;
use crate::drift_audit::{read_site_identity, DriftAuditWiring, UserDriftAudit};
use crate::guard_wiring::SnapshotBackedGuard;
use crate::host::{Host, HostError, UserDirectory};
use crate::interceptors::InterceptorSuspension;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LifecycleError {
    #[error("contract violation: {0:?}")]
    ContractViolation(ContractViolation),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Host(#[from] HostError),
    #[error("snapshot store lock poisoned")]
    SnapshotLockPoisoned,
}

impl From<ContractViolation> for LifecycleError {
    fn from(v: ContractViolation) -> Self {
        LifecycleError::ContractViolation(v)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Baseline captured and every setup step completed.
    Installed,
    /// An interrupted setup was finished without recapturing the baseline.
    Resumed,
    /// Setup after a deactivation; baseline recaptured, new snapshot generation.
    Reinstalled,
    /// LockConfig already existed and was active (or was created concurrently).
    AlreadyPresent,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestReport {
    pub setup: Option<SetupOutcome>,
    pub migrated: bool,
    /// `None` when no audit was due.
    pub audit: Option<Vec<Notice>>,
    /// Steps that failed this request. The lock is enforced regardless.
    pub failures: Vec<LifecycleError>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub interceptors_removed: bool,
    pub role_removed: bool,
    pub restored_settings: Vec<String>,
    pub snapshot_rows_cleared: usize,
}

/// Setup, migration, per-request wiring and teardown of the registration lock.
pub struct LifecycleRuntime<C, S> {
    version: PluginVersion,
    options: LockOptions,
    meta_keys: MutationGuardConfig,
    registration_disabled_value: Value,
    enforcer: Arc<LockEnforcer>,
    guard: Arc<SnapshotBackedGuard<S>>,
    audit: DriftAuditWiring,
    store: C,
    snapshots: Arc<RwLock<S>>,
}

impl<C, S> LifecycleRuntime<C, S>
where
    C: ConfigStore,
    S: UserSnapshotRepo + Send + Sync + 'static,
{
    pub fn new(config: RegLockConfig, store: C, snapshots: S) -> Result<Self, LifecycleError> {
        config.validate()?;
        let version = config.plugin_version()?;
        let enforcer = Arc::new(LockEnforcer::new(config.lock_enforcer.clone())?);
        let guard_runtime = MutationGuardRuntime::new(config.mutation_guard.clone())?;
        let drift = DriftAuditRuntime::new(config.drift_audit.clone(), enforcer.locked_role())?;
        let snapshots = Arc::new(RwLock::new(snapshots));
        Ok(Self {
            version,
            options: LockOptions::new(config.option_name.clone()),
            meta_keys: config.mutation_guard.clone(),
            registration_disabled_value: config.drift_audit.registration_disabled_value.clone(),
            enforcer,
            guard: Arc::new(SnapshotBackedGuard::new(guard_runtime, Arc::clone(&snapshots))),
            audit: DriftAuditWiring::new(drift),
            store,
            snapshots,
        })
    }

    pub fn with_user_drift_audit(mut self, user_audit: Box<dyn UserDriftAudit>) -> Self {
        self.audit = self.audit.with_user_audit(user_audit);
        self
    }

    pub fn store(&self) -> &C {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut C {
        &mut self.store
    }

    pub fn snapshots(&self) -> Arc<RwLock<S>> {
        Arc::clone(&self.snapshots)
    }

    pub fn lock_config(&self) -> Result<Option<LockConfig>, LifecycleError> {
        Ok(self.options.load(&self.store)?)
    }

    /// Per-request entry point. The interceptor and guard go in first and stay
    /// in whatever fails afterwards; setup, role and audit failures are logged
    /// and returned in the report.
    pub fn on_request<H: Host + ?Sized>(&mut self, host: &mut H, now: UnixTimeSecs) -> RequestReport {
        self.install_interceptors(host);
        let mut report = RequestReport::default();
        if let Err(err) = self.engage(host, now, &mut report) {
            error!(error = %err, "registration lock setup failed; enforcing without it");
            report.failures.push(err);
        }
        if let Err(err) = self.add_locked_role(host) {
            error!(error = %err, "locked role could not be registered");
            report.failures.push(err);
        }
        match self.run_audit_if_due(host, now) {
            Ok(audit) => report.audit = audit,
            Err(err) => {
                error!(error = %err, "drift audit could not run");
                report.failures.push(err);
            }
        }
        report
    }

    /// Finish or start setup, or bring markers up to date.
    fn engage<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        now: UnixTimeSecs,
        report: &mut RequestReport,
    ) -> Result<(), LifecycleError> {
        match self.options.load(&self.store)? {
            None => report.setup = Some(self.setup(host, now)?),
            Some(cfg) => match cfg.setup_state {
                SetupState::SetupInProgress => {
                    self.complete_setup(host, cfg, now)?;
                    report.setup = Some(SetupOutcome::Resumed);
                }
                SetupState::Deactivated => {
                    self.reinstall(host, cfg, now)?;
                    report.setup = Some(SetupOutcome::Reinstalled);
                }
                SetupState::Active => {
                    report.migrated = self.migrate_if_needed(cfg)?.1;
                }
            },
        }
        Ok(())
    }

    /// First-run setup. Does nothing when LockConfig already exists, except
    /// finishing a setup that was interrupted.
    pub fn setup<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        now: UnixTimeSecs,
    ) -> Result<SetupOutcome, LifecycleError> {
        if let Some(cfg) = self.options.load(&self.store)? {
            if cfg.setup_state == SetupState::SetupInProgress {
                self.complete_setup(host, cfg, now)?;
                return Ok(SetupOutcome::Resumed);
            }
            return Ok(SetupOutcome::AlreadyPresent);
        }
        let baseline = capture_baseline(host);
        let cfg = LockConfig::begin_setup(&self.version, baseline);
        if !self.options.create_if_absent(&mut self.store, &cfg)? {
            info!("lock config created by a concurrent caller; baseline capture skipped");
            return Ok(SetupOutcome::AlreadyPresent);
        }
        info!(version = %self.version, "registration lock baseline captured");
        self.complete_setup(host, cfg, now)?;
        Ok(SetupOutcome::Installed)
    }

    /// Activation hook. Same steps as setup; also re-engages the lock after a
    /// deactivation and re-forces the lock settings when already active.
    pub fn activate<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        now: UnixTimeSecs,
    ) -> Result<SetupOutcome, LifecycleError> {
        let Some(cfg) = self.options.load(&self.store)? else {
            return self.setup(host, now);
        };
        match cfg.setup_state {
            SetupState::SetupInProgress => {
                self.complete_setup(host, cfg, now)?;
                Ok(SetupOutcome::Resumed)
            }
            SetupState::Deactivated => {
                self.reinstall(host, cfg, now)?;
                Ok(SetupOutcome::Reinstalled)
            }
            SetupState::Active => {
                self.migrate_if_needed(cfg)?;
                self.force_lock_settings(host)?;
                Ok(SetupOutcome::AlreadyPresent)
            }
        }
    }

    /// Brings `schema_version` and `db_schema_version` up to the running
    /// version. Returns whether anything was migrated.
    pub fn ensure_current_version(&mut self) -> Result<bool, LifecycleError> {
        match self.options.load(&self.store)? {
            None => Ok(false),
            Some(cfg) => Ok(self.migrate_if_needed(cfg)?.1),
        }
    }

    /// Interceptors and guard come off first so that the restore writes are
    /// not intercepted. Every step is attempted; the first failure is returned.
    pub fn teardown<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        restore: bool,
    ) -> Result<TeardownReport, LifecycleError> {
        let mut report = TeardownReport::default();
        let mut first_error: Option<LifecycleError> = None;
        let mut record = |err: LifecycleError, step: &'static str| {
            error!(step, error = %err, "teardown step failed");
            first_error.get_or_insert(err);
        };

        report.interceptors_removed = InterceptorSuspension::begin(host).release().is_some();
        host.remove_user_guard();

        if let LockedRole::Dedicated { name, .. } = self.enforcer.locked_role() {
            match host.remove_role(name) {
                Ok(removed) => report.role_removed = removed,
                Err(err) => record(err.into(), "remove_role"),
            }
        }

        let cfg = match self.options.load(&self.store) {
            Ok(cfg) => cfg,
            Err(err) => {
                record(err.into(), "load_lock_config");
                None
            }
        };

        if restore {
            if let Some(cfg) = &cfg {
                let saved = [
                    (SETTING_USERS_CAN_REGISTER, &cfg.baseline.users_can_register),
                    (SETTING_DEFAULT_ROLE, &cfg.baseline.default_role),
                ];
                for (key, value) in saved {
                    // Absent baseline: the host had no value, leave it alone.
                    let Some(value) = value else { continue };
                    match host.write_setting(key, value.clone()) {
                        Ok(()) => report.restored_settings.push(key.to_string()),
                        Err(err) => record(err.into(), "restore_setting"),
                    }
                }
            }
        }

        match self.snapshots.write() {
            Ok(mut repo) => match repo.truncate_snapshot_rows() {
                Ok(n) => report.snapshot_rows_cleared = n,
                Err(err) => record(err.into(), "truncate_snapshots"),
            },
            Err(_) => record(LifecycleError::SnapshotLockPoisoned, "truncate_snapshots"),
        }

        if let Some(mut cfg) = cfg {
            cfg.setup_state = SetupState::Deactivated;
            cfg.snapshot_digest = None;
            if let Err(err) = self.options.save(&mut self.store, &cfg) {
                record(err.into(), "save_lock_config");
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => {
                info!(
                    restore,
                    rows = report.snapshot_rows_cleared,
                    "registration lock torn down"
                );
                Ok(report)
            }
        }
    }

    pub fn deactivate<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<TeardownReport, LifecycleError> {
        self.teardown(host, true)
    }

    /// Teardown with restore, then drop the snapshot table and the LockConfig
    /// entry. Removal still happens when teardown reported a failure.
    pub fn purge<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<(), LifecycleError> {
        let teardown = self.teardown(host, true);
        {
            let mut repo = self
                .snapshots
                .write()
                .map_err(|_| LifecycleError::SnapshotLockPoisoned)?;
            repo.drop_snapshot_schema()?;
        }
        self.options.delete_all(&mut self.store)?;
        info!("registration lock purged");
        teardown.map(|_| ())
    }

    pub fn uninstall<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<(), LifecycleError> {
        self.purge(host)
    }

    /// Runs the drift audit when the interval has elapsed and records the run
    /// time. Only an active lock is audited. A run time that cannot be saved
    /// becomes a notice; the notices are still returned.
    pub fn run_audit_if_due<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        now: UnixTimeSecs,
    ) -> Result<Option<Vec<Notice>>, LifecycleError> {
        let Some(cfg) = self.options.load(&self.store)? else {
            return Ok(None);
        };
        if cfg.setup_state != SetupState::Active || !self.audit.runtime().is_due(&cfg, now) {
            return Ok(None);
        }
        let mut notices = {
            let repo = self.snapshots.read().unwrap_or_else(|poisoned| {
                warn!("snapshot store lock poisoned; auditing current contents");
                PoisonError::into_inner(poisoned)
            });
            self.audit.run_audit(host, &cfg, &*repo)
        };
        if let Err(err) = self
            .options
            .update(&mut self.store, |c| c.last_audit_run = Some(now))
        {
            error!(error = %err, "drift audit run time could not be saved");
            notices.push(self.audit.runtime().audit_run_unrecorded(&err.to_string()));
        }
        info!(notices = notices.len(), now = now.0, "drift audit completed");
        Ok(Some(notices))
    }

    fn complete_setup<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        mut cfg: LockConfig,
        now: UnixTimeSecs,
    ) -> Result<LockConfig, LifecycleError> {
        self.force_lock_settings(host)?;
        {
            let mut repo = self
                .snapshots
                .write()
                .map_err(|_| LifecycleError::SnapshotLockPoisoned)?;
            repo.create_snapshot_schema(self.version.as_str())?;
            cfg.db_schema_version = Some(self.version.to_string());
            let inserted = self.populate_snapshots(&mut *repo, &*host, cfg.snapshot_generation)?;
            cfg.snapshot_digest = Some(repo.snapshot_generation_digest(cfg.snapshot_generation)?);
            debug!(inserted, generation = cfg.snapshot_generation, "user snapshots captured");
        }
        cfg.last_audit_run = Some(now);
        cfg.setup_state = SetupState::Active;
        self.options.save(&mut self.store, &cfg)?;
        info!(
            generation = cfg.snapshot_generation,
            "registration lock active"
        );
        Ok(cfg)
    }

    fn reinstall<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        previous: LockConfig,
        now: UnixTimeSecs,
    ) -> Result<LockConfig, LifecycleError> {
        let baseline = capture_baseline(host);
        let mut cfg = LockConfig::begin_setup(&self.version, baseline);
        cfg.snapshot_generation = previous.snapshot_generation.saturating_add(1);
        cfg.extra = previous.extra;
        {
            let mut repo = self
                .snapshots
                .write()
                .map_err(|_| LifecycleError::SnapshotLockPoisoned)?;
            repo.truncate_snapshot_rows()?;
        }
        self.options.save(&mut self.store, &cfg)?;
        info!(
            generation = cfg.snapshot_generation,
            "registration lock re-engaged; baseline recaptured"
        );
        self.complete_setup(host, cfg, now)
    }

    fn migrate_if_needed(&mut self, mut cfg: LockConfig) -> Result<(LockConfig, bool), LifecycleError> {
        if !cfg.needs_migration(&self.version) {
            return Ok((cfg, false));
        }
        let from_schema = cfg.schema_version.clone();
        let from_db = cfg.db_schema_version.clone();
        if self.version.supersedes(cfg.db_schema_version.as_deref()) {
            let mut repo = self
                .snapshots
                .write()
                .map_err(|_| LifecycleError::SnapshotLockPoisoned)?;
            repo.create_snapshot_schema(self.version.as_str())?;
            cfg.db_schema_version = Some(self.version.to_string());
        }
        if self.version.supersedes(cfg.schema_version.as_deref()) {
            cfg.schema_version = Some(self.version.to_string());
        }
        self.options.save(&mut self.store, &cfg)?;
        info!(
            from_version = ?from_schema,
            from_db_version = ?from_db,
            to = %self.version,
            "lock config migrated"
        );
        Ok((cfg, true))
    }

    fn force_lock_settings<H: Host + ?Sized>(&self, host: &mut H) -> Result<(), LifecycleError> {
        let mut suspended = InterceptorSuspension::begin(host);
        suspended.write_setting(
            SETTING_USERS_CAN_REGISTER,
            self.registration_disabled_value.clone(),
        )?;
        suspended.write_setting(
            SETTING_DEFAULT_ROLE,
            Value::String(self.enforcer.locked_role().name().to_string()),
        )?;
        Ok(())
    }

    /// Inserts a row for every directory user that does not have one yet.
    fn populate_snapshots<H: UserDirectory + ?Sized>(
        &self,
        repo: &mut S,
        host: &H,
        generation: u32,
    ) -> Result<usize, LifecycleError> {
        let mut inserted = 0;
        for user in host.all_users()? {
            if repo.has_snapshot_row(user.user_id) {
                continue;
            }
            let raw = |key: &str| display_value(host.user_meta(user.user_id, key).as_ref());
            let snapshot = match UserSnapshot::capture(
                &user,
                raw(&self.meta_keys.capabilities_meta_key),
                raw(&self.meta_keys.privilege_level_meta_key),
                raw(&self.meta_keys.force_ssl_meta_key),
            ) {
                Ok(s) => s,
                Err(v) => {
                    // Without a row every later change to this user is rejected.
                    warn!(user_id = user.user_id.0, violation = ?v, "user skipped from snapshot");
                    continue;
                }
            };
            repo.insert_snapshot_row(generation, &snapshot)?;
            inserted += 1;
        }
        Ok(inserted)
    }

    fn add_locked_role<H: Host + ?Sized>(&self, host: &mut H) -> Result<(), LifecycleError> {
        if let LockedRole::Dedicated { name, display_name } = self.enforcer.locked_role() {
            if host.add_role(name, display_name)? {
                debug!(role = name.as_str(), "locked role registered");
            }
        }
        Ok(())
    }

    fn install_interceptors<H: Host + ?Sized>(&self, host: &mut H) {
        let interceptor: Arc<dyn SettingInterceptor> = self.enforcer.clone();
        host.install_setting_interceptor(interceptor);
        let guard: Arc<dyn UserMutationGuard> = self.guard.clone();
        host.install_user_guard(guard);
    }
}

/// Pre-lock values, read with interceptors suspended.
fn capture_baseline<H: Host + ?Sized>(host: &mut H) -> LockBaseline {
    let suspended = InterceptorSuspension::begin(host);
    let read = |key: &str| suspended.read_setting(key).ok().flatten();
    let users_can_register = read(SETTING_USERS_CAN_REGISTER);
    let default_role = read(SETTING_DEFAULT_ROLE);
    read_site_identity(&*suspended).into_baseline(users_can_register, default_role)
}
