#![forbid(unsafe_code)]

use reglock_kernel_contracts::lockcfg::LockConfig;

use crate::config_store::ConfigStore;
use crate::StorageError;

/// Typed view of the single ConfigStore entry that holds the lock's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockOptions {
    option_name: String,
}

impl LockOptions {
    pub fn new(option_name: impl Into<String>) -> Self {
        Self {
            option_name: option_name.into(),
        }
    }

    pub fn option_name(&self) -> &str {
        &self.option_name
    }

    pub fn load<C: ConfigStore + ?Sized>(
        &self,
        store: &C,
    ) -> Result<Option<LockConfig>, StorageError> {
        match store.get(&self.option_name)? {
            None => Ok(None),
            Some(value) => Ok(Some(LockConfig::from_value(value)?)),
        }
    }

    /// Atomic first write. `false` means another caller created it first.
    pub fn create_if_absent<C: ConfigStore + ?Sized>(
        &self,
        store: &mut C,
        cfg: &LockConfig,
    ) -> Result<bool, StorageError> {
        store.insert_if_absent(&self.option_name, cfg.to_value()?)
    }

    /// Writes `cfg` unless the stored entry is already identical.
    pub fn save<C: ConfigStore + ?Sized>(
        &self,
        store: &mut C,
        cfg: &LockConfig,
    ) -> Result<bool, StorageError> {
        let value = cfg.to_value()?;
        if store.get(&self.option_name)?.as_ref() == Some(&value) {
            return Ok(false);
        }
        store.set(&self.option_name, value)?;
        Ok(true)
    }

    /// Read-modify-write of an existing entry. Returns the updated record, or
    /// `None` when no entry exists (nothing is created).
    pub fn update<C, F>(&self, store: &mut C, f: F) -> Result<Option<LockConfig>, StorageError>
    where
        C: ConfigStore + ?Sized,
        F: FnOnce(&mut LockConfig),
    {
        let Some(mut cfg) = self.load(store)? else {
            return Ok(None);
        };
        f(&mut cfg);
        self.save(store, &cfg)?;
        Ok(Some(cfg))
    }

    pub fn delete_all<C: ConfigStore + ?Sized>(&self, store: &mut C) -> Result<bool, StorageError> {
        store.delete(&self.option_name)
    }
}
