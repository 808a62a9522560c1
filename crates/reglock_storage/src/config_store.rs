#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde_json::Value;

use crate::StorageError;

/// Host key/value configuration store. Each call is assumed atomic.
pub trait ConfigStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError>;
    /// Returns whether an entry was removed.
    fn delete(&mut self, key: &str) -> Result<bool, StorageError>;
    /// Conditional create. Returns `false` without writing when the key exists.
    fn insert_if_absent(&mut self, key: &str, value: Value) -> Result<bool, StorageError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InMemoryConfigStore {
    entries: BTreeMap<String, Value>,
    writes: u64,
    writes_failing: bool,
}

impl InMemoryConfigStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// Number of mutating calls that changed the store.
    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    /// While set, every mutating call fails with `Unavailable`. Reads still work.
    pub fn set_writes_failing(&mut self, failing: bool) {
        self.writes_failing = failing;
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.writes_failing {
            return Err(StorageError::Unavailable("config store rejected the write".to_string()));
        }
        Ok(())
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        self.check_writable()?;
        self.entries.insert(key.to_string(), value);
        self.writes += 1;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<bool, StorageError> {
        self.check_writable()?;
        let removed = self.entries.remove(key).is_some();
        if removed {
            self.writes += 1;
        }
        Ok(removed)
    }

    fn insert_if_absent(&mut self, key: &str, value: Value) -> Result<bool, StorageError> {
        self.check_writable()?;
        if self.entries.contains_key(key) {
            return Ok(false);
        }
        self.entries.insert(key.to_string(), value);
        self.writes += 1;
        Ok(true)
    }
}
