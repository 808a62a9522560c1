#![forbid(unsafe_code)]

use reglock_kernel_contracts::snapshot::{SnapshotLookup, UserId, UserSnapshot};

use crate::snapshot_store::SnapshotStore;
use crate::StorageError;

/// Typed repository interface for the user snapshot table. Lifecycle code is
/// the only writer; guards only see the `SnapshotLookup` supertrait.
pub trait UserSnapshotRepo: SnapshotLookup {
    fn create_snapshot_schema(&mut self, shape_version: &str) -> Result<bool, StorageError>;
    fn drop_snapshot_schema(&mut self) -> Result<bool, StorageError>;
    fn snapshot_schema_version(&self) -> Option<String>;

    fn insert_snapshot_row(
        &mut self,
        generation: u32,
        snapshot: &UserSnapshot,
    ) -> Result<u64, StorageError>;
    fn has_snapshot_row(&self, user_id: UserId) -> bool;
    fn snapshot_row_count(&self) -> usize;
    fn truncate_snapshot_rows(&mut self) -> Result<usize, StorageError>;
    fn snapshot_generation_digest(&self, generation: u32) -> Result<String, StorageError>;
}

impl UserSnapshotRepo for SnapshotStore {
    fn create_snapshot_schema(&mut self, shape_version: &str) -> Result<bool, StorageError> {
        Ok(self.create_schema(shape_version))
    }

    fn drop_snapshot_schema(&mut self) -> Result<bool, StorageError> {
        Ok(self.drop_schema())
    }

    fn snapshot_schema_version(&self) -> Option<String> {
        self.schema_version().map(str::to_string)
    }

    fn insert_snapshot_row(
        &mut self,
        generation: u32,
        snapshot: &UserSnapshot,
    ) -> Result<u64, StorageError> {
        self.insert_snapshot(generation, snapshot)
    }

    fn has_snapshot_row(&self, user_id: UserId) -> bool {
        self.row_for_user(user_id).is_some()
    }

    fn snapshot_row_count(&self) -> usize {
        self.rows().len()
    }

    fn truncate_snapshot_rows(&mut self) -> Result<usize, StorageError> {
        Ok(self.truncate())
    }

    fn snapshot_generation_digest(&self, generation: u32) -> Result<String, StorageError> {
        self.generation_digest(generation)
    }
}
