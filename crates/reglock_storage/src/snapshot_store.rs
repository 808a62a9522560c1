#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use reglock_kernel_contracts::snapshot::{SnapshotLookup, UserId, UserSnapshot};
use reglock_kernel_contracts::Validate;

use crate::StorageError;

pub const SNAPSHOT_TABLE: &str = "user_registration_lock_save_users";

/// One persisted row. Decoded sets are kept as JSON text columns; the three
/// metadata columns are verbatim host values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshotRow {
    pub id: u64,
    pub generation: u32,
    pub user_id: UserId,
    pub login: String,
    pub password_hash: String,
    pub email: String,
    pub registered_at: String,
    pub roles_json: String,
    pub capabilities_json: String,
    pub effective_capabilities_json: String,
    pub capabilities_raw: String,
    pub privilege_level_raw: String,
    pub force_ssl_raw: String,
}

impl UserSnapshotRow {
    fn encode(id: u64, generation: u32, s: &UserSnapshot) -> Result<Self, StorageError> {
        Ok(Self {
            id,
            generation,
            user_id: s.user_id,
            login: s.login.clone(),
            password_hash: s.password_hash.clone(),
            email: s.email.clone(),
            registered_at: s.registered_at.clone(),
            roles_json: serde_json::to_string(&s.roles)
                .map_err(|_| StorageError::Codec { column: "roles_json" })?,
            capabilities_json: serde_json::to_string(&s.capabilities).map_err(|_| {
                StorageError::Codec {
                    column: "capabilities_json",
                }
            })?,
            effective_capabilities_json: serde_json::to_string(&s.effective_capabilities)
                .map_err(|_| StorageError::Codec {
                    column: "effective_capabilities_json",
                })?,
            capabilities_raw: s.capabilities_raw.clone(),
            privilege_level_raw: s.privilege_level_raw.clone(),
            force_ssl_raw: s.force_ssl_raw.clone(),
        })
    }

    pub fn decode(&self) -> Result<UserSnapshot, StorageError> {
        Ok(UserSnapshot {
            user_id: self.user_id,
            login: self.login.clone(),
            password_hash: self.password_hash.clone(),
            email: self.email.clone(),
            registered_at: self.registered_at.clone(),
            roles: serde_json::from_str(&self.roles_json)
                .map_err(|_| StorageError::Codec { column: "roles_json" })?,
            capabilities: serde_json::from_str(&self.capabilities_json).map_err(|_| {
                StorageError::Codec {
                    column: "capabilities_json",
                }
            })?,
            effective_capabilities: serde_json::from_str(&self.effective_capabilities_json)
                .map_err(|_| StorageError::Codec {
                    column: "effective_capabilities_json",
                })?,
            capabilities_raw: self.capabilities_raw.clone(),
            privilege_level_raw: self.privilege_level_raw.clone(),
            force_ssl_raw: self.force_ssl_raw.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SnapshotTable {
    shape_version: String,
    rows: BTreeMap<u64, UserSnapshotRow>,
    // user_id -> row id; unique within the live generation.
    by_user: BTreeMap<UserId, u64>,
    next_id: u64,
}

/// In-memory rendition of the snapshot table. `table == None` models a
/// dropped or never-created schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotStore {
    table: Option<SnapshotTable>,
}

impl SnapshotStore {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// Creates the table or brings its shape marker up to `shape_version`.
    /// Existing rows survive. Returns whether anything changed.
    pub fn create_schema(&mut self, shape_version: &str) -> bool {
        match &mut self.table {
            Some(t) if t.shape_version == shape_version => false,
            Some(t) => {
                t.shape_version = shape_version.to_string();
                true
            }
            None => {
                self.table = Some(SnapshotTable {
                    shape_version: shape_version.to_string(),
                    rows: BTreeMap::new(),
                    by_user: BTreeMap::new(),
                    next_id: 1,
                });
                true
            }
        }
    }

    pub fn drop_schema(&mut self) -> bool {
        self.table.take().is_some()
    }

    pub fn schema_version(&self) -> Option<&str> {
        self.table.as_ref().map(|t| t.shape_version.as_str())
    }

    pub fn insert_snapshot(
        &mut self,
        generation: u32,
        snapshot: &UserSnapshot,
    ) -> Result<u64, StorageError> {
        snapshot.validate()?;
        let table = self.table.as_mut().ok_or(StorageError::TableMissing {
            table: SNAPSHOT_TABLE,
        })?;
        if table.by_user.contains_key(&snapshot.user_id) {
            return Err(StorageError::DuplicateKey {
                table: SNAPSHOT_TABLE,
                key: snapshot.user_id.to_string(),
            });
        }
        let id = table.next_id;
        let row = UserSnapshotRow::encode(id, generation, snapshot)?;
        table.next_id += 1;
        table.by_user.insert(snapshot.user_id, id);
        table.rows.insert(id, row);
        Ok(id)
    }

    pub fn row_for_user(&self, user_id: UserId) -> Option<&UserSnapshotRow> {
        let table = self.table.as_ref()?;
        let id = table.by_user.get(&user_id)?;
        table.rows.get(id)
    }

    pub fn rows(&self) -> Vec<&UserSnapshotRow> {
        match &self.table {
            Some(t) => t.rows.values().collect(),
            None => Vec::new(),
        }
    }

    /// Removes every row but keeps the schema. Row ids keep increasing.
    pub fn truncate(&mut self) -> usize {
        match &mut self.table {
            Some(t) => {
                let n = t.rows.len();
                t.rows.clear();
                t.by_user.clear();
                n
            }
            None => 0,
        }
    }

    /// SHA-256 over the rows of one generation ordered by user id, excluding
    /// the auto-increment id so that an identical re-capture hashes the same.
    pub fn generation_digest(&self, generation: u32) -> Result<String, StorageError> {
        let table = self.table.as_ref().ok_or(StorageError::TableMissing {
            table: SNAPSHOT_TABLE,
        })?;
        let mut hasher = Sha256::new();
        for (user_id, id) in &table.by_user {
            let Some(row) = table.rows.get(id) else {
                continue;
            };
            if row.generation != generation {
                continue;
            }
            let canonical = serde_json::to_string(&(
                user_id,
                &row.login,
                &row.password_hash,
                &row.email,
                &row.registered_at,
                &row.roles_json,
                &row.capabilities_json,
                &row.effective_capabilities_json,
                &row.capabilities_raw,
                &row.privilege_level_raw,
                &row.force_ssl_raw,
            ))
            .map_err(|_| StorageError::Codec {
                column: "generation_digest",
            })?;
            hasher.update(canonical.as_bytes());
            hasher.update(b"\n");
        }
        Ok(hex_lower(&hasher.finalize()))
    }
}

impl SnapshotLookup for SnapshotStore {
    fn snapshot_for_user(&self, user_id: UserId) -> Option<UserSnapshot> {
        // An undecodable row is treated as missing.
        self.row_for_user(user_id)?.decode().ok()
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}
