#![forbid(unsafe_code)]

use std::sync::{Arc, RwLock};

use tracing::error;

use reglock_engines::mutation_guard::{snapshot_unavailable, MutationGuardRuntime, UserMutationGuard};
use reglock_kernel_contracts::guard::{
    GuardOutcome, MetaUpdateDecision, UserMeta, UserMetaInsertRequest, UserMetaUpdateRequest,
    UserPersistRequest, UserRecordFields,
};
use reglock_kernel_contracts::snapshot::{SnapshotLookup, UserId, UserSnapshot};

/// Mutation guard backed by the shared snapshot table. A poisoned lock is
/// treated as an unreadable snapshot and rejects.
pub struct SnapshotBackedGuard<S> {
    runtime: MutationGuardRuntime,
    snapshots: Arc<RwLock<S>>,
}

impl<S> SnapshotBackedGuard<S> {
    pub fn new(runtime: MutationGuardRuntime, snapshots: Arc<RwLock<S>>) -> Self {
        Self { runtime, snapshots }
    }
}

struct NoSnapshots;

impl SnapshotLookup for NoSnapshots {
    fn snapshot_for_user(&self, _user_id: UserId) -> Option<UserSnapshot> {
        None
    }
}

fn poisoned(user_id: UserId) {
    error!(user_id = user_id.0, "snapshot store lock poisoned; rejecting mutation");
}

impl<S: SnapshotLookup + Send + Sync> UserMutationGuard for SnapshotBackedGuard<S> {
    fn pre_persist_user(&self, req: &UserPersistRequest) -> GuardOutcome<UserRecordFields> {
        match self.snapshots.read() {
            Ok(snapshots) => self.runtime.guard_new_or_updated_user(&*snapshots, req),
            Err(_) => match req.user_id {
                Some(user_id) if req.is_update => {
                    poisoned(user_id);
                    GuardOutcome::Reject(snapshot_unavailable(user_id))
                }
                // New accounts are rejected before any lookup.
                _ => self.runtime.guard_new_or_updated_user(&NoSnapshots, req),
            },
        }
    }

    fn pre_insert_user_meta(&self, req: &UserMetaInsertRequest) -> GuardOutcome<UserMeta> {
        match self.snapshots.read() {
            Ok(snapshots) => self.runtime.guard_user_metadata_insert(&*snapshots, req),
            Err(_) => {
                poisoned(req.user_id);
                GuardOutcome::Reject(snapshot_unavailable(req.user_id))
            }
        }
    }

    fn pre_update_user_meta(&self, req: &UserMetaUpdateRequest) -> MetaUpdateDecision {
        match self.snapshots.read() {
            Ok(snapshots) => self.runtime.guard_user_metadata_update(&*snapshots, req),
            Err(_) => {
                poisoned(req.object_id);
                MetaUpdateDecision::Reject(snapshot_unavailable(req.object_id))
            }
        }
    }
}
