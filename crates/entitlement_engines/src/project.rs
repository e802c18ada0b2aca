#![forbid(unsafe_code)]

use std::sync::Arc;

use entitlement_kernel_contracts::project::{
    FirstProjectLock, FirstProjectRecord, LegacyFirstProject, PathHash, ProjectRegistration,
    ProjectTier,
};
use entitlement_kernel_contracts::sync::Legacy;
use entitlement_kernel_contracts::{Clock, MachineId};
use entitlement_storage::repo::FirstProjectRepo;
use entitlement_storage::{KvStore, StorageError};

/// Owns `fp:{machine_id}`: absent, then bound forever.
#[derive(Clone)]
pub struct ProjectLock {
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl ProjectLock {
    pub fn new(store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Always succeeds; only the tier depends on whether the hash is the bound one.
    pub fn register(
        &self,
        machine_id: &MachineId,
        path_hash: &PathHash,
    ) -> Result<ProjectRegistration, StorageError> {
        if let Some(existing) = self.store.first_project_row(machine_id)? {
            let is_first = existing.path_hash == *path_hash;
            return Ok(ProjectRegistration {
                registered: true,
                is_first,
                tier: if is_first {
                    ProjectTier::First
                } else {
                    ProjectTier::Additional
                },
                path_hash: existing.path_hash,
            });
        }

        let record =
            FirstProjectRecord::v1(machine_id.clone(), path_hash.clone(), self.clock.now());
        self.store.put_first_project_row(&record)?;
        tracing::info!(machine = machine_id.short(), "first project bound");
        Ok(ProjectRegistration {
            registered: true,
            is_first: true,
            tier: ProjectTier::First,
            path_hash: record.path_hash,
        })
    }

    pub fn current(
        &self,
        machine_id: &MachineId,
    ) -> Result<Option<FirstProjectRecord>, StorageError> {
        self.store.first_project_row(machine_id)
    }

    pub fn is_first_project(
        &self,
        machine_id: &MachineId,
        path_hash: &PathHash,
    ) -> Result<bool, StorageError> {
        Ok(self
            .store
            .first_project_row(machine_id)?
            .is_some_and(|record| record.path_hash == *path_hash))
    }

    pub fn seed_once(
        &self,
        machine_id: &MachineId,
        legacy: &Legacy<LegacyFirstProject>,
    ) -> Result<Option<FirstProjectRecord>, StorageError> {
        if let Some(existing) = self.store.first_project_row(machine_id)? {
            return Ok(Some(existing));
        }
        let Some(legacy) = legacy.as_data() else {
            return Ok(None);
        };
        let record = FirstProjectRecord::seeded(
            machine_id.clone(),
            legacy.path_hash.clone(),
            self.clock.now(),
        );
        self.store.put_first_project_row(&record)?;
        tracing::info!(
            machine = machine_id.short(),
            "first project seeded from local state"
        );
        Ok(Some(record))
    }

    pub fn lock_state(&self, record: Option<&FirstProjectRecord>) -> FirstProjectLock {
        FirstProjectLock::from_record(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{clock_and_store, mid};

    fn lock() -> ProjectLock {
        let (clock, store) = clock_and_store();
        ProjectLock::new(store, clock)
    }

    fn hash(raw: &str) -> PathHash {
        PathHash::new(raw).unwrap()
    }

    #[test]
    fn first_registration_binds_the_hash() {
        let lock = lock();
        let out = lock.register(&mid("abcdefgh12"), &hash("proj-a")).unwrap();
        assert!(out.registered);
        assert!(out.is_first);
        assert_eq!(out.tier, ProjectTier::First);
        assert_eq!(out.path_hash, hash("proj-a"));
    }

    #[test]
    fn re_registering_the_bound_hash_is_idempotent() {
        let lock = lock();
        let m = mid("abcdefgh12");
        let a = lock.register(&m, &hash("proj-a")).unwrap();
        let b = lock.register(&m, &hash("proj-a")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn other_hashes_are_additional_and_never_rebind() {
        let lock = lock();
        let m = mid("abcdefgh12");
        lock.register(&m, &hash("proj-a")).unwrap();
        for other in ["proj-b", "proj-c", "proj-b"] {
            let out = lock.register(&m, &hash(other)).unwrap();
            assert!(out.registered);
            assert!(!out.is_first);
            assert_eq!(out.tier, ProjectTier::Additional);
            assert_eq!(out.path_hash, hash("proj-a"));
        }
        assert_eq!(
            lock.current(&m).unwrap().unwrap().path_hash,
            hash("proj-a")
        );
    }

    #[test]
    fn seeding_yields_to_an_existing_binding() {
        let lock = lock();
        let m = mid("abcdefgh12");
        lock.register(&m, &hash("server-bound")).unwrap();
        let seeded = lock
            .seed_once(
                &m,
                &Legacy::LegacyData(LegacyFirstProject {
                    path_hash: hash("client-claimed"),
                }),
            )
            .unwrap()
            .unwrap();
        assert_eq!(seeded.path_hash, hash("server-bound"));
        assert!(seeded.seeded_from.is_none());
    }

    #[test]
    fn seeding_binds_when_absent() {
        let lock = lock();
        let m = mid("abcdefgh12");
        let seeded = lock
            .seed_once(
                &m,
                &Legacy::LegacyData(LegacyFirstProject {
                    path_hash: hash("client-claimed"),
                }),
            )
            .unwrap()
            .unwrap();
        assert!(seeded.seeded_from.is_some());
        assert!(lock.is_first_project(&m, &hash("client-claimed")).unwrap());
        assert!(lock.lock_state(Some(&seeded)).locked);
    }
}
