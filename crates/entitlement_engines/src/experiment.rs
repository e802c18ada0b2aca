#![forbid(unsafe_code)]

use std::sync::Arc;

use entitlement_kernel_contracts::experiment::{
    ExperimentAssignment, ExperimentAssignments, ExperimentName, VARIANT_A, VARIANT_CONTROL,
};
use entitlement_kernel_contracts::sync::Legacy;
use entitlement_kernel_contracts::{EntitlementConfig, MachineId, StateSource};
use entitlement_storage::repo::ExperimentRepo;
use entitlement_storage::{KvStore, StorageError};
use sha2::{Digest, Sha256};

/// Buckets below this go to control.
const CONTROL_BUCKETS: u8 = 50;

/// Owns `exp:{machine_id}`. Assignments are sticky for the row's TTL.
#[derive(Clone)]
pub struct ExperimentAssigner {
    config: EntitlementConfig,
    store: Arc<dyn KvStore>,
}

impl ExperimentAssigner {
    pub fn new(config: EntitlementConfig, store: Arc<dyn KvStore>) -> Self {
        Self { config, store }
    }

    /// Returns the recorded variant, or computes and records one.
    ///
    /// The map is rewritten whole, so a concurrent first assignment of a
    /// different experiment on the same machine may be dropped and recomputed
    /// later; determinism keeps the recomputed variant identical.
    pub fn assign(
        &self,
        machine_id: &MachineId,
        experiment: &ExperimentName,
    ) -> Result<ExperimentAssignment, StorageError> {
        let mut assignments = self.assignments(machine_id)?;
        if let Some(variant) = assignments.variant(experiment) {
            return Ok(ExperimentAssignment {
                variant: variant.to_string(),
                source: StateSource::Server,
            });
        }

        let variant = variant_for_bucket(bucket(machine_id, experiment));
        assignments.insert(experiment, variant);
        self.store
            .put_experiment_rows(machine_id, &assignments, self.config.experiment_ttl())?;
        tracing::debug!(
            machine = machine_id.short(),
            experiment = experiment.as_str(),
            variant,
            "experiment assigned"
        );
        Ok(ExperimentAssignment {
            variant: variant.to_string(),
            source: StateSource::Server,
        })
    }

    pub fn assignments(
        &self,
        machine_id: &MachineId,
    ) -> Result<ExperimentAssignments, StorageError> {
        Ok(self
            .store
            .experiment_rows(machine_id)?
            .unwrap_or_default())
    }

    /// Adopts the client's assignments when the server holds none.
    pub fn seed_once(
        &self,
        machine_id: &MachineId,
        legacy: &Legacy<ExperimentAssignments>,
    ) -> Result<ExperimentAssignments, StorageError> {
        if let Some(existing) = self.store.experiment_rows(machine_id)? {
            return Ok(existing);
        }
        match legacy.as_data().filter(|a| !a.is_empty()) {
            Some(seed) => {
                self.store
                    .put_experiment_rows(machine_id, seed, self.config.experiment_ttl())?;
                tracing::info!(
                    machine = machine_id.short(),
                    experiments = seed.len(),
                    "experiments seeded from local state"
                );
                Ok(seed.clone())
            }
            None => Ok(ExperimentAssignments::new()),
        }
    }
}

/// First two SHA-256 bytes of `"{machine}:{experiment}"`, big-endian, mod 100.
pub fn bucket(machine_id: &MachineId, experiment: &ExperimentName) -> u8 {
    let digest = Sha256::digest(format!("{}:{}", machine_id.as_str(), experiment.as_str()));
    let prefix = u16::from_be_bytes([digest[0], digest[1]]);
    (prefix % 100) as u8
}

pub fn variant_for_bucket(bucket: u8) -> &'static str {
    if bucket < CONTROL_BUCKETS {
        VARIANT_CONTROL
    } else {
        VARIANT_A
    }
}
