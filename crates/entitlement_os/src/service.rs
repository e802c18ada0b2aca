#![forbid(unsafe_code)]

use std::sync::Arc;

use entitlement_engines::experiment::ExperimentAssigner;
use entitlement_engines::license::{LicenseAuthority, LicenseClient};
use entitlement_engines::project::ProjectLock;
use entitlement_engines::quota::QuotaMeter;
use entitlement_engines::trial::{TrialStartError, TrialTracker};
use entitlement_kernel_contracts::experiment::{ExperimentAssignment, ExperimentName};
use entitlement_kernel_contracts::license::{HeartbeatOk, LicenseCheck, LicenseKey};
use entitlement_kernel_contracts::project::{PathHash, ProjectRegistration};
use entitlement_kernel_contracts::quota::{QuotaDecision, QuotaExemption};
use entitlement_kernel_contracts::sync::{LegacyLocalState, SyncResponse};
use entitlement_kernel_contracts::trial::TrialStarted;
use entitlement_kernel_contracts::{Clock, EntitlementConfig, MachineId};
use entitlement_storage::{KvStore, StorageError};

use crate::sync::SyncReconciler;

/// One value per process, shared by every request. All state lives in the store.
pub struct EntitlementService {
    config: EntitlementConfig,
    trial: TrialTracker,
    project: ProjectLock,
    quota: QuotaMeter,
    experiments: ExperimentAssigner,
    license: LicenseClient,
}

impl EntitlementService {
    pub fn new(
        config: EntitlementConfig,
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        authority: Arc<dyn LicenseAuthority>,
    ) -> Self {
        Self {
            config,
            trial: TrialTracker::new(config, store.clone(), clock.clone()),
            project: ProjectLock::new(store.clone(), clock.clone()),
            quota: QuotaMeter::new(config, store.clone(), clock),
            experiments: ExperimentAssigner::new(config, store.clone()),
            license: LicenseClient::new(config, store, authority),
        }
    }

    pub fn config(&self) -> &EntitlementConfig {
        &self.config
    }

    pub fn reconciler(&self) -> SyncReconciler<'_> {
        SyncReconciler::new(
            &self.config,
            &self.trial,
            &self.project,
            &self.quota,
            &self.experiments,
            &self.license,
        )
    }

    pub fn sync(
        &self,
        machine_id: &MachineId,
        license_key: Option<&LicenseKey>,
        local: &LegacyLocalState,
    ) -> Result<SyncResponse, StorageError> {
        self.reconciler().sync(machine_id, license_key, local)
    }

    pub fn trial_start(&self, machine_id: &MachineId) -> Result<TrialStarted, TrialStartError> {
        self.trial.start(machine_id)
    }

    pub fn register_project(
        &self,
        machine_id: &MachineId,
        path_hash: &PathHash,
    ) -> Result<ProjectRegistration, StorageError> {
        self.project.register(machine_id, path_hash)
    }

    /// A valid license is checked first, then the first-project binding.
    pub fn consume_meeting(
        &self,
        machine_id: &MachineId,
        license_key: Option<&LicenseKey>,
        project_hash: Option<&PathHash>,
    ) -> Result<QuotaDecision, StorageError> {
        let month = self.quota.current_month();
        let licensed = self
            .license
            .validate(license_key)?
            .is_some_and(|record| record.valid);
        let exemption = if licensed {
            QuotaExemption::Licensed
        } else if let Some(hash) = project_hash {
            if self.project.is_first_project(machine_id, hash)? {
                QuotaExemption::FirstProject
            } else {
                QuotaExemption::None
            }
        } else {
            QuotaExemption::None
        };
        self.quota.consume(machine_id, &month, exemption)
    }

    pub fn assign_experiment(
        &self,
        machine_id: &MachineId,
        experiment: &ExperimentName,
    ) -> Result<ExperimentAssignment, StorageError> {
        self.experiments.assign(machine_id, experiment)
    }

    /// `Ok(None)` when validity cannot be established right now.
    pub fn heartbeat(&self, key: &LicenseKey) -> Result<Option<HeartbeatOk>, StorageError> {
        Ok(self
            .license
            .validate(Some(key))?
            .map(|record| HeartbeatOk {
                valid: record.valid,
                tier: record.tier,
                next_heartbeat_seconds: self.config.license_cache_ttl_secs,
            }))
    }

    pub fn check(&self, key: &LicenseKey) -> Result<LicenseCheck, StorageError> {
        self.license.check(key)
    }
}
