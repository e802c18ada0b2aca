#![forbid(unsafe_code)]

use entitlement_engines::experiment::ExperimentAssigner;
use entitlement_engines::license::LicenseClient;
use entitlement_engines::project::ProjectLock;
use entitlement_engines::quota::QuotaMeter;
use entitlement_engines::trial::TrialTracker;
use entitlement_kernel_contracts::license::{LicenseKey, LicenseSummary};
use entitlement_kernel_contracts::sync::{LegacyLocalState, ServerStateSnapshot, SyncResponse};
use entitlement_kernel_contracts::{EntitlementConfig, MachineId};
use entitlement_storage::StorageError;

/// Unified sync entry point over the five state owners.
///
/// Trial, first project and experiments are seeded from legacy client state
/// at most once (record exists means seeded). The meeting counter instead
/// takes `max(local, server)` for the current month on every call.
pub struct SyncReconciler<'a> {
    config: &'a EntitlementConfig,
    trial: &'a TrialTracker,
    project: &'a ProjectLock,
    quota: &'a QuotaMeter,
    experiments: &'a ExperimentAssigner,
    license: &'a LicenseClient,
}

impl<'a> SyncReconciler<'a> {
    pub fn new(
        config: &'a EntitlementConfig,
        trial: &'a TrialTracker,
        project: &'a ProjectLock,
        quota: &'a QuotaMeter,
        experiments: &'a ExperimentAssigner,
        license: &'a LicenseClient,
    ) -> Self {
        Self {
            config,
            trial,
            project,
            quota,
            experiments,
            license,
        }
    }

    pub fn sync(
        &self,
        machine_id: &MachineId,
        license_key: Option<&LicenseKey>,
        local: &LegacyLocalState,
    ) -> Result<SyncResponse, StorageError> {
        let month = self.quota.current_month();

        let trial = self.trial.seed_once(machine_id, &local.trial)?;
        let first_project = self.project.seed_once(machine_id, &local.first_project)?;
        let quota = self
            .quota
            .ratchet_from_legacy(machine_id, &month, &local.meeting_quota)?;
        let experiments = self.experiments.seed_once(machine_id, &local.experiments)?;
        let license = self.license.validate(license_key)?;

        tracing::debug!(
            machine = machine_id.short(),
            month = month.as_str(),
            "state synced"
        );
        Ok(SyncResponse {
            server_state: ServerStateSnapshot {
                trial: self.trial.status(trial.as_ref()),
                first_project: self.project.lock_state(first_project.as_ref()),
                meeting_quota: self.quota.snapshot(&quota),
                experiments,
                license: LicenseSummary::from_lookup(license.as_ref()),
            },
            next_sync_seconds: self.config.next_sync_secs,
        })
    }
}
