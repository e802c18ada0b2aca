#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use entitlement_kernel_contracts::sync::Legacy;
use entitlement_kernel_contracts::trial::{LegacyTrial, TrialRecord, TrialStarted, TrialStatus};
use entitlement_kernel_contracts::{Clock, EntitlementConfig, MachineId, StateSource};
use entitlement_storage::repo::TrialRepo;
use entitlement_storage::{KvStore, StorageError};

const DAY_SECS: i64 = 24 * 3600;

#[derive(Debug, thiserror::Error)]
pub enum TrialStartError {
    #[error("trial already started")]
    AlreadyStarted(TrialStatus),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Owns `trial:{machine_id}`. Server clock only.
#[derive(Clone)]
pub struct TrialTracker {
    config: EntitlementConfig,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl TrialTracker {
    pub fn new(config: EntitlementConfig, store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    /// Starts the trial once. An existing record is never touched.
    pub fn start(&self, machine_id: &MachineId) -> Result<TrialStarted, TrialStartError> {
        if let Some(existing) = self.store.trial_row(machine_id)? {
            let status = self.status(Some(&existing));
            tracing::debug!(
                machine = machine_id.short(),
                remaining_days = status.remaining_days,
                "trial already started"
            );
            return Err(TrialStartError::AlreadyStarted(status));
        }

        let record = TrialRecord::v1(machine_id.clone(), self.clock.now());
        self.store
            .put_trial_row(&record, self.config.trial_ttl())?;
        tracing::info!(machine = machine_id.short(), "trial started");
        Ok(TrialStarted {
            active: true,
            started_at: record.started_at,
            remaining_days: self.config.trial_days,
        })
    }

    pub fn current(&self, machine_id: &MachineId) -> Result<Option<TrialRecord>, StorageError> {
        self.store.trial_row(machine_id)
    }

    /// Creates the record from legacy client data only when none exists;
    /// afterwards the stored value wins.
    pub fn seed_once(
        &self,
        machine_id: &MachineId,
        legacy: &Legacy<LegacyTrial>,
    ) -> Result<Option<TrialRecord>, StorageError> {
        if let Some(existing) = self.store.trial_row(machine_id)? {
            return Ok(Some(existing));
        }
        let Some(legacy) = legacy.as_data() else {
            return Ok(None);
        };
        let record = TrialRecord::seeded(machine_id.clone(), legacy.started_at, self.clock.now());
        self.store
            .put_trial_row(&record, self.config.trial_ttl())?;
        tracing::info!(machine = machine_id.short(), "trial seeded from local state");
        Ok(Some(record))
    }

    pub fn status(&self, record: Option<&TrialRecord>) -> TrialStatus {
        let Some(record) = record else {
            return TrialStatus::not_started();
        };
        let remaining_days =
            remaining_days(record.started_at, self.clock.now(), self.config.trial_days);
        TrialStatus {
            active: remaining_days > 0,
            remaining_days,
            started_at: Some(record.started_at),
            source: StateSource::Server,
        }
    }
}

/// `max(0, trial_days - floor(elapsed days))`, capped at `trial_days` so a
/// future-dated start cannot lengthen the trial.
pub fn remaining_days(started_at: DateTime<Utc>, now: DateTime<Utc>, trial_days: u32) -> u32 {
    let elapsed_days = (now - started_at).num_seconds().div_euclid(DAY_SECS);
    let remaining = i64::from(trial_days).saturating_sub(elapsed_days);
    remaining.clamp(0, i64::from(trial_days)) as u32
}
