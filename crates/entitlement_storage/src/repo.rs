#![forbid(unsafe_code)]

use std::time::Duration;

use entitlement_kernel_contracts::experiment::ExperimentAssignments;
use entitlement_kernel_contracts::license::{LicenseKey, LicenseRecord};
use entitlement_kernel_contracts::project::FirstProjectRecord;
use entitlement_kernel_contracts::quota::{MeetingQuotaRecord, QuotaMonth};
use entitlement_kernel_contracts::trial::TrialRecord;
use entitlement_kernel_contracts::MachineId;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::kv::{KvStore, StorageError};

pub fn trial_key(machine_id: &MachineId) -> String {
    format!("trial:{}", machine_id.as_str())
}

pub fn first_project_key(machine_id: &MachineId) -> String {
    format!("fp:{}", machine_id.as_str())
}

pub fn meeting_quota_key(machine_id: &MachineId, month: &QuotaMonth) -> String {
    format!("mq:{}:{}", machine_id.as_str(), month.as_str())
}

pub fn experiments_key(machine_id: &MachineId) -> String {
    format!("exp:{}", machine_id.as_str())
}

pub fn license_cache_key(key: &LicenseKey) -> String {
    format!("license:{}", key.as_str())
}

fn read_row<T, S>(store: &S, key: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    S: KvStore + ?Sized,
{
    match store.get(key)? {
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|source| StorageError::Codec {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

fn write_row<T, S>(store: &S, key: &str, row: &T, ttl: Option<Duration>) -> Result<(), StorageError>
where
    T: Serialize,
    S: KvStore + ?Sized,
{
    let value = serde_json::to_value(row).map_err(|source| StorageError::Codec {
        key: key.to_string(),
        source,
    })?;
    store.put(key, value, ttl)
}

/// Typed repository for `trial:{machine_id}` rows.
pub trait TrialRepo {
    fn trial_row(&self, machine_id: &MachineId) -> Result<Option<TrialRecord>, StorageError>;

    /// Unconditional write. Create-if-absent callers race: two first writers
    /// both see no row and the later write wins.
    fn put_trial_row(&self, record: &TrialRecord, ttl: Duration) -> Result<(), StorageError>;
}

/// Typed repository for `fp:{machine_id}` rows. Rows carry no TTL.
pub trait FirstProjectRepo {
    fn first_project_row(
        &self,
        machine_id: &MachineId,
    ) -> Result<Option<FirstProjectRecord>, StorageError>;

    /// Unconditional write; same first-writer race as [`TrialRepo::put_trial_row`].
    fn put_first_project_row(&self, record: &FirstProjectRecord) -> Result<(), StorageError>;
}

/// Typed repository for `mq:{machine_id}:{YYYY-MM}` counters.
pub trait MeetingQuotaRepo {
    fn meeting_quota_row(
        &self,
        machine_id: &MachineId,
        month: &QuotaMonth,
    ) -> Result<Option<MeetingQuotaRecord>, StorageError>;

    /// Read-increment-write through this method can lose concurrent updates.
    fn put_meeting_quota_row(
        &self,
        machine_id: &MachineId,
        record: &MeetingQuotaRecord,
        ttl: Duration,
    ) -> Result<(), StorageError>;
}

/// Typed repository for `exp:{machine_id}` assignment maps.
pub trait ExperimentRepo {
    fn experiment_rows(
        &self,
        machine_id: &MachineId,
    ) -> Result<Option<ExperimentAssignments>, StorageError>;

    /// Writes the whole map; a concurrent first assignment of a different
    /// experiment can be dropped.
    fn put_experiment_rows(
        &self,
        machine_id: &MachineId,
        assignments: &ExperimentAssignments,
        ttl: Duration,
    ) -> Result<(), StorageError>;
}

/// Typed repository for `license:{key}` verdict cache rows.
pub trait LicenseCacheRepo {
    fn license_cache_row(&self, key: &LicenseKey) -> Result<Option<LicenseRecord>, StorageError>;

    fn put_license_cache_row(
        &self,
        key: &LicenseKey,
        record: &LicenseRecord,
        ttl: Duration,
    ) -> Result<(), StorageError>;
}

impl<S: KvStore + ?Sized> TrialRepo for S {
    fn trial_row(&self, machine_id: &MachineId) -> Result<Option<TrialRecord>, StorageError> {
        read_row(self, &trial_key(machine_id))
    }

    fn put_trial_row(&self, record: &TrialRecord, ttl: Duration) -> Result<(), StorageError> {
        write_row(self, &trial_key(&record.machine_id), record, Some(ttl))
    }
}

impl<S: KvStore + ?Sized> FirstProjectRepo for S {
    fn first_project_row(
        &self,
        machine_id: &MachineId,
    ) -> Result<Option<FirstProjectRecord>, StorageError> {
        read_row(self, &first_project_key(machine_id))
    }

    fn put_first_project_row(&self, record: &FirstProjectRecord) -> Result<(), StorageError> {
        write_row(self, &first_project_key(&record.machine_id), record, None)
    }
}

impl<S: KvStore + ?Sized> MeetingQuotaRepo for S {
    fn meeting_quota_row(
        &self,
        machine_id: &MachineId,
        month: &QuotaMonth,
    ) -> Result<Option<MeetingQuotaRecord>, StorageError> {
        read_row(self, &meeting_quota_key(machine_id, month))
    }

    fn put_meeting_quota_row(
        &self,
        machine_id: &MachineId,
        record: &MeetingQuotaRecord,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        write_row(
            self,
            &meeting_quota_key(machine_id, &record.month),
            record,
            Some(ttl),
        )
    }
}

impl<S: KvStore + ?Sized> ExperimentRepo for S {
    fn experiment_rows(
        &self,
        machine_id: &MachineId,
    ) -> Result<Option<ExperimentAssignments>, StorageError> {
        read_row(self, &experiments_key(machine_id))
    }

    fn put_experiment_rows(
        &self,
        machine_id: &MachineId,
        assignments: &ExperimentAssignments,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        write_row(self, &experiments_key(machine_id), assignments, Some(ttl))
    }
}

impl<S: KvStore + ?Sized> LicenseCacheRepo for S {
    fn license_cache_row(&self, key: &LicenseKey) -> Result<Option<LicenseRecord>, StorageError> {
        read_row(self, &license_cache_key(key))
    }

    fn put_license_cache_row(
        &self,
        key: &LicenseKey,
        record: &LicenseRecord,
        ttl: Duration,
    ) -> Result<(), StorageError> {
        write_row(self, &license_cache_key(key), record, Some(ttl))
    }
}
