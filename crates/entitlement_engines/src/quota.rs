#![forbid(unsafe_code)]

use std::sync::Arc;

use entitlement_kernel_contracts::quota::{
    LegacyMeetingQuota, MeetingQuotaRecord, QuotaDecision, QuotaExemption, QuotaMonth,
    QuotaSnapshot,
};
use entitlement_kernel_contracts::sync::Legacy;
use entitlement_kernel_contracts::{Clock, EntitlementConfig, MachineId};
use entitlement_storage::repo::MeetingQuotaRepo;
use entitlement_storage::{KvStore, StorageError};

/// Owns `mq:{machine_id}:{YYYY-MM}`.
///
/// Increments are read-then-write against a store without compare-and-swap;
/// two concurrent consumes for one machine can both pass the ceiling check
/// and one increment can be lost. Accounting is best-effort.
#[derive(Clone)]
pub struct QuotaMeter {
    config: EntitlementConfig,
    store: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
}

impl QuotaMeter {
    pub fn new(config: EntitlementConfig, store: Arc<dyn KvStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            store,
            clock,
        }
    }

    pub fn current_month(&self) -> QuotaMonth {
        QuotaMonth::containing(&self.clock.now())
    }

    /// Counts one usage event against the month, unless exempt.
    pub fn consume(
        &self,
        machine_id: &MachineId,
        month: &QuotaMonth,
        exemption: QuotaExemption,
    ) -> Result<QuotaDecision, StorageError> {
        if exemption != QuotaExemption::None {
            return Ok(self.unlimited());
        }

        let mut record = self.usage(machine_id, month)?;
        let limit = self.config.monthly_quota_limit;
        if record.used >= limit {
            tracing::info!(
                machine = machine_id.short(),
                month = month.as_str(),
                used = record.used,
                "meeting quota exhausted"
            );
            return Ok(QuotaDecision {
                allowed: false,
                used: record.used,
                remaining: 0,
                limit,
            });
        }

        record.used += 1;
        self.store
            .put_meeting_quota_row(machine_id, &record, self.config.quota_ttl())?;
        Ok(QuotaDecision {
            allowed: true,
            used: record.used,
            remaining: limit.saturating_sub(record.used),
            limit,
        })
    }

    /// Stored counter, or zero when the month has no row yet.
    pub fn usage(
        &self,
        machine_id: &MachineId,
        month: &QuotaMonth,
    ) -> Result<MeetingQuotaRecord, StorageError> {
        Ok(self
            .store
            .meeting_quota_row(machine_id, month)?
            .unwrap_or_else(|| MeetingQuotaRecord::empty(month.clone())))
    }

    /// Raises the stored counter to the client's count for the same month.
    /// Runs on every sync; the counter only ever moves up and may pass the limit.
    pub fn ratchet_from_legacy(
        &self,
        machine_id: &MachineId,
        month: &QuotaMonth,
        legacy: &Legacy<LegacyMeetingQuota>,
    ) -> Result<MeetingQuotaRecord, StorageError> {
        let mut record = self.usage(machine_id, month)?;
        let Some(legacy) = legacy.as_data().filter(|l| l.is_for(month)) else {
            return Ok(record);
        };
        if legacy.used > record.used {
            tracing::info!(
                machine = machine_id.short(),
                month = month.as_str(),
                server_used = record.used,
                local_used = legacy.used,
                "meeting quota raised to client count"
            );
            record.used = legacy.used;
            self.store
                .put_meeting_quota_row(machine_id, &record, self.config.quota_ttl())?;
        }
        Ok(record)
    }

    pub fn snapshot(&self, record: &MeetingQuotaRecord) -> QuotaSnapshot {
        let limit = self.config.monthly_quota_limit;
        QuotaSnapshot {
            month: record.month.clone(),
            used: record.used,
            limit,
            remaining: limit.saturating_sub(record.used),
        }
    }

    fn unlimited(&self) -> QuotaDecision {
        QuotaDecision {
            allowed: true,
            used: 0,
            remaining: self.config.unlimited_allowance,
            limit: self.config.unlimited_allowance,
        }
    }
}
