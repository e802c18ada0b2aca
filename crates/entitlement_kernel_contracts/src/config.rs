#![forbid(unsafe_code)]

use std::time::Duration;

use crate::{ClientVersion, ContractViolation, Validate};

const DAY_SECS: u64 = 24 * 3600;

/// Immutable policy knobs, handed to every state owner at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntitlementConfig {
    pub trial_days: u32,
    pub trial_ttl_secs: u64,
    pub monthly_quota_limit: u32,
    pub quota_ttl_secs: u64,
    pub experiment_ttl_secs: u64,
    pub license_cache_ttl_secs: u64,
    pub license_key_min_chars: usize,
    pub next_sync_secs: u64,
    /// Reported as both `remaining` and `limit` for exempt usage.
    pub unlimited_allowance: u32,
    pub min_client_version: ClientVersion,
    pub authority_timeout_ms: u32,
}

impl EntitlementConfig {
    pub fn mvp_v1() -> Self {
        Self {
            trial_days: 7,
            trial_ttl_secs: 30 * DAY_SECS,
            monthly_quota_limit: 3,
            quota_ttl_secs: 45 * DAY_SECS,
            experiment_ttl_secs: 90 * DAY_SECS,
            license_cache_ttl_secs: DAY_SECS,
            license_key_min_chars: 10,
            next_sync_secs: 3600,
            unlimited_allowance: 999,
            min_client_version: ClientVersion::new(3, 0, 0),
            authority_timeout_ms: 10_000,
        }
    }

    pub fn trial_ttl(&self) -> Duration {
        Duration::from_secs(self.trial_ttl_secs)
    }

    pub fn quota_ttl(&self) -> Duration {
        Duration::from_secs(self.quota_ttl_secs)
    }

    pub fn experiment_ttl(&self) -> Duration {
        Duration::from_secs(self.experiment_ttl_secs)
    }

    pub fn license_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.license_cache_ttl_secs)
    }
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self::mvp_v1()
    }
}

impl Validate for EntitlementConfig {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.trial_days == 0 || self.trial_days > 365 {
            return Err(ContractViolation::InvalidValue {
                field: "entitlement_config.trial_days",
                reason: "must be within 1..=365",
            });
        }
        if self.trial_ttl_secs < u64::from(self.trial_days) * DAY_SECS {
            return Err(ContractViolation::InvalidValue {
                field: "entitlement_config.trial_ttl_secs",
                reason: "must cover the full trial length",
            });
        }
        if self.monthly_quota_limit == 0 || self.monthly_quota_limit >= self.unlimited_allowance {
            return Err(ContractViolation::InvalidValue {
                field: "entitlement_config.monthly_quota_limit",
                reason: "must be within 1..unlimited_allowance",
            });
        }
        // A month plus a grace window, so late syncs still see last month's counter.
        if self.quota_ttl_secs < 31 * DAY_SECS {
            return Err(ContractViolation::InvalidValue {
                field: "entitlement_config.quota_ttl_secs",
                reason: "must outlive a calendar month",
            });
        }
        if self.experiment_ttl_secs == 0 || self.license_cache_ttl_secs == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "entitlement_config.ttl",
                reason: "experiment and license cache TTLs must be > 0",
            });
        }
        if self.next_sync_secs == 0 {
            return Err(ContractViolation::InvalidValue {
                field: "entitlement_config.next_sync_secs",
                reason: "must be > 0",
            });
        }
        if self.authority_timeout_ms < 100 || self.authority_timeout_ms > 60_000 {
            return Err(ContractViolation::InvalidValue {
                field: "entitlement_config.authority_timeout_ms",
                reason: "must be within 100..=60_000",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mvp_defaults_validate() {
        let config = EntitlementConfig::mvp_v1();
        assert!(config.validate().is_ok());
        assert_eq!(config.trial_days, 7);
        assert_eq!(config.monthly_quota_limit, 3);
        assert_eq!(config.license_cache_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn quota_limit_must_stay_below_unlimited_sentinel() {
        let config = EntitlementConfig {
            monthly_quota_limit: 999,
            ..EntitlementConfig::mvp_v1()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn trial_ttl_shorter_than_trial_is_rejected() {
        let config = EntitlementConfig {
            trial_days: 40,
            ..EntitlementConfig::mvp_v1()
        };
        assert!(config.validate().is_err());
    }
}
