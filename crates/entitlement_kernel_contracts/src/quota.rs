#![forbid(unsafe_code)]

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ContractViolation, Validate};

/// Calendar month bucket, `YYYY-MM` in UTC.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct QuotaMonth(String);

impl QuotaMonth {
    pub fn new(month: impl Into<String>) -> Result<Self, ContractViolation> {
        let month = Self(month.into());
        month.validate()?;
        Ok(month)
    }

    pub fn containing(at: &DateTime<Utc>) -> Self {
        Self(at.format("%Y-%m").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for QuotaMonth {
    fn validate(&self) -> Result<(), ContractViolation> {
        let bytes = self.0.as_bytes();
        let shape_ok = bytes.len() == 7
            && bytes[4] == b'-'
            && bytes[..4].iter().all(u8::is_ascii_digit)
            && bytes[5..].iter().all(u8::is_ascii_digit);
        let month_ok = shape_ok
            && self.0[5..]
                .parse::<u8>()
                .map(|m| (1..=12).contains(&m))
                .unwrap_or(false);
        if !month_ok {
            return Err(ContractViolation::InvalidValue {
                field: "quota_month",
                reason: "must be YYYY-MM",
            });
        }
        Ok(())
    }
}

impl TryFrom<String> for QuotaMonth {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        QuotaMonth::new(value)
    }
}

impl From<QuotaMonth> for String {
    fn from(value: QuotaMonth) -> Self {
        value.0
    }
}

impl fmt::Display for QuotaMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Row stored at `mq:{machine_id}:{YYYY-MM}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingQuotaRecord {
    pub month: QuotaMonth,
    pub used: u32,
}

impl MeetingQuotaRecord {
    pub fn empty(month: QuotaMonth) -> Self {
        Self { month, used: 0 }
    }
}

/// `meeting/consume` body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub used: u32,
    pub remaining: u32,
    pub limit: u32,
}

/// Quota section of the sync snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    pub month: QuotaMonth,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
}

/// Why a consume call may skip the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaExemption {
    None,
    Licensed,
    FirstProject,
}

/// Client-held counter. `month` is whatever the client wrote, in its own clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyMeetingQuota {
    pub month: Option<String>,
    pub used: u32,
}

impl LegacyMeetingQuota {
    pub fn is_for(&self, month: &QuotaMonth) -> bool {
        self.month.as_deref() == Some(month.as_str())
    }
}
