#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::iso_millis;
use crate::{MachineId, SeedSource, StateSource};

/// Row stored at `trial:{machine_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialRecord {
    #[serde(with = "iso_millis")]
    pub started_at: DateTime<Utc>,
    pub machine_id: MachineId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeded_from: Option<SeedSource>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso_millis::option"
    )]
    pub seeded_at: Option<DateTime<Utc>>,
}

impl TrialRecord {
    pub fn v1(machine_id: MachineId, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            machine_id,
            seeded_from: None,
            seeded_at: None,
        }
    }

    pub fn seeded(
        machine_id: MachineId,
        started_at: DateTime<Utc>,
        seeded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            started_at,
            machine_id,
            seeded_from: Some(SeedSource::Local),
            seeded_at: Some(seeded_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialStatus {
    pub active: bool,
    pub remaining_days: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "iso_millis::option"
    )]
    pub started_at: Option<DateTime<Utc>>,
    pub source: StateSource,
}

impl TrialStatus {
    pub fn not_started() -> Self {
        Self {
            active: false,
            remaining_days: 0,
            started_at: None,
            source: StateSource::Server,
        }
    }
}

/// Successful `trial/start` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialStarted {
    pub active: bool,
    #[serde(with = "iso_millis")]
    pub started_at: DateTime<Utc>,
    pub remaining_days: u32,
}

/// Client-held trial state offered for one-time seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyTrial {
    pub started_at: DateTime<Utc>,
}
