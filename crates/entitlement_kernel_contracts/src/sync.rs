#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::parse_client_timestamp;
use crate::experiment::ExperimentAssignments;
use crate::license::LicenseSummary;
use crate::project::{FirstProjectLock, LegacyFirstProject, PathHash};
use crate::quota::{LegacyMeetingQuota, QuotaSnapshot};
use crate::trial::{LegacyTrial, TrialStatus};

/// Client-held state for one record type, consumed at most once per machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Legacy<T> {
    NoLegacyData,
    LegacyData(T),
}

impl<T> Default for Legacy<T> {
    fn default() -> Self {
        Legacy::NoLegacyData
    }
}

impl<T> Legacy<T> {
    pub fn as_data(&self) -> Option<&T> {
        match self {
            Legacy::NoLegacyData => None,
            Legacy::LegacyData(data) => Some(data),
        }
    }
}

impl<T> From<Option<T>> for Legacy<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Legacy::NoLegacyData, Legacy::LegacyData)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LegacyLocalState {
    pub trial: Legacy<LegacyTrial>,
    pub first_project: Legacy<LegacyFirstProject>,
    pub meeting_quota: Legacy<LegacyMeetingQuota>,
    pub experiments: Legacy<ExperimentAssignments>,
}

/// `local_state` as the client sends it. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocalStatePayload {
    #[serde(default)]
    pub trial: Option<LegacyTrialPayload>,
    #[serde(default)]
    pub first_project: Option<LegacyFirstProjectPayload>,
    #[serde(default)]
    pub meeting_quota: Option<LegacyMeetingQuotaPayload>,
    #[serde(default)]
    pub experiments: Option<BTreeMap<String, LegacyExperimentEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyTrialPayload {
    #[serde(default)]
    pub started_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyFirstProjectPayload {
    #[serde(default)]
    pub path_hash: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LegacyMeetingQuotaPayload {
    #[serde(default)]
    pub month: Option<String>,
    /// Any JSON number; older clients wrote floats.
    #[serde(default)]
    pub used: Option<f64>,
}

/// Older clients wrote bare variant strings, newer ones `{ "variant": ... }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyExperimentEntry {
    Variant(String),
    Detailed {
        #[serde(default)]
        variant: Option<String>,
    },
    Other(serde_json::Value),
}

impl LegacyExperimentEntry {
    fn into_variant(self) -> Option<String> {
        let variant = match self {
            LegacyExperimentEntry::Variant(v) => Some(v),
            LegacyExperimentEntry::Detailed { variant } => variant,
            LegacyExperimentEntry::Other(_) => None,
        };
        variant.filter(|v| !v.is_empty())
    }
}

impl LocalStatePayload {
    /// Decodes each section on its own; a section of the wrong shape is
    /// treated as absent instead of failing the whole request.
    pub fn from_json_lenient(value: &serde_json::Value) -> Self {
        fn section<T: serde::de::DeserializeOwned>(
            value: &serde_json::Value,
            name: &str,
        ) -> Option<T> {
            value
                .get(name)
                .filter(|v| !v.is_null())
                .and_then(|v| T::deserialize(v).ok())
        }
        Self {
            trial: section(value, "trial"),
            first_project: section(value, "first_project"),
            meeting_quota: section(value, "meeting_quota"),
            experiments: section(value, "experiments"),
        }
    }

    /// Drops anything unusable; what remains is eligible for seeding.
    pub fn into_legacy(self) -> LegacyLocalState {
        let trial = self
            .trial
            .and_then(|t| t.started_at)
            .and_then(|raw| parse_client_timestamp(&raw))
            .map(|started_at| LegacyTrial { started_at });

        let first_project = self
            .first_project
            .and_then(|fp| fp.path_hash)
            .and_then(|raw| PathHash::new(raw).ok())
            .map(|path_hash| LegacyFirstProject { path_hash });

        let meeting_quota = self.meeting_quota.map(|mq| LegacyMeetingQuota {
            month: mq.month,
            used: legacy_count(mq.used),
        });

        let experiments = self
            .experiments
            .map(|entries| {
                entries
                    .into_iter()
                    .filter_map(|(name, entry)| {
                        if name.trim().is_empty() {
                            return None;
                        }
                        entry.into_variant().map(|variant| (name, variant))
                    })
                    .collect::<ExperimentAssignments>()
            })
            .filter(|assignments| !assignments.is_empty());

        LegacyLocalState {
            trial: trial.into(),
            first_project: first_project.into(),
            meeting_quota: meeting_quota.into(),
            experiments: experiments.into(),
        }
    }
}

/// Floors to a whole count; missing, negative or non-finite values count as 0.
fn legacy_count(raw: Option<f64>) -> u32 {
    match raw {
        Some(v) if v.is_finite() && v > 0.0 => v.floor().min(f64::from(u32::MAX)) as u32,
        _ => 0,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStateSnapshot {
    pub trial: TrialStatus,
    pub first_project: FirstProjectLock,
    pub meeting_quota: QuotaSnapshot,
    pub experiments: ExperimentAssignments,
    pub license: LicenseSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub server_state: ServerStateSnapshot,
    pub next_sync_seconds: u64,
}
