#![forbid(unsafe_code)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::{iso_millis, validate_token};
use crate::{ContractViolation, MachineId, SeedSource, Validate};

/// Opaque client-side hash of a project path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathHash(String);

impl PathHash {
    pub fn new(hash: impl Into<String>) -> Result<Self, ContractViolation> {
        let hash = Self(hash.into());
        hash.validate()?;
        Ok(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for PathHash {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("path_hash", &self.0, 512)
    }
}

impl TryFrom<String> for PathHash {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        PathHash::new(value)
    }
}

impl From<PathHash> for String {
    fn from(value: PathHash) -> Self {
        value.0
    }
}

/// Row stored at `fp:{machine_id}`. Never expires, never rebinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstProjectRecord {
    pub path_hash: PathHash,
    pub machine_id: MachineId,
    #[serde(with = "iso_millis")]
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seeded_from: Option<SeedSource>,
}

impl FirstProjectRecord {
    pub fn v1(machine_id: MachineId, path_hash: PathHash, registered_at: DateTime<Utc>) -> Self {
        Self {
            path_hash,
            machine_id,
            registered_at,
            seeded_from: None,
        }
    }

    pub fn seeded(
        machine_id: MachineId,
        path_hash: PathHash,
        registered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            seeded_from: Some(SeedSource::Local),
            ..Self::v1(machine_id, path_hash, registered_at)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectTier {
    First,
    Additional,
}

/// `project/register` body. `path_hash` is always the bound hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRegistration {
    pub registered: bool,
    pub is_first: bool,
    pub tier: ProjectTier,
    pub path_hash: PathHash,
}

/// Lock state as reported in the sync snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirstProjectLock {
    pub path_hash: Option<PathHash>,
    pub locked: bool,
}

impl FirstProjectLock {
    pub fn from_record(record: Option<&FirstProjectRecord>) -> Self {
        match record {
            Some(record) => Self {
                path_hash: Some(record.path_hash.clone()),
                locked: true,
            },
            None => Self {
                path_hash: None,
                locked: false,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyFirstProject {
    pub path_hash: PathHash,
}
