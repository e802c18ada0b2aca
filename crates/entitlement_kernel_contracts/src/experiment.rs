#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::common::validate_token;
use crate::{ContractViolation, StateSource, Validate};

pub const VARIANT_CONTROL: &str = "control";
pub const VARIANT_A: &str = "variant_a";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ExperimentName(String);

impl ExperimentName {
    pub fn new(name: impl Into<String>) -> Result<Self, ContractViolation> {
        let name = Self(name.into());
        name.validate()?;
        Ok(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for ExperimentName {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_token("experiment", &self.0, 128)
    }
}

impl TryFrom<String> for ExperimentName {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ExperimentName::new(value)
    }
}

impl From<ExperimentName> for String {
    fn from(value: ExperimentName) -> Self {
        value.0
    }
}

/// Row stored at `exp:{machine_id}`: experiment name to sticky variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentAssignments(BTreeMap<String, String>);

impl ExperimentAssignments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variant(&self, experiment: &ExperimentName) -> Option<&str> {
        self.0
            .get(experiment.as_str())
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn insert(&mut self, experiment: &ExperimentName, variant: impl Into<String>) {
        self.0.insert(experiment.as_str().to_string(), variant.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for ExperimentAssignments {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// `experiment/assign` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentAssignment {
    pub variant: String,
    pub source: StateSource,
}
