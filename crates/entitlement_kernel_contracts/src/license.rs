#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// Third-party license key. Never printed in full.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LicenseKey(String);

impl LicenseKey {
    /// `None` for absent or blank keys.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.filter(|k| !k.is_empty()).map(|k| Self(k.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn char_len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Debug for LicenseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LicenseKey(<{} chars>)", self.char_len())
    }
}

/// Normalized authority verdict; also the row stored at `license:{key}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseRecord {
    pub valid: bool,
    pub tier: Option<String>,
    pub customer_id: Option<String>,
}

impl LicenseRecord {
    pub fn summary(&self) -> LicenseSummary {
        LicenseSummary {
            valid: self.valid,
            tier: self.tier.clone(),
        }
    }
}

/// Caller-facing validity. Unknown validation degrades to `valid: false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LicenseSummary {
    pub valid: bool,
    pub tier: Option<String>,
}

impl LicenseSummary {
    pub fn from_lookup(record: Option<&LicenseRecord>) -> Self {
        record.map(LicenseRecord::summary).unwrap_or(Self {
            valid: false,
            tier: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseCheckSource {
    Cache,
    Fresh,
}

/// Revocation-check outcome. `record: None` means validation is unknown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseCheck {
    pub record: Option<LicenseRecord>,
    pub source: LicenseCheckSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatOk {
    pub valid: bool,
    pub tier: Option<String>,
    pub next_heartbeat_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_key_material() {
        let key = LicenseKey::parse(Some("SECRET-KEY-1234")).unwrap();
        let shown = format!("{key:?}");
        assert!(!shown.contains("SECRET"));
        assert_eq!(shown, "LicenseKey(<15 chars>)");
    }

    #[test]
    fn blank_keys_parse_to_none() {
        assert_eq!(LicenseKey::parse(Some("")), None);
        assert_eq!(LicenseKey::parse(None), None);
    }

    #[test]
    fn missing_lookup_degrades_to_invalid() {
        assert_eq!(
            LicenseSummary::from_lookup(None),
            LicenseSummary {
                valid: false,
                tier: None
            }
        );
    }
}
