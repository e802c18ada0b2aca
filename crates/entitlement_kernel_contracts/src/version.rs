#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use crate::ContractViolation;

/// `major.minor.patch` client version. Missing components read as zero,
/// components past the third are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ClientVersion {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    pub fn satisfies(&self, minimum: &ClientVersion) -> bool {
        self >= minimum
    }
}

impl FromStr for ClientVersion {
    type Err = ContractViolation;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = [0u32; 3];
        for (slot, part) in parts.iter_mut().zip(raw.split('.')) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            *slot = part
                .parse::<u32>()
                .map_err(|_| ContractViolation::InvalidValue {
                    field: "client_version",
                    reason: "components must be non-negative integers",
                })?;
        }
        Ok(Self::new(parts[0], parts[1], parts[2]))
    }
}

impl fmt::Display for ClientVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}
