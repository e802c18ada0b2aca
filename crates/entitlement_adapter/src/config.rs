#![forbid(unsafe_code)]

use std::env;
use std::net::SocketAddr;

use entitlement_engines::license::{PolarAuthorityConfig, POLAR_VALIDATE_URL};
use entitlement_kernel_contracts::{ClientVersion, ContractViolation, EntitlementConfig, Validate};

pub const ENV_HTTP_BIND: &str = "ENTITLEMENT_HTTP_BIND";
pub const ENV_TRIAL_DAYS: &str = "ENTITLEMENT_TRIAL_DAYS";
pub const ENV_MONTHLY_QUOTA: &str = "ENTITLEMENT_MONTHLY_QUOTA";
pub const ENV_LICENSE_VALIDATE_URL: &str = "ENTITLEMENT_LICENSE_VALIDATE_URL";
pub const ENV_LICENSE_ORG_ID: &str = "ENTITLEMENT_LICENSE_ORG_ID";
pub const ENV_LICENSE_TIMEOUT_MS: &str = "ENTITLEMENT_LICENSE_TIMEOUT_MS";
pub const ENV_MIN_CLIENT_VERSION: &str = "ENTITLEMENT_MIN_CLIENT_VERSION";

const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8787";

#[derive(Debug, thiserror::Error)]
pub enum AdapterConfigError {
    #[error("ENTITLEMENT_HTTP_BIND={value:?} is not a socket address")]
    InvalidBind { value: String },
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterConfig {
    pub bind: SocketAddr,
    pub entitlement: EntitlementConfig,
    pub authority: PolarAuthorityConfig,
}

impl AdapterConfig {
    pub fn from_env() -> Result<Self, AdapterConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Out-of-range or unparseable overrides fall back to the defaults;
    /// only an unusable bind address is fatal.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, AdapterConfigError> {
        let bind_raw = lookup(ENV_HTTP_BIND).unwrap_or_else(|| DEFAULT_HTTP_BIND.to_string());
        let bind = bind_raw
            .trim()
            .parse::<SocketAddr>()
            .map_err(|_| AdapterConfigError::InvalidBind {
                value: bind_raw.clone(),
            })?;

        let mut entitlement = EntitlementConfig::mvp_v1();
        entitlement.trial_days = parse_trial_days(&lookup, entitlement.trial_days);
        entitlement.monthly_quota_limit =
            parse_monthly_quota(&lookup, entitlement.monthly_quota_limit);
        entitlement.authority_timeout_ms =
            parse_license_timeout_ms(&lookup, entitlement.authority_timeout_ms);
        entitlement.min_client_version =
            parse_min_client_version(&lookup, entitlement.min_client_version);
        entitlement.validate()?;

        let authority = PolarAuthorityConfig {
            validate_url: lookup(ENV_LICENSE_VALIDATE_URL)
                .map(|v| v.trim().to_string())
                .filter(|v| v.starts_with("http://") || v.starts_with("https://"))
                .unwrap_or_else(|| POLAR_VALIDATE_URL.to_string()),
            organization_id: lookup(ENV_LICENSE_ORG_ID)
                .map(|v| v.trim().to_string())
                .unwrap_or_default(),
            timeout_ms: entitlement.authority_timeout_ms,
        };

        Ok(Self {
            bind,
            entitlement,
            authority,
        })
    }
}

fn parse_trial_days(lookup: &impl Fn(&str) -> Option<String>, default: u32) -> u32 {
    lookup(ENV_TRIAL_DAYS)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| (1..=30).contains(v))
        .unwrap_or(default)
}

fn parse_monthly_quota(lookup: &impl Fn(&str) -> Option<String>, default: u32) -> u32 {
    lookup(ENV_MONTHLY_QUOTA)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| (1..=500).contains(v))
        .unwrap_or(default)
}

fn parse_license_timeout_ms(lookup: &impl Fn(&str) -> Option<String>, default: u32) -> u32 {
    lookup(ENV_LICENSE_TIMEOUT_MS)
        .and_then(|v| v.trim().parse::<u32>().ok())
        .filter(|v| (100..=60_000).contains(v))
        .unwrap_or(default)
}

fn parse_min_client_version(
    lookup: &impl Fn(&str) -> Option<String>,
    default: ClientVersion,
) -> ClientVersion {
    lookup(ENV_MIN_CLIENT_VERSION)
        .and_then(|v| v.trim().parse::<ClientVersion>().ok())
        .unwrap_or(default)
}
