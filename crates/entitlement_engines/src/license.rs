#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use entitlement_kernel_contracts::license::{
    LicenseCheck, LicenseCheckSource, LicenseKey, LicenseRecord,
};
use entitlement_kernel_contracts::EntitlementConfig;
use entitlement_storage::repo::LicenseCacheRepo;
use entitlement_storage::{KvStore, StorageError};
use serde_json::{json, Value};

pub const POLAR_VALIDATE_URL: &str =
    "https://api.polar.sh/v1/customer-portal/license-keys/validate";

/// Tier reported for a valid key whose benefit carries no type.
pub const DEFAULT_LICENSE_TIER: &str = "personal";

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("license authority unreachable: {0}")]
    Transport(String),
    #[error("license authority answered http {0}")]
    Status(u16),
    #[error("license authority body malformed: {0}")]
    MalformedBody(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LicenseLookupError {
    #[error("license key shorter than {min_chars} chars")]
    KeyTooShort { min_chars: usize },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Remote authority that decides whether a key is valid.
pub trait LicenseAuthority: Send + Sync {
    fn validate_key(&self, key: &LicenseKey) -> Result<LicenseRecord, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolarAuthorityConfig {
    pub validate_url: String,
    pub organization_id: String,
    pub timeout_ms: u32,
}

impl PolarAuthorityConfig {
    pub fn mvp_v1() -> Self {
        Self {
            validate_url: POLAR_VALIDATE_URL.to_string(),
            organization_id: String::new(),
            timeout_ms: EntitlementConfig::mvp_v1().authority_timeout_ms,
        }
    }
}

/// Blocking client for the Polar license-key validate endpoint.
pub struct PolarLicenseAuthority {
    config: PolarAuthorityConfig,
    agent: ureq::Agent,
}

impl PolarLicenseAuthority {
    pub fn new(config: PolarAuthorityConfig) -> Self {
        let timeout = Duration::from_millis(u64::from(config.timeout_ms).max(100));
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(timeout)
            .timeout_read(timeout)
            .timeout_write(timeout)
            .try_proxy_from_env(false)
            .build();
        Self { config, agent }
    }
}

impl LicenseAuthority for PolarLicenseAuthority {
    fn validate_key(&self, key: &LicenseKey) -> Result<LicenseRecord, UpstreamError> {
        let response = self
            .agent
            .post(&self.config.validate_url)
            .set("Content-Type", "application/json")
            .set("Accept", "application/json")
            .send_json(json!({
                "key": key.as_str(),
                "organization_id": self.config.organization_id,
            }))
            .map_err(upstream_error_from_ureq)?;
        let body: Value = serde_json::from_reader(response.into_reader())
            .map_err(|err| UpstreamError::MalformedBody(err.to_string()))?;
        record_from_authority_body(&body)
    }
}

fn upstream_error_from_ureq(err: ureq::Error) -> UpstreamError {
    match err {
        ureq::Error::Status(status, _) => UpstreamError::Status(status),
        ureq::Error::Transport(transport) => {
            UpstreamError::Transport(format!("{:?}: {}", transport.kind(), transport))
        }
    }
}

/// Only a boolean `valid` is a verdict; anything else is malformed and
/// never cached. Tier comes from `benefit.type`.
pub fn record_from_authority_body(body: &Value) -> Result<LicenseRecord, UpstreamError> {
    let Some(object) = body.as_object() else {
        return Err(UpstreamError::MalformedBody(
            "expected a json object".to_string(),
        ));
    };
    let Some(valid) = object.get("valid").and_then(Value::as_bool) else {
        return Err(UpstreamError::MalformedBody(
            "missing boolean `valid`".to_string(),
        ));
    };
    let tier = valid.then(|| {
        object
            .get("benefit")
            .and_then(|b| b.get("type"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_LICENSE_TIER)
            .to_string()
    });
    let customer_id = object
        .get("customer_id")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);
    Ok(LicenseRecord {
        valid,
        tier,
        customer_id,
    })
}

/// Authority lookups behind `license:{key}`. Verdicts are cached, failures never.
#[derive(Clone)]
pub struct LicenseClient {
    config: EntitlementConfig,
    store: Arc<dyn KvStore>,
    authority: Arc<dyn LicenseAuthority>,
}

impl LicenseClient {
    pub fn new(
        config: EntitlementConfig,
        store: Arc<dyn KvStore>,
        authority: Arc<dyn LicenseAuthority>,
    ) -> Self {
        Self {
            config,
            store,
            authority,
        }
    }

    /// `Ok(None)` when validity is unknown: no key, a short key, or an
    /// unreachable authority.
    pub fn validate(
        &self,
        key: Option<&LicenseKey>,
    ) -> Result<Option<LicenseRecord>, StorageError> {
        let Some(key) = key else {
            return Ok(None);
        };
        match self.lookup(key) {
            Ok(record) => Ok(Some(record)),
            Err(LicenseLookupError::KeyTooShort { .. }) => Ok(None),
            Err(LicenseLookupError::Upstream(err)) => {
                tracing::warn!(error = %err, "license validation unavailable");
                Ok(None)
            }
            Err(LicenseLookupError::Storage(err)) => Err(err),
        }
    }

    pub fn lookup(&self, key: &LicenseKey) -> Result<LicenseRecord, LicenseLookupError> {
        let min_chars = self.config.license_key_min_chars;
        if key.char_len() < min_chars {
            return Err(LicenseLookupError::KeyTooShort { min_chars });
        }
        if let Some(cached) = self.store.license_cache_row(key)? {
            return Ok(cached);
        }
        let record = self.authority.validate_key(key)?;
        if let Err(err) =
            self.store
                .put_license_cache_row(key, &record, self.config.license_cache_ttl())
        {
            tracing::warn!(error = %err, "license verdict not cached");
        }
        tracing::info!(valid = record.valid, "license validated by authority");
        Ok(record)
    }

    /// Revocation check. A cache row of any key length is answered from cache.
    pub fn check(&self, key: &LicenseKey) -> Result<LicenseCheck, StorageError> {
        if let Some(cached) = self.store.license_cache_row(key)? {
            return Ok(LicenseCheck {
                record: Some(cached),
                source: LicenseCheckSource::Cache,
            });
        }
        Ok(LicenseCheck {
            record: self.validate(Some(key))?,
            source: LicenseCheckSource::Fresh,
        })
    }
}


#[cfg(test)]
mod tests {
    use super::fake::FakeAuthority;
    use super::*;
    use crate::test_support::clock_and_store;
    use chrono::Duration as ChronoDuration;
    use entitlement_kernel_contracts::ManualClock;

    fn valid_pro() -> LicenseRecord {
        LicenseRecord {
            valid: true,
            tier: Some("pro".to_string()),
            customer_id: Some("cus_1".to_string()),
        }
    }

    fn client(authority: Arc<FakeAuthority>) -> (Arc<ManualClock>, LicenseClient) {
        let (clock, store) = clock_and_store();
        (
            clock,
            LicenseClient::new(EntitlementConfig::mvp_v1(), store, authority),
        )
    }

    fn key(raw: &str) -> LicenseKey {
        LicenseKey::parse(Some(raw)).unwrap()
    }

    #[test]
    fn short_keys_never_reach_the_authority() {
        let authority = Arc::new(FakeAuthority::answering(valid_pro()));
        let (_clock, client) = client(authority.clone());
        assert_eq!(client.validate(Some(&key("SHORT"))).unwrap(), None);
        assert!(matches!(
            client.lookup(&key("123456789")),
            Err(LicenseLookupError::KeyTooShort { min_chars: 10 })
        ));
        assert_eq!(authority.calls(), 0);
    }

    #[test]
    fn verdict_is_cached_for_a_day() {
        let authority = Arc::new(FakeAuthority::answering(valid_pro()));
        let (clock, client) = client(authority.clone());
        let k = key("LICENSE-KEY-0001");
        assert_eq!(client.validate(Some(&k)).unwrap(), Some(valid_pro()));
        assert_eq!(client.validate(Some(&k)).unwrap(), Some(valid_pro()));
        assert_eq!(authority.calls(), 1);

        clock.advance(ChronoDuration::hours(24));
        client.validate(Some(&k)).unwrap();
        assert_eq!(authority.calls(), 2);
    }

    #[test]
    fn invalid_verdicts_are_cached_too() {
        let revoked = LicenseRecord {
            valid: false,
            tier: None,
            customer_id: None,
        };
        let authority = Arc::new(FakeAuthority::answering(revoked.clone()));
        let (_clock, client) = client(authority.clone());
        let k = key("LICENSE-KEY-0002");
        assert_eq!(client.lookup(&k).unwrap(), revoked);
        assert_eq!(client.lookup(&k).unwrap(), revoked);
        assert_eq!(authority.calls(), 1);
    }

    #[test]
    fn upstream_failures_are_unknown_and_not_cached() {
        let authority = Arc::new(FakeAuthority::failing(503));
        let (_clock, client) = client(authority.clone());
        let k = key("LICENSE-KEY-0003");
        assert_eq!(client.validate(Some(&k)).unwrap(), None);
        assert!(matches!(
            client.lookup(&k),
            Err(LicenseLookupError::Upstream(UpstreamError::Status(503)))
        ));
        assert_eq!(authority.calls(), 2);

        *authority.answer.lock().unwrap() = Some(Ok(valid_pro()));
        assert_eq!(client.validate(Some(&k)).unwrap(), Some(valid_pro()));
    }

    #[test]
    fn check_reports_cache_then_fresh() {
        let authority = Arc::new(FakeAuthority::answering(valid_pro()));
        let (_clock, client) = client(authority.clone());
        let k = key("LICENSE-KEY-0004");
        let first = client.check(&k).unwrap();
        assert_eq!(first.source, LicenseCheckSource::Fresh);
        assert_eq!(first.record, Some(valid_pro()));
        let second = client.check(&k).unwrap();
        assert_eq!(second.source, LicenseCheckSource::Cache);
        assert_eq!(authority.calls(), 1);
    }

    #[test]
    fn check_with_unreachable_authority_is_fresh_and_unknown() {
        let authority = Arc::new(FakeAuthority::default());
        let (_clock, client) = client(authority);
        let out = client.check(&key("LICENSE-KEY-0005")).unwrap();
        assert_eq!(out.source, LicenseCheckSource::Fresh);
        assert_eq!(out.record, None);
    }

    #[test]
    fn authority_body_normalization() {
        let with_benefit = json!({"valid": true, "benefit": {"type": "team"}, "customer_id": "c9"});
        let record = record_from_authority_body(&with_benefit).unwrap();
        assert_eq!(record.tier.as_deref(), Some("team"));
        assert_eq!(record.customer_id.as_deref(), Some("c9"));

        let bare = record_from_authority_body(&json!({"valid": true})).unwrap();
        assert_eq!(bare.tier.as_deref(), Some(DEFAULT_LICENSE_TIER));

        let revoked = record_from_authority_body(&json!({"valid": false})).unwrap();
        assert!(!revoked.valid);
        assert_eq!(revoked.tier, None);

        for no_verdict in [
            json!({"valid": "yes"}),
            json!({"valid": 1}),
            json!({"valid": null}),
            json!({"detail": "organization not found"}),
        ] {
            assert!(
                matches!(
                    record_from_authority_body(&no_verdict),
                    Err(UpstreamError::MalformedBody(_))
                ),
                "{no_verdict}"
            );
        }

        assert!(matches!(
            record_from_authority_body(&json!([1, 2])),
            Err(UpstreamError::MalformedBody(_))
        ));
    }
}

#[cfg(test)]
mod polar_tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{SocketAddr, TcpListener};
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::test_support::clock_and_store;

    /// Answers exactly one request with `status` and `body`, after reading it in full.
    fn one_shot_server(status: &'static str, body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                if reader.read_line(&mut line).unwrap() == 0 || line == "\r\n" {
                    break;
                }
                let lower = line.to_ascii_lowercase();
                if let Some(value) = lower.strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
            }
            let mut request_body = vec![0u8; content_length];
            reader.read_exact(&mut request_body).unwrap();
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let mut stream = reader.into_inner();
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
        });
        addr
    }

    fn authority_at(addr: SocketAddr, timeout_ms: u32) -> Arc<PolarLicenseAuthority> {
        Arc::new(PolarLicenseAuthority::new(PolarAuthorityConfig {
            validate_url: format!("http://{addr}/v1/customer-portal/license-keys/validate"),
            organization_id: "org_test".to_string(),
            timeout_ms,
        }))
    }

    fn key() -> LicenseKey {
        LicenseKey::parse(Some("LICENSE-KEY-HTTP-01")).unwrap()
    }

    fn client_for(authority: Arc<PolarLicenseAuthority>) -> (Arc<dyn KvStore>, LicenseClient) {
        let (_clock, store) = clock_and_store();
        let client = LicenseClient::new(EntitlementConfig::mvp_v1(), store.clone(), authority);
        (store, client)
    }

    #[test]
    fn server_error_is_a_status_failure_and_not_cached() {
        let authority = authority_at(one_shot_server("500 Internal Server Error", "{}"), 2_000);
        let (store, client) = client_for(authority);
        assert!(matches!(
            client.lookup(&key()),
            Err(LicenseLookupError::Upstream(UpstreamError::Status(500)))
        ));
        assert_eq!(store.license_cache_row(&key()).unwrap(), None);
    }

    #[test]
    fn non_json_body_is_malformed_and_not_cached() {
        let authority = authority_at(one_shot_server("200 OK", "<html>oops</html>"), 2_000);
        let (store, client) = client_for(authority);
        assert!(matches!(
            client.lookup(&key()),
            Err(LicenseLookupError::Upstream(UpstreamError::MalformedBody(_)))
        ));
        assert_eq!(store.license_cache_row(&key()).unwrap(), None);
    }

    #[test]
    fn body_without_verdict_is_unknown_and_not_cached() {
        let authority = authority_at(
            one_shot_server("200 OK", r#"{"detail":"organization not found"}"#),
            2_000,
        );
        let (store, client) = client_for(authority);
        assert_eq!(client.validate(Some(&key())).unwrap(), None);
        assert_eq!(store.license_cache_row(&key()).unwrap(), None);
    }

    #[test]
    fn silent_authority_times_out_within_bound() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let authority = authority_at(listener.local_addr().unwrap(), 200);
        let started = Instant::now();
        let outcome = authority.validate_key(&key());
        assert!(
            matches!(outcome, Err(UpstreamError::Transport(_))),
            "{outcome:?}"
        );
        assert!(started.elapsed() < Duration::from_secs(3));
        drop(listener);
    }

    #[test]
    fn valid_verdict_is_cached_with_benefit_tier() {
        let authority = authority_at(
            one_shot_server("200 OK", r#"{"valid":true,"benefit":{"type":"team"}}"#),
            2_000,
        );
        let (store, client) = client_for(authority);
        let record = client.validate(Some(&key())).unwrap().unwrap();
        assert!(record.valid);
        assert_eq!(record.tier.as_deref(), Some("team"));
        assert_eq!(store.license_cache_row(&key()).unwrap(), Some(record));
    }
}
