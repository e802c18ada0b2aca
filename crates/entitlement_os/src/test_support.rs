use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use entitlement_engines::license::{LicenseAuthority, UpstreamError};
use entitlement_kernel_contracts::license::{LicenseKey, LicenseRecord};
use entitlement_kernel_contracts::{EntitlementConfig, MachineId, ManualClock};
use entitlement_storage::{InMemoryKvStore, KvStore};

use crate::EntitlementService;

pub fn mid(id: &str) -> MachineId {
    MachineId::new(id).unwrap()
}

/// Answers every key with the scripted verdict; `None` simulates an outage.
pub struct ScriptedAuthority {
    calls: AtomicUsize,
    verdict: Mutex<Option<LicenseRecord>>,
}

impl ScriptedAuthority {
    pub fn respond_with(&self, record: LicenseRecord) {
        *self.verdict.lock().unwrap() = Some(record);
    }

    pub fn go_offline(&self) {
        *self.verdict.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl LicenseAuthority for ScriptedAuthority {
    fn validate_key(&self, _key: &LicenseKey) -> Result<LicenseRecord, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| UpstreamError::Transport("connection refused".to_string()))
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub authority: Arc<ScriptedAuthority>,
    pub service: EntitlementService,
}

pub fn harness() -> Harness {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
    ));
    let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new(clock.clone()));
    let authority = Arc::new(ScriptedAuthority {
        calls: AtomicUsize::new(0),
        verdict: Mutex::new(Some(LicenseRecord {
            valid: true,
            tier: Some("pro".to_string()),
            customer_id: Some("cus_test".to_string()),
        })),
    });
    let service = EntitlementService::new(
        EntitlementConfig::mvp_v1(),
        store,
        clock.clone(),
        authority.clone(),
    );
    Harness {
        clock,
        authority,
        service,
    }
}
