#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use entitlement_kernel_contracts::experiment::{ExperimentAssignments, ExperimentName};
use entitlement_kernel_contracts::license::{LicenseKey, LicenseRecord};
use entitlement_kernel_contracts::project::{FirstProjectRecord, PathHash};
use entitlement_kernel_contracts::quota::{MeetingQuotaRecord, QuotaMonth};
use entitlement_kernel_contracts::trial::TrialRecord;
use entitlement_kernel_contracts::{Clock, MachineId, ManualClock};
use entitlement_storage::repo::{
    ExperimentRepo, FirstProjectRepo, LicenseCacheRepo, MeetingQuotaRepo, TrialRepo,
};
use entitlement_storage::{InMemoryKvStore, KvStore, StorageError};
use serde_json::json;

fn mid(id: &str) -> MachineId {
    MachineId::new(id).unwrap()
}

fn fixture() -> (Arc<ManualClock>, InMemoryKvStore) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
    ));
    let store = InMemoryKvStore::new(clock.clone());
    (clock, store)
}

#[test]
fn at_kv_db_01_rows_land_on_documented_keys() {
    let (clock, store) = fixture();
    let m = mid("abcdefgh12");
    let month = QuotaMonth::new("2026-10").unwrap();

    store
        .put_trial_row(
            &TrialRecord::v1(m.clone(), clock.now()),
            Duration::from_secs(30 * 86_400),
        )
        .unwrap();
    store
        .put_first_project_row(&FirstProjectRecord::v1(
            m.clone(),
            PathHash::new("hash-1").unwrap(),
            clock.now(),
        ))
        .unwrap();
    store
        .put_meeting_quota_row(
            &m,
            &MeetingQuotaRecord {
                month: month.clone(),
                used: 2,
            },
            Duration::from_secs(45 * 86_400),
        )
        .unwrap();
    let mut exp = ExperimentAssignments::new();
    exp.insert(&ExperimentName::new("pricing").unwrap(), "control");
    store
        .put_experiment_rows(&m, &exp, Duration::from_secs(90 * 86_400))
        .unwrap();
    let key = LicenseKey::parse(Some("LIC-0123456789")).unwrap();
    store
        .put_license_cache_row(
            &key,
            &LicenseRecord {
                valid: true,
                tier: Some("personal".to_string()),
                customer_id: None,
            },
            Duration::from_secs(86_400),
        )
        .unwrap();

    assert_eq!(
        store.keys().unwrap(),
        vec![
            "exp:abcdefgh12".to_string(),
            "fp:abcdefgh12".to_string(),
            "license:LIC-0123456789".to_string(),
            "mq:abcdefgh12:2026-10".to_string(),
            "trial:abcdefgh12".to_string(),
        ]
    );
}

#[test]
fn at_kv_db_02_first_project_rows_never_expire() {
    let (clock, store) = fixture();
    let m = mid("abcdefgh12");
    store
        .put_first_project_row(&FirstProjectRecord::v1(
            m.clone(),
            PathHash::new("hash-1").unwrap(),
            clock.now(),
        ))
        .unwrap();
    assert_eq!(store.expires_at("fp:abcdefgh12").unwrap(), None);
    clock.advance(chrono::Duration::days(10_000));
    assert!(store.first_project_row(&m).unwrap().is_some());
}

#[test]
fn at_kv_db_03_trial_row_expires_after_ttl() {
    let (clock, store) = fixture();
    let m = mid("abcdefgh12");
    store
        .put_trial_row(
            &TrialRecord::v1(m.clone(), clock.now()),
            Duration::from_secs(30 * 86_400),
        )
        .unwrap();
    clock.advance(chrono::Duration::days(29));
    assert!(store.trial_row(&m).unwrap().is_some());
    clock.advance(chrono::Duration::days(1));
    assert!(store.trial_row(&m).unwrap().is_none());
}

#[test]
fn at_kv_db_04_rows_written_by_older_deployments_decode() {
    let (_clock, store) = fixture();
    let m = mid("abcdefgh12");
    store
        .put(
            "trial:abcdefgh12",
            json!({
                "started_at": "2026-10-01T00:00:00.000Z",
                "machine_id": "abcdefgh12",
                "seeded_from": "local",
                "seeded_at": "2026-10-02T00:00:00.000Z"
            }),
            None,
        )
        .unwrap();
    store
        .put(
            "mq:abcdefgh12:2026-10",
            json!({"month": "2026-10", "used": 3}),
            None,
        )
        .unwrap();

    let trial = store.trial_row(&m).unwrap().unwrap();
    assert!(trial.seeded_from.is_some());
    let quota = store
        .meeting_quota_row(&m, &QuotaMonth::new("2026-10").unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(quota.used, 3);
}

#[test]
fn at_kv_db_05_corrupt_rows_surface_codec_errors() {
    let (_clock, store) = fixture();
    store
        .put("fp:abcdefgh12", json!({"path_hash": 42}), None)
        .unwrap();
    let err = store
        .first_project_row(&mid("abcdefgh12"))
        .expect_err("corrupt row must not decode");
    match err {
        StorageError::Codec { key, .. } => assert_eq!(key, "fp:abcdefgh12"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn at_kv_db_06_machines_are_isolated() {
    let (clock, store) = fixture();
    let a = mid("machine-a-0001");
    let b = mid("machine-b-0001");
    store
        .put_trial_row(&TrialRecord::v1(a.clone(), clock.now()), Duration::from_secs(60))
        .unwrap();
    assert!(store.trial_row(&a).unwrap().is_some());
    assert!(store.trial_row(&b).unwrap().is_none());
}
