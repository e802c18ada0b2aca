use std::sync::Arc;

use chrono::{TimeZone, Utc};
use entitlement_kernel_contracts::{MachineId, ManualClock};
use entitlement_storage::{InMemoryKvStore, KvStore};

pub fn mid(id: &str) -> MachineId {
    MachineId::new(id).unwrap()
}

pub fn clock_and_store() -> (Arc<ManualClock>, Arc<dyn KvStore>) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
    ));
    let store: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new(clock.clone()));
    (clock, store)
}
