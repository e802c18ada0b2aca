#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use entitlement_kernel_contracts::Clock;
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("kv backend failure: {0}")]
    Backend(String),
    #[error("kv store lock poisoned")]
    LockPoisoned,
    #[error("record at {key} failed to decode: {source}")]
    Codec {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("ttl out of range for {key}")]
    TtlOutOfRange { key: String },
}

/// Eventually-consistent JSON key-value store.
///
/// No multi-key transactions and no compare-and-swap: a `get` followed by a
/// `put` on the same key can interleave with another caller's pair, and the
/// later `put` wins.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// `ttl: None` keeps the value until overwritten.
    fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StorageError>;
}

#[derive(Debug, Clone)]
struct KvEntry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// Process-local store with clock-driven expiry.
pub struct InMemoryKvStore {
    clock: Arc<dyn Clock>,
    entries: Mutex<BTreeMap<String, KvEntry>>,
}

impl InMemoryKvStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Expiry instant of a live key.
    pub fn expires_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, StorageError> {
        let now = self.clock.now();
        let entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries
            .get(key)
            .filter(|e| is_live(e, now))
            .and_then(|e| e.expires_at))
    }

    /// Live keys, sorted.
    pub fn keys(&self) -> Result<Vec<String>, StorageError> {
        let now = self.clock.now();
        let entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(entries
            .iter()
            .filter(|(_, e)| is_live(e, now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        let before = entries.len();
        entries.retain(|_, e| is_live(e, now));
        Ok(before - entries.len())
    }
}

fn is_live(entry: &KvEntry, now: DateTime<Utc>) -> bool {
    entry.expires_at.map_or(true, |at| now < at)
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        match entries.get(key) {
            Some(entry) if is_live(entry, now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<(), StorageError> {
        let expires_at = match ttl {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl).map_err(|_| {
                    StorageError::TtlOutOfRange {
                        key: key.to_string(),
                    }
                })?;
                Some(self.clock.now() + ttl)
            }
            None => None,
        };
        let mut entries = self.entries.lock().map_err(|_| StorageError::LockPoisoned)?;
        entries.insert(key.to_string(), KvEntry { value, expires_at });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use entitlement_kernel_contracts::ManualClock;
    use serde_json::json;

    fn store() -> (Arc<ManualClock>, InMemoryKvStore) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap(),
        ));
        let store = InMemoryKvStore::new(clock.clone());
        (clock, store)
    }

    #[test]
    fn values_expire_at_ttl() {
        let (clock, store) = store();
        store
            .put("k", json!({"a": 1}), Some(Duration::from_secs(60)))
            .unwrap();
        clock.advance(chrono::Duration::seconds(59));
        assert_eq!(store.get("k").unwrap(), Some(json!({"a": 1})));
        clock.advance(chrono::Duration::seconds(1));
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn values_without_ttl_persist() {
        let (clock, store) = store();
        store.put("fp", json!("x"), None).unwrap();
        clock.advance(chrono::Duration::days(3650));
        assert_eq!(store.get("fp").unwrap(), Some(json!("x")));
        assert_eq!(store.expires_at("fp").unwrap(), None);
    }

    #[test]
    fn put_overwrites_and_resets_ttl() {
        let (clock, store) = store();
        store
            .put("k", json!(1), Some(Duration::from_secs(10)))
            .unwrap();
        clock.advance(chrono::Duration::seconds(8));
        store
            .put("k", json!(2), Some(Duration::from_secs(10)))
            .unwrap();
        clock.advance(chrono::Duration::seconds(8));
        assert_eq!(store.get("k").unwrap(), Some(json!(2)));
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let (clock, store) = store();
        store
            .put("short", json!(1), Some(Duration::from_secs(5)))
            .unwrap();
        store.put("forever", json!(1), None).unwrap();
        clock.advance(chrono::Duration::seconds(6));
        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.keys().unwrap(), vec!["forever".to_string()]);
    }
}
