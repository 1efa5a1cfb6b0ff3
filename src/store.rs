use crate::error::DhtError;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct StoredValue {
    data: Bytes,
    deadline: Instant,
    forget: bool,
}

/// In-memory map from content-hash key to an expiring value.
///
/// Values live for one TTL window unless re-put or refreshed; reads never
/// extend the deadline, only an explicit refresh does. Expired entries are
/// evicted lazily on the next access, whichever accessor that is. The
/// forget flag is a soft marker that
/// stops proactive refresh traffic without purging the local copy, which
/// then ages out on its own.
pub struct Datastore {
    ttl: Duration,
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl Datastore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Inserts or overwrites, resetting the deadline and the forget flag.
    pub fn put(&self, key: String, data: Bytes) {
        self.entries.lock().insert(
            key,
            StoredValue {
                data,
                deadline: Instant::now() + self.ttl,
                forget: false,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key);
        entries.get(key).map(|value| value.data.clone())
    }

    pub fn refresh(&self, key: &str) -> Result<(), DhtError> {
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key);
        let value = entries.get_mut(key).ok_or(DhtError::NotFound)?;
        value.deadline = Instant::now() + self.ttl;
        Ok(())
    }

    /// Flips the forget marker, returning its new state.
    pub fn toggle_forget(&self, key: &str) -> Result<bool, DhtError> {
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key);
        let value = entries.get_mut(key).ok_or(DhtError::NotFound)?;
        value.forget = !value.forget;
        Ok(value.forget)
    }

    pub fn is_forgotten(&self, key: &str) -> Result<bool, DhtError> {
        let mut entries = self.entries.lock();
        Self::evict_if_expired(&mut entries, key);
        entries
            .get(key)
            .map(|value| value.forget)
            .ok_or(DhtError::NotFound)
    }

    // Lazy eviction shared by every accessor: a dead entry must never be
    // read, refreshed, or resurrected.
    fn evict_if_expired(entries: &mut HashMap<String, StoredValue>, key: &str) {
        if let Some(value) = entries.get(key) {
            if Instant::now() > value.deadline {
                entries.remove(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    const SHORT_TTL: Duration = Duration::from_millis(50);

    #[test]
    fn put_then_get_round_trips() {
        let store = Datastore::new(SHORT_TTL);
        store.put("k".into(), Bytes::from_static(b"v"));
        assert_eq!(store.get("k"), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn get_after_ttl_evicts() {
        let store = Datastore::new(SHORT_TTL);
        store.put("k".into(), Bytes::from_static(b"v"));

        sleep(SHORT_TTL + Duration::from_millis(20));
        assert_eq!(store.get("k"), None);
        // Gone for good, not just hidden.
        assert!(matches!(store.refresh("k"), Err(DhtError::NotFound)));
    }

    #[test]
    fn refresh_extends_the_deadline() {
        let store = Datastore::new(SHORT_TTL);
        store.put("k".into(), Bytes::from_static(b"v"));

        sleep(Duration::from_millis(30));
        store.refresh("k").unwrap();
        sleep(Duration::from_millis(30));

        // Past the original deadline but inside the refreshed one.
        assert_eq!(store.get("k"), Some(Bytes::from_static(b"v")));
    }

    #[test]
    fn get_does_not_extend_the_deadline() {
        let store = Datastore::new(SHORT_TTL);
        store.put("k".into(), Bytes::from_static(b"v"));

        sleep(Duration::from_millis(30));
        assert!(store.get("k").is_some());
        sleep(Duration::from_millis(40));

        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn forget_toggles_and_reads_back() {
        let store = Datastore::new(SHORT_TTL);
        store.put("k".into(), Bytes::from_static(b"v"));

        assert!(!store.is_forgotten("k").unwrap());
        assert!(store.toggle_forget("k").unwrap());
        assert!(store.is_forgotten("k").unwrap());
        assert!(!store.toggle_forget("k").unwrap());

        // Re-putting clears the marker.
        store.toggle_forget("k").unwrap();
        store.put("k".into(), Bytes::from_static(b"v2"));
        assert!(!store.is_forgotten("k").unwrap());
    }

    #[test]
    fn expired_entries_cannot_be_refreshed_back_to_life() {
        let store = Datastore::new(SHORT_TTL);
        store.put("k".into(), Bytes::from_static(b"v"));

        // No intervening get: refresh itself must notice the expiry.
        sleep(SHORT_TTL + Duration::from_millis(30));
        assert!(matches!(store.refresh("k"), Err(DhtError::NotFound)));
        assert_eq!(store.get("k"), None);
    }

    #[test]
    fn forget_flag_does_not_outlive_expiry() {
        let store = Datastore::new(SHORT_TTL);
        store.put("k".into(), Bytes::from_static(b"v"));
        store.toggle_forget("k").unwrap();

        sleep(SHORT_TTL + Duration::from_millis(30));
        assert!(matches!(store.is_forgotten("k"), Err(DhtError::NotFound)));
        assert!(matches!(store.toggle_forget("k"), Err(DhtError::NotFound)));
    }

    #[test]
    fn missing_keys_report_not_found() {
        let store = Datastore::new(SHORT_TTL);
        assert!(matches!(store.refresh("nope"), Err(DhtError::NotFound)));
        assert!(matches!(store.toggle_forget("nope"), Err(DhtError::NotFound)));
        assert!(matches!(store.is_forgotten("nope"), Err(DhtError::NotFound)));
    }
}
