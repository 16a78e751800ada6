use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{MetricStore, StoreError, StoreInfo};
use crate::models::StoredSample;

// seq départage les ts égaux et garde les doublons distincts
type HostKey = (String, String, i64, u64);
type OwnerKey = (String, i64, u64);

#[derive(Default)]
struct Indexes {
    next_seq: u64,
    by_owner_host_ts: BTreeMap<HostKey, Arc<StoredSample>>,
    by_owner_ts: BTreeMap<OwnerKey, Arc<StoredSample>>,
}

/// Store en mémoire, indexé par (owner, host, ts) et (owner, ts)
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Indexes>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricStore for MemoryStore {
    fn insert(&self, record: StoredSample) -> Result<(), StoreError> {
        let mut idx = self.inner.lock();
        let seq = idx.next_seq;
        idx.next_seq += 1;

        let ts = record.ts();
        let host_key = (record.owner_id.clone(), record.host.clone(), ts, seq);
        let owner_key = (record.owner_id.clone(), ts, seq);
        let record = Arc::new(record);

        idx.by_owner_host_ts.insert(host_key, record.clone());
        idx.by_owner_ts.insert(owner_key, record);
        Ok(())
    }

    fn latest_for_host(&self, owner: &str, host: &str, limit: usize) -> Result<Vec<StoredSample>, StoreError> {
        let lo = (owner.to_string(), host.to_string(), i64::MIN, 0);
        let hi = (owner.to_string(), host.to_string(), i64::MAX, u64::MAX);

        let idx = self.inner.lock();
        Ok(idx
            .by_owner_host_ts
            .range(lo..=hi)
            .rev()
            .take(limit)
            .map(|(_, r)| r.as_ref().clone())
            .collect())
    }

    fn latest_for_owner(&self, owner: &str, limit: usize) -> Result<Vec<StoredSample>, StoreError> {
        let lo = (owner.to_string(), i64::MIN, 0);
        let hi = (owner.to_string(), i64::MAX, u64::MAX);

        let idx = self.inner.lock();
        Ok(idx
            .by_owner_ts
            .range(lo..=hi)
            .rev()
            .take(limit)
            .map(|(_, r)| r.as_ref().clone())
            .collect())
    }

    fn len(&self) -> usize {
        self.inner.lock().by_owner_ts.len()
    }

    fn info(&self) -> StoreInfo {
        StoreInfo {
            kind: "memory".to_string(),
            description: "In-memory sample indexes, lost on restart".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sample;

    fn record(owner: &str, host: &str, ts: i64) -> StoredSample {
        StoredSample {
            id: format!("{owner}-{host}-{ts}"),
            owner_id: owner.into(),
            host: host.into(),
            created_at: 0,
            sample: Sample::at(ts),
        }
    }

    fn ts_of(records: &[StoredSample]) -> Vec<i64> {
        records.iter().map(|r| r.ts()).collect()
    }

    #[test]
    fn host_scan_is_newest_first_regardless_of_insert_order() {
        let store = MemoryStore::new();
        for ts in [100, 300, 200, 500, 400] {
            store.insert(record("a", "h", ts)).unwrap();
        }
        let got = store.latest_for_host("a", "h", 10).unwrap();
        assert_eq!(ts_of(&got), vec![500, 400, 300, 200, 100]);

        let got = store.latest_for_host("a", "h", 2).unwrap();
        assert_eq!(ts_of(&got), vec![500, 400]);
    }

    #[test]
    fn scans_never_leave_owner_or_host() {
        let store = MemoryStore::new();
        store.insert(record("a", "h", 1)).unwrap();
        store.insert(record("a", "h2", 2)).unwrap();
        store.insert(record("b", "h", 3)).unwrap();
        // préfixe de host voisin
        store.insert(record("a", "h1", 4)).unwrap();

        assert_eq!(ts_of(&store.latest_for_host("a", "h", 10).unwrap()), vec![1]);
        assert_eq!(ts_of(&store.latest_for_owner("a", 10).unwrap()), vec![4, 2, 1]);
        assert_eq!(ts_of(&store.latest_for_owner("b", 10).unwrap()), vec![3]);
        assert!(store.latest_for_owner("c", 10).unwrap().is_empty());
    }

    #[test]
    fn duplicates_are_kept() {
        let store = MemoryStore::new();
        store.insert(record("a", "h", 7)).unwrap();
        store.insert(record("a", "h", 7)).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.latest_for_host("a", "h", 10).unwrap().len(), 2);
    }

    #[test]
    fn negative_and_future_timestamps_are_ordered() {
        let store = MemoryStore::new();
        store.insert(record("a", "h", i64::MAX - 1)).unwrap();
        store.insert(record("a", "h", -5)).unwrap();
        store.insert(record("a", "h", 0)).unwrap();
        assert_eq!(
            ts_of(&store.latest_for_host("a", "h", 10).unwrap()),
            vec![i64::MAX - 1, 0, -5]
        );
    }
}
