//! Store the latest signed record per publisher

use std::{
    cmp::Ordering,
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
};

use lru::LruCache;

use crate::common::{IpnsRecord, PeerId, RecordError};

/// Mapping from a publisher to its most recent record.
pub trait RecordStore: std::fmt::Debug + Send + Sync {
    /// Store `record` unless a fresher one is already stored.
    ///
    /// Returns [RecordError::Stale] if the stored record is fresher.
    fn put(&self, publisher: &PeerId, record: IpnsRecord) -> Result<(), RecordError>;

    fn get(&self, publisher: &PeerId) -> Option<IpnsRecord>;
}

#[derive(Debug)]
/// In memory [RecordStore] evicting the least recently used publishers.
pub struct MemoryRecordStore {
    records: Mutex<LruCache<PeerId, IpnsRecord>>,
}

impl MemoryRecordStore {
    pub fn new(max_records: NonZeroUsize) -> Self {
        Self {
            records: Mutex::new(LruCache::new(max_records)),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn put(&self, publisher: &PeerId, record: IpnsRecord) -> Result<(), RecordError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(previous) = records.get(publisher) {
            if record.cmp_freshness(previous) == Ordering::Less {
                return Err(RecordError::Stale);
            }
        }

        records.put(publisher.clone(), record);

        Ok(())
    }

    fn get(&self, publisher: &PeerId) -> Option<IpnsRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(publisher)
            .cloned()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use ed25519_dalek::SigningKey;

    use super::*;

    #[test]
    fn keeps_freshest() {
        let store = MemoryRecordStore::new(NonZeroUsize::new(10).unwrap());
        let signer = SigningKey::from_bytes(&rand::random());
        let publisher = PeerId::from_public_key(&signer.verifying_key());

        let seven = IpnsRecord::new(&signer, b"seven", 7, Duration::from_secs(60));
        let five = IpnsRecord::new(&signer, b"five", 5, Duration::from_secs(60));

        store.put(&publisher, seven.clone()).unwrap();
        assert_eq!(store.put(&publisher, five), Err(RecordError::Stale));
        assert_eq!(store.get(&publisher), Some(seven.clone()));

        // Same record again is accepted.
        assert!(store.put(&publisher, seven).is_ok());

        let eight = IpnsRecord::new(&signer, b"eight", 8, Duration::from_secs(60));
        store.put(&publisher, eight.clone()).unwrap();
        assert_eq!(store.get(&publisher), Some(eight));

        assert_eq!(store.get(&PeerId::random()), None);
    }
}
