//! Manage provider announcements for content keys

use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
    time::{Duration, Instant},
};

use bytes::Bytes;
use lru::LruCache;

use crate::common::{PeerAddresses, PeerId};

/// How long a provider announcement is kept.
pub const PROVIDER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Mapping from a content key to the peers claiming to hold that content.
pub trait ProviderStore: std::fmt::Debug + Send + Sync {
    /// Record `provider` as holding the content addressed by `key`.
    fn add_provider(&self, key: &[u8], provider: PeerAddresses);

    /// Unexpired providers of `key`.
    fn get_providers(&self, key: &[u8]) -> Vec<PeerAddresses>;
}

#[derive(Debug)]
struct Announcement {
    provider: PeerAddresses,
    received: Instant,
}

#[derive(Debug)]
/// An LRU cache of announced providers per content key.
pub struct MemoryProviderStore {
    keys: Mutex<LruCache<Bytes, LruCache<PeerId, Announcement>>>,
    max_providers: NonZeroUsize,
    ttl: Duration,
}

impl MemoryProviderStore {
    pub fn new(max_keys: NonZeroUsize, max_providers: NonZeroUsize) -> Self {
        Self {
            keys: Mutex::new(LruCache::new(max_keys)),
            max_providers,
            ttl: PROVIDER_TTL,
        }
    }

    /// Override the default [PROVIDER_TTL].
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

impl ProviderStore for MemoryProviderStore {
    fn add_provider(&self, key: &[u8], provider: PeerAddresses) {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let max_providers = self.max_providers;

        let providers = keys.get_or_insert_mut(Bytes::copy_from_slice(key), || {
            LruCache::new(max_providers)
        });

        providers.put(
            provider.peer_id.clone(),
            Announcement {
                provider,
                received: Instant::now(),
            },
        );
    }

    fn get_providers(&self, key: &[u8]) -> Vec<PeerAddresses> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);

        let Some(providers) = keys.get_mut(key) else {
            return vec![];
        };

        let expired = providers
            .iter()
            .filter(|(_, announcement)| announcement.received.elapsed() >= self.ttl)
            .map(|(peer_id, _)| peer_id.clone())
            .collect::<Vec<_>>();

        for peer_id in expired {
            providers.pop(&peer_id);
        }

        let result = providers
            .iter()
            .map(|(_, announcement)| announcement.provider.clone())
            .collect::<Vec<_>>();

        if result.is_empty() {
            keys.pop(key);
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn store(max_keys: usize, max_providers: usize) -> MemoryProviderStore {
        MemoryProviderStore::new(
            NonZeroUsize::new(max_keys).unwrap(),
            NonZeroUsize::new(max_providers).unwrap(),
        )
    }

    #[test]
    fn providers_are_sets() {
        let store = store(10, 10);
        let provider = PeerId::random();

        store.add_provider(b"key", PeerAddresses::new(provider.clone(), vec![]));
        store.add_provider(
            b"key",
            PeerAddresses::new(provider.clone(), vec!["/ip4/1.2.3.4/tcp/1".into()]),
        );

        let providers = store.get_providers(b"key");

        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].peer_id, provider);
        assert_eq!(providers[0].addresses, vec!["/ip4/1.2.3.4/tcp/1"]);
        assert!(store.get_providers(b"other").is_empty());
    }

    #[test]
    fn max_keys() {
        let store = store(1, 10);

        store.add_provider(b"a", PeerAddresses::new(PeerId::random(), vec![]));
        store.add_provider(b"b", PeerAddresses::new(PeerId::random(), vec![]));

        assert!(store.get_providers(b"a").is_empty());
        assert_eq!(store.get_providers(b"b").len(), 1);
    }

    #[test]
    fn max_providers_per_key() {
        let store = store(10, 2);

        for _ in 0..5 {
            store.add_provider(b"key", PeerAddresses::new(PeerId::random(), vec![]));
        }

        assert_eq!(store.get_providers(b"key").len(), 2);
    }

    #[test]
    fn expired_providers_are_dropped() {
        let store = store(10, 10).with_ttl(Duration::ZERO);

        store.add_provider(b"key", PeerAddresses::new(PeerId::random(), vec![]));

        assert!(store.get_providers(b"key").is_empty());
        assert_eq!(store.keys.lock().unwrap().len(), 0);
    }
}
