//! Known network addresses of peers.

use std::{
    num::NonZeroUsize,
    sync::{Mutex, PoisonError},
};

use lru::LruCache;

use crate::common::PeerId;

/// Default number of peers whose addresses are remembered.
pub const MAX_ADDRESS_BOOK_PEERS: usize = 10_000;

/// Mapping from a peer identity to the multiaddresses it is reachable at.
pub trait AddressBook: std::fmt::Debug + Send + Sync {
    /// Known addresses of `peer_id`, empty if unknown.
    fn get(&self, peer_id: &PeerId) -> Vec<String>;

    /// Merge `addresses` into the ones already known for `peer_id`.
    fn add_addrs(&self, peer_id: &PeerId, addresses: &[String]);

    /// Replace the known addresses of `peer_id`.
    fn set_addrs(&self, peer_id: &PeerId, addresses: &[String]);
}

#[derive(Debug)]
/// In memory [AddressBook] evicting the least recently used peers.
pub struct RamAddressBook {
    addresses: Mutex<LruCache<PeerId, Vec<String>>>,
}

impl Default for RamAddressBook {
    fn default() -> Self {
        Self::new(
            NonZeroUsize::new(MAX_ADDRESS_BOOK_PEERS)
                .expect("MAX_ADDRESS_BOOK_PEERS is NonZeroUsize"),
        )
    }
}

impl RamAddressBook {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            addresses: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AddressBook for RamAddressBook {
    fn get(&self, peer_id: &PeerId) -> Vec<String> {
        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(peer_id)
            .cloned()
            .unwrap_or_default()
    }

    fn add_addrs(&self, peer_id: &PeerId, addresses: &[String]) {
        let mut cache = self.addresses.lock().unwrap_or_else(PoisonError::into_inner);
        let known = cache.get_or_insert_mut(peer_id.clone(), Vec::new);

        for address in addresses {
            let address = without_peer_id(address, peer_id);

            if !known.contains(&address) {
                known.push(address);
            }
        }
    }

    fn set_addrs(&self, peer_id: &PeerId, addresses: &[String]) {
        let mut stripped: Vec<String> = Vec::with_capacity(addresses.len());

        for address in addresses {
            let address = without_peer_id(address, peer_id);

            if !stripped.contains(&address) {
                stripped.push(address);
            }
        }

        self.addresses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(peer_id.clone(), stripped);
    }
}

/// Drop a trailing `/p2p/<peer_id>` or `/ipfs/<peer_id>` component.
fn without_peer_id(address: &str, peer_id: &PeerId) -> String {
    let own = peer_id.to_string();

    for protocol in ["/p2p/", "/ipfs/"] {
        if let Some((transport, peer)) = address.rsplit_once(protocol) {
            if peer == own {
                return transport.to_string();
            }
        }
    }

    address.to_string()
}
