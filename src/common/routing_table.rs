//! Simplified Kademlia routing table

use std::collections::BTreeMap;
use std::slice::Iter;
use std::time::Instant;

use crate::common::{compare_closeness, Id, PeerId};

/// K = the default maximum size of a k-bucket.
pub const MAX_BUCKET_SIZE_K: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A known peer and when we last observed a connection with it.
pub struct Contact {
    pub peer_id: PeerId,
    pub id: Id,
    pub last_seen: Instant,
}

impl Contact {
    pub fn new(peer_id: PeerId, last_seen: Instant) -> Self {
        Self {
            id: peer_id.id(),
            peer_id,
            last_seen,
        }
    }
}

#[derive(Debug, Clone)]
/// Simplified Kademlia routing table, bucketed by the length of the prefix
/// each contact shares with the local [Id].
pub struct RoutingTable {
    id: Id,
    bucket_size: usize,
    buckets: BTreeMap<u32, KBucket>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            bucket_size: MAX_BUCKET_SIZE_K,
            buckets: BTreeMap::new(),
        }
    }

    pub fn with_bucket_size(mut self, bucket_size: usize) -> Self {
        self.bucket_size = bucket_size.max(1);
        self
    }

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    // === Public Methods ===

    /// Record a connection with `peer_id` observed at `timestamp`.
    ///
    /// Known contacts are refreshed and moved to the most recently seen end of
    /// their bucket. A full bucket evicts its least recently seen contact.
    ///
    /// Returns `false` if the peer is ourselves.
    pub fn touch(&mut self, peer_id: PeerId, timestamp: Instant) -> bool {
        let contact = Contact::new(peer_id, timestamp);
        let prefix = self.id.shared_prefix_len(&contact.id);

        if contact.id == self.id {
            return false;
        }

        let bucket_size = self.bucket_size;

        self.buckets
            .entry(prefix)
            .or_default()
            .touch(contact, bucket_size);

        true
    }

    /// Return up to `count` contacts, closest to `target` first.
    pub fn closest(&self, target: &Id, count: usize) -> Vec<Contact> {
        let mut contacts = self.contacts().cloned().collect::<Vec<_>>();

        contacts.sort_by(|a, b| compare_closeness(target, (&a.id, &a.peer_id), (&b.id, &b.peer_id)));
        contacts.truncate(count);

        contacts
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Return the number of contacts in this routing table.
    pub fn size(&self) -> usize {
        self.buckets
            .values()
            .fold(0, |acc, bucket| acc + bucket.contacts.len())
    }

    /// Returns an iterator over the contacts in this routing table.
    pub fn contacts(&self) -> impl Iterator<Item = &Contact> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }

    // === Private Methods ===

    #[cfg(test)]
    fn contains(&self, peer_id: &PeerId) -> bool {
        let prefix = self.id.shared_prefix_len(&peer_id.id());

        if let Some(bucket) = self.buckets.get(&prefix) {
            if bucket.contains(peer_id) {
                return true;
            }
        }
        false
    }
}

/// A bucket of contacts ordered from least to most recently seen.
#[derive(Debug, Clone, Default)]
pub struct KBucket {
    contacts: Vec<Contact>,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            contacts: Vec::with_capacity(MAX_BUCKET_SIZE_K),
        }
    }

    // === Public Methods ===

    pub fn touch(&mut self, mut incoming: Contact, capacity: usize) {
        if let Some(index) = self.iter().position(|c| c.peer_id == incoming.peer_id) {
            let existing = self.contacts.remove(index);
            incoming.last_seen = incoming.last_seen.max(existing.last_seen);
        } else if self.contacts.len() >= capacity {
            // Remove the least recently seen contact to make room for the new one
            self.contacts.remove(0);
        }

        let position = self
            .contacts
            .iter()
            .rposition(|c| c.last_seen <= incoming.last_seen)
            .map(|i| i + 1)
            .unwrap_or(0);

        self.contacts.insert(position, incoming);
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, Contact> {
        self.contacts.iter()
    }

    #[cfg(test)]
    fn contains(&self, peer_id: &PeerId) -> bool {
        self.iter().any(|c| &c.peer_id == peer_id)
    }
}
