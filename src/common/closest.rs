use std::{cmp::Ordering, vec::IntoIter};

use crate::common::{Id, PeerAddresses, PeerId, RoutingEntry};

/// Order two positions by closeness to `target`: longer shared prefix first,
/// then by peer identity for a deterministic total order.
pub fn compare_closeness(
    target: &Id,
    (a_id, a_peer): (&Id, &PeerId),
    (b_id, b_peer): (&Id, &PeerId),
) -> Ordering {
    b_id.shared_prefix_len(target)
        .cmp(&a_id.shared_prefix_len(target))
        .then_with(|| a_peer.cmp(b_peer))
}

#[derive(Debug, Clone)]
/// A set of peers kept sorted by closeness to a target, without duplicates.
pub struct ClosestPeers {
    target: Id,
    entries: Vec<RoutingEntry>,
}

impl ClosestPeers {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            entries: Vec::with_capacity(200),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn entries(&self) -> &[RoutingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // === Public Methods ===

    /// Insert an entry at its sorted position, returns `false` if this peer is
    /// already in the set.
    pub fn add(&mut self, entry: RoutingEntry) -> bool {
        let target = self.target;

        // The identity is part of the ordering key, so an Equal probe is the same peer.
        match self.entries.binary_search_by(|probe| {
            compare_closeness(
                &target,
                (&probe.id, &probe.peer.peer_id),
                (&entry.id, &entry.peer.peer_id),
            )
        }) {
            Ok(_) => false,
            Err(pos) => {
                self.entries.insert(pos, entry);
                true
            }
        }
    }

    /// Remove the entry of `peer_id`, returns `false` if it wasn't in the set.
    pub fn remove(&mut self, peer_id: &PeerId) -> bool {
        match self
            .entries
            .iter()
            .position(|entry| &entry.peer.peer_id == peer_id)
        {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove and return up to `count` of the closest entries.
    pub fn take_closest(&mut self, count: usize) -> Vec<RoutingEntry> {
        let count = count.min(self.entries.len());

        self.entries.drain(..count).collect()
    }

    /// The `count` closest peers.
    pub fn closest(&self, count: usize) -> Vec<PeerAddresses> {
        self.entries
            .iter()
            .take(count)
            .map(|entry| entry.peer.clone())
            .collect()
    }
}

impl IntoIterator for ClosestPeers {
    type Item = RoutingEntry;
    type IntoIter = IntoIter<RoutingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ClosestPeers {
    type Item = &'a RoutingEntry;
    type IntoIter = std::slice::Iter<'a, RoutingEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn random_entry() -> RoutingEntry {
        RoutingEntry::new(PeerAddresses::new(PeerId::random(), vec![]))
    }

    #[test]
    fn add() {
        let target = Id::random();

        let mut closest = ClosestPeers::new(target);

        for _ in 0..10 {
            let entry = random_entry();
            assert!(closest.add(entry.clone()));
            assert!(!closest.add(entry));
        }

        assert_eq!(closest.len(), 10);

        let prefixes = closest
            .entries()
            .iter()
            .map(|e| e.id.shared_prefix_len(&target))
            .collect::<Vec<_>>();

        let mut sorted = prefixes.clone();
        sorted.sort_by(|a, b| b.cmp(a));

        assert_eq!(sorted, prefixes);
    }

    #[test]
    fn ties_are_broken_by_identity() {
        let target = Id::random();
        let mut closest = ClosestPeers::new(target);

        // Same position in the key space, different identities.
        let id = Id::random();
        let a = PeerId::from_bytes(vec![2]);
        let b = PeerId::from_bytes(vec![1]);

        closest.add(RoutingEntry {
            id,
            peer: PeerAddresses::new(a.clone(), vec![]),
        });
        closest.add(RoutingEntry {
            id,
            peer: PeerAddresses::new(b.clone(), vec![]),
        });

        let order: Vec<PeerId> = closest.into_iter().map(|e| e.peer.peer_id).collect();
        assert_eq!(order, vec![b, a]);
    }

    #[test]
    fn take_closest() {
        let mut closest = ClosestPeers::new(Id::random());

        for _ in 0..5 {
            closest.add(random_entry());
        }

        let expected = closest.closest(3);
        let taken: Vec<PeerAddresses> = closest
            .take_closest(3)
            .into_iter()
            .map(|e| e.peer)
            .collect();

        assert_eq!(taken, expected);
        assert_eq!(closest.len(), 2);
        assert_eq!(closest.take_closest(10).len(), 2);
        assert!(closest.is_empty());
    }

    #[test]
    fn remove() {
        let mut closest = ClosestPeers::new(Id::random());
        let entry = random_entry();

        closest.add(entry.clone());
        closest.add(random_entry());

        assert!(closest.remove(&entry.peer.peer_id));
        assert!(!closest.remove(&entry.peer.peer_id));
        assert_eq!(closest.len(), 1);
    }
}
