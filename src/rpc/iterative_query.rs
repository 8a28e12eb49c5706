//! Iterative lookups: query the closest known peers to a key, learn closer
//! ones from their responses, and repeat until no new peer shows up.

use std::collections::HashSet;

use bytes::Bytes;
use tracing::{debug, trace};

use super::{Rpc, Transport};
use crate::common::{ClosestPeers, Id, PeerAddresses, PeerId, RoutingEntry};

impl<T: Transport> Rpc<T> {
    /// Find the `max_count` peers closest to `key`.
    ///
    /// With `max_count == 1` the key is treated as a peer identity, and the
    /// lookup returns as soon as that exact peer is known.
    pub async fn find_closest_peers(&self, key: &[u8], max_count: usize) -> Vec<PeerAddresses> {
        let target = Id::hash(key);
        let target_peer = PeerId::from_bytes(Bytes::copy_from_slice(key));
        let local_peer = self.engine.peer_id().clone();

        let seeds = self
            .engine
            .closest_peers(key, self.config.replication.max(max_count));

        if max_count == 1 {
            let known = self.engine.address_book().get(&target_peer);

            if !known.is_empty() {
                return vec![PeerAddresses::new(target_peer, known)];
            }

            if let Some(exact) = seeds.iter().find(|peer| peer.peer_id == target_peer) {
                return vec![exact.clone()];
            }
        }

        let mut closest = ClosestPeers::new(target);
        let mut to_query = ClosestPeers::new(target);
        let mut queried: HashSet<PeerId> = HashSet::new();

        for seed in seeds {
            let entry = RoutingEntry::new(seed);

            closest.add(entry.clone());
            to_query.add(entry);
        }

        trace!(?target, seeds = closest.len(), "Start closest peers lookup");

        loop {
            let round = to_query
                .take_closest(self.config.alpha)
                .into_iter()
                .map(|entry| entry.peer)
                .collect::<Vec<_>>();

            if round.is_empty() {
                break;
            }

            queried.extend(round.iter().map(|peer| peer.peer_id.clone()));
            let mut unresponsive = round
                .iter()
                .map(|peer| peer.peer_id.clone())
                .collect::<HashSet<_>>();

            let key = Bytes::copy_from_slice(key);
            let responses = self
                .query_all(round, self.config.request_timeout, move |mut controller| {
                    let key = key.clone();
                    async move { controller.closer_peers(key).await }
                })
                .await;

            let mut found_new = false;

            for (responder, closer_peers) in responses {
                unresponsive.remove(&responder.peer_id);

                for peer in closer_peers {
                    if peer.peer_id == local_peer || queried.contains(&peer.peer_id) {
                        continue;
                    }

                    if max_count == 1 && peer.peer_id == target_peer {
                        return vec![peer];
                    }

                    let entry = RoutingEntry::new(peer);

                    if closest.add(entry.clone()) {
                        to_query.add(entry);
                        found_new = true;
                    }
                }
            }

            // Peers that failed to answer are not worth returning.
            for peer_id in &unresponsive {
                closest.remove(peer_id);
            }

            if !found_new {
                break;
            }
        }

        debug!(?target, queried = queried.len(), found = closest.len(), "Closest peers lookup done");

        closest.closest(max_count)
    }

    /// Find up to `desired_count` providers of the content addressed by `key`.
    ///
    /// Providers known locally are returned first, and the network is only
    /// queried if there are fewer than `desired_count` of them.
    pub async fn find_providers(&self, key: &[u8], desired_count: usize) -> Vec<PeerAddresses> {
        let target = Id::hash(key);
        let local_peer = self.engine.peer_id().clone();

        let mut providers: Vec<PeerAddresses> = Vec::new();
        let mut seen_providers: HashSet<PeerId> = HashSet::new();

        for provider in self.engine.providers().get_providers(key) {
            if seen_providers.insert(provider.peer_id.clone()) {
                providers.push(provider);
            }
        }

        let mut to_query = ClosestPeers::new(target);
        // Every peer is queued at most once.
        let mut seen: HashSet<PeerId> = HashSet::from([local_peer]);

        for seed in self.engine.closest_peers(key, self.config.replication) {
            seen.insert(seed.peer_id.clone());
            to_query.add(RoutingEntry::new(seed));
        }

        while providers.len() < desired_count {
            let round = to_query
                .take_closest(self.config.alpha)
                .into_iter()
                .map(|entry| entry.peer)
                .collect::<Vec<_>>();

            if round.is_empty() {
                break;
            }

            let key = Bytes::copy_from_slice(key);
            let responses = self
                .query_all(
                    round,
                    self.config.provider_request_timeout,
                    move |mut controller| {
                        let key = key.clone();
                        async move { controller.get_providers(key).await }
                    },
                )
                .await;

            let mut found_new = false;

            for (_, response) in responses {
                for provider in response.providers {
                    if seen_providers.insert(provider.peer_id.clone()) {
                        providers.push(provider);
                    }
                }

                for peer in response.closer_peers {
                    if !seen.insert(peer.peer_id.clone()) {
                        continue;
                    }

                    to_query.add(RoutingEntry::new(peer));
                    found_new = true;
                }
            }

            if !found_new {
                break;
            }
        }

        debug!(?target, seen = seen.len(), found = providers.len(), "Providers lookup done");

        providers
    }
}
