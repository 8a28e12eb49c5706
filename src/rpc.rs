//! Outbound side of the DHT protocol: dialling peers and querying them concurrently.

mod config;
mod controller;
mod iterative_query;
pub mod memory;
mod transport;

use std::{future::Future, sync::Arc, time::Duration};

use tokio::task::JoinSet;
use tracing::debug;

use crate::{common::PeerAddresses, server::KademliaEngine};

pub use config::*;
pub use controller::{GetResult, KademliaController, Providers};
pub use transport::{MessageStream, Transport, TransportError};

#[derive(Debug)]
/// Dials peers through a [Transport] on behalf of a [KademliaEngine].
pub struct Rpc<T: Transport> {
    transport: Arc<T>,
    engine: Arc<KademliaEngine>,
    config: Arc<Config>,
}

impl<T: Transport> Clone for Rpc<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            engine: self.engine.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T: Transport> Rpc<T> {
    pub fn new(transport: Arc<T>, engine: Arc<KademliaEngine>, config: Config) -> Self {
        Self {
            transport,
            engine,
            config: Arc::new(config),
        }
    }

    // === Getters ===

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn engine(&self) -> &Arc<KademliaEngine> {
        &self.engine
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // === Public Methods ===

    /// Open a DHT stream to `peer`.
    ///
    /// Addresses carried by `peer` are merged with the ones in the address
    /// book, then filtered to public ones unless [Config::local_dht] is set.
    /// A successful dial counts as an outgoing connection.
    pub async fn dial(
        &self,
        peer: &PeerAddresses,
    ) -> Result<KademliaController<T::Stream>, TransportError> {
        let mut known = peer.clone();

        for address in self.engine.address_book().get(&peer.peer_id) {
            if !known.addresses.contains(&address) {
                known.addresses.push(address);
            }
        }

        let addresses = known.dialable_addresses(self.config.local_dht);

        if addresses.is_empty() {
            return Err(TransportError::NoAddresses(peer.peer_id.clone()));
        }

        let stream = self
            .transport
            .dial(&peer.peer_id, &addresses, &self.config.protocol_id)
            .await?;

        self.engine
            .add_outgoing_connection(&peer.peer_id, &addresses);

        Ok(KademliaController::new(stream))
    }

    /// Dial every peer and run `query` against each concurrently.
    ///
    /// Each dial and query is bounded by `timeout`. Failing peers are logged
    /// and left out of the returned responses.
    pub async fn query_all<R, F, Fut>(
        &self,
        peers: Vec<PeerAddresses>,
        timeout: Duration,
        query: F,
    ) -> Vec<(PeerAddresses, R)>
    where
        R: Send + 'static,
        F: Fn(KademliaController<T::Stream>) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<R, TransportError>> + Send + 'static,
    {
        let mut tasks = JoinSet::new();

        for peer in peers {
            let rpc = self.clone();
            let query = query.clone();

            tasks.spawn(async move {
                let result = tokio::time::timeout(timeout, async {
                    match rpc.dial(&peer).await {
                        Ok(controller) => query(controller).await,
                        Err(error) => Err(error),
                    }
                })
                .await
                .unwrap_or_else(|_| Err(TransportError::Timeout));

                (peer, result)
            });
        }

        let mut responses = Vec::with_capacity(tasks.len());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((peer, Ok(response))) => responses.push((peer, response)),
                Ok((peer, Err(error))) => {
                    debug!(peer_id = ?peer.peer_id, addresses = ?peer.addresses, ?error, "Peer query failed");
                }
                Err(error) => debug!(?error, "Peer query task failed"),
            }
        }

        responses
    }
}
