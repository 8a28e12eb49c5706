//! Dht node.

use std::{collections::HashSet, sync::Arc, time::Duration};

use bytes::Bytes;
use ed25519_dalek::SigningKey;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{
    address_book::AddressBook,
    common::{ipns_key, CodecError, IpnsRecord, PeerAddresses, PeerId},
    rpc::{
        memory::{MemoryNetwork, MemoryTransport},
        Config, MessageStream, Rpc, Transport, TransportError,
    },
    server::{
        blocks::BlockStore, providers::ProviderStore, records::RecordStore,
        validator::RecordValidator, EngineSettings, KademliaEngine,
    },
    Error, Result,
};

#[derive(Debug)]
/// A DHT node: issues lookups and answers the requests of other nodes.
pub struct Dht<T: Transport> {
    rpc: Rpc<T>,
}

impl<T: Transport> Clone for Dht<T> {
    fn clone(&self) -> Self {
        Self {
            rpc: self.rpc.clone(),
        }
    }
}

impl<T: Transport> Dht<T> {
    /// Create a node with the default configuration.
    pub fn new(transport: T) -> Self {
        DhtBuilder::default().build(transport)
    }

    // === Getters ===

    pub fn peer_id(&self) -> &PeerId {
        self.rpc.engine().peer_id()
    }

    pub fn listen_addresses(&self) -> Vec<String> {
        self.rpc.transport().listen_addresses()
    }

    /// Multiaddresses of this node including its identity, usable as bootstrap addresses.
    pub fn bootstrap_addresses(&self) -> Vec<String> {
        self.listen_addresses()
            .into_iter()
            .map(|address| format!("{address}/p2p/{}", self.peer_id()))
            .collect()
    }

    pub fn config(&self) -> &Config {
        self.rpc.config()
    }

    pub fn engine(&self) -> &Arc<KademliaEngine> {
        self.rpc.engine()
    }

    pub fn transport(&self) -> &Arc<T> {
        self.rpc.transport()
    }

    // === Lookups ===

    /// Find the `max_count` peers closest to `key`, excluding ourselves.
    pub async fn find_closest_peers(&self, key: &[u8], max_count: usize) -> Vec<PeerAddresses> {
        self.rpc.find_closest_peers(key, max_count).await
    }

    /// Find up to `desired_count` providers of the content addressed by `key`.
    pub async fn find_providers(&self, key: &[u8], desired_count: usize) -> Vec<PeerAddresses> {
        self.rpc.find_providers(key, desired_count).await
    }

    /// Announce ourselves, reachable at `our_addresses`, as a provider of
    /// `key` to the closest peers to it.
    ///
    /// Returns the number of peers that received the announcement.
    pub async fn provide_block(&self, key: &[u8], our_addresses: Vec<String>) -> Result<usize> {
        let provider = PeerAddresses::new(self.peer_id().clone(), our_addresses);
        self.engine().providers().add_provider(key, provider.clone());

        let closest = self
            .find_closest_peers(key, self.config().replication)
            .await;

        if closest.is_empty() {
            return Err(Error::NoClosestPeers);
        }

        let attempted = closest.len();
        let key = Bytes::copy_from_slice(key);

        let delivered = self
            .rpc
            .query_all(closest, self.config().request_timeout, move |mut controller| {
                let key = key.clone();
                let provider = provider.clone();
                async move { controller.provide(key, provider).await }
            })
            .await
            .len();

        debug!(attempted, delivered, "Provided block");

        Ok(delivered)
    }

    /// Sign `value` with `signer` and store it at the peers closest to the
    /// `publisher`'s record key.
    ///
    /// Searches for closest peers at most [Config::max_publish_rounds] times,
    /// until [Config::replication] peers, or every closest peer found,
    /// acknowledged the record. Returns the number of acknowledgements.
    pub async fn publish_ipns_value(
        &self,
        signer: &SigningKey,
        publisher: &PeerId,
        value: &[u8],
        sequence: u64,
    ) -> Result<usize> {
        if &PeerId::from_public_key(&signer.verifying_key()) != publisher {
            return Err(Error::PublisherMismatch(publisher.clone()));
        }

        let record = IpnsRecord::new(signer, value, sequence, self.config().record_validity);
        let encoded = Bytes::from(record.to_bytes()?);
        self.engine().put_local_record(record)?;

        let key = ipns_key(publisher);
        let required = self.config().replication;
        let rounds = self.config().max_publish_rounds.max(1);

        let mut acknowledged: HashSet<PeerId> = HashSet::new();
        let mut complete = false;

        for round in 0..rounds {
            if round > 0 {
                tokio::time::sleep(self.config().publish_retry_delay).await;
            }

            let pending = self
                .find_closest_peers(&key, required)
                .await
                .into_iter()
                .filter(|peer| !acknowledged.contains(&peer.peer_id))
                .collect::<Vec<_>>();

            if pending.is_empty() && !acknowledged.is_empty() {
                // Every closest peer already holds the record.
                complete = true;
                break;
            }

            let put_key = key.clone();
            let put_value = encoded.clone();

            let responses = self
                .rpc
                .query_all(pending, self.config().request_timeout, move |mut controller| {
                    let key = put_key.clone();
                    let value = put_value.clone();
                    async move { controller.put_value(key, value).await }
                })
                .await;

            for (peer, stored) in responses {
                if stored {
                    acknowledged.insert(peer.peer_id);
                } else {
                    debug!(peer_id = ?peer.peer_id, ?publisher, "Record not acknowledged");
                }
            }

            if acknowledged.len() >= required {
                complete = true;
                break;
            }

            debug!(
                ?publisher,
                round,
                stored = acknowledged.len(),
                required,
                "Publishing record incomplete"
            );
        }

        if !complete {
            warn!(?publisher, rounds, stored = acknowledged.len(), "Failed to publish record");

            return Err(Error::PublishIncomplete {
                stored: acknowledged.len(),
                required,
            });
        }

        info!(?publisher, sequence, stored = acknowledged.len(), "Published record");

        Ok(acknowledged.len())
    }

    /// Resolve the freshest valid value published by `publisher`.
    pub async fn resolve_ipns_value(&self, publisher: &PeerId) -> Result<Bytes> {
        let key = ipns_key(publisher);
        let closest = self
            .find_closest_peers(&key, self.config().replication)
            .await;

        let mut candidates: Vec<IpnsRecord> = self
            .engine()
            .records()
            .get(publisher)
            .into_iter()
            .filter(|record| record.verify().is_ok())
            .collect();

        let responses = self
            .rpc
            .query_all(closest, self.config().request_timeout, move |mut controller| {
                let key = key.clone();
                async move { controller.get_value(key).await }
            })
            .await;

        for (peer, response) in responses {
            let Some(record) = response.record else {
                continue;
            };

            if &record.publisher() != publisher {
                debug!(peer_id = ?peer.peer_id, ?publisher, "Record from another publisher");
                continue;
            }

            match record.verify() {
                Ok(()) => candidates.push(record),
                Err(error) => debug!(peer_id = ?peer.peer_id, ?publisher, ?error, "Invalid record"),
            }
        }

        candidates
            .into_iter()
            .max_by(IpnsRecord::cmp_freshness)
            .map(|record| record.value().clone())
            .ok_or_else(|| Error::RecordNotFound(publisher.clone()))
    }

    // === Bootstrapping ===

    /// Connect to every bootstrap multiaddress (`.../p2p/<peer>`) accepted by `filter`.
    ///
    /// Returns the number of peers connected to, failing if there are none.
    pub async fn bootstrap_routing_table<F>(&self, addresses: &[String], filter: F) -> Result<usize>
    where
        F: Fn(&str) -> bool,
    {
        let peers = addresses
            .iter()
            .filter(|address| filter(address.as_str()))
            .filter_map(|address| {
                let parsed = PeerAddresses::from_multiaddr(address);
                if parsed.is_none() {
                    debug!(?address, "Ignoring bootstrap address without a peer id");
                }
                parsed
            })
            .filter(|peer| peer.peer_id != *self.peer_id())
            .collect::<Vec<_>>();

        let connected = self.connect_all(peers, self.config().bootstrap_timeout).await;

        if connected == 0 {
            error!(candidates = addresses.len(), "Could not connect to any bootstrap peer");
            return Err(Error::NoBootstrapPeers);
        }

        info!(connected, "Bootstrapped routing table");

        Ok(connected)
    }

    /// Refresh the routing table: look up a random key, then our own identity,
    /// and connect to the peers closest to us so they learn about us.
    ///
    /// Returns the number of close peers connected to.
    pub async fn bootstrap(&self) -> usize {
        let random: [u8; 32] = rand::random();
        self.find_closest_peers(&random, self.config().replication)
            .await;

        let closest = self
            .find_closest_peers(&self.peer_id().to_bytes(), self.config().replication)
            .await;

        let connected = self.connect_all(closest, self.config().request_timeout).await;

        info!(connected, "Bootstrap connected to peers close to us");

        connected
    }

    /// Run [Dht::bootstrap] now and every [Config::bootstrap_interval].
    pub fn spawn_bootstrap_task(&self) -> JoinHandle<()> {
        let dht = self.clone();

        tokio::spawn(async move {
            // A zero period panics.
            let period = dht.config().bootstrap_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);

            loop {
                interval.tick().await;
                dht.bootstrap().await;
            }
        })
    }

    // === Serving ===

    /// Serve one inbound stream from `remote`: read its request, answer it, close it.
    ///
    /// An unknown message type is a protocol violation and returns an error. A
    /// remote that sends nothing within [Config::request_timeout] is dropped.
    pub async fn handle_stream(&self, remote: PeerAddresses, mut stream: T::Stream) -> Result<()> {
        if stream.protocol_id() != self.config().protocol_id {
            debug!(peer_id = ?remote.peer_id, protocol_id = stream.protocol_id(), "Unsupported protocol");
            return Err(TransportError::UnsupportedProtocol(stream.protocol_id().to_string()).into());
        }

        self.engine()
            .add_incoming_connection(&remote.peer_id, &remote.addresses);

        let received = tokio::time::timeout(self.config().request_timeout, stream.receive()).await;

        let request = match received {
            Err(_) => {
                debug!(peer_id = ?remote.peer_id, "Timed out waiting for a request");
                return Err(TransportError::Timeout.into());
            }
            Ok(received) => received,
        };

        let request = match request {
            Ok(request) => request,
            Err(TransportError::StreamClosed) => return Ok(()),
            Err(TransportError::Codec(error @ CodecError::UnknownMessageType(_))) => {
                error!(peer_id = ?remote.peer_id, ?error, "Protocol violation");
                return Err(error.into());
            }
            Err(error) => return Err(error.into()),
        };

        if let Some(response) = self.engine().handle_request(&remote.peer_id, request) {
            stream.send(&response).await?;
        }

        Ok(())
    }

    /// Serve every stream the transport accepts, each on its own task.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let dht = self.clone();

        tokio::spawn(async move {
            while let Some((remote, stream)) = dht.transport().accept().await {
                let dht = dht.clone();

                tokio::spawn(async move {
                    let peer_id = remote.peer_id.clone();

                    if let Err(error) = dht.handle_stream(remote, stream).await {
                        debug!(?peer_id, ?error, "Failed to serve stream");
                    }
                });
            }

            debug!("Transport closed, listener stopped");
        })
    }

    // === Private Methods ===

    /// Dial each peer and ask it for peers close to us, counting the ones that answered.
    async fn connect_all(&self, peers: Vec<PeerAddresses>, timeout: Duration) -> usize {
        let own_key = self.peer_id().to_bytes();

        self.rpc
            .query_all(peers, timeout, move |mut controller| {
                let key = own_key.clone();
                async move { controller.closer_peers(key).await.map(|_| ()) }
            })
            .await
            .len()
    }
}

#[derive(Debug, Default)]
/// Configure and create a [Dht] node.
pub struct DhtBuilder {
    config: Config,
    settings: EngineSettings,
    provider_store: Option<Arc<dyn ProviderStore>>,
    record_store: Option<Arc<dyn RecordStore>>,
    block_store: Option<Arc<dyn BlockStore>>,
    address_book: Option<Arc<dyn AddressBook>>,
    validator: Option<Arc<dyn RecordValidator>>,
}

impl DhtBuilder {
    /// Replace the whole [Config].
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Set [Config::replication]
    pub fn replication(mut self, replication: usize) -> Self {
        self.config.replication = replication.max(1);
        self
    }

    /// Set [Config::alpha]
    pub fn alpha(mut self, alpha: usize) -> Self {
        self.config.alpha = alpha.max(1);
        self
    }

    /// Set [Config::request_timeout]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set [Config::provider_request_timeout]
    pub fn provider_request_timeout(mut self, timeout: Duration) -> Self {
        self.config.provider_request_timeout = timeout;
        self
    }

    /// Set [Config::bootstrap_timeout]
    pub fn bootstrap_timeout(mut self, timeout: Duration) -> Self {
        self.config.bootstrap_timeout = timeout;
        self
    }

    /// Set [Config::bootstrap_interval]
    pub fn bootstrap_interval(mut self, interval: Duration) -> Self {
        self.config.bootstrap_interval = interval;
        self
    }

    /// Set [Config::record_validity]
    pub fn record_validity(mut self, validity: Duration) -> Self {
        self.config.record_validity = validity;
        self
    }

    /// Set [Config::max_publish_rounds]
    pub fn max_publish_rounds(mut self, rounds: usize) -> Self {
        self.config.max_publish_rounds = rounds;
        self
    }

    /// Set [Config::publish_retry_delay]
    pub fn publish_retry_delay(mut self, delay: Duration) -> Self {
        self.config.publish_retry_delay = delay;
        self
    }

    /// Set [Config::local_dht]
    pub fn local_dht(mut self, local_dht: bool) -> Self {
        self.config.local_dht = local_dht;
        self
    }

    /// Capacities of the default in-memory stores.
    pub fn engine_settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn provider_store(mut self, store: Arc<dyn ProviderStore>) -> Self {
        self.provider_store = Some(store);
        self
    }

    pub fn record_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.record_store = Some(store);
        self
    }

    pub fn block_store(mut self, store: Arc<dyn BlockStore>) -> Self {
        self.block_store = Some(store);
        self
    }

    pub fn address_book(mut self, address_book: Arc<dyn AddressBook>) -> Self {
        self.address_book = Some(address_book);
        self
    }

    pub fn validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Create the node on top of `transport`.
    ///
    /// The node does not serve requests until [Dht::spawn_listener] is called.
    pub fn build<T: Transport>(self, transport: T) -> Dht<T> {
        let settings = EngineSettings {
            closest_peers: self.config.closest_peers,
            bucket_size: self.config.bucket_size,
            ..self.settings
        };

        let mut engine = KademliaEngine::new(
            transport.local_peer_id(),
            transport.listen_addresses(),
            &settings,
        );

        if let Some(store) = self.provider_store {
            engine = engine.with_provider_store(store);
        }
        if let Some(store) = self.record_store {
            engine = engine.with_record_store(store);
        }
        if let Some(store) = self.block_store {
            engine = engine.with_block_store(store);
        }
        if let Some(address_book) = self.address_book {
            engine = engine.with_address_book(address_book);
        }
        if let Some(validator) = self.validator {
            engine = engine.with_validator(validator);
        }

        Dht {
            rpc: Rpc::new(Arc::new(transport), Arc::new(engine), self.config),
        }
    }
}

#[derive(Debug)]
/// Create a testnet of Dht nodes over an in-memory network, to run tests against
/// instead of the real network.
pub struct Testnet {
    pub bootstrap: Vec<String>,
    pub nodes: Vec<Dht<MemoryTransport>>,
    pub network: MemoryNetwork,
}

impl Testnet {
    /// Create `count` listening nodes, bootstrapped off the first one.
    pub async fn new(count: usize) -> Result<Testnet> {
        let network = MemoryNetwork::new();
        let mut testnet = Testnet {
            bootstrap: vec![],
            nodes: Vec::with_capacity(count),
            network,
        };

        for _ in 0..count {
            let node = Testnet::builder().build(testnet.network.transport());
            node.spawn_listener();

            if testnet.bootstrap.is_empty() {
                testnet.bootstrap = node.bootstrap_addresses();
            } else {
                node.bootstrap_routing_table(&testnet.bootstrap, |_| true)
                    .await?;
            }

            testnet.nodes.push(node);
        }

        for node in &testnet.nodes {
            node.bootstrap().await;
        }

        Ok(testnet)
    }

    /// A builder configured for the in-memory network: every address is
    /// dialable and timeouts are short.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
            .local_dht(true)
            .request_timeout(Duration::from_millis(500))
            .provider_request_timeout(Duration::from_millis(250))
            .bootstrap_timeout(Duration::from_millis(500))
            .publish_retry_delay(Duration::from_millis(20))
    }

    /// Add a new listening node to the network and bootstrap it.
    pub async fn client(&self) -> Result<Dht<MemoryTransport>> {
        self.client_with(Testnet::builder()).await
    }

    /// Like [Testnet::client] with a custom builder.
    pub async fn client_with(&self, builder: DhtBuilder) -> Result<Dht<MemoryTransport>> {
        let node = builder.build(self.network.transport());
        node.spawn_listener();

        node.bootstrap_routing_table(&self.bootstrap, |_| true)
            .await?;
        node.bootstrap().await;

        Ok(node)
    }
}
