//! Answer inbound DHT requests from the routing table and the local stores.

pub mod blocks;
pub mod providers;
pub mod records;
pub mod validator;

use std::{
    num::NonZeroUsize,
    sync::{Arc, Mutex, PoisonError},
    time::Instant,
};

use tracing::{debug, trace};

use crate::{
    address_book::{AddressBook, RamAddressBook},
    common::{
        ipns_key, publisher_from_key, Id, IpnsRecord, Message, MessageType, PeerAddresses, PeerId,
        Record, RecordError, RoutingTable, MAX_BUCKET_SIZE_K,
    },
};

use blocks::{BlockStore, MemoryBlockStore};
use providers::{MemoryProviderStore, ProviderStore};
use records::{MemoryRecordStore, RecordStore};
use validator::{IpnsValidator, RecordValidator};

// Stored data
pub const MAX_PROVIDER_KEYS: usize = 2000;
pub const MAX_PROVIDERS: usize = 500;
pub const MAX_RECORDS: usize = 1000;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Number of closest peers returned in responses.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub closest_peers: usize,
    /// Maximum contacts per routing table bucket.
    ///
    /// Defaults to [MAX_BUCKET_SIZE_K]
    pub bucket_size: usize,
    /// The maximum content keys for which to store providers.
    ///
    /// Defaults to [MAX_PROVIDER_KEYS]
    pub max_provider_keys: usize,
    /// The maximum providers to store per content key.
    ///
    /// Defaults to [MAX_PROVIDERS]
    pub max_providers_per_key: usize,
    /// Maximum number of publishers to store records for.
    ///
    /// Defaults to [MAX_RECORDS]
    pub max_records: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            closest_peers: MAX_BUCKET_SIZE_K,
            bucket_size: MAX_BUCKET_SIZE_K,
            max_provider_keys: MAX_PROVIDER_KEYS,
            max_providers_per_key: MAX_PROVIDERS,
            max_records: MAX_RECORDS,
        }
    }
}

#[derive(Debug)]
/// The request handler of a node.
///
/// Owns the routing table and the local stores, which the outbound side of
/// the same node reads and writes through this engine too.
pub struct KademliaEngine {
    peer_id: PeerId,
    addresses: Vec<String>,
    closest_peers: usize,

    routing_table: Mutex<RoutingTable>,

    providers: Arc<dyn ProviderStore>,
    records: Arc<dyn RecordStore>,
    blocks: Arc<dyn BlockStore>,
    address_book: Arc<dyn AddressBook>,
    validator: Arc<dyn RecordValidator>,
}

impl KademliaEngine {
    /// Create an engine with in memory stores.
    ///
    /// `addresses` are the ones announced when we are a provider.
    pub fn new(peer_id: PeerId, addresses: Vec<String>, settings: &EngineSettings) -> Self {
        let non_zero = |value: usize, default: usize| {
            NonZeroUsize::new(value)
                .unwrap_or(NonZeroUsize::new(default).expect("defaults are NonZeroUsize"))
        };

        Self {
            routing_table: Mutex::new(
                RoutingTable::new(peer_id.id()).with_bucket_size(settings.bucket_size),
            ),
            peer_id,
            addresses,
            closest_peers: settings.closest_peers.max(1),

            providers: Arc::new(MemoryProviderStore::new(
                non_zero(settings.max_provider_keys, MAX_PROVIDER_KEYS),
                non_zero(settings.max_providers_per_key, MAX_PROVIDERS),
            )),
            records: Arc::new(MemoryRecordStore::new(non_zero(
                settings.max_records,
                MAX_RECORDS,
            ))),
            blocks: Arc::new(MemoryBlockStore::new()),
            address_book: Arc::new(RamAddressBook::default()),
            validator: Arc::new(IpnsValidator),
        }
    }

    // === Options ===

    pub fn with_provider_store(mut self, providers: Arc<dyn ProviderStore>) -> Self {
        self.providers = providers;
        self
    }

    pub fn with_record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = records;
        self
    }

    pub fn with_block_store(mut self, blocks: Arc<dyn BlockStore>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_address_book(mut self, address_book: Arc<dyn AddressBook>) -> Self {
        self.address_book = address_book;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn RecordValidator>) -> Self {
        self.validator = validator;
        self
    }

    // === Getters ===

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Our own announcement: identity and listen addresses.
    pub fn local_peer(&self) -> PeerAddresses {
        PeerAddresses::new(self.peer_id.clone(), self.addresses.clone())
    }

    pub fn providers(&self) -> &Arc<dyn ProviderStore> {
        &self.providers
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub fn address_book(&self) -> &Arc<dyn AddressBook> {
        &self.address_book
    }

    pub fn routing_table_size(&self) -> usize {
        self.routing_table().size()
    }

    // === Connection events ===

    /// A remote peer connected to us.
    pub fn add_incoming_connection(&self, peer_id: &PeerId, addresses: &[String]) {
        self.observe(peer_id, addresses)
    }

    /// We connected to a remote peer.
    pub fn add_outgoing_connection(&self, peer_id: &PeerId, addresses: &[String]) {
        self.observe(peer_id, addresses)
    }

    /// The `count` known peers closest to `key`, with their known addresses.
    pub fn closest_peers(&self, key: &[u8], count: usize) -> Vec<PeerAddresses> {
        let target = Id::hash(key);
        let contacts = self.routing_table().closest(&target, count);

        contacts
            .into_iter()
            .map(|contact| {
                let addresses = self.address_book.get(&contact.peer_id);
                PeerAddresses::new(contact.peer_id, addresses)
            })
            .collect()
    }

    // === Local stores ===

    /// Record ourselves as a provider of `key`.
    pub fn add_local_provider(&self, key: &[u8]) {
        self.providers.add_provider(key, self.local_peer());
    }

    /// Store a record we published ourselves.
    pub fn put_local_record(&self, record: IpnsRecord) -> Result<(), RecordError> {
        self.records.put(&record.publisher(), record)
    }

    /// Handle one inbound request from `source`.
    ///
    /// Returns the message to send back on the same stream, if any.
    pub fn handle_request(&self, source: &PeerId, message: Message) -> Option<Message> {
        trace!(?source, message_type = ?message.message_type, key = ?message.key, "Handling request");

        match message.message_type {
            MessageType::PutValue => self.handle_put_value(source, message),
            MessageType::GetValue => Some(self.handle_get_value(message)),
            MessageType::AddProvider => {
                self.handle_add_provider(source, message);
                None
            }
            MessageType::GetProviders => Some(self.handle_get_providers(message)),
            MessageType::FindNode => {
                let closer_peers = self.closest_peers(&message.key, self.closest_peers);

                Some(Message::find_node(message.key).with_closer_peers(closer_peers))
            }
            MessageType::Ping => None,
        }
    }

    // === Private Methods ===

    fn routing_table(&self) -> std::sync::MutexGuard<'_, RoutingTable> {
        self.routing_table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn observe(&self, peer_id: &PeerId, addresses: &[String]) {
        if peer_id == &self.peer_id {
            return;
        }

        self.routing_table().touch(peer_id.clone(), Instant::now());

        if !addresses.is_empty() {
            self.address_book.add_addrs(peer_id, addresses);
        }
    }

    fn handle_put_value(&self, source: &PeerId, message: Message) -> Option<Message> {
        let Some(record) = &message.record else {
            debug!(?source, key = ?message.key, "PUT_VALUE without a record");
            return None;
        };

        let (publisher, decoded) = match self.validator.validate(&message.key, record) {
            Ok(valid) => valid,
            Err(error) => {
                debug!(?source, key = ?message.key, ?error, "Rejected record");
                return None;
            }
        };

        if let Err(error) = self.records.put(&publisher, decoded) {
            debug!(?source, ?publisher, ?error, "Record not stored");
            return None;
        }

        Some(message)
    }

    fn handle_get_value(&self, message: Message) -> Message {
        let closer_peers = self.closest_peers(&message.key, self.closest_peers);
        let mut response = Message::get_value(message.key.clone()).with_closer_peers(closer_peers);

        let Some(publisher) = publisher_from_key(&message.key) else {
            return response;
        };

        if let Some(stored) = self.records.get(&publisher) {
            match stored.to_bytes() {
                Ok(value) => {
                    response = response.with_record(Record {
                        key: ipns_key(&publisher),
                        value: value.into(),
                    })
                }
                Err(error) => debug!(?publisher, ?error, "Failed to encode stored record"),
            }
        }

        response
    }

    fn handle_add_provider(&self, source: &PeerId, message: Message) {
        // Peers may only announce themselves.
        if let Some(spoofed) = message
            .provider_peers
            .iter()
            .find(|provider| &provider.peer_id != source)
        {
            debug!(
                ?source,
                claimed = ?spoofed.peer_id,
                key = ?message.key,
                "Dropping provider announcement for another peer"
            );
            return;
        }

        for provider in message.provider_peers {
            if !provider.addresses.is_empty() {
                self.address_book
                    .add_addrs(&provider.peer_id, &provider.addresses);
            }

            self.providers.add_provider(&message.key, provider);
        }
    }

    fn handle_get_providers(&self, message: Message) -> Message {
        let mut providers = self.providers.get_providers(&message.key);

        if self.blocks.has(&message.key)
            && !providers.iter().any(|p| p.peer_id == self.peer_id)
        {
            providers.push(self.local_peer());
        }

        let closer_peers = self.closest_peers(&message.key, self.closest_peers);

        Message::get_providers(message.key)
            .with_provider_peers(providers)
            .with_closer_peers(closer_peers)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use bytes::Bytes;
    use ed25519_dalek::SigningKey;

    use super::*;

    fn engine() -> (KademliaEngine, Arc<MemoryBlockStore>) {
        let blocks = Arc::new(MemoryBlockStore::new());
        let engine = KademliaEngine::new(
            PeerId::random(),
            vec!["/ip4/46.238.17.208/tcp/4001".into()],
            &EngineSettings::default(),
        )
        .with_block_store(blocks.clone());

        (engine, blocks)
    }

    fn signed_put(signer: &SigningKey, seq: u64) -> Message {
        let publisher = PeerId::from_public_key(&signer.verifying_key());
        let record = IpnsRecord::new(signer, b"/ipfs/bafy", seq, Duration::from_secs(60));

        Message::put_value(ipns_key(&publisher), record.to_bytes().unwrap())
    }

    #[test]
    fn connection_events_touch_routing_table() {
        let (engine, _) = engine();
        let peer = PeerId::random();

        engine.add_incoming_connection(&peer, &["/ip4/1.2.3.4/tcp/1".into()]);
        engine.add_outgoing_connection(&PeerId::random(), &[]);
        engine.add_outgoing_connection(&engine.peer_id().clone(), &[]);

        assert_eq!(engine.routing_table_size(), 2);
        assert_eq!(engine.address_book().get(&peer), vec!["/ip4/1.2.3.4/tcp/1"]);
    }

    #[test]
    fn find_node() {
        let (engine, _) = engine();

        for _ in 0..30 {
            engine.add_incoming_connection(&PeerId::random(), &[]);
        }

        let response = engine
            .handle_request(&PeerId::random(), Message::find_node(&b"key"[..]))
            .unwrap();

        assert_eq!(response.message_type, MessageType::FindNode);
        assert_eq!(response.closer_peers.len(), MAX_BUCKET_SIZE_K);
        assert_eq!(response.closer_peers, engine.closest_peers(b"key", 20));
    }

    #[test]
    fn spoofed_provider_is_dropped() {
        let (engine, _) = engine();
        let source = PeerId::random();

        let spoofed = Message::add_provider(
            &b"content"[..],
            PeerAddresses::new(PeerId::random(), vec![]),
        );
        assert!(engine.handle_request(&source, spoofed).is_none());
        assert!(engine.providers().get_providers(b"content").is_empty());

        // A mix of honest and spoofed announcements is dropped as a whole.
        let mixed = Message::new(MessageType::AddProvider, &b"content"[..]).with_provider_peers(
            vec![
                PeerAddresses::new(source.clone(), vec![]),
                PeerAddresses::new(PeerId::random(), vec![]),
            ],
        );
        engine.handle_request(&source, mixed);
        assert!(engine.providers().get_providers(b"content").is_empty());

        let honest = Message::add_provider(
            &b"content"[..],
            PeerAddresses::new(source.clone(), vec!["/ip4/1.2.3.4/tcp/1".into()]),
        );
        assert!(engine.handle_request(&source, honest).is_none());

        let providers = engine.providers().get_providers(b"content");
        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].peer_id, source);
    }

    #[test]
    fn get_providers_includes_self_iff_block_is_held() {
        let (engine, blocks) = engine();

        let response = engine
            .handle_request(&PeerId::random(), Message::get_providers(&b"block"[..]))
            .unwrap();
        assert!(response.provider_peers.is_empty());

        blocks.insert(&b"block"[..]);

        let response = engine
            .handle_request(&PeerId::random(), Message::get_providers(&b"block"[..]))
            .unwrap();
        assert_eq!(response.provider_peers, vec![engine.local_peer()]);
        assert_eq!(
            response.provider_peers[0].addresses,
            vec!["/ip4/46.238.17.208/tcp/4001"]
        );

        // Not listed twice when we also announced it.
        engine.add_local_provider(b"block");
        let response = engine
            .handle_request(&PeerId::random(), Message::get_providers(&b"block"[..]))
            .unwrap();
        assert_eq!(response.provider_peers.len(), 1);
    }

    #[test]
    fn put_then_get_value() {
        let (engine, _) = engine();
        let signer = SigningKey::from_bytes(&rand::random());
        let put = signed_put(&signer, 3);

        let echo = engine.handle_request(&PeerId::random(), put.clone());
        assert_eq!(echo, Some(put.clone()));

        let response = engine
            .handle_request(&PeerId::random(), Message::get_value(put.key.clone()))
            .unwrap();

        let record = response.record.unwrap();
        let decoded = IpnsRecord::from_bytes(&record.value).unwrap();

        assert_eq!(record.key, put.key);
        assert_eq!(decoded.seq(), 3);
        assert_eq!(decoded.value(), &Bytes::from_static(b"/ipfs/bafy"));
    }

    #[test]
    fn put_value_rejections_are_silent() {
        let (engine, _) = engine();
        let signer = SigningKey::from_bytes(&rand::random());
        let publisher = PeerId::from_public_key(&signer.verifying_key());

        engine.handle_request(&PeerId::random(), signed_put(&signer, 7));

        // Older sequence.
        assert!(engine
            .handle_request(&PeerId::random(), signed_put(&signer, 5))
            .is_none());

        // Stored under someone else's key.
        let mut misplaced = signed_put(&signer, 9);
        let other = ipns_key(&PeerId::random());
        misplaced.key = other.clone();
        misplaced.record.as_mut().unwrap().key = other;
        assert!(engine.handle_request(&PeerId::random(), misplaced).is_none());

        // Missing record.
        assert!(engine
            .handle_request(
                &PeerId::random(),
                Message::new(MessageType::PutValue, ipns_key(&publisher))
            )
            .is_none());

        assert_eq!(engine.records().get(&publisher).unwrap().seq(), 7);
    }

    #[test]
    fn get_value_miss_still_returns_closer_peers() {
        let (engine, _) = engine();
        engine.add_incoming_connection(&PeerId::random(), &[]);

        let response = engine
            .handle_request(
                &PeerId::random(),
                Message::get_value(ipns_key(&PeerId::random())),
            )
            .unwrap();

        assert!(response.record.is_none());
        assert_eq!(response.closer_peers.len(), 1);
    }

    #[test]
    fn ping_has_no_response() {
        let (engine, _) = engine();

        assert!(engine
            .handle_request(&PeerId::random(), Message::new(MessageType::Ping, Bytes::new()))
            .is_none());
    }
}
