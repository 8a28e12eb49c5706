//! End to end behaviour of DHT nodes on an in-memory network.

use std::{
    sync::Once,
    time::{Duration, Instant},
};

use kadnode::{
    ClosestPeers, Error, Id, IpnsRecord, PeerAddresses, PeerId, RoutingEntry, SigningKey, Testnet,
};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// The `count` closest to `key` among `peers`, computed without the network.
fn expected_closest(key: &[u8], peers: &[PeerId], count: usize) -> Vec<PeerAddresses> {
    let mut closest = ClosestPeers::new(Id::hash(key));

    for peer_id in peers {
        closest.add(RoutingEntry::new(PeerAddresses::new(peer_id.clone(), vec![])));
    }

    closest.closest(count)
}

#[tokio::test]
async fn closest_peers_converge() {
    init_tracing();

    let testnet = Testnet::new(12).await.unwrap();
    let client = testnet.client().await.unwrap();

    let key: [u8; 32] = rand::random();

    let first = client.find_closest_peers(&key, 5).await;
    let second = client.find_closest_peers(&key, 5).await;

    let everyone = testnet
        .nodes
        .iter()
        .map(|node| node.peer_id().clone())
        .collect::<Vec<_>>();

    assert_eq!(first.len(), 5);
    assert_eq!(first, second);
    assert_eq!(first, expected_closest(&key, &everyone, 5));
    assert!(first.iter().all(|peer| !peer.addresses.is_empty()));
    assert!(!first.iter().any(|peer| &peer.peer_id == client.peer_id()));
}

#[tokio::test]
async fn find_exact_peer() {
    init_tracing();

    let testnet = Testnet::new(8).await.unwrap();
    let client = testnet.client().await.unwrap();

    let target = &testnet.nodes[5];
    let found = client.find_closest_peers(target.peer_id().as_bytes(), 1).await;

    assert_eq!(found.len(), 1);
    assert_eq!(&found[0].peer_id, target.peer_id());
    assert_eq!(found[0].addresses, target.listen_addresses());
}

#[tokio::test]
async fn find_exact_peer_learned_during_lookup() {
    init_tracing();

    // Few enough nodes that no bucket of the bootstrap node overflows.
    let testnet = Testnet::new(20).await.unwrap();

    // Only knows the bootstrap node, the target has to be learned from it.
    let client = Testnet::builder().build(testnet.network.transport());
    client
        .bootstrap_routing_table(&testnet.bootstrap, |_| true)
        .await
        .unwrap();

    let target = &testnet.nodes[13];
    assert!(client.engine().address_book().get(target.peer_id()).is_empty());

    let found = client.find_closest_peers(target.peer_id().as_bytes(), 1).await;

    assert_eq!(found.len(), 1);
    assert_eq!(&found[0].peer_id, target.peer_id());
    assert_eq!(found[0].addresses, target.listen_addresses());

    // Returned on discovery, without querying anyone past the bootstrap node.
    assert_eq!(client.engine().routing_table_size(), 1);
}

#[tokio::test]
async fn provide_then_find_providers() {
    init_tracing();

    let testnet = Testnet::new(10).await.unwrap();
    let alice = testnet.client().await.unwrap();
    let bob = testnet.client().await.unwrap();

    let block = b"bafkreigh2akiscaildcqabsyg3dfr6chu3fgpregiymsck7e7aqa4s52zy";

    let delivered = alice
        .provide_block(block, alice.listen_addresses())
        .await
        .unwrap();
    assert!(delivered > 0);

    let providers = bob.find_providers(block, 1).await;

    assert_eq!(providers.len(), 1);
    assert_eq!(&providers[0].peer_id, alice.peer_id());
    assert_eq!(providers[0].addresses, alice.listen_addresses());

    // Nobody provides this one.
    assert!(bob.find_providers(b"unknown", 1).await.is_empty());
}

#[tokio::test]
async fn publish_then_resolve() {
    init_tracing();

    let testnet = Testnet::new(10).await.unwrap();
    let alice = testnet.client().await.unwrap();
    let bob = testnet.client().await.unwrap();

    let signer = SigningKey::from_bytes(&rand::random());
    let publisher = PeerId::from_public_key(&signer.verifying_key());

    let stored = alice
        .publish_ipns_value(&signer, &publisher, b"/ipfs/first", 5)
        .await
        .unwrap();
    assert!(stored > 0);

    assert_eq!(
        &bob.resolve_ipns_value(&publisher).await.unwrap()[..],
        b"/ipfs/first"
    );

    alice
        .publish_ipns_value(&signer, &publisher, b"/ipfs/second", 7)
        .await
        .unwrap();

    assert_eq!(
        &bob.resolve_ipns_value(&publisher).await.unwrap()[..],
        b"/ipfs/second"
    );
}

#[tokio::test]
async fn stale_publish_is_rejected_by_peers() {
    init_tracing();

    let testnet = Testnet::new(6).await.unwrap();
    let alice = testnet.client().await.unwrap();

    let signer = SigningKey::from_bytes(&rand::random());
    let publisher = PeerId::from_public_key(&signer.verifying_key());

    alice
        .publish_ipns_value(&signer, &publisher, b"/ipfs/seven", 7)
        .await
        .unwrap();

    // Joins after the newer record is already stored.
    let carol = testnet
        .client_with(Testnet::builder().max_publish_rounds(2))
        .await
        .unwrap();

    let result = carol
        .publish_ipns_value(&signer, &publisher, b"/ipfs/five", 5)
        .await;

    assert!(matches!(
        result,
        Err(Error::PublishIncomplete { stored: 0, .. })
    ));

    // Carol now holds the older record locally, the network still wins.
    assert_eq!(
        &carol.resolve_ipns_value(&publisher).await.unwrap()[..],
        b"/ipfs/seven"
    );
}

#[tokio::test]
async fn resolve_picks_highest_sequence_regardless_of_placement() {
    init_tracing();

    let testnet = Testnet::new(8).await.unwrap();

    let signer = SigningKey::from_bytes(&rand::random());
    let publisher = PeerId::from_public_key(&signer.verifying_key());

    let five = IpnsRecord::new(&signer, b"five", 5, Duration::from_secs(60));
    let seven = IpnsRecord::new(&signer, b"seven", 7, Duration::from_secs(60));

    for (i, node) in testnet.nodes.iter().enumerate() {
        let record = if i % 2 == 0 { &five } else { &seven };
        node.engine().put_local_record(record.clone()).unwrap();
    }

    let client = testnet.client().await.unwrap();

    assert_eq!(
        &client.resolve_ipns_value(&publisher).await.unwrap()[..],
        b"seven"
    );
}

#[tokio::test]
async fn resolve_unknown_publisher() {
    init_tracing();

    let testnet = Testnet::new(5).await.unwrap();
    let client = testnet.client().await.unwrap();

    let publisher = PeerId::from_public_key(&SigningKey::from_bytes(&rand::random()).verifying_key());

    assert!(matches!(
        client.resolve_ipns_value(&publisher).await,
        Err(Error::RecordNotFound(_))
    ));
}

#[tokio::test]
async fn unresponsive_peers_do_not_stall_lookups() {
    init_tracing();

    let testnet = Testnet::new(10).await.unwrap();
    let client = testnet.client().await.unwrap();

    let silent = testnet.nodes[3].peer_id().clone();
    let unreachable = testnet.nodes[6].peer_id().clone();

    testnet.network.set_silent(&silent);
    testnet.network.set_unreachable(&unreachable);

    let start = Instant::now();
    let closest = client.find_closest_peers(silent.as_bytes(), 3).await;
    let elapsed = start.elapsed();

    assert!(!closest.is_empty());
    assert!(!closest.iter().any(|peer| peer.peer_id == silent));
    assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

    let start = Instant::now();
    let providers = client.find_providers(unreachable.as_bytes(), 1).await;

    assert!(providers.is_empty());
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn bootstrap_fails_without_reachable_peers() {
    init_tracing();

    let testnet = Testnet::new(3).await.unwrap();
    testnet
        .network
        .set_unreachable(testnet.nodes[0].peer_id());

    assert!(matches!(
        testnet.client().await,
        Err(Error::NoBootstrapPeers)
    ));
}

#[tokio::test]
async fn periodic_bootstrap_fills_routing_table() {
    init_tracing();

    let testnet = Testnet::new(6).await.unwrap();

    let node = Testnet::builder()
        .bootstrap_interval(Duration::from_millis(50))
        .build(testnet.network.transport());
    node.spawn_listener();

    node.bootstrap_routing_table(&testnet.bootstrap, |_| true)
        .await
        .unwrap();
    assert_eq!(node.engine().routing_table_size(), 1);

    let task = node.spawn_bootstrap_task();
    tokio::time::sleep(Duration::from_millis(300)).await;
    task.abort();

    assert_eq!(node.engine().routing_table_size(), testnet.nodes.len());
}
