//! Peer identities and the addresses they can be reached at.
use std::{
    fmt::{self, Debug, Display, Formatter},
    hash::{Hash, Hasher},
    net::IpAddr,
    str::FromStr,
};

use bytes::Bytes;
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::{common::Id, Error, Result};

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
/// Opaque peer identity bytes.
///
/// Displayed as lowercase hex, which preserves the byte ordering, so comparing
/// two [PeerId]s or their string forms gives the same result.
pub struct PeerId(Bytes);

impl PeerId {
    pub fn from_bytes<T: Into<Bytes>>(bytes: T) -> PeerId {
        PeerId(bytes.into())
    }

    /// The identity of a publisher owning this ed25519 public key.
    pub fn from_public_key(key: &VerifyingKey) -> PeerId {
        PeerId(Bytes::copy_from_slice(key.as_bytes()))
    }

    /// A random 32 bytes identity.
    pub fn random() -> PeerId {
        let bytes: [u8; 32] = rand::random();

        PeerId(Bytes::copy_from_slice(&bytes))
    }

    /// Position of this peer in the key space.
    pub fn id(&self) -> Id {
        Id::hash(&self.0)
    }

    /// Interpret this identity as an ed25519 public key, if it is one.
    pub fn verifying_key(&self) -> Option<VerifyingKey> {
        let bytes: &[u8; 32] = self.0[..].try_into().ok()?;

        VerifyingKey::from_bytes(bytes).ok()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_bytes(&self) -> Bytes {
        self.0.clone()
    }
}

impl Display for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl Debug for PeerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self)
    }
}

impl FromStr for PeerId {
    type Err = Error;

    fn from_str(s: &str) -> Result<PeerId> {
        Ok(PeerId(hex::decode(s)?.into()))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
/// A peer identity and the ordered list of multiaddresses it is known by.
///
/// Equality and hashing only consider the identity.
pub struct PeerAddresses {
    #[serde(rename = "id")]
    pub peer_id: PeerId,
    #[serde(rename = "addrs", default)]
    pub addresses: Vec<String>,
}

impl PeerAddresses {
    pub fn new(peer_id: PeerId, addresses: Vec<String>) -> Self {
        Self { peer_id, addresses }
    }

    /// Parse a multiaddress ending in `/p2p/<peer>` (or the legacy `/ipfs/<peer>`).
    ///
    /// The returned address has the peer component stripped.
    pub fn from_multiaddr(multiaddr: &str) -> Option<Self> {
        let (transport, peer) = multiaddr
            .rsplit_once("/p2p/")
            .or_else(|| multiaddr.rsplit_once("/ipfs/"))?;

        let peer_id = PeerId::from_str(peer).ok()?;
        let addresses = if transport.is_empty() {
            vec![]
        } else {
            vec![transport.to_string()]
        };

        Some(Self::new(peer_id, addresses))
    }

    /// Addresses worth dialling: all of them on a local network, otherwise
    /// only the publicly routable ones.
    pub fn dialable_addresses(&self, local: bool) -> Vec<String> {
        self.addresses
            .iter()
            .filter(|address| local || is_public_address(address))
            .cloned()
            .collect()
    }
}

impl PartialEq for PeerAddresses {
    fn eq(&self, other: &Self) -> bool {
        self.peer_id == other.peer_id
    }
}

impl Eq for PeerAddresses {}

impl Hash for PeerAddresses {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.peer_id.hash(state);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// A peer positioned in the key space, created transiently during lookups.
pub struct RoutingEntry {
    pub id: Id,
    pub peer: PeerAddresses,
}

impl RoutingEntry {
    pub fn new(peer: PeerAddresses) -> Self {
        Self {
            id: peer.peer_id.id(),
            peer,
        }
    }
}

/// Returns `true` unless the multiaddress points at a loopback, private,
/// link-local or unspecified IP. DNS based addresses are considered public.
pub fn is_public_address(multiaddr: &str) -> bool {
    let mut components = multiaddr.split('/').skip(1);

    match (components.next(), components.next()) {
        (Some("ip4"), Some(ip)) | (Some("ip6"), Some(ip)) => match ip.parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => {
                !(ip.is_loopback()
                    || ip.is_private()
                    || ip.is_link_local()
                    || ip.is_unspecified()
                    || ip.is_broadcast())
            }
            Ok(IpAddr::V6(ip)) => {
                let first = ip.segments()[0];
                let unique_local = first & 0xfe00 == 0xfc00;
                let link_local = first & 0xffc0 == 0xfe80;

                !(ip.is_loopback() || ip.is_unspecified() || unique_local || link_local)
            }
            Err(_) => false,
        },
        (Some("dns"), _) | (Some("dns4"), _) | (Some("dns6"), _) | (Some("dnsaddr"), _) => true,
        _ => false,
    }
}
