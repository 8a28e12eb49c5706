#![doc = include_str!("../README.md")]

// Public modules
mod common;

pub mod address_book;
mod dht;
mod error;
pub mod rpc;
pub mod server;

pub use crate::common::{
    ipns_key, messages, ClosestPeers, Contact, Id, IpnsRecord, Message, MessageType,
    PeerAddresses, PeerId, Record, RecordError, RoutingEntry, RoutingTable, MAX_BUCKET_SIZE_K,
};
pub use bytes::Bytes;
pub use dht::{Dht, DhtBuilder, Testnet};
pub use error::{Error, Result};

pub use ed25519_dalek::SigningKey;
