use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::common::PeerAddresses;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTMessage {
    #[serde(rename = "type")]
    pub kind: i32,

    #[serde(default)]
    pub key: Bytes,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<DHTRecord>,

    #[serde(default, rename = "closerPeers")]
    pub closer_peers: Vec<PeerAddresses>,

    #[serde(default, rename = "providerPeers")]
    pub provider_peers: Vec<PeerAddresses>,
}

impl DHTMessage {
    pub fn from_bytes(bytes: &[u8]) -> Result<DHTMessage, serde_bencode::Error> {
        let obj = serde_bencode::from_bytes(bytes)?;
        Ok(obj)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_bencode::Error> {
        serde_bencode::to_bytes(self)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DHTRecord {
    pub key: Bytes,
    pub value: Bytes,
}
