//! Serialize and deserialize DHT protocol messages.

mod internal;

use std::convert::TryFrom;

use bytes::Bytes;

use crate::common::PeerAddresses;

use internal::{DHTMessage, DHTRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The five request kinds, plus the retired liveness check.
pub enum MessageType {
    PutValue,
    GetValue,
    AddProvider,
    GetProviders,
    FindNode,
    /// Not used any more, kept for protocol compatibility.
    Ping,
}

impl MessageType {
    pub fn code(&self) -> i32 {
        match self {
            MessageType::PutValue => 0,
            MessageType::GetValue => 1,
            MessageType::AddProvider => 2,
            MessageType::GetProviders => 3,
            MessageType::FindNode => 4,
            MessageType::Ping => 5,
        }
    }
}

impl TryFrom<i32> for MessageType {
    type Error = CodecError;

    fn try_from(code: i32) -> Result<Self, CodecError> {
        Ok(match code {
            0 => MessageType::PutValue,
            1 => MessageType::GetValue,
            2 => MessageType::AddProvider,
            3 => MessageType::GetProviders,
            4 => MessageType::FindNode,
            5 => MessageType::Ping,
            _ => return Err(CodecError::UnknownMessageType(code)),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
/// A signed value travelling inside a [Message], `value` holds the encoded record.
pub struct Record {
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
/// Request and response envelope of the DHT protocol.
pub struct Message {
    pub message_type: MessageType,
    pub key: Bytes,
    pub record: Option<Record>,
    pub closer_peers: Vec<PeerAddresses>,
    pub provider_peers: Vec<PeerAddresses>,
}

impl Message {
    pub fn new(message_type: MessageType, key: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            key: key.into(),
            record: None,
            closer_peers: Vec::new(),
            provider_peers: Vec::new(),
        }
    }

    pub fn find_node(key: impl Into<Bytes>) -> Self {
        Self::new(MessageType::FindNode, key)
    }

    pub fn get_providers(key: impl Into<Bytes>) -> Self {
        Self::new(MessageType::GetProviders, key)
    }

    pub fn get_value(key: impl Into<Bytes>) -> Self {
        Self::new(MessageType::GetValue, key)
    }

    /// Announce `provider` as holding the content addressed by `key`.
    pub fn add_provider(key: impl Into<Bytes>, provider: PeerAddresses) -> Self {
        Self::new(MessageType::AddProvider, key).with_provider_peers(vec![provider])
    }

    pub fn put_value(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        let key = key.into();

        Self::new(MessageType::PutValue, key.clone()).with_record(Record {
            key,
            value: value.into(),
        })
    }

    pub fn with_record(mut self, record: Record) -> Self {
        self.record = Some(record);
        self
    }

    pub fn with_closer_peers(mut self, peers: Vec<PeerAddresses>) -> Self {
        self.closer_peers = peers;
        self
    }

    pub fn with_provider_peers(mut self, peers: Vec<PeerAddresses>) -> Self {
        self.provider_peers = peers;
        self
    }

    /// Decode a bencoded message.
    ///
    /// Unknown message types are a protocol violation and fail decoding.
    pub fn from_bytes(bytes: &[u8]) -> Result<Message, CodecError> {
        Message::try_from(DHTMessage::from_bytes(bytes)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        Ok(DHTMessage::from(self.clone()).to_bytes()?)
    }
}

impl TryFrom<DHTMessage> for Message {
    type Error = CodecError;

    fn try_from(message: DHTMessage) -> Result<Self, CodecError> {
        Ok(Message {
            message_type: MessageType::try_from(message.kind)?,
            key: message.key,
            record: message.record.map(|record| Record {
                key: record.key,
                value: record.value,
            }),
            closer_peers: message.closer_peers,
            provider_peers: message.provider_peers,
        })
    }
}

impl From<Message> for DHTMessage {
    fn from(message: Message) -> Self {
        DHTMessage {
            kind: message.message_type.code(),
            key: message.key,
            record: message.record.map(|record| DHTRecord {
                key: record.key,
                value: record.value,
            }),
            closer_peers: message.closer_peers,
            provider_peers: message.provider_peers,
        }
    }
}

/// Encode a message with an arbitrary type code, valid or not.
#[cfg(test)]
pub(crate) fn encode_with_type_code(message: &Message, code: i32) -> Vec<u8> {
    let mut raw = DHTMessage::from(message.clone());
    raw.kind = code;

    raw.to_bytes().unwrap()
}

#[derive(thiserror::Error, Debug)]
/// Failure to encode or decode a [Message].
pub enum CodecError {
    #[error("Failed to parse packet bytes: {0}")]
    Bencode(#[from] serde_bencode::Error),

    /// The peer speaks an incompatible protocol version.
    #[error("Unknown kademlia message type: {0}")]
    UnknownMessageType(i32),
}
