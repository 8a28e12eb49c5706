//! Signed, sequence numbered name records.

use std::{
    cmp::Ordering,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use bytes::Bytes;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::common::PeerId;

/// Namespace prefix of record keys in the DHT.
pub const IPNS_PREFIX: &[u8] = b"/ipns/";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// A mutable pointer published under a stable ed25519 key.
pub struct IpnsRecord {
    /// ed25519 public key of the publisher
    #[serde(with = "serde_bytes")]
    key: [u8; 32],
    /// mutable value
    value: Bytes,
    /// sequence number
    seq: u64,
    /// unix time in milliseconds after which the record is invalid
    expiry: u64,
    /// validity window in milliseconds the record was signed for
    ttl: u64,
    /// ed25519 signature
    #[serde(with = "serde_bytes")]
    signature: [u8; 64],
}

impl IpnsRecord {
    /// Sign a new record valid for `validity` from now.
    pub fn new(signer: &SigningKey, value: &[u8], seq: u64, validity: Duration) -> Self {
        let ttl = validity.as_millis() as u64;
        let expiry = now_millis().saturating_add(ttl);

        let signable = encode_signable(seq, expiry, ttl, value);
        let signature = signer.sign(&signable);

        Self {
            key: signer.verifying_key().to_bytes(),
            value: Bytes::copy_from_slice(value),
            seq,
            expiry,
            ttl,
            signature: signature.to_bytes(),
        }
    }

    /// Decode the raw bytes of a record, without verifying it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RecordError> {
        serde_bencode::from_bytes(bytes).map_err(|_| RecordError::Malformed)
    }

    /// Raw encoded bytes of this record, as stored and sent on the wire.
    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        serde_bencode::to_bytes(self).map_err(|_| RecordError::Malformed)
    }

    /// Check the signature against the embedded public key, and the expiry.
    pub fn verify(&self) -> Result<(), RecordError> {
        let key =
            VerifyingKey::from_bytes(&self.key).map_err(|_| RecordError::InvalidPublicKey)?;
        let signature = Signature::from_bytes(&self.signature);

        key.verify(
            &encode_signable(self.seq, self.expiry, self.ttl, &self.value),
            &signature,
        )
        .map_err(|_| RecordError::InvalidSignature)?;

        if self.is_expired() {
            return Err(RecordError::Expired);
        }

        Ok(())
    }

    /// Order two records of the same publisher: higher sequence wins, then later expiry.
    pub fn cmp_freshness(&self, other: &IpnsRecord) -> Ordering {
        self.seq
            .cmp(&other.seq)
            .then_with(|| self.expiry.cmp(&other.expiry))
    }

    pub fn is_expired(&self) -> bool {
        self.expiry < now_millis()
    }

    // === Getters ===

    /// The identity of the publisher, derived from its public key.
    pub fn publisher(&self) -> PeerId {
        PeerId::from_bytes(Bytes::copy_from_slice(&self.key))
    }

    pub fn key(&self) -> &[u8; 32] {
        &self.key
    }

    pub fn value(&self) -> &Bytes {
        &self.value
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn expiry(&self) -> u64 {
        self.expiry
    }

    pub fn ttl(&self) -> u64 {
        self.ttl
    }

    pub fn signature(&self) -> &[u8; 64] {
        &self.signature
    }
}

/// The bytes a publisher signs.
pub fn encode_signable(seq: u64, expiry: u64, ttl: u64, value: &[u8]) -> Box<[u8]> {
    let mut signable = format!("3:eoli{}e3:seqi{}e3:ttli{}e1:v{}:", expiry, seq, ttl, value.len())
        .into_bytes();
    signable.extend(value);

    signable.into()
}

/// DHT key a publisher's records are stored under.
pub fn ipns_key(publisher: &PeerId) -> Bytes {
    let mut key = IPNS_PREFIX.to_vec();
    key.extend(publisher.as_bytes());

    key.into()
}

/// Extract the publisher from a record key, if it is one.
pub fn publisher_from_key(key: &[u8]) -> Option<PeerId> {
    let publisher = key.strip_prefix(IPNS_PREFIX)?;

    if publisher.is_empty() {
        return None;
    }

    Some(PeerId::from_bytes(Bytes::copy_from_slice(publisher)))
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Reasons a record is rejected.
pub enum RecordError {
    #[error("Invalid record signature")]
    InvalidSignature,

    #[error("Invalid record public key")]
    InvalidPublicKey,

    #[error("Record is not signed by the publisher of its key")]
    PublisherMismatch,

    #[error("Record key does not match the message key")]
    KeyMismatch,

    #[error("Record expired")]
    Expired,

    #[error("A record with a higher sequence number is already stored")]
    Stale,

    #[error("Malformed record")]
    Malformed,
}
