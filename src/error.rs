//! Main Crate Error

use crate::{
    common::{CodecError, PeerId, RecordError},
    rpc::TransportError,
};

/// Alias for results returned by this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
/// Kadnode crate error enum.
pub enum Error {
    /// Ids are exactly 32 bytes.
    #[error("Invalid Id size, expected 32, got {0}")]
    InvalidIdSize(usize),

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),

    #[error(transparent)]
    /// Encoding or decoding a message failed, including unknown message types.
    Codec(#[from] CodecError),

    #[error(transparent)]
    /// A dial or a request to a remote peer failed.
    Transport(#[from] TransportError),

    #[error(transparent)]
    /// A record failed validation.
    Record(#[from] RecordError),

    /// None of the bootstrap addresses could be dialled, the node can not join the network.
    #[error("Could not connect to any bootstrap peer")]
    NoBootstrapPeers,

    #[error("No peers found closest to the key")]
    NoClosestPeers,

    /// Fewer than the replication factor of peers acknowledged a published record.
    #[error("Record stored at {stored} peers, {required} required")]
    PublishIncomplete { stored: usize, required: usize },

    #[error("No valid record found for {0}")]
    RecordNotFound(PeerId),

    /// The signing key does not belong to the publisher the record is published under.
    #[error("Signing key does not match the publisher {0}")]
    PublisherMismatch(PeerId),
}
