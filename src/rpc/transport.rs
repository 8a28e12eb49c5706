//! Contracts the DHT needs from the underlying peer-to-peer host.

use async_trait::async_trait;

use crate::common::{CodecError, Message, PeerAddresses, PeerId};

/// A host able to open DHT streams to remote peers and accept theirs.
#[async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync + 'static {
    type Stream: MessageStream;

    /// Identity of this host.
    fn local_peer_id(&self) -> PeerId;

    /// Addresses this host is reachable at.
    fn listen_addresses(&self) -> Vec<String>;

    /// Open a stream to `peer_id` at one of `addresses`, negotiated under `protocol_id`.
    async fn dial(
        &self,
        peer_id: &PeerId,
        addresses: &[String],
        protocol_id: &str,
    ) -> Result<Self::Stream, TransportError>;

    /// Wait for the next inbound DHT stream, with the identity and addresses
    /// of the remote peer.
    ///
    /// Returns `None` once the host is shut down.
    async fn accept(&self) -> Option<(PeerAddresses, Self::Stream)>;
}

/// A reliable, ordered channel with one remote peer.
///
/// A stream carries a single request and at most one response, the serving
/// side closes it after handling the request.
#[async_trait]
pub trait MessageStream: Send + 'static {
    /// Protocol id the dialling side opened this stream with.
    fn protocol_id(&self) -> &str;

    async fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    async fn receive(&mut self) -> Result<Message, TransportError>;
}

#[derive(thiserror::Error, Debug)]
/// Transient failures talking to a single peer.
pub enum TransportError {
    #[error("Failed to dial {0}")]
    DialFailed(PeerId),

    #[error("No dialable address for {0}")]
    NoAddresses(PeerId),

    #[error("Request timed out")]
    Timeout,

    #[error("Stream closed by the remote peer")]
    StreamClosed,

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(&'static str),

    #[error(transparent)]
    Codec(#[from] CodecError),
}
