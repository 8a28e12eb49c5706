//! Typed requests over a single DHT stream.

use bytes::Bytes;
use tracing::debug;

use super::transport::{MessageStream, TransportError};
use crate::common::{IpnsRecord, Message, MessageType, PeerAddresses};

#[derive(Debug, Clone, Default)]
/// Response to a `GET_PROVIDERS` request.
pub struct Providers {
    pub providers: Vec<PeerAddresses>,
    pub closer_peers: Vec<PeerAddresses>,
}

#[derive(Debug, Clone, Default)]
/// Response to a `GET_VALUE` request.
pub struct GetResult {
    /// The record the peer holds, decoded but not verified.
    pub record: Option<IpnsRecord>,
    pub closer_peers: Vec<PeerAddresses>,
}

/// Client side of the DHT protocol on an open stream.
pub struct KademliaController<S> {
    stream: S,
}

impl<S: MessageStream> KademliaController<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Ask for the peers closest to `key` the remote knows.
    pub async fn closer_peers(&mut self, key: Bytes) -> Result<Vec<PeerAddresses>, TransportError> {
        let response = self
            .request(Message::find_node(key), MessageType::FindNode)
            .await?;

        Ok(response.closer_peers)
    }

    pub async fn get_providers(&mut self, key: Bytes) -> Result<Providers, TransportError> {
        let response = self
            .request(Message::get_providers(key), MessageType::GetProviders)
            .await?;

        Ok(Providers {
            providers: response.provider_peers,
            closer_peers: response.closer_peers,
        })
    }

    /// Announce `provider` as holding `key`.
    ///
    /// The remote does not answer, it closes the stream once the announcement is handled.
    pub async fn provide(
        &mut self,
        key: Bytes,
        provider: PeerAddresses,
    ) -> Result<(), TransportError> {
        self.stream
            .send(&Message::add_provider(key, provider))
            .await?;

        match self.stream.receive().await {
            Err(TransportError::StreamClosed) => Ok(()),
            Err(error) => Err(error),
            Ok(_) => Err(TransportError::UnexpectedResponse(
                "ADD_PROVIDER has no response",
            )),
        }
    }

    /// Store an encoded record, returns `true` if the remote acknowledged it.
    pub async fn put_value(&mut self, key: Bytes, value: Bytes) -> Result<bool, TransportError> {
        let request = Message::put_value(key, value);

        match self.request(request.clone(), MessageType::PutValue).await {
            Ok(response) => Ok(response.record == request.record),
            // Rejected records are answered with silence.
            Err(TransportError::StreamClosed) => Ok(false),
            Err(error) => Err(error),
        }
    }

    pub async fn get_value(&mut self, key: Bytes) -> Result<GetResult, TransportError> {
        let response = self
            .request(Message::get_value(key), MessageType::GetValue)
            .await?;

        let record = match response.record {
            Some(record) => match IpnsRecord::from_bytes(&record.value) {
                Ok(decoded) => Some(decoded),
                Err(error) => {
                    debug!(?error, key = ?record.key, "Ignoring undecodable record");
                    None
                }
            },
            None => None,
        };

        Ok(GetResult {
            record,
            closer_peers: response.closer_peers,
        })
    }

    // === Private Methods ===

    async fn request(
        &mut self,
        request: Message,
        expected: MessageType,
    ) -> Result<Message, TransportError> {
        self.stream.send(&request).await?;

        let response = self.stream.receive().await?;

        if response.message_type != expected {
            return Err(TransportError::UnexpectedResponse(
                "response type does not match the request",
            ));
        }

        Ok(response)
    }
}
