//! In-process transport over channels, carrying encoded messages.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use flume::{Receiver, Sender};
use tracing::trace;

use super::transport::{MessageStream, Transport, TransportError};
use crate::common::{Message, PeerAddresses, PeerId};

#[derive(Debug)]
struct Host {
    addresses: Vec<String>,
    incoming: Sender<(PeerAddresses, MemoryStream)>,
}

#[derive(Debug, Default)]
struct NetworkState {
    hosts: HashMap<PeerId, Host>,
    unreachable: HashSet<PeerId>,
    silent: HashSet<PeerId>,
    /// Server ends of streams opened to silent peers, held so they never close
    /// while the dialling side is still around.
    swallowed: Vec<MemoryStream>,
}

#[derive(Debug, Clone, Default)]
/// A shared in-memory network that [MemoryTransport]s register on.
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    next_port: Arc<AtomicUsize>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new host with a random identity.
    pub fn transport(&self) -> MemoryTransport {
        self.transport_with_id(PeerId::random())
    }

    /// Register a new host, reachable at a single `/memory/<port>` address.
    pub fn transport_with_id(&self, peer_id: PeerId) -> MemoryTransport {
        let port = self.next_port.fetch_add(1, Ordering::Relaxed);
        let addresses = vec![format!("/memory/{port}")];
        let (incoming, accept) = flume::unbounded();

        self.state().hosts.insert(
            peer_id.clone(),
            Host {
                addresses: addresses.clone(),
                incoming,
            },
        );

        MemoryTransport {
            peer_id,
            addresses,
            network: self.clone(),
            accept,
        }
    }

    /// Dialling this peer fails immediately.
    pub fn set_unreachable(&self, peer_id: &PeerId) {
        self.state().unreachable.insert(peer_id.clone());
    }

    /// Dialling this peer succeeds, but it never answers.
    pub fn set_silent(&self, peer_id: &PeerId) {
        self.state().silent.insert(peer_id.clone());
    }

    fn state(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
/// A host on a [MemoryNetwork].
pub struct MemoryTransport {
    peer_id: PeerId,
    addresses: Vec<String>,
    network: MemoryNetwork,
    accept: Receiver<(PeerAddresses, MemoryStream)>,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Stream = MemoryStream;

    fn local_peer_id(&self) -> PeerId {
        self.peer_id.clone()
    }

    fn listen_addresses(&self) -> Vec<String> {
        self.addresses.clone()
    }

    async fn dial(
        &self,
        peer_id: &PeerId,
        addresses: &[String],
        protocol_id: &str,
    ) -> Result<MemoryStream, TransportError> {
        let mut state = self.network.state();

        if state.unreachable.contains(peer_id) {
            return Err(TransportError::DialFailed(peer_id.clone()));
        }

        let host = state
            .hosts
            .get(peer_id)
            .ok_or_else(|| TransportError::DialFailed(peer_id.clone()))?;

        if !addresses.iter().any(|a| host.addresses.contains(a)) {
            return Err(TransportError::NoAddresses(peer_id.clone()));
        }

        let incoming = host.incoming.clone();
        let (local, remote) = MemoryStream::pair(protocol_id);

        if state.silent.contains(peer_id) {
            state.swallowed.retain(|stream| !stream.is_closed());
            state.swallowed.push(remote);
            return Ok(local);
        }

        trace!(from = ?self.peer_id, to = ?peer_id, protocol_id, "Opening memory stream");

        incoming
            .send((
                PeerAddresses::new(self.peer_id.clone(), self.addresses.clone()),
                remote,
            ))
            .map_err(|_| TransportError::DialFailed(peer_id.clone()))?;

        Ok(local)
    }

    async fn accept(&self) -> Option<(PeerAddresses, MemoryStream)> {
        self.accept.recv_async().await.ok()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.state().hosts.remove(&self.peer_id);
    }
}

#[derive(Debug)]
/// One end of a bidirectional in-memory stream.
pub struct MemoryStream {
    protocol_id: String,
    outgoing: Sender<Vec<u8>>,
    incoming: Receiver<Vec<u8>>,
}

impl MemoryStream {
    fn pair(protocol_id: &str) -> (Self, Self) {
        let (a_tx, a_rx) = flume::unbounded();
        let (b_tx, b_rx) = flume::unbounded();

        (
            Self {
                protocol_id: protocol_id.to_string(),
                outgoing: a_tx,
                incoming: b_rx,
            },
            Self {
                protocol_id: protocol_id.to_string(),
                outgoing: b_tx,
                incoming: a_rx,
            },
        )
    }

    /// The other end was dropped.
    fn is_closed(&self) -> bool {
        self.outgoing.is_disconnected()
    }

    /// Send bytes as they are, bypassing the encoder.
    #[cfg(test)]
    pub(crate) fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.outgoing.send(bytes);
    }
}

#[async_trait]
impl MessageStream for MemoryStream {
    fn protocol_id(&self) -> &str {
        &self.protocol_id
    }
    async fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        let bytes = message.to_bytes()?;

        self.outgoing
            .send_async(bytes)
            .await
            .map_err(|_| TransportError::StreamClosed)
    }

    async fn receive(&mut self) -> Result<Message, TransportError> {
        let bytes = self
            .incoming
            .recv_async()
            .await
            .map_err(|_| TransportError::StreamClosed)?;

        Ok(Message::from_bytes(&bytes)?)
    }
}
