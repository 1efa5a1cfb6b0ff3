use crate::contact::Contact;
use crate::error::DhtError;
use crate::id::NodeId;
use crate::message::{validate, Envelope, Payload, RpcKind};
use crate::routing::{Insertion, RoutingTable};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

/// Receive buffer for the serving loop; one request fits well within it.
pub const SERVER_RECV_BUFFER: usize = 1024;
/// Receive buffer for outbound request replies, sized for a full contact
/// list or value payload. Datagrams beyond this are not reassembled.
pub const CLIENT_RECV_BUFFER: usize = 5000;

/// Outbound RPC side of the transport.
///
/// Each request opens an ephemeral UDP socket, sends one datagram, and
/// waits up to the configured timeout for a reply whose correlation id and
/// type pair with the request; anything else that arrives on the socket is
/// discarded without satisfying the wait. A timeout evicts the destination
/// from the routing table and surfaces as `DhtError::Timeout`. There is no
/// retry: at most one attempt per dispatched query.
#[derive(Clone)]
pub struct Client {
    self_contact: Contact,
    table: Arc<RoutingTable>,
    timeout: Duration,
}

impl Client {
    pub fn new(self_contact: Contact, table: Arc<RoutingTable>, timeout: Duration) -> Self {
        Self {
            self_contact,
            table,
            timeout,
        }
    }

    pub async fn request(&self, to: &Contact, payload: Payload) -> Result<Envelope, DhtError> {
        let request = Envelope::request(self.self_contact, payload);
        let data = request.encode()?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.send_to(&data, to.addr).await?;

        let reply = timeout(self.timeout, self.await_reply(&socket, &request)).await;

        match reply {
            Ok(Ok(response)) => {
                // A valid reply is proof of liveness.
                self.register(response.sender);
                Ok(response)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                self.table.remove(&to.id);
                Err(DhtError::Timeout)
            }
        }
    }

    /// Offers a contact to the routing table, applying ping-and-replace
    /// when its bucket is full: the least-recently-seen entry is probed
    /// and the newcomer takes its place only if the probe times out (the
    /// timeout path itself evicts the entry). A responsive head is
    /// refreshed by its own reply and the newcomer is discarded. Both the
    /// inbound serving loop and the outbound reply path register contacts
    /// through here.
    pub fn register(&self, contact: Contact) {
        if let Insertion::Full { oldest } = self.table.add(contact) {
            let client = self.clone();
            tokio::spawn(async move {
                if client.ping(&oldest).await.is_err() {
                    debug!(evicted = %oldest, admitted = %contact, "replaced unresponsive bucket head");
                    client.table.add(contact);
                }
            });
        }
    }

    async fn await_reply(
        &self,
        socket: &UdpSocket,
        request: &Envelope,
    ) -> Result<Envelope, DhtError> {
        let mut buf = vec![0u8; CLIENT_RECV_BUFFER];
        loop {
            let (n, from) = socket.recv_from(&mut buf).await?;
            match Envelope::decode(&buf[..n]) {
                Ok(response) if validate(request, &response) => return Ok(response),
                Ok(response) => debug!(
                    %from,
                    kind = ?response.payload.kind(),
                    "discarding datagram that does not answer the request"
                ),
                Err(e) => debug!(%from, "discarding undecodable reply: {}", e),
            }
        }
    }

    pub async fn ping(&self, to: &Contact) -> Result<(), DhtError> {
        let response = self.request(to, Payload::PingRequest).await?;
        match response.payload {
            Payload::PingResponse => Ok(()),
            other => Err(DhtError::TypeMismatch {
                expected: RpcKind::PingResponse,
                got: other.kind(),
            }),
        }
    }

    pub async fn find_node(
        &self,
        to: &Contact,
        target: &NodeId,
    ) -> Result<Vec<Contact>, DhtError> {
        let response = self
            .request(to, Payload::FindNodeRequest { target: *target })
            .await?;
        match response.payload {
            Payload::FindNodeResponse { contacts } => Ok(contacts),
            other => Err(DhtError::TypeMismatch {
                expected: RpcKind::FindNodeResponse,
                got: other.kind(),
            }),
        }
    }

    /// Returns the value if the peer holds it, otherwise the peer's closest
    /// contacts to the key.
    pub async fn find_value(
        &self,
        to: &Contact,
        hash: &str,
    ) -> Result<(Option<Bytes>, Vec<Contact>), DhtError> {
        let response = self
            .request(
                to,
                Payload::FindValueRequest {
                    hash: hash.to_string(),
                },
            )
            .await?;
        match response.payload {
            Payload::FindValueResponse { value, contacts } => Ok((value, contacts)),
            other => Err(DhtError::TypeMismatch {
                expected: RpcKind::FindValueResponse,
                got: other.kind(),
            }),
        }
    }

    /// Stores (or re-stores, which refreshes the replica's deadline) a
    /// value at the peer.
    pub async fn store(&self, to: &Contact, key: &str, value: &Bytes) -> Result<String, DhtError> {
        let response = self
            .request(
                to,
                Payload::StoreRequest {
                    key: key.to_string(),
                    value: value.clone(),
                },
            )
            .await?;
        match response.payload {
            Payload::StoreResponse { key_location } => Ok(key_location),
            other => Err(DhtError::TypeMismatch {
                expected: RpcKind::StoreResponse,
                got: other.kind(),
            }),
        }
    }
}
