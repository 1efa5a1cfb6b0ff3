use crate::contact::Contact;
use crate::error::DhtError;
use crate::id::NodeId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Type-specific body of an RPC message.
///
/// Four exchanges, each a request/response pair: Ping/Pong, FindNode,
/// FindValue, and Store. A FindValue response carries either the value or
/// the responder's closest contacts to the key, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    PingRequest,
    PingResponse,
    FindNodeRequest {
        target: NodeId,
    },
    FindNodeResponse {
        contacts: Vec<Contact>,
    },
    FindValueRequest {
        hash: String,
    },
    FindValueResponse {
        value: Option<Bytes>,
        contacts: Vec<Contact>,
    },
    StoreRequest {
        key: String,
        value: Bytes,
    },
    StoreResponse {
        key_location: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcKind {
    PingRequest,
    PingResponse,
    FindNodeRequest,
    FindNodeResponse,
    FindValueRequest,
    FindValueResponse,
    StoreRequest,
    StoreResponse,
}

impl RpcKind {
    /// The response kind that satisfies a request of this kind, `None` for
    /// kinds that are themselves responses.
    pub fn counterpart(self) -> Option<RpcKind> {
        match self {
            RpcKind::PingRequest => Some(RpcKind::PingResponse),
            RpcKind::FindNodeRequest => Some(RpcKind::FindNodeResponse),
            RpcKind::FindValueRequest => Some(RpcKind::FindValueResponse),
            RpcKind::StoreRequest => Some(RpcKind::StoreResponse),
            _ => None,
        }
    }
}

impl Payload {
    pub fn kind(&self) -> RpcKind {
        match self {
            Payload::PingRequest => RpcKind::PingRequest,
            Payload::PingResponse => RpcKind::PingResponse,
            Payload::FindNodeRequest { .. } => RpcKind::FindNodeRequest,
            Payload::FindNodeResponse { .. } => RpcKind::FindNodeResponse,
            Payload::FindValueRequest { .. } => RpcKind::FindValueRequest,
            Payload::FindValueResponse { .. } => RpcKind::FindValueResponse,
            Payload::StoreRequest { .. } => RpcKind::StoreRequest,
            Payload::StoreResponse { .. } => RpcKind::StoreResponse,
        }
    }
}

/// One UDP datagram's worth of RPC: the typed body plus the sender's
/// contact (which refreshes routing liveness on receipt) and a correlation
/// id pairing a response with its outstanding request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Contact,
    pub rpc_id: NodeId,
    #[serde(flatten)]
    pub payload: Payload,
}

impl Envelope {
    pub fn request(sender: Contact, payload: Payload) -> Self {
        Self {
            sender,
            rpc_id: NodeId::random(),
            payload,
        }
    }

    /// A response reuses the correlation id of the request it answers.
    pub fn response(sender: Contact, rpc_id: NodeId, payload: Payload) -> Self {
        Self {
            sender,
            rpc_id,
            payload,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, DhtError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self, DhtError> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// True iff `response` answers `request`: matching correlation id and
/// exactly-paired types.
pub fn validate(request: &Envelope, response: &Envelope) -> bool {
    request.rpc_id == response.rpc_id
        && request.payload.kind().counterpart() == Some(response.payload.kind())
}
