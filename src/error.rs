use thiserror::Error;

use crate::message::RpcKind;

#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("invalid node id")]
    InvalidId,

    #[error("timeout")]
    Timeout,

    #[error("not found")]
    NotFound,

    #[error("no handler for {0:?}")]
    UnknownType(RpcKind),

    #[error("expected {expected:?}, got {got:?}")]
    TypeMismatch { expected: RpcKind, got: RpcKind },
}
