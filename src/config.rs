use crate::id::NodeId;
use std::net::SocketAddr;
use std::time::Duration;

/// Node construction parameters.
///
/// Everything that varies between deployments (and between tests) lives
/// here; there is no process-wide mutable configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the serving socket binds to. Port 0 picks an ephemeral port.
    pub bind_addr: SocketAddr,
    /// Explicit node id. When `None` the id is derived by hashing the bound
    /// address, so a node keeps the same id across reconnects to the same
    /// endpoint.
    pub id: Option<NodeId>,
    /// Bucket capacity and replication factor.
    pub k: usize,
    /// Lookup fan-out: concurrent queries per convergence round.
    pub alpha: usize,
    /// Lifetime of a stored value between refreshes.
    pub ttl: Duration,
    /// How long an outbound RPC waits for its reply.
    pub rpc_timeout: Duration,
}

impl Config {
    /// Interval at which replica refreshers re-send their value.
    pub fn refresh_interval(&self) -> Duration {
        self.ttl / 2
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:1337".parse().expect("valid literal"),
            id: None,
            k: 20,
            alpha: 3,
            ttl: Duration::from_secs(10),
            rpc_timeout: Duration::from_millis(500),
        }
    }
}
