//! kadis - a Kademlia distributed hash table node
//!
//! Nodes identified by 160-bit ids self-organize into an overlay using the
//! XOR distance metric, locate peers and values through iterative parallel
//! lookups, and replicate key-value data across the nodes closest to a key
//! with periodic refresh and soft-deletion.
//!
//! # Modules
//!
//! - [`id`] - 160-bit identifiers, XOR distance, content hashing
//! - [`contact`] - (id, address) pairs, the addressable unit of the overlay
//! - [`routing`] - capacity-bounded k-buckets and the routing table
//! - [`shortlist`] - the iterative lookup working set
//! - [`message`] - wire envelopes and request/response pairing
//! - [`store`] - the TTL-expiring local datastore
//! - [`transport`] - UDP RPC client with correlation and timeouts
//! - [`node`] - the orchestrator: join, store, lookup, forget, serve
//! - [`config`] - node construction parameters

pub mod config;
pub mod contact;
pub mod error;
pub mod id;
pub mod message;
pub mod node;
pub mod routing;
pub mod shortlist;
pub mod store;
pub mod transport;

pub use config::Config;
pub use contact::Contact;
pub use error::DhtError;
pub use id::{Distance, NodeId};
pub use message::{validate, Envelope, Payload, RpcKind};
pub use node::Node;
pub use routing::{Insertion, RoutingTable};
pub use shortlist::ShortList;
pub use store::Datastore;
pub use transport::Client;
