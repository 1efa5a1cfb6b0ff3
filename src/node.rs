use crate::config::Config;
use crate::contact::Contact;
use crate::error::DhtError;
use crate::id::NodeId;
use crate::message::{Envelope, Payload};
use crate::routing::RoutingTable;
use crate::shortlist::ShortList;
use crate::store::Datastore;
use crate::transport::{Client, SERVER_RECV_BUFFER};
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// One completed lookup query, delivered as a single atomic unit so
/// replies from concurrent queries can never interleave.
struct LookupReply {
    responder: Contact,
    contacts: Vec<Contact>,
    value: Option<Bytes>,
}

/// A Kademlia node: routing table, datastore, UDP transport, and the
/// operations composed from them.
///
/// # Examples
///
/// ```no_run
/// use kadis::{Config, Node};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let node = Node::bind(Config::default()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Node {
    contact: Contact,
    config: Config,
    socket: Arc<UdpSocket>,
    table: Arc<RoutingTable>,
    store: Arc<Datastore>,
    client: Client,
    refreshers: Arc<Mutex<HashMap<(NodeId, String), JoinHandle<()>>>>,
}

impl Node {
    /// Binds the serving socket and assembles the node. The node does not
    /// serve inbound RPCs until [`run`](Self::run) is driven.
    pub async fn bind(config: Config) -> Result<Self, DhtError> {
        let socket = UdpSocket::bind(config.bind_addr).await?;
        let local_addr = socket.local_addr()?;

        let id = config
            .id
            .unwrap_or_else(|| NodeId::from_data(local_addr.to_string().as_bytes()));
        let contact = Contact::new(id, local_addr);

        info!("node bound to {} with id {}", local_addr, id);

        let table = Arc::new(RoutingTable::new(id, config.k));
        let store = Arc::new(Datastore::new(config.ttl));
        let client = Client::new(contact, Arc::clone(&table), config.rpc_timeout);

        Ok(Self {
            contact,
            config,
            socket: Arc::new(socket),
            table,
            store,
            client,
            refreshers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn contact(&self) -> Contact {
        self.contact
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// Serves inbound RPCs until the task is dropped. Socket read errors
    /// and malformed or unhandled datagrams are logged and skipped; the
    /// loop never exits on bad input.
    pub async fn run(&self) {
        let mut buf = vec![0u8; SERVER_RECV_BUFFER];

        loop {
            let (n, from) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    warn!("socket read failed: {}", e);
                    continue;
                }
            };

            let request = match Envelope::decode(&buf[..n]) {
                Ok(request) => request,
                Err(e) => {
                    warn!(%from, "dropping undecodable datagram: {}", e);
                    continue;
                }
            };

            // Every inbound message refreshes routing liveness.
            self.register_contact(request.sender);

            let reply = match self.handle_request(&request) {
                Ok(payload) => Envelope::response(self.contact, request.rpc_id, payload),
                Err(e) => {
                    warn!(%from, "dropping request: {}", e);
                    continue;
                }
            };

            match reply.encode() {
                Ok(data) => {
                    if let Err(e) = self.socket.send_to(&data, from).await {
                        warn!(%from, "could not send response: {}", e);
                    }
                }
                Err(e) => warn!(%from, "could not encode response: {}", e),
            }
        }
    }

    fn handle_request(&self, request: &Envelope) -> Result<Payload, DhtError> {
        match &request.payload {
            Payload::PingRequest => Ok(Payload::PingResponse),

            Payload::FindNodeRequest { target } => Ok(Payload::FindNodeResponse {
                contacts: self.table.find_closest(target, self.config.k),
            }),

            Payload::FindValueRequest { hash } => {
                if let Some(value) = self.store.get(hash) {
                    return Ok(Payload::FindValueResponse {
                        value: Some(value),
                        contacts: Vec::new(),
                    });
                }
                // Not held locally; steer the lookup toward the key.
                let target = NodeId::from_hex(hash)?;
                Ok(Payload::FindValueResponse {
                    value: None,
                    contacts: self.table.find_closest(&target, self.config.k),
                })
            }

            Payload::StoreRequest { key, value } => {
                debug!(key = %key, len = value.len(), "storing replica");
                self.store.put(key.clone(), value.clone());
                Ok(Payload::StoreResponse {
                    key_location: key.clone(),
                })
            }

            other => Err(DhtError::UnknownType(other.kind())),
        }
    }

    /// Registration shares the client's ping-and-replace path, so inbound
    /// senders and outbound reply senders are treated identically.
    fn register_contact(&self, contact: Contact) {
        self.client.register(contact);
    }

    /// Joins the overlay through a bootstrap contact: inserts it, then
    /// looks up our own id so convergence populates nearby buckets on both
    /// sides. Returns the contacts discovered.
    pub async fn join_network(&self, bootstrap: Contact) -> Vec<Contact> {
        self.table.add(bootstrap);
        let (contacts, _, _) = self.run_lookup(self.contact.id, None).await;
        info!(
            peers = contacts.len(),
            "joined network via {}", bootstrap.addr
        );
        contacts
    }

    /// Locates the k closest known contacts to `target`.
    pub async fn lookup_contact(&self, target: &NodeId) -> Vec<Contact> {
        let (contacts, _, _) = self.run_lookup(*target, None).await;
        contacts
    }

    /// Locates a stored value by its content hash. Returns the value and
    /// the contact that supplied it, or `(None, None)` if no replica
    /// holds it.
    pub async fn lookup_data(&self, hash: &str) -> Result<(Option<Bytes>, Option<Contact>), DhtError> {
        if let Some(value) = self.store.get(hash) {
            return Ok((Some(value), Some(self.contact)));
        }

        let target = NodeId::from_hex(hash)?;
        let (_, value, responder) = self.run_lookup(target, Some(hash.to_string())).await;
        Ok((value, responder))
    }

    /// Stores a value in the overlay: puts it locally, locates the k
    /// closest contacts to its content hash, sends each a store RPC, and
    /// spawns one refresher per replica. Returns the content hash.
    pub async fn store(&self, data: Bytes) -> String {
        let key_id = NodeId::from_data(&data);
        let key = key_id.to_string();

        self.store.put(key.clone(), data.clone());

        let (replicas, _, _) = self.run_lookup(key_id, None).await;

        let sends = replicas
            .iter()
            .map(|replica| self.client.store(replica, &key, &data));
        for (replica, result) in replicas.iter().zip(join_all(sends).await) {
            match result {
                Ok(_) => debug!(key = %key, replica = %replica.addr, "stored replica"),
                Err(e) => warn!(key = %key, replica = %replica.addr, "store failed: {}", e),
            }
            self.spawn_refresher(*replica, key.clone(), data.clone());
        }

        info!(key = %key, replicas = replicas.len(), "value stored");
        key
    }

    /// Marks a locally known value as forgotten, which stops its refresh
    /// traffic; replicas then age out within one TTL window. The refresher
    /// registry lets us cancel the tasks immediately rather than waiting
    /// for their next poll.
    pub fn forget(&self, hash: &str) -> Result<(), DhtError> {
        self.store.toggle_forget(hash)?;

        let mut refreshers = self.refreshers.lock();
        refreshers.retain(|(_, key), handle| {
            if key == hash {
                handle.abort();
                false
            } else {
                true
            }
        });

        info!(key = %hash, "value marked forgotten");
        Ok(())
    }

    /// One long-lived task per (replica, key): every TTL/2 it checks the
    /// forget flag and, while clear, re-sends the value so the replica's
    /// deadline keeps sliding. The task ends when the value is forgotten,
    /// gone from the local store, or the replica stops answering.
    fn spawn_refresher(&self, replica: Contact, key: String, data: Bytes) {
        let client = self.client.clone();
        let store = Arc::clone(&self.store);
        let period = self.config.refresh_interval();

        let registry_key = (replica.id, key.clone());
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            // The first tick fires immediately; the value was just stored.
            ticker.tick().await;

            loop {
                ticker.tick().await;

                match store.is_forgotten(&key) {
                    Ok(false) => {}
                    Ok(true) => {
                        debug!(key = %key, "value forgotten, refresher exiting");
                        break;
                    }
                    Err(_) => {
                        debug!(key = %key, "value expired locally, refresher exiting");
                        break;
                    }
                }

                match client.store(&replica, &key, &data).await {
                    Ok(_) => debug!(key = %key, replica = %replica.addr, "refreshed replica"),
                    Err(e) => {
                        warn!(key = %key, replica = %replica.addr, "refresh failed, refresher exiting: {}", e);
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.refreshers.lock().insert(registry_key, handle) {
            previous.abort();
        }
    }

    /// The iterative convergence loop shared by contact and data lookups.
    ///
    /// Dispatches up to alpha concurrent queries, then one more per
    /// processed reply, each reply arriving whole on a single channel.
    /// Responders returning zero contacts become dead ends. For data
    /// lookups the first reply carrying a value short-circuits the loop.
    async fn run_lookup(
        &self,
        target: NodeId,
        hash: Option<String>,
    ) -> (Vec<Contact>, Option<Bytes>, Option<Contact>) {
        let seed = self.table.find_closest(&target, self.config.k);
        let mut shortlist = ShortList::new(target, self.config.k, seed);

        let (tx, mut rx) = mpsc::channel::<LookupReply>(self.config.k.max(1));

        let mut in_flight = 0usize;
        for contact in shortlist.take_initial(self.config.alpha) {
            self.dispatch_query(contact, target, hash.clone(), tx.clone());
            in_flight += 1;
        }

        while in_flight > 0 {
            let Some(reply) = rx.recv().await else {
                break;
            };
            in_flight -= 1;

            if hash.is_some() {
                if let Some(value) = reply.value {
                    // Outstanding queries are left to finish into a closed
                    // channel; their results are irrelevant now.
                    return (shortlist.contacts(), Some(value), Some(reply.responder));
                }
            }

            if reply.contacts.is_empty() {
                shortlist.mark_dead_end(&reply.responder.id);
            } else {
                let mut learned = reply.contacts;
                learned.retain(|c| c.id != self.contact.id);
                shortlist.merge(learned);
            }

            match shortlist.take_next_unqueried() {
                Some(next) => {
                    self.dispatch_query(next, target, hash.clone(), tx.clone());
                    in_flight += 1;
                }
                // No unqueried candidate left: converged.
                None => break,
            }
        }

        (shortlist.contacts(), None, None)
    }

    /// Sends one query as an independent task. Failures and timeouts
    /// surface as an empty contact list; convergence continues around them.
    fn dispatch_query(
        &self,
        to: Contact,
        target: NodeId,
        hash: Option<String>,
        tx: mpsc::Sender<LookupReply>,
    ) {
        let client = self.client.clone();
        tokio::spawn(async move {
            let outcome = match &hash {
                None => client
                    .find_node(&to, &target)
                    .await
                    .map(|contacts| (contacts, None)),
                Some(hash) => client
                    .find_value(&to, hash)
                    .await
                    .map(|(value, contacts)| (contacts, value)),
            };

            let (contacts, value) = outcome.unwrap_or_else(|e| {
                debug!(peer = %to.addr, "lookup query failed: {}", e);
                (Vec::new(), None)
            });

            // The receiver may already have converged or short-circuited.
            let _ = tx
                .send(LookupReply {
                    responder: to,
                    contacts,
                    value,
                })
                .await;
        });
    }
}
