use crate::contact::Contact;
use crate::id::NodeId;
use parking_lot::RwLock;
use std::collections::VecDeque;

const NUM_BUCKETS: usize = 160;

/// Outcome of offering a contact to the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Insertion {
    /// Appended to the fresh end of its bucket.
    Added,
    /// Already known; moved to the fresh end.
    Refreshed,
    /// Our own id; never tracked.
    SelfEntry,
    /// The bucket is at capacity. Ping-and-replace: the caller probes the
    /// least-recently-seen entry and re-offers the newcomer only if the
    /// probe times out (the timeout path evicts `oldest`).
    Full { oldest: Contact },
}

#[derive(Debug, Default)]
struct Bucket {
    contacts: VecDeque<Contact>,
}

impl Bucket {
    fn add(&mut self, contact: Contact, k: usize) -> Insertion {
        if let Some(pos) = self.contacts.iter().position(|c| c.id == contact.id) {
            // remove cannot fail, the position was just found
            if let Some(existing) = self.contacts.remove(pos) {
                self.contacts.push_back(existing);
            }
            return Insertion::Refreshed;
        }

        if self.contacts.len() < k {
            self.contacts.push_back(contact);
            return Insertion::Added;
        }

        match self.contacts.front() {
            Some(oldest) => Insertion::Full { oldest: *oldest },
            None => Insertion::Full { oldest: contact },
        }
    }

    fn remove(&mut self, id: &NodeId) {
        self.contacts.retain(|c| &c.id != id);
    }
}

/// 160 capacity-bounded buckets indexed by shared-prefix length with the
/// local id. Mutated concurrently by the serving loop and by client
/// operations, so each bucket carries its own lock.
pub struct RoutingTable {
    self_id: NodeId,
    k: usize,
    buckets: Vec<RwLock<Bucket>>,
}

impl RoutingTable {
    pub fn new(self_id: NodeId, k: usize) -> Self {
        let buckets = (0..NUM_BUCKETS)
            .map(|_| RwLock::new(Bucket::default()))
            .collect();

        Self {
            self_id,
            k,
            buckets,
        }
    }

    pub fn self_id(&self) -> &NodeId {
        &self.self_id
    }

    pub fn add(&self, contact: Contact) -> Insertion {
        if contact.id == self.self_id {
            return Insertion::SelfEntry;
        }

        let idx = self.self_id.bucket_index(&contact.id);
        self.buckets[idx].write().add(contact, self.k)
    }

    /// Drops a contact, typically after an RPC to it timed out.
    pub fn remove(&self, id: &NodeId) {
        let idx = self.self_id.bucket_index(id);
        self.buckets[idx].write().remove(id);
    }

    /// The `count` known contacts closest to `target` by XOR distance.
    ///
    /// Collection starts at the target's own bucket and widens to
    /// neighboring buckets until enough candidates are gathered or the
    /// table is exhausted; the combined set is then sorted and truncated.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let start = self.self_id.bucket_index(target);

        let mut candidates: Vec<Contact> =
            self.buckets[start].read().contacts.iter().copied().collect();

        let mut width = 1;
        while candidates.len() < count && (width <= start || start + width < NUM_BUCKETS) {
            if width <= start {
                let bucket = self.buckets[start - width].read();
                candidates.extend(bucket.contacts.iter().copied());
            }
            if start + width < NUM_BUCKETS {
                let bucket = self.buckets[start + width].read();
                candidates.extend(bucket.contacts.iter().copied());
            }
            width += 1;
        }

        candidates.sort_by_key(|c| target.distance(&c.id));
        candidates.truncate(count);
        candidates
    }

    pub fn contact_count(&self) -> usize {
        self.buckets.iter().map(|b| b.read().contacts.len()).sum()
    }
}
