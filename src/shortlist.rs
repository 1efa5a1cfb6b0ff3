use crate::contact::Contact;
use crate::id::NodeId;
use std::collections::HashSet;

#[derive(Debug, Clone)]
struct Entry {
    contact: Contact,
    queried: bool,
}

/// The working set of one iterative lookup: up to `capacity` candidate
/// contacts ordered by ascending XOR distance to the target, each flagged
/// once a query has been dispatched to it.
///
/// Responders that answered with zero contacts are dead ends; they are
/// dropped from the list and barred from re-entering through later merges.
/// A shortlist belongs to the lookup that created it and is discarded when
/// the lookup returns.
pub struct ShortList {
    target: NodeId,
    capacity: usize,
    entries: Vec<Entry>,
    dead_ends: HashSet<NodeId>,
}

impl ShortList {
    pub fn new(target: NodeId, capacity: usize, seed: Vec<Contact>) -> Self {
        let mut list = Self {
            target,
            capacity,
            entries: Vec::with_capacity(capacity),
            dead_ends: HashSet::new(),
        };
        list.merge(seed);
        list
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Folds newly learned contacts into the list: dedups by id, drops dead
    /// ends, re-sorts by distance to the target, and truncates to capacity.
    /// Queried flags of surviving entries are preserved.
    pub fn merge(&mut self, contacts: Vec<Contact>) {
        for contact in contacts {
            if self.dead_ends.contains(&contact.id) {
                continue;
            }
            if self.entries.iter().any(|e| e.contact.id == contact.id) {
                continue;
            }
            self.entries.push(Entry {
                contact,
                queried: false,
            });
        }

        let target = self.target;
        self.entries
            .sort_by_key(|e| target.distance(&e.contact.id));
        self.entries.truncate(self.capacity);
    }

    /// Bars a responder from the lookup after it returned zero contacts.
    pub fn mark_dead_end(&mut self, id: &NodeId) {
        self.dead_ends.insert(*id);
        self.entries.retain(|e| &e.contact.id != id);
    }

    /// The closest not-yet-queried candidate, flagged as queried on return.
    pub fn take_next_unqueried(&mut self) -> Option<Contact> {
        let entry = self.entries.iter_mut().find(|e| !e.queried)?;
        entry.queried = true;
        Some(entry.contact)
    }

    /// Drains up to `alpha` unqueried candidates for the opening round.
    pub fn take_initial(&mut self, alpha: usize) -> Vec<Contact> {
        let mut initial = Vec::with_capacity(alpha);
        while initial.len() < alpha {
            match self.take_next_unqueried() {
                Some(contact) => initial.push(contact),
                None => break,
            }
        }
        initial
    }

    /// The converged result: at most `capacity` contacts, ascending by
    /// distance to the target.
    pub fn contacts(&self) -> Vec<Contact> {
        self.entries.iter().map(|e| e.contact).collect()
    }
}
