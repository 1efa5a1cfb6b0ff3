use crate::error::DhtError;
use rand::Rng as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use std::fmt;

/// A 160-bit Kademlia identifier.
///
/// Ids name both nodes and stored values: a node id is derived from its
/// listening address, a value key from the value's content (SHA-1 in both
/// cases). Fresh random ids are used as RPC correlation tokens.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub [u8; 20]);

/// XOR distance between two ids, compared as an unsigned big-endian integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Distance([u8; 20]);

impl Distance {
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl NodeId {
    pub fn random() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    /// Content-addresses a payload: SHA-1 of the raw bytes.
    pub fn from_data(data: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    pub fn from_hex(s: &str) -> Result<Self, DhtError> {
        let bytes = hex::decode(s).map_err(|_| DhtError::InvalidId)?;
        if bytes.len() != 20 {
            return Err(DhtError::InvalidId);
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(&bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn distance(&self, other: &NodeId) -> Distance {
        let mut dist = [0u8; 20];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        Distance(dist)
    }

    /// Index of the bucket `other` belongs to relative to this id: the number
    /// of leading zero bits in the XOR distance. Equal ids (distance zero)
    /// collapse into the last bucket; callers never insert those.
    pub fn bucket_index(&self, other: &NodeId) -> usize {
        let Distance(dist) = self.distance(other);

        for (i, &byte) in dist.iter().enumerate() {
            if byte != 0 {
                let leading = byte.leading_zeros() as usize;
                return i * 8 + leading;
            }
        }

        159
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

// On the wire ids travel as hex strings.
impl Serialize for NodeId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        NodeId::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
