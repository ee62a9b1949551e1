//! Node identities and the fixed membership of a deployment.
//!
//! Membership is decided at construction time and never changes for the
//! lifetime of a process: every node knows the identity and address of every
//! other node, including itself.  Broadcast strategies derive their quorum
//! parameters (`n`, `f`) from this set.

use {
    serde::{Deserialize, Serialize},
    std::{collections::BTreeMap, fmt},
};

/// Opaque, stable identifier of a participant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create a node id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Transport address of a peer on a stream-socket network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Host name or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Peer {
    /// Create a peer address record.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form suitable for `TcpStream::connect`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The full, fixed member set of a deployment, including the local node.
///
/// Members are kept in a `BTreeMap` so every node iterates them in the same
/// order.
#[derive(Debug, Clone)]
pub struct Membership {
    local: NodeId,
    members: BTreeMap<NodeId, Peer>,
}

impl Membership {
    /// Build a membership from the local id and the complete member map.
    /// The map is expected to contain the local node as well.
    pub fn new(local: NodeId, members: BTreeMap<NodeId, Peer>) -> Self {
        Self { local, members }
    }

    /// The local node's id.
    pub fn local_id(&self) -> &NodeId {
        &self.local
    }

    /// Total number of members (`n`), including the local node.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if the member map is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Maximum number of Byzantine members tolerated: `f = ⌊(n − 1) / 3⌋`.
    pub fn faulty_tolerance(&self) -> usize {
        self.len().saturating_sub(1) / 3
    }

    /// Whether the given id is a member.
    pub fn contains(&self, id: &NodeId) -> bool {
        self.members.contains_key(id)
    }

    /// Address of a member, if known.
    pub fn peer(&self, id: &NodeId) -> Option<&Peer> {
        self.members.get(id)
    }

    /// All member ids in deterministic order.
    pub fn ids(&self) -> impl Iterator<Item = &NodeId> {
        self.members.keys()
    }

    /// All members in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Peer)> {
        self.members.iter()
    }

    /// Every member except the local node.
    pub fn others(&self) -> impl Iterator<Item = (&NodeId, &Peer)> {
        self.members.iter().filter(move |(id, _)| **id != self.local)
    }

    /// Ids of every member except the local node.
    pub fn other_ids(&self) -> Vec<NodeId> {
        self.others().map(|(id, _)| id.clone()).collect()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
