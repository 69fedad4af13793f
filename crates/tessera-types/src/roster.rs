//! Validator rosters.
//!
//! A roster is the content-addressed, ordered list of committee nodes with
//! their stake weights and public keys. Roster identity is the BLAKE3 hash
//! of the canonical encoding; equal content always produces an equal hash,
//! so rosters are referenced by hash everywhere and never by pointer.

use serde::{Deserialize, Serialize};

use tessera_crypto::blake3::{self, contexts};

use crate::{NodeId, Result, RosterHash, TypeError};

/// One committee node in a roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    /// The node's identifier.
    pub node_id: NodeId,
    /// The node's consensus stake weight.
    pub weight: u64,
    /// The node's consensus signing key (opaque here).
    pub consensus_key: [u8; 32],
    /// The node's share-encryption public key (compressed G1).
    pub proof_key: Vec<u8>,
}

/// An ordered, content-addressed validator roster.
///
/// Entries are kept sorted by node id; construction rejects duplicates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    entries: Vec<RosterEntry>,
}

impl Roster {
    /// Build a roster from entries. Entries are sorted by node id;
    /// duplicate node ids and weightless rosters are rejected.
    pub fn new(mut entries: Vec<RosterEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(TypeError::InvalidRoster("no entries".to_string()));
        }
        entries.sort_by_key(|entry| entry.node_id);
        for window in entries.windows(2) {
            if window[0].node_id == window[1].node_id {
                return Err(TypeError::DuplicateNode(window[0].node_id));
            }
        }
        if entries.iter().all(|entry| entry.weight == 0) {
            return Err(TypeError::InvalidRoster("zero total weight".to_string()));
        }
        Ok(Self { entries })
    }

    /// The entries, ascending by node id.
    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the roster has no entries (unreachable for constructed
    /// rosters; present for completeness).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by node id.
    pub fn entry(&self, node_id: NodeId) -> Option<&RosterEntry> {
        self.entries
            .binary_search_by_key(&node_id, |entry| entry.node_id)
            .ok()
            .map(|index| &self.entries[index])
    }

    /// Sum of all stake weights.
    pub fn total_weight(&self) -> u128 {
        self.entries.iter().map(|entry| entry.weight as u128).sum()
    }

    /// The roster's content hash.
    ///
    /// Length-prefixed canonical encoding of every entry field, hashed
    /// under the roster-hash domain.
    pub fn hash(&self) -> RosterHash {
        let mut fields: Vec<Vec<u8>> = Vec::with_capacity(self.entries.len() * 4);
        for entry in &self.entries {
            fields.push(entry.node_id.to_le_bytes().to_vec());
            fields.push(entry.weight.to_le_bytes().to_vec());
            fields.push(entry.consensus_key.to_vec());
            fields.push(entry.proof_key.clone());
        }
        let borrowed: Vec<&[u8]> = fields.iter().map(|f| f.as_slice()).collect();
        let encoded = blake3::encode_multi_field(&borrowed);
        blake3::derive_key(contexts::ROSTER_HASH, &encoded)
    }
}

/// The phase of the roster-transition state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RosterPhase {
    /// No prior active roster; establishing the first construction.
    Bootstrap,
    /// An active roster exists and a candidate has appeared.
    Transition,
    /// The candidate roster has just become active.
    Handoff,
}

impl std::fmt::Display for RosterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RosterPhase::Bootstrap => write!(f, "bootstrap"),
            RosterPhase::Transition => write!(f, "transition"),
            RosterPhase::Handoff => write!(f, "handoff"),
        }
    }
}

/// The host's view of the current roster pair, passed into every
/// reconcile call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveRosters {
    /// Hash of the roster signing authority flows from. Equal to the
    /// target hash during bootstrap.
    pub source_roster_hash: RosterHash,
    /// Hash of the roster signing authority flows to.
    pub target_roster_hash: RosterHash,
    /// Current transition phase.
    pub phase: RosterPhase,
}

impl ActiveRosters {
    /// The construction key for this roster pair.
    pub fn key(&self) -> (RosterHash, RosterHash) {
        (self.source_roster_hash, self.target_roster_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(node_id: NodeId, weight: u64) -> RosterEntry {
        RosterEntry {
            node_id,
            weight,
            consensus_key: [node_id as u8; 32],
            proof_key: vec![node_id as u8; 48],
        }
    }

    #[test]
    fn test_roster_sorted_by_node_id() {
        let roster = Roster::new(vec![entry(3, 10), entry(1, 10), entry(2, 10)]).expect("roster");
        let ids: Vec<NodeId> = roster.entries().iter().map(|e| e.node_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_roster_rejects_duplicates() {
        let result = Roster::new(vec![entry(1, 10), entry(1, 20)]);
        assert!(matches!(result, Err(TypeError::DuplicateNode(1))));
    }

    #[test]
    fn test_roster_rejects_empty_and_weightless() {
        assert!(Roster::new(vec![]).is_err());
        assert!(Roster::new(vec![entry(1, 0), entry(2, 0)]).is_err());
    }

    #[test]
    fn test_hash_is_content_addressed() {
        let a = Roster::new(vec![entry(1, 10), entry(2, 20)]).expect("roster");
        // Same content, different input order.
        let b = Roster::new(vec![entry(2, 20), entry(1, 10)]).expect("roster");
        assert_eq!(a.hash(), b.hash());

        let c = Roster::new(vec![entry(1, 10), entry(2, 21)]).expect("roster");
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_entry_lookup() {
        let roster = Roster::new(vec![entry(5, 10), entry(9, 20)]).expect("roster");
        assert_eq!(roster.entry(9).map(|e| e.weight), Some(20));
        assert!(roster.entry(7).is_none());
    }

    #[test]
    fn test_total_weight() {
        let roster = Roster::new(vec![entry(1, u64::MAX), entry(2, u64::MAX)]).expect("roster");
        assert_eq!(roster.total_weight(), 2 * (u64::MAX as u128));
    }
}
