//! Arena-style stores.
//!
//! Rosters and constructions are referenced by content hash, never by
//! pointer: the stores own every record and hand out hash-keyed lookups.
//! Creation is get-or-create throughout, which makes duplicate or restarted
//! reconcile calls harmless.

use std::collections::{BTreeMap, HashMap};

use tessera_types::roster::{ActiveRosters, Roster};
use tessera_types::{NodeId, RosterHash};

use crate::construction::{Construction, KeyVote};

/// Read-only roster lookup by content hash.
#[derive(Debug, Default)]
pub struct RosterStore {
    rosters: HashMap<RosterHash, Roster>,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a roster under its content hash. Re-registration of equal
    /// content is a no-op.
    pub fn put(&mut self, roster: Roster) -> RosterHash {
        let hash = roster.hash();
        self.rosters.entry(hash).or_insert(roster);
        hash
    }

    pub fn get(&self, hash: &RosterHash) -> Option<&Roster> {
        self.rosters.get(hash)
    }

    pub fn len(&self) -> usize {
        self.rosters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rosters.is_empty()
    }
}

/// Owns every construction, keyed by its (source, target) roster hash
/// pair.
#[derive(Debug)]
pub struct ConstructionStore {
    next_id: u64,
    constructions: HashMap<(RosterHash, RosterHash), Construction>,
    /// Key votes keyed by (voter, construction id). First vote per key
    /// wins; duplicates from the at-least-once transport are ignored.
    votes: BTreeMap<(NodeId, u64), [u8; 32]>,
}

impl ConstructionStore {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            constructions: HashMap::new(),
            votes: BTreeMap::new(),
        }
    }

    /// Get the construction for a roster pair, creating it if absent.
    /// Creation assigns the next construction id; an existing record is
    /// returned untouched, so repeated calls are idempotent.
    pub fn get_or_create(
        &mut self,
        source: RosterHash,
        target: RosterHash,
        genesis: bool,
    ) -> &mut Construction {
        let next_id = &mut self.next_id;
        self.constructions.entry((source, target)).or_insert_with(|| {
            let id = *next_id;
            *next_id += 1;
            tracing::info!(
                id,
                source = hex::encode(source),
                target = hex::encode(target),
                genesis,
                "created construction"
            );
            Construction::new(id, source, target, genesis)
        })
    }

    pub fn get(&self, source: &RosterHash, target: &RosterHash) -> Option<&Construction> {
        self.constructions.get(&(*source, *target))
    }

    pub fn get_mut(
        &mut self,
        source: &RosterHash,
        target: &RosterHash,
    ) -> Option<&mut Construction> {
        self.constructions.get_mut(&(*source, *target))
    }

    /// The construction whose target is the given roster hash, if any.
    pub fn for_target(&self, target: &RosterHash) -> Option<&Construction> {
        self.constructions
            .values()
            .find(|construction| construction.target_roster_hash == *target)
    }

    /// Record a replica's key vote. Returns `false` for duplicates.
    pub fn record_vote(&mut self, vote: &KeyVote) -> bool {
        let key = (vote.node_id, vote.construction_id);
        if self.votes.contains_key(&key) {
            return false;
        }
        self.votes.insert(key, vote.key_digest);
        true
    }

    /// All recorded votes for a construction, ascending by voter.
    pub fn votes_for(&self, construction_id: u64) -> Vec<(NodeId, [u8; 32])> {
        self.votes
            .iter()
            .filter(|((_, id), _)| *id == construction_id)
            .map(|((node_id, _), digest)| (*node_id, *digest))
            .collect()
    }

    /// Retire constructions made stale by a handoff: everything not
    /// targeting the newly active roster is deleted, along with its votes.
    /// Returns `true` when anything was removed, so repeated handoff
    /// reconciles are no-ops after the first.
    pub fn purge_state_after_handoff(&mut self, active: &ActiveRosters) -> bool {
        let before = self.constructions.len();
        let mut purged_ids = Vec::new();
        self.constructions.retain(|_, construction| {
            let keep = construction.target_roster_hash == active.target_roster_hash;
            if !keep {
                tracing::info!(
                    id = construction.id,
                    target = hex::encode(construction.target_roster_hash),
                    "purging stale construction after handoff"
                );
                purged_ids.push(construction.id);
            }
            keep
        });
        self.votes
            .retain(|(_, construction_id), _| !purged_ids.contains(construction_id));
        before != self.constructions.len()
    }

    pub fn len(&self) -> usize {
        self.constructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructions.is_empty()
    }

    /// Iterate all constructions (persistence snapshots).
    pub fn iter(&self) -> impl Iterator<Item = &Construction> {
        self.constructions.values()
    }
}

impl Default for ConstructionStore {
    fn default() -> Self {
        Self::new()
    }
}
