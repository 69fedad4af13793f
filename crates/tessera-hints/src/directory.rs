//! Participant directories.
//!
//! A directory deterministically maps each node of a roster to a contiguous
//! range of secret-share ids, proportional to stake weight and capped per
//! node. All honest nodes compute an identical directory for the same
//! (roster, configuration) pair — every tie in the assignment is broken by
//! node id.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tessera_types::roster::Roster;
use tessera_types::{NodeId, ShareId};

use crate::config::HintsConfig;
use crate::{HintsError, Result};

/// One node's slot in a directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    /// The owning node.
    pub node_id: NodeId,
    /// First share id owned by the node (1-based).
    pub first_share_id: ShareId,
    /// Number of consecutive share ids owned.
    pub share_count: u32,
    /// The node's share-encryption public key (compressed G1).
    pub proof_key: Vec<u8>,
}

impl DirectoryEntry {
    /// Iterate the share ids this entry owns.
    pub fn share_ids(&self) -> impl Iterator<Item = ShareId> + '_ {
        self.first_share_id..self.first_share_id + self.share_count
    }
}

/// Deterministic share-id assignment for one roster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantDirectory {
    entries: Vec<DirectoryEntry>,
    total_shares: u32,
    threshold: u32,
}

impl ParticipantDirectory {
    /// Compute the directory for `roster` under `config`.
    ///
    /// Quotas follow `min(cap, ceil(weight / total_weight * total))`, then
    /// are deterministically topped up (heaviest node first) or trimmed
    /// (largest allocation first) until they sum to the effective total
    /// `min(config.target_shares, n * cap)`. Nodes can end up with zero
    /// shares when the total is smaller than the roster.
    pub fn compute(roster: &Roster, config: &HintsConfig) -> Result<Self> {
        config.validate()?;

        let node_count = roster.len() as u64;
        let cap = config.max_shares_per_node as u64;
        let total = (config.target_shares as u64).min(node_count * cap);
        if total == 0 {
            return Err(HintsError::InvalidConfig(
                "effective share total is zero".to_string(),
            ));
        }
        let total_weight = roster.total_weight();

        // Capped ceiling quotas.
        let mut quotas: BTreeMap<NodeId, u64> = BTreeMap::new();
        for entry in roster.entries() {
            let raw = ((entry.weight as u128 * total as u128).div_ceil(total_weight)) as u64;
            quotas.insert(entry.node_id, raw.min(cap));
        }

        let mut assigned: u64 = quotas.values().sum();

        // Top up, heaviest first (ties by node id, ascending).
        if assigned < total {
            let mut order: Vec<NodeId> = roster.entries().iter().map(|e| e.node_id).collect();
            order.sort_by_key(|id| {
                let weight = roster.entry(*id).map(|e| e.weight).unwrap_or(0);
                (std::cmp::Reverse(weight), *id)
            });
            'outer: loop {
                let mut progressed = false;
                for id in &order {
                    if assigned == total {
                        break 'outer;
                    }
                    let quota = quotas.entry(*id).or_insert(0);
                    if *quota < cap {
                        *quota += 1;
                        assigned += 1;
                        progressed = true;
                    }
                }
                if !progressed {
                    // Unreachable: total <= n * cap.
                    break;
                }
            }
        }

        // Trim, largest allocation first (ties by node id, descending, so
        // lower ids keep their shares).
        while assigned > total {
            let victim = quotas
                .iter()
                .filter(|(_, quota)| **quota > 0)
                .max_by_key(|(id, quota)| (**quota, **id))
                .map(|(id, _)| *id);
            match victim {
                Some(id) => {
                    if let Some(quota) = quotas.get_mut(&id) {
                        *quota -= 1;
                        assigned -= 1;
                    }
                }
                None => break,
            }
        }

        // Contiguous ranges, ascending by node id.
        let mut entries = Vec::new();
        let mut next_share_id: ShareId = 1;
        for roster_entry in roster.entries() {
            let count = quotas.get(&roster_entry.node_id).copied().unwrap_or(0) as u32;
            if count == 0 {
                continue;
            }
            entries.push(DirectoryEntry {
                node_id: roster_entry.node_id,
                first_share_id: next_share_id,
                share_count: count,
                proof_key: roster_entry.proof_key.clone(),
            });
            next_share_id += count;
        }

        let total_shares = total as u32;
        let threshold = config.threshold_policy.threshold(total_shares);
        debug_assert!(threshold <= total_shares);

        Ok(Self {
            entries,
            total_shares,
            threshold,
        })
    }

    /// All directory entries, ascending by node id.
    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Total number of assigned shares.
    pub fn total_shares(&self) -> u32 {
        self.total_shares
    }

    /// The reconstruction threshold `t`.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// All share ids, ascending.
    pub fn share_ids(&self) -> Vec<ShareId> {
        (1..=self.total_shares).collect()
    }

    /// The share ids owned by `node_id` (empty when the node holds none).
    pub fn owned_share_ids(&self, node_id: NodeId) -> Vec<ShareId> {
        self.entries
            .iter()
            .find(|entry| entry.node_id == node_id)
            .map(|entry| entry.share_ids().collect())
            .unwrap_or_default()
    }

    /// The node that owns `share_id`.
    pub fn owner_of(&self, share_id: ShareId) -> Option<NodeId> {
        self.entry_of(share_id).map(|entry| entry.node_id)
    }

    /// The proof key encrypting toward `share_id`.
    pub fn proof_key_of(&self, share_id: ShareId) -> Option<&[u8]> {
        self.entry_of(share_id).map(|entry| entry.proof_key.as_slice())
    }

    fn entry_of(&self, share_id: ShareId) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|entry| {
            share_id >= entry.first_share_id
                && share_id < entry.first_share_id + entry.share_count
        })
    }
}
