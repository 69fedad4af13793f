//! Key constructions.
//!
//! A construction is the full state of one key-generation handshake between
//! a source and a target roster. It accumulates validated dealings until
//! enough distinct source share ids have contributed, then freezes: the
//! chosen dealings are aggregated into the target verification key and
//! public shares, and no later input can mutate the record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tessera_crypto::bls::SecretShare;
use tessera_types::roster::Roster;
use tessera_types::{NodeId, RosterHash, ShareId};

use crate::config::HintsConfig;
use crate::directory::ParticipantDirectory;
use crate::pvss::{dealing_context, ChosenDealings, PreprocessedKeys, SecretSharing, TssMessage};
use crate::Result;

/// A dealing as stored in a construction, stamped with the consensus
/// arrival sequence the single writer assigned it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Arrival sequence through the ordered channel.
    pub seq: u64,
    /// The validated dealing.
    pub message: TssMessage,
}

/// A replica's vote on the verification key a construction froze on.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVote {
    /// The voting node.
    pub node_id: NodeId,
    /// The construction voted on.
    pub construction_id: u64,
    /// Digest of the frozen verification key.
    pub key_digest: [u8; 32],
}

impl KeyVote {
    /// Build this replica's vote for a frozen construction.
    pub fn for_keys(node_id: NodeId, construction_id: u64, keys: &PreprocessedKeys) -> Self {
        let digest = tessera_crypto::blake3::derive_key(
            tessera_crypto::blake3::contexts::KEY_VOTE,
            &keys.verification_key,
        );
        Self {
            node_id,
            construction_id,
            key_digest: digest,
        }
    }
}

/// One roster pair's key construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Construction {
    /// Store-assigned identifier, also the persistence key.
    pub id: u64,
    /// Hash of the roster authority flows from.
    pub source_roster_hash: RosterHash,
    /// Hash of the roster authority flows to.
    pub target_roster_hash: RosterHash,
    /// True when this construction bootstraps a brand-new ledger id.
    pub genesis: bool,
    /// Validated dealings keyed by dealer share id. Append-only until the
    /// construction freezes.
    received: BTreeMap<ShareId, StoredMessage>,
    /// The dealer share ids frozen into the key, ascending. Empty until
    /// readiness.
    chosen: Vec<ShareId>,
    /// The aggregated keys; present exactly when the construction is ready.
    preprocessed: Option<PreprocessedKeys>,
}

impl Construction {
    pub fn new(
        id: u64,
        source_roster_hash: RosterHash,
        target_roster_hash: RosterHash,
        genesis: bool,
    ) -> Self {
        Self {
            id,
            source_roster_hash,
            target_roster_hash,
            genesis,
            received: BTreeMap::new(),
            chosen: Vec::new(),
            preprocessed: None,
        }
    }

    /// Whether the target keys have been preprocessed (the construction is
    /// frozen). Monotonic: once true, never false again.
    pub fn has_preprocessed_keys(&self) -> bool {
        self.preprocessed.is_some()
    }

    /// The frozen verification key, if ready.
    pub fn verification_key(&self) -> Option<&[u8]> {
        self.preprocessed
            .as_ref()
            .map(|keys| keys.verification_key.as_slice())
    }

    /// The frozen keys, if ready.
    pub fn preprocessed_keys(&self) -> Option<&PreprocessedKeys> {
        self.preprocessed.as_ref()
    }

    /// Dealer share ids with a validated dealing.
    pub fn received_share_ids(&self) -> Vec<ShareId> {
        self.received.keys().copied().collect()
    }

    /// Whether a validated dealing exists for `share_id`.
    pub fn has_message_for(&self, share_id: ShareId) -> bool {
        self.received.contains_key(&share_id)
    }

    /// The chosen dealings this construction froze on (empty until ready).
    pub fn chosen_share_ids(&self) -> &[ShareId] {
        &self.chosen
    }

    /// The chosen dealings with their weighting mode, for decryption.
    pub fn chosen_dealings(&self) -> ChosenDealings<'_> {
        ChosenDealings {
            genesis: self.genesis,
            messages: self
                .chosen
                .iter()
                .filter_map(|share_id| self.received.get(share_id))
                .map(|stored| &stored.message)
                .collect(),
        }
    }

    fn insert(&mut self, seq: u64, message: TssMessage) -> bool {
        if self.preprocessed.is_some() {
            return false;
        }
        if self.received.contains_key(&message.share_id) {
            // Redundant duplicate from the at-least-once transport.
            return false;
        }
        self.received
            .insert(message.share_id, StoredMessage { seq, message });
        true
    }

    /// The first `threshold` dealer share ids in consensus arrival order.
    fn choose(&self, threshold: u32) -> Vec<ShareId> {
        let mut by_seq: Vec<(u64, ShareId)> = self
            .received
            .values()
            .map(|stored| (stored.seq, stored.message.share_id))
            .collect();
        by_seq.sort_unstable();
        by_seq
            .into_iter()
            .take(threshold as usize)
            .map(|(_, share_id)| share_id)
            .collect()
    }

    fn freeze(&mut self, mut chosen: Vec<ShareId>, keys: PreprocessedKeys) {
        chosen.sort_unstable();
        self.chosen = chosen;
        self.preprocessed = Some(keys);
    }
}

/// Drives one construction to readiness: computes the directories, decides
/// which dealings this node still owes, validates inbound dealings, and
/// freezes the construction when the source threshold is met.
pub struct ConstructionController {
    source_directory: ParticipantDirectory,
    target_directory: ParticipantDirectory,
    /// Public share per source share id, for constant-term binding of
    /// rekey dealings. `None` for genesis constructions.
    source_public_shares: Option<BTreeMap<ShareId, Vec<u8>>>,
    context: Vec<u8>,
    /// Dealings dispatched for submission and not yet observed back.
    in_flight: std::collections::HashSet<ShareId>,
}

impl ConstructionController {
    /// Build the controller for a construction from its rosters.
    ///
    /// `source_public_shares` must be the frozen public shares of the
    /// predecessor construction when rekeying.
    pub fn new(
        source_roster: &Roster,
        target_roster: &Roster,
        config: &HintsConfig,
        genesis: bool,
        source_public_shares: Option<BTreeMap<ShareId, Vec<u8>>>,
    ) -> Result<Self> {
        let source_directory = if genesis {
            ParticipantDirectory::compute(target_roster, config)?
        } else {
            ParticipantDirectory::compute(source_roster, config)?
        };
        let target_directory = ParticipantDirectory::compute(target_roster, config)?;
        let context = dealing_context(&source_roster.hash(), &target_roster.hash());
        Ok(Self {
            source_directory,
            target_directory,
            source_public_shares,
            context,
            in_flight: std::collections::HashSet::new(),
        })
    }

    pub fn source_directory(&self) -> &ParticipantDirectory {
        &self.source_directory
    }

    pub fn target_directory(&self) -> &ParticipantDirectory {
        &self.target_directory
    }

    /// The domain context dealings for this construction are bound to.
    pub fn context(&self) -> &[u8] {
        &self.context
    }

    /// The source share ids this node still owes a dealing for: owned in
    /// the source directory, not yet observed, and not already dispatched.
    pub fn pending_dealings(
        &self,
        construction: &Construction,
        node_id: NodeId,
    ) -> Vec<ShareId> {
        if construction.has_preprocessed_keys() {
            return Vec::new();
        }
        self.source_directory
            .owned_share_ids(node_id)
            .into_iter()
            .filter(|share_id| {
                !construction.has_message_for(*share_id) && !self.in_flight.contains(share_id)
            })
            .collect()
    }

    /// Record that a dealing for `share_id` has been dispatched.
    pub fn mark_in_flight(&mut self, share_id: ShareId) {
        self.in_flight.insert(share_id);
    }

    /// Record that submission failed; the dealing is regenerated on the
    /// next reconcile.
    pub fn mark_submission_failed(&mut self, share_id: ShareId) {
        self.in_flight.remove(&share_id);
    }

    /// The incumbent public share a rekey dealing for `share_id` must bind
    /// to. `None` for genesis constructions or unknown share ids.
    pub fn source_public_share(&self, share_id: ShareId) -> Option<&[u8]> {
        self.source_public_shares
            .as_ref()?
            .get(&share_id)
            .map(|share| share.as_slice())
    }

    /// Validate an inbound dealing without mutating anything. Suitable for
    /// offloading to a worker.
    pub fn validate_message(&self, engine: &dyn SecretSharing, message: &TssMessage) -> bool {
        if self.source_directory.owner_of(message.share_id).is_none() {
            tracing::warn!(
                share_id = message.share_id,
                "dealing for unknown source share id"
            );
            return false;
        }
        let known_public_share = match &self.source_public_shares {
            Some(shares) => match shares.get(&message.share_id) {
                Some(share) => Some(share.as_slice()),
                None => {
                    tracing::warn!(
                        share_id = message.share_id,
                        "no incumbent public share for rekey dealing"
                    );
                    return false;
                }
            },
            None => None,
        };
        engine.verify(message, &self.target_directory, known_public_share, &self.context)
    }

    /// Apply a validated dealing. Returns `true` when this message made the
    /// construction freeze.
    ///
    /// The readiness check runs on every newly inserted message and is
    /// monotonic: once frozen, further input is ignored.
    pub fn apply_validated(
        &mut self,
        construction: &mut Construction,
        seq: u64,
        message: TssMessage,
        engine: &dyn SecretSharing,
    ) -> Result<bool> {
        let share_id = message.share_id;
        self.in_flight.remove(&share_id);
        if !construction.insert(seq, message) {
            tracing::debug!(
                construction = construction.id,
                share_id,
                "ignoring redundant or post-freeze dealing"
            );
            return Ok(false);
        }
        tracing::debug!(
            construction = construction.id,
            share_id,
            progress = format!(
                "{}/{}",
                construction.received.len(),
                self.source_directory.threshold()
            ),
            "accepted dealing"
        );

        if (construction.received.len() as u32) < self.source_directory.threshold() {
            return Ok(false);
        }

        // Threshold met: choose the first t dealings in consensus order and
        // aggregate them into the target keys.
        let threshold = self.source_directory.threshold();
        let chosen_ids = construction.choose(threshold);
        let chosen = ChosenDealings {
            genesis: construction.genesis,
            messages: chosen_ids
                .iter()
                .filter_map(|id| construction.received.get(id))
                .map(|stored| &stored.message)
                .collect(),
        };
        let keys = engine.aggregate(&self.target_directory, &chosen)?;
        construction.freeze(chosen_ids, keys);

        tracing::info!(
            construction = construction.id,
            source = hex::encode(construction.source_roster_hash),
            target = hex::encode(construction.target_roster_hash),
            "construction reached readiness"
        );
        Ok(true)
    }

    /// This node's new private shares under the frozen construction.
    pub fn decrypt_own_shares(
        &self,
        construction: &Construction,
        engine: &dyn SecretSharing,
        node_id: NodeId,
        keypair: &tessera_crypto::bls::ProofKeypair,
    ) -> Result<Vec<SecretShare>> {
        let chosen = construction.chosen_dealings();
        engine.decrypt_private_shares(&self.target_directory, node_id, keypair, &chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pvss::Groth21Engine;
    use tessera_crypto::bls::ProofKeypair;
    use tessera_types::roster::RosterEntry;

    fn keyed_roster(ids: &[NodeId]) -> (Roster, Vec<(NodeId, ProofKeypair)>) {
        let keypairs: Vec<(NodeId, ProofKeypair)> = ids
            .iter()
            .map(|id| (*id, ProofKeypair::generate()))
            .collect();
        let entries = keypairs
            .iter()
            .map(|(node_id, keypair)| RosterEntry {
                node_id: *node_id,
                weight: 10,
                consensus_key: [*node_id as u8; 32],
                proof_key: keypair.encryption_key_bytes().expect("proof key"),
            })
            .collect();
        (Roster::new(entries).expect("roster"), keypairs)
    }

    fn cap_one_config() -> HintsConfig {
        HintsConfig {
            max_shares_per_node: 1,
            ..HintsConfig::default()
        }
    }

    #[test]
    fn test_genesis_reaches_readiness_at_threshold() {
        let (roster, _keys) = keyed_roster(&[1, 2, 3, 4]);
        let config = cap_one_config();
        let engine = Groth21Engine::new();
        let mut controller =
            ConstructionController::new(&roster, &roster, &config, true, None).expect("controller");
        let mut construction = Construction::new(1, roster.hash(), roster.hash(), true);

        assert_eq!(controller.source_directory().threshold(), 3);

        for (seq, dealer) in [1u32, 2, 3].iter().enumerate() {
            let message = engine
                .generate_message(controller.target_directory(), *dealer, None, controller.context())
                .expect("generate");
            assert!(controller.validate_message(&engine, &message));
            let ready = controller
                .apply_validated(&mut construction, seq as u64, message, &engine)
                .expect("apply");
            assert_eq!(ready, *dealer == 3);
        }

        assert!(construction.has_preprocessed_keys());
        assert!(construction.verification_key().is_some());
        assert_eq!(construction.chosen_share_ids(), &[1, 2, 3]);
    }

    #[test]
    fn test_readiness_is_monotonic() {
        let (roster, _keys) = keyed_roster(&[1, 2, 3, 4]);
        let config = cap_one_config();
        let engine = Groth21Engine::new();
        let mut controller =
            ConstructionController::new(&roster, &roster, &config, true, None).expect("controller");
        let mut construction = Construction::new(1, roster.hash(), roster.hash(), true);

        for (seq, dealer) in [1u32, 2, 3].iter().enumerate() {
            let message = engine
                .generate_message(controller.target_directory(), *dealer, None, controller.context())
                .expect("generate");
            controller
                .apply_validated(&mut construction, seq as u64, message, &engine)
                .expect("apply");
        }
        let frozen_key = construction.verification_key().map(|k| k.to_vec());

        // A late fourth dealing neither regresses nor changes the key.
        let late = engine
            .generate_message(controller.target_directory(), 4, None, controller.context())
            .expect("generate");
        let ready = controller
            .apply_validated(&mut construction, 3, late, &engine)
            .expect("apply");
        assert!(!ready);
        assert!(construction.has_preprocessed_keys());
        assert_eq!(construction.verification_key().map(|k| k.to_vec()), frozen_key);
        assert_eq!(construction.chosen_share_ids().len(), 3);
    }

    #[test]
    fn test_invalid_message_discarded() {
        let (roster, _keys) = keyed_roster(&[1, 2, 3, 4]);
        let config = cap_one_config();
        let engine = Groth21Engine::new();
        let controller =
            ConstructionController::new(&roster, &roster, &config, true, None).expect("controller");

        let mut message = engine
            .generate_message(controller.target_directory(), 1, None, controller.context())
            .expect("generate");
        message.proof[3] ^= 0x40;
        assert!(!controller.validate_message(&engine, &message));

        // Unknown dealer share id.
        let mut unknown = engine
            .generate_message(controller.target_directory(), 2, None, controller.context())
            .expect("generate");
        unknown.share_id = 99;
        assert!(!controller.validate_message(&engine, &unknown));
    }

    #[test]
    fn test_duplicate_share_id_is_redundant() {
        let (roster, _keys) = keyed_roster(&[1, 2, 3, 4]);
        let config = cap_one_config();
        let engine = Groth21Engine::new();
        let mut controller =
            ConstructionController::new(&roster, &roster, &config, true, None).expect("controller");
        let mut construction = Construction::new(1, roster.hash(), roster.hash(), true);

        let first = engine
            .generate_message(controller.target_directory(), 1, None, controller.context())
            .expect("generate");
        let duplicate = engine
            .generate_message(controller.target_directory(), 1, None, controller.context())
            .expect("generate");
        controller
            .apply_validated(&mut construction, 0, first, &engine)
            .expect("apply");
        controller
            .apply_validated(&mut construction, 1, duplicate, &engine)
            .expect("apply");
        assert_eq!(construction.received_share_ids(), vec![1]);
    }

    #[test]
    fn test_pending_dealings_tracks_in_flight() {
        let (roster, _keys) = keyed_roster(&[1, 2, 3, 4]);
        let config = cap_one_config();
        let mut controller =
            ConstructionController::new(&roster, &roster, &config, true, None).expect("controller");
        let construction = Construction::new(1, roster.hash(), roster.hash(), true);

        assert_eq!(controller.pending_dealings(&construction, 2), vec![2]);
        controller.mark_in_flight(2);
        assert!(controller.pending_dealings(&construction, 2).is_empty());
        controller.mark_submission_failed(2);
        assert_eq!(controller.pending_dealings(&construction, 2), vec![2]);
    }

    #[test]
    fn test_rekey_requires_constant_term_binding() {
        let (roster, keys) = keyed_roster(&[1, 2, 3, 4]);
        let config = cap_one_config();
        let engine = Groth21Engine::new();

        // Run genesis first.
        let mut genesis_controller =
            ConstructionController::new(&roster, &roster, &config, true, None).expect("controller");
        let mut genesis = Construction::new(1, roster.hash(), roster.hash(), true);
        for (seq, dealer) in [1u32, 2, 3].iter().enumerate() {
            let message = engine
                .generate_message(
                    genesis_controller.target_directory(),
                    *dealer,
                    None,
                    genesis_controller.context(),
                )
                .expect("generate");
            genesis_controller
                .apply_validated(&mut genesis, seq as u64, message, &engine)
                .expect("apply");
        }
        let public_shares = genesis
            .preprocessed_keys()
            .expect("frozen")
            .public_shares
            .clone();

        // Rekey toward a grown roster.
        let (new_roster, _new_keys) = {
            let mut all: Vec<NodeId> = vec![1, 2, 3, 4, 5];
            let keypairs: Vec<(NodeId, ProofKeypair)> = all
                .drain(..)
                .map(|id| {
                    keys.iter()
                        .find(|(existing, _)| *existing == id)
                        .map(|(id, kp)| (*id, kp.clone()))
                        .unwrap_or_else(|| (id, ProofKeypair::generate()))
                })
                .collect();
            let entries = keypairs
                .iter()
                .map(|(node_id, keypair)| RosterEntry {
                    node_id: *node_id,
                    weight: 10,
                    consensus_key: [*node_id as u8; 32],
                    proof_key: keypair.encryption_key_bytes().expect("proof key"),
                })
                .collect();
            (Roster::new(entries).expect("roster"), keypairs)
        };
        let rekey_controller = ConstructionController::new(
            &roster,
            &new_roster,
            &config,
            false,
            Some(public_shares),
        )
        .expect("controller");

        // An honest dealer re-shares its decrypted share.
        let (node_id, keypair) = &keys[0];
        let shares = genesis_controller
            .decrypt_own_shares(&genesis, &engine, *node_id, keypair)
            .expect("decrypt");
        let share = &shares[0];
        let honest = engine
            .generate_message(
                rekey_controller.target_directory(),
                share.share_id(),
                Some(share),
                rekey_controller.context(),
            )
            .expect("generate");
        assert!(rekey_controller.validate_message(&engine, &honest));

        // A dealer sharing a made-up secret fails the binding check.
        let forged = engine
            .generate_message(
                rekey_controller.target_directory(),
                share.share_id(),
                None,
                rekey_controller.context(),
            )
            .expect("generate");
        assert!(!rekey_controller.validate_message(&engine, &forged));
    }
}
