//! The roster-transition state machine.
//!
//! `reconcile` runs once per consensus round on the single writer. It
//! inspects the host's view of the current roster pair, gets-or-creates the
//! construction for it, and advances that construction toward readiness;
//! at handoff it retires stale state and switches the signing context over
//! to the surviving construction. Repeated calls against unchanged state
//! are no-ops.

use std::collections::HashMap;

use tessera_crypto::bls::{ProofKeypair, SecretShare};
use tessera_types::roster::{ActiveRosters, RosterPhase};
use tessera_types::{NodeId, RosterHash, ShareId};

use crate::config::HintsConfig;
use crate::construction::{ConstructionController, KeyVote};
use crate::directory::ParticipantDirectory;
use crate::pvss::{SecretSharing, TssMessage};
use crate::signing::SigningContext;
use crate::store::{ConstructionStore, RosterStore};
use crate::{HintsError, Result};

/// This node's long-lived identity for the subsystem.
pub struct NodeIdentity {
    /// The node id as it appears in rosters.
    pub node_id: NodeId,
    /// The node's proof (share-encryption) keypair.
    pub keypair: ProofKeypair,
}

/// One dealing this node owes: everything a worker needs to generate and
/// submit it without touching shared state.
pub struct DealingAssignment {
    pub source_roster_hash: RosterHash,
    pub target_roster_hash: RosterHash,
    pub dealer_share_id: ShareId,
    /// The incumbent share being re-shared; `None` at genesis.
    pub secret: Option<SecretShare>,
    /// The target directory the dealing encrypts toward.
    pub target_directory: ParticipantDirectory,
    /// The construction's domain context.
    pub context: Vec<u8>,
}

/// What one reconcile pass decided.
#[derive(Default)]
pub struct ReconcileOutcome {
    /// Dealings to generate and submit (fire-and-forget).
    pub assignments: Vec<DealingAssignment>,
    /// Whether the signing context switched to a new construction.
    pub adopted: bool,
}

/// Inputs for validating one inbound dealing off the writer.
pub struct MessageValidation {
    target_directory: ParticipantDirectory,
    known_public_share: Option<Vec<u8>>,
    context: Vec<u8>,
}

impl MessageValidation {
    /// Run the validation. Pure and CPU-bound.
    pub fn run(&self, engine: &dyn SecretSharing, message: &TssMessage) -> bool {
        engine.verify(
            message,
            &self.target_directory,
            self.known_public_share.as_deref(),
            &self.context,
        )
    }
}

/// Top-level coordinator invoked once per round.
pub struct RosterTransitionCoordinator {
    config: HintsConfig,
    identity: NodeIdentity,
    controllers: HashMap<(RosterHash, RosterHash), ConstructionController>,
}

impl RosterTransitionCoordinator {
    pub fn new(config: HintsConfig, identity: NodeIdentity) -> Self {
        Self {
            config,
            identity,
            controllers: HashMap::new(),
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.identity.node_id
    }

    /// Drive the state machine one round.
    pub fn reconcile(
        &mut self,
        now: u64,
        active: &ActiveRosters,
        rosters: &RosterStore,
        store: &mut ConstructionStore,
        signing: &mut SigningContext,
        engine: &dyn SecretSharing,
    ) -> Result<ReconcileOutcome> {
        tracing::debug!(now, phase = %active.phase, "reconcile");
        match active.phase {
            RosterPhase::Bootstrap | RosterPhase::Transition => {
                self.advance_construction(active, rosters, store, signing, engine)
            }
            RosterPhase::Handoff => self.handle_handoff(active, rosters, store, signing, engine),
        }
    }

    /// BOOTSTRAP / TRANSITION: get-or-create the construction for the
    /// roster pair and advance it toward readiness.
    fn advance_construction(
        &mut self,
        active: &ActiveRosters,
        rosters: &RosterStore,
        store: &mut ConstructionStore,
        signing: &mut SigningContext,
        engine: &dyn SecretSharing,
    ) -> Result<ReconcileOutcome> {
        let genesis = active.phase == RosterPhase::Bootstrap;
        let key = active.key();
        self.ensure_controller(key, genesis, rosters, store)?;

        let construction = store.get_or_create(key.0, key.1, genesis);
        let construction_ready = construction.has_preprocessed_keys();
        let mut outcome = ReconcileOutcome::default();

        if !construction_ready {
            // Collect the dealings this node still owes. Secrets come from
            // the adopted active state when rekeying; genesis dealings
            // sample fresh secrets.
            let pending = {
                let controller = self.controller(&key)?;
                controller.pending_dealings(construction, self.identity.node_id)
            };
            for dealer_share_id in pending {
                let secret = if genesis {
                    None
                } else {
                    let Some(active_state) = signing.active() else {
                        return Err(HintsError::NotReadyToSign);
                    };
                    let share = active_state
                        .shares
                        .iter()
                        .find(|share| share.share_id() == dealer_share_id)
                        .cloned();
                    match share {
                        Some(share) => Some(share),
                        None => {
                            tracing::warn!(
                                share_id = dealer_share_id,
                                "no incumbent secret for owned source share"
                            );
                            continue;
                        }
                    }
                };
                let controller = self.controller_mut(&key)?;
                controller.mark_in_flight(dealer_share_id);
                outcome.assignments.push(DealingAssignment {
                    source_roster_hash: key.0,
                    target_roster_hash: key.1,
                    dealer_share_id,
                    secret,
                    target_directory: controller.target_directory().clone(),
                    context: controller.context().to_vec(),
                });
            }
        } else if genesis && !signing.is_ready() {
            // The first construction is the first active key; there is no
            // prior roster to hand off from.
            let controller = self.controller(&key)?;
            signing.adopt(
                construction,
                controller.target_directory(),
                engine,
                self.identity.node_id,
                &self.identity.keypair,
            )?;
            outcome.adopted = true;
        }

        Ok(outcome)
    }

    /// HANDOFF: purge stale constructions; on change, point the signing
    /// context at the retained construction for the new active roster.
    fn handle_handoff(
        &mut self,
        active: &ActiveRosters,
        rosters: &RosterStore,
        store: &mut ConstructionStore,
        signing: &mut SigningContext,
        engine: &dyn SecretSharing,
    ) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();
        if !store.purge_state_after_handoff(active) {
            return Ok(outcome);
        }
        self.controllers
            .retain(|(_, target), _| *target == active.target_roster_hash);

        let retained = store
            .for_target(&active.target_roster_hash)
            .ok_or_else(|| {
                HintsError::MissingConstruction(hex::encode(active.target_roster_hash))
            })?;
        if !retained.has_preprocessed_keys() {
            return Err(HintsError::MissingConstruction(hex::encode(
                active.target_roster_hash,
            )));
        }

        let key = (retained.source_roster_hash, retained.target_roster_hash);
        let genesis = retained.genesis;
        // Rebuild the controller if it did not survive (fresh process).
        if !self.controllers.contains_key(&key) {
            self.ensure_controller(key, genesis, rosters, store)?;
        }
        let retained = store
            .for_target(&active.target_roster_hash)
            .ok_or_else(|| {
                HintsError::MissingConstruction(hex::encode(active.target_roster_hash))
            })?;
        let controller = self.controller(&key)?;
        signing.adopt(
            retained,
            controller.target_directory(),
            engine,
            self.identity.node_id,
            &self.identity.keypair,
        )?;
        outcome.adopted = true;
        Ok(outcome)
    }

    /// Build the validation inputs for an inbound dealing, creating the
    /// controller and construction records if this replica has not seen the
    /// pair yet. Returns `None` when the dealing is structurally
    /// unroutable (unknown roster or share id) — discarded, never fatal.
    pub fn message_validation(
        &mut self,
        source: RosterHash,
        target: RosterHash,
        message: &TssMessage,
        rosters: &RosterStore,
        store: &mut ConstructionStore,
    ) -> Option<MessageValidation> {
        let genesis = source == target;
        let key = (source, target);
        if self.ensure_controller(key, genesis, rosters, store).is_err() {
            tracing::warn!(
                source = hex::encode(source),
                target = hex::encode(target),
                "dealing for unknown roster pair"
            );
            return None;
        }
        store.get_or_create(source, target, genesis);

        let controller = self.controllers.get(&key)?;
        if controller
            .source_directory()
            .owner_of(message.share_id)
            .is_none()
        {
            tracing::warn!(share_id = message.share_id, "dealing for unknown share id");
            return None;
        }
        let known_public_share = if genesis {
            None
        } else {
            // The incumbent public share was captured from the frozen
            // source construction when the controller was built.
            match controller.source_public_share(message.share_id) {
                Some(share) => Some(share.to_vec()),
                None => {
                    tracing::warn!(
                        share_id = message.share_id,
                        "no incumbent public share for rekey dealing"
                    );
                    return None;
                }
            }
        };
        Some(MessageValidation {
            target_directory: controller.target_directory().clone(),
            known_public_share,
            context: controller.context().to_vec(),
        })
    }

    /// Apply a validated dealing observed through the ordered channel.
    /// Returns this replica's key vote when the message froze the
    /// construction.
    pub fn apply_message(
        &mut self,
        source: RosterHash,
        target: RosterHash,
        seq: u64,
        message: TssMessage,
        store: &mut ConstructionStore,
        engine: &dyn SecretSharing,
    ) -> Result<Option<KeyVote>> {
        let key = (source, target);
        let genesis = source == target;
        let construction = store.get_or_create(source, target, genesis);
        let controller = self
            .controllers
            .get_mut(&key)
            .ok_or_else(|| HintsError::UnknownRoster(hex::encode(target)))?;
        let newly_ready = controller.apply_validated(construction, seq, message, engine)?;
        if !newly_ready {
            return Ok(None);
        }
        let keys = construction
            .preprocessed_keys()
            .ok_or_else(|| HintsError::MissingConstruction(hex::encode(target)))?;
        Ok(Some(KeyVote::for_keys(
            self.identity.node_id,
            construction.id,
            keys,
        )))
    }

    /// Record that a dealing submission failed so the next reconcile
    /// regenerates it.
    pub fn submission_failed(
        &mut self,
        source: RosterHash,
        target: RosterHash,
        share_id: ShareId,
    ) {
        if let Some(controller) = self.controllers.get_mut(&(source, target)) {
            controller.mark_submission_failed(share_id);
        }
    }

    fn ensure_controller(
        &mut self,
        key: (RosterHash, RosterHash),
        genesis: bool,
        rosters: &RosterStore,
        store: &ConstructionStore,
    ) -> Result<()> {
        if self.controllers.contains_key(&key) {
            return Ok(());
        }
        let source_roster = rosters
            .get(&key.0)
            .ok_or_else(|| HintsError::UnknownRoster(hex::encode(key.0)))?;
        let target_roster = rosters
            .get(&key.1)
            .ok_or_else(|| HintsError::UnknownRoster(hex::encode(key.1)))?;
        let source_public_shares = if genesis {
            None
        } else {
            Some(
                store
                    .for_target(&key.0)
                    .and_then(|construction| construction.preprocessed_keys())
                    .map(|keys| keys.public_shares.clone())
                    .ok_or_else(|| HintsError::MissingConstruction(hex::encode(key.0)))?,
            )
        };
        let controller = ConstructionController::new(
            source_roster,
            target_roster,
            &self.config,
            genesis,
            source_public_shares,
        )?;
        self.controllers.insert(key, controller);
        Ok(())
    }

    fn controller(&self, key: &(RosterHash, RosterHash)) -> Result<&ConstructionController> {
        self.controllers
            .get(key)
            .ok_or_else(|| HintsError::UnknownRoster(hex::encode(key.1)))
    }

    fn controller_mut(
        &mut self,
        key: &(RosterHash, RosterHash),
    ) -> Result<&mut ConstructionController> {
        self.controllers
            .get_mut(key)
            .ok_or_else(|| HintsError::UnknownRoster(hex::encode(key.1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pvss::Groth21Engine;
    use tessera_types::roster::{Roster, RosterEntry};

    struct Network {
        rosters: RosterStore,
        keypairs: Vec<(NodeId, ProofKeypair)>,
    }

    fn network(ids: &[NodeId]) -> (Network, Roster) {
        let keypairs: Vec<(NodeId, ProofKeypair)> = ids
            .iter()
            .map(|id| (*id, ProofKeypair::generate()))
            .collect();
        let roster = roster_of(&keypairs);
        let mut rosters = RosterStore::new();
        rosters.put(roster.clone());
        (Network { rosters, keypairs }, roster)
    }

    fn roster_of(keypairs: &[(NodeId, ProofKeypair)]) -> Roster {
        let entries = keypairs
            .iter()
            .map(|(node_id, keypair)| RosterEntry {
                node_id: *node_id,
                weight: 10,
                consensus_key: [*node_id as u8; 32],
                proof_key: keypair.encryption_key_bytes().expect("proof key"),
            })
            .collect();
        Roster::new(entries).expect("roster")
    }

    fn config() -> HintsConfig {
        HintsConfig {
            max_shares_per_node: 1,
            ..HintsConfig::default()
        }
    }

    fn coordinator_for(network: &Network, index: usize) -> RosterTransitionCoordinator {
        let (node_id, keypair) = &network.keypairs[index];
        RosterTransitionCoordinator::new(
            config(),
            NodeIdentity {
                node_id: *node_id,
                keypair: keypair.clone(),
            },
        )
    }

    fn bootstrap_rosters(roster: &Roster) -> ActiveRosters {
        ActiveRosters {
            source_roster_hash: roster.hash(),
            target_roster_hash: roster.hash(),
            phase: RosterPhase::Bootstrap,
        }
    }

    /// Feed every assignment through generate + validate + apply, as the
    /// ordered channel would.
    fn deliver(
        coordinator: &mut RosterTransitionCoordinator,
        store: &mut ConstructionStore,
        rosters: &RosterStore,
        engine: &Groth21Engine,
        assignments: Vec<DealingAssignment>,
        seq: &mut u64,
    ) -> Vec<KeyVote> {
        let mut votes = Vec::new();
        for assignment in assignments {
            let message = engine
                .generate_message(
                    &assignment.target_directory,
                    assignment.dealer_share_id,
                    assignment.secret.as_ref(),
                    &assignment.context,
                )
                .expect("generate");
            let validation = coordinator
                .message_validation(
                    assignment.source_roster_hash,
                    assignment.target_roster_hash,
                    &message,
                    rosters,
                    store,
                )
                .expect("validation inputs");
            assert!(validation.run(engine, &message));
            if let Some(vote) = coordinator
                .apply_message(
                    assignment.source_roster_hash,
                    assignment.target_roster_hash,
                    *seq,
                    message,
                    store,
                    engine,
                )
                .expect("apply")
            {
                votes.push(vote);
            }
            *seq += 1;
        }
        votes
    }

    #[test]
    fn test_bootstrap_to_ready_and_adopt() {
        let (network, roster) = network(&[1, 2, 3, 4]);
        let engine = Groth21Engine::new();
        let mut store = ConstructionStore::new();
        let mut signing = SigningContext::new();
        let active = bootstrap_rosters(&roster);
        let mut seq = 0u64;

        // Node 1 reconciles: one construction, one owed dealing.
        let mut coordinator = coordinator_for(&network, 0);
        let outcome = coordinator
            .reconcile(1, &active, &network.rosters, &mut store, &mut signing, &engine)
            .expect("reconcile");
        assert_eq!(store.len(), 1);
        assert_eq!(outcome.assignments.len(), 1);
        assert!(!outcome.adopted);

        // Reconciling again creates nothing and re-dispatches nothing.
        let outcome2 = coordinator
            .reconcile(2, &active, &network.rosters, &mut store, &mut signing, &engine)
            .expect("reconcile");
        assert_eq!(store.len(), 1);
        assert!(outcome2.assignments.is_empty());

        // Dealings from three distinct nodes reach the threshold. Each
        // node's assignment is produced by its own coordinator, but all
        // land in node 1's store through the ordered channel.
        let mut all_assignments = outcome.assignments;
        for index in 1..3 {
            let mut peer = coordinator_for(&network, index);
            let mut peer_store = ConstructionStore::new();
            let mut peer_signing = SigningContext::new();
            let peer_outcome = peer
                .reconcile(
                    1,
                    &active,
                    &network.rosters,
                    &mut peer_store,
                    &mut peer_signing,
                    &engine,
                )
                .expect("reconcile");
            all_assignments.extend(peer_outcome.assignments);
        }
        let votes = deliver(
            &mut coordinator,
            &mut store,
            &network.rosters,
            &engine,
            all_assignments,
            &mut seq,
        );
        assert_eq!(votes.len(), 1, "freeze emits exactly one vote");

        let construction = store
            .get(&roster.hash(), &roster.hash())
            .expect("construction");
        assert!(construction.has_preprocessed_keys());

        // The next reconcile adopts the ready bootstrap construction.
        let outcome = coordinator
            .reconcile(3, &active, &network.rosters, &mut store, &mut signing, &engine)
            .expect("reconcile");
        assert!(outcome.adopted);
        assert!(signing.is_ready());
        assert!(!signing
            .active_verification_key()
            .expect("key")
            .is_empty());
    }

    #[test]
    fn test_reconcile_unknown_roster_fails() {
        let (network, _) = network(&[1, 2, 3]);
        let engine = Groth21Engine::new();
        let mut coordinator = coordinator_for(&network, 0);
        let mut store = ConstructionStore::new();
        let mut signing = SigningContext::new();

        let active = ActiveRosters {
            source_roster_hash: [0xAA; 32],
            target_roster_hash: [0xAA; 32],
            phase: RosterPhase::Bootstrap,
        };
        let result = coordinator.reconcile(
            1,
            &active,
            &network.rosters,
            &mut store,
            &mut signing,
            &engine,
        );
        assert!(matches!(result, Err(HintsError::UnknownRoster(_))));
    }

    #[test]
    fn test_handoff_without_retained_construction_is_fatal() {
        let (network, roster) = network(&[1, 2, 3, 4]);
        let engine = Groth21Engine::new();
        let mut coordinator = coordinator_for(&network, 0);
        let mut store = ConstructionStore::new();
        let mut signing = SigningContext::new();

        // A stale construction exists, but nothing targets the new hash.
        store.get_or_create(roster.hash(), roster.hash(), true);
        let active = ActiveRosters {
            source_roster_hash: roster.hash(),
            target_roster_hash: [0x55; 32],
            phase: RosterPhase::Handoff,
        };
        let result = coordinator.reconcile(
            1,
            &active,
            &network.rosters,
            &mut store,
            &mut signing,
            &engine,
        );
        assert!(matches!(result, Err(HintsError::MissingConstruction(_))));
    }
}
