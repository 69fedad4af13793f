//! Threshold signing over the active verification key.
//!
//! A `Signing` collects partial signatures for one message hash; the first
//! threshold-many valid partials (in consensus arrival order) are
//! aggregated into the group signature and the pending future resolves.
//! Signings are created at most once per hash and resolve at most once;
//! there is no cancellation — a pending signing waits until threshold.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use tessera_crypto::bls::{ProofKeypair, SecretShare};
use tessera_types::{MessageHash, NodeId, ShareId};

use crate::construction::Construction;
use crate::directory::ParticipantDirectory;
use crate::pvss::SecretSharing;
use crate::{HintsError, Result};

/// One node's partial signature over a message hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialSignature {
    /// The signing node.
    pub node_id: NodeId,
    /// The share the signature was produced with.
    pub share_id: ShareId,
    /// The message hash signed.
    pub message_hash: MessageHash,
    /// The signature share (compressed G2).
    pub signature: Vec<u8>,
}

/// The signing-side view of the active construction: verification key,
/// target directory, public shares, and this node's private shares.
pub struct ActiveKeyState {
    /// Id of the adopted construction.
    pub construction_id: u64,
    /// This node's id (the owner of `shares`).
    pub node_id: NodeId,
    /// The ledger verification key.
    pub verification_key: Vec<u8>,
    /// The active target directory.
    pub directory: ParticipantDirectory,
    /// Public share per share id, for partial-signature validation.
    pub public_shares: BTreeMap<ShareId, Vec<u8>>,
    /// This node's private shares under the active directory.
    pub shares: Vec<SecretShare>,
}

/// Holds the currently active verification key and everything signing
/// needs. Not ready until the first construction is adopted.
#[derive(Default)]
pub struct SigningContext {
    active: Option<ActiveKeyState>,
}

impl SigningContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an active verification key is established.
    pub fn is_ready(&self) -> bool {
        self.active.is_some()
    }

    /// The active verification key.
    ///
    /// Callers must not sign before any construction is ready; doing so is
    /// a logic error surfaced as [`HintsError::NoActiveKey`].
    pub fn active_verification_key(&self) -> Result<Vec<u8>> {
        self.active
            .as_ref()
            .map(|state| state.verification_key.clone())
            .ok_or(HintsError::NoActiveKey)
    }

    /// The active state, if ready.
    pub fn active(&self) -> Option<&ActiveKeyState> {
        self.active.as_ref()
    }

    /// Adopt a frozen construction: decrypt this node's shares and switch
    /// signing over to the construction's keys.
    pub fn adopt(
        &mut self,
        construction: &Construction,
        directory: &ParticipantDirectory,
        engine: &dyn SecretSharing,
        node_id: NodeId,
        keypair: &ProofKeypair,
    ) -> Result<()> {
        let keys = construction
            .preprocessed_keys()
            .ok_or_else(|| {
                HintsError::MissingConstruction(hex::encode(construction.target_roster_hash))
            })?
            .clone();
        let chosen = construction.chosen_dealings();
        let shares = engine.decrypt_private_shares(directory, node_id, keypair, &chosen)?;

        tracing::info!(
            construction = construction.id,
            shares = shares.len(),
            "signing context adopted construction"
        );

        self.active = Some(ActiveKeyState {
            construction_id: construction.id,
            node_id,
            verification_key: keys.verification_key,
            directory: directory.clone(),
            public_shares: keys.public_shares,
            shares,
        });
        Ok(())
    }
}

/// A future handle on a pending signing. Cloneable; every clone resolves
/// with the same signature.
#[derive(Clone)]
pub struct SignatureFuture {
    receiver: watch::Receiver<Option<Vec<u8>>>,
}

impl SignatureFuture {
    /// Wait until the signing resolves and return the aggregate signature.
    pub async fn resolved(mut self) -> Result<Vec<u8>> {
        let value = self
            .receiver
            .wait_for(|value| value.is_some())
            .await
            .map_err(|_| HintsError::SigningAborted)?;
        value.clone().ok_or(HintsError::SigningAborted)
    }

    /// The signature, if already resolved.
    pub fn peek(&self) -> Option<Vec<u8>> {
        self.receiver.borrow().clone()
    }
}

/// One message hash's collection state.
pub struct Signing {
    message_hash: MessageHash,
    /// Valid partials keyed by share id (first one per share id wins).
    partials: BTreeMap<ShareId, Vec<u8>>,
    /// Arrival sequence per share id, for deterministic aggregation order.
    arrival: BTreeMap<ShareId, u64>,
    /// The resolved aggregate, set at most once.
    resolved: Option<Vec<u8>>,
    sender: watch::Sender<Option<Vec<u8>>>,
}

impl Signing {
    fn new(message_hash: MessageHash) -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            message_hash,
            partials: BTreeMap::new(),
            arrival: BTreeMap::new(),
            resolved: None,
            sender,
        }
    }

    /// Whether the aggregate signature has been produced.
    pub fn is_resolved(&self) -> bool {
        self.resolved.is_some()
    }

    /// Number of valid partials collected.
    pub fn partial_count(&self) -> usize {
        self.partials.len()
    }

    fn future(&self) -> SignatureFuture {
        SignatureFuture {
            receiver: self.sender.subscribe(),
        }
    }
}

/// Collects partial signatures and resolves aggregate signatures against
/// the active key.
pub struct SigningCoordinator {
    signings: HashMap<MessageHash, Signing>,
}

impl SigningCoordinator {
    pub fn new() -> Self {
        Self {
            signings: HashMap::new(),
        }
    }

    /// Begin (or join) the signing for `message_hash`.
    ///
    /// Fatal [`HintsError::NotReadyToSign`] before the first construction
    /// is adopted. Returns the shared future plus the shares this node must
    /// produce partials with — non-empty only on the call that created the
    /// signing, so concurrent callers never duplicate work. The caller
    /// computes and submits the partials (off the writer).
    pub fn sign(
        &mut self,
        context: &SigningContext,
        message_hash: MessageHash,
    ) -> Result<(SignatureFuture, Vec<SecretShare>)> {
        let Some(active) = context.active() else {
            return Err(HintsError::NotReadyToSign);
        };

        if let Some(existing) = self.signings.get(&message_hash) {
            return Ok((existing.future(), Vec::new()));
        }

        let signing = Signing::new(message_hash);
        let future = signing.future();
        self.signings.insert(message_hash, signing);

        tracing::debug!(
            message = hex::encode(message_hash),
            "created signing"
        );

        Ok((future, active.shares.clone()))
    }

    /// Number of signings tracked (pending and resolved).
    pub fn signing_count(&self) -> usize {
        self.signings.len()
    }

    /// The signing for a hash, if one exists.
    pub fn signing(&self, message_hash: &MessageHash) -> Option<&Signing> {
        self.signings.get(message_hash)
    }

    /// Validate a partial signature against the active directory and public
    /// shares. Pure; suitable for offloading to a worker.
    pub fn validate_partial(
        &self,
        context: &SigningContext,
        engine: &dyn SecretSharing,
        partial: &PartialSignature,
    ) -> bool {
        let Some(active) = context.active() else {
            tracing::warn!("partial signature before any active key");
            return false;
        };
        if active.directory.owner_of(partial.share_id) != Some(partial.node_id) {
            tracing::warn!(
                node = partial.node_id,
                share_id = partial.share_id,
                "partial signature from non-owner"
            );
            return false;
        }
        let Some(public_share) = active.public_shares.get(&partial.share_id) else {
            return false;
        };
        engine.verify_partial(&partial.message_hash, public_share, &partial.signature)
    }

    /// Apply a validated partial observed through the ordered channel.
    /// Returns `true` when this partial resolved the signing.
    ///
    /// The signing record is created on demand: a replica can observe peer
    /// partials for a hash before its own `sign` call.
    pub fn apply_validated(
        &mut self,
        context: &SigningContext,
        engine: &dyn SecretSharing,
        seq: u64,
        partial: PartialSignature,
    ) -> Result<bool> {
        let Some(active) = context.active() else {
            return Err(HintsError::NotReadyToSign);
        };
        let threshold = active.directory.threshold();
        let signing = self
            .signings
            .entry(partial.message_hash)
            .or_insert_with(|| Signing::new(partial.message_hash));

        if signing.resolved.is_some() {
            return Ok(false);
        }
        if signing.partials.contains_key(&partial.share_id) {
            // Redundant duplicate.
            return Ok(false);
        }
        signing.partials.insert(partial.share_id, partial.signature);
        signing.arrival.insert(partial.share_id, seq);

        if (signing.partials.len() as u32) < threshold {
            return Ok(false);
        }

        // First threshold-many partials in arrival order.
        let mut by_seq: Vec<(u64, ShareId)> = signing
            .arrival
            .iter()
            .map(|(share_id, seq)| (*seq, *share_id))
            .collect();
        by_seq.sort_unstable();
        let chosen: Vec<(ShareId, Vec<u8>)> = by_seq
            .into_iter()
            .take(threshold as usize)
            .filter_map(|(_, share_id)| {
                signing
                    .partials
                    .get(&share_id)
                    .map(|signature| (share_id, signature.clone()))
            })
            .collect();

        let aggregate = engine.aggregate_signatures(
            &signing.message_hash,
            &chosen,
            &active.verification_key,
        )?;
        signing.resolved = Some(aggregate.clone());
        signing.sender.send_replace(Some(aggregate));

        tracing::info!(
            message = hex::encode(signing.message_hash),
            partials = signing.partials.len(),
            "signing resolved"
        );
        Ok(true)
    }

    /// Drop resolved signings (callers hold their own futures). Retained
    /// signings stay pending indefinitely.
    pub fn retire_resolved(&mut self) {
        self.signings.retain(|_, signing| signing.resolved.is_none());
    }
}

impl Default for SigningCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
