//! Tokio wiring for the subsystem.
//!
//! One writer task owns all mutable protocol state. Host commands
//! (reconcile, sign, roster registration) and inbound consensus events
//! share a single ordered channel, so every mutation is applied in one
//! place, in one order. Locally generated dealings and partial signatures
//! are submitted outward through the [`Submitter`] and only take effect
//! when they come back through the ordered channel like any peer's
//! contribution.
//!
//! Expensive cryptography never runs on the writer: dealing generation and
//! partial-signature computation are dispatched to a semaphore-bounded
//! blocking pool, and inbound proof verification is awaited through the
//! same pool (one event at a time, preserving consensus order).
//!
//! Reads (`is_ready`, `active_verification_key`) go through a watch-
//! published immutable snapshot and never touch writer state.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, watch, Semaphore};

use tessera_types::roster::{ActiveRosters, Roster};
use tessera_types::{MessageHash, NodeId, RosterHash, ShareId};

use crate::config::HintsConfig;
use crate::construction::KeyVote;
use crate::coordinator::{NodeIdentity, RosterTransitionCoordinator};
use crate::pvss::{SecretSharing, TssMessage};
use crate::signing::{PartialSignature, SignatureFuture, SigningContext, SigningCoordinator};
use crate::store::{ConstructionStore, RosterStore};
use crate::{HintsError, Result};

/// A dealing on the wire, routed by its construction's roster hash pair.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub source_roster_hash: RosterHash,
    pub target_roster_hash: RosterHash,
    /// The submitting node (attribution via the ordered channel).
    pub node_id: NodeId,
    pub message: TssMessage,
}

/// An event delivered through the ordered consensus channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum InboundEvent {
    Message(MessageEnvelope),
    PartialSignature(PartialSignature),
    KeyVote(KeyVote),
}

/// Outbound, fire-and-forget submission toward the consensus transport.
/// Submissions are delivered back through the ordered channel with
/// at-least-once semantics; failures here are logged and retried on the
/// next reconcile.
pub trait Submitter: Send + Sync + 'static {
    fn submit_message(&self, envelope: MessageEnvelope) -> Result<()>;
    fn submit_partial_signature(&self, partial: PartialSignature) -> Result<()>;
    fn submit_key_vote(&self, vote: KeyVote) -> Result<()>;
}

/// Atomic read-side snapshot, republished on every adoption.
#[derive(Clone, Debug, Default)]
pub struct ReadSnapshot {
    pub ready: bool,
    pub verification_key: Option<Vec<u8>>,
}

enum Command {
    Reconcile {
        now: u64,
        active: ActiveRosters,
        reply: oneshot::Sender<Result<()>>,
    },
    Sign {
        message_hash: MessageHash,
        reply: oneshot::Sender<Result<SignatureFuture>>,
    },
    RegisterRoster(Roster),
    Inbound(InboundEvent),
    SubmissionFailed {
        source_roster_hash: RosterHash,
        target_roster_hash: RosterHash,
        share_id: ShareId,
    },
}

/// Handle for talking to the writer task. Cheap to clone.
#[derive(Clone)]
pub struct HintsHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<ReadSnapshot>,
}

impl HintsHandle {
    /// Whether an active verification key is established. Lock-free read.
    pub fn is_ready(&self) -> bool {
        self.snapshot.borrow().ready
    }

    /// The active verification key; [`HintsError::NoActiveKey`] before the
    /// first construction is adopted.
    pub fn active_verification_key(&self) -> Result<Vec<u8>> {
        self.snapshot
            .borrow()
            .verification_key
            .clone()
            .ok_or(HintsError::NoActiveKey)
    }

    /// Register a roster so the coordinator can resolve its hash.
    pub async fn register_roster(&self, roster: Roster) -> Result<()> {
        self.send(Command::RegisterRoster(roster)).await
    }

    /// Run one reconcile round.
    pub async fn reconcile(&self, now: u64, active: ActiveRosters) -> Result<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Reconcile { now, active, reply }).await?;
        response
            .await
            .map_err(|_| HintsError::ServiceUnavailable("writer dropped reply".to_string()))?
    }

    /// Request a threshold signature over `message_hash`. The returned
    /// future resolves once threshold-many valid partials have been
    /// observed; repeated calls for the same hash share one signing.
    pub async fn sign(&self, message_hash: MessageHash) -> Result<SignatureFuture> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Sign {
            message_hash,
            reply,
        })
        .await?;
        response
            .await
            .map_err(|_| HintsError::ServiceUnavailable("writer dropped reply".to_string()))?
    }

    /// Deliver one ordered consensus event. The transport must call this
    /// in consensus order.
    pub async fn deliver(&self, event: InboundEvent) -> Result<()> {
        self.send(Command::Inbound(event)).await
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HintsError::ServiceUnavailable("writer task gone".to_string()))
    }
}

/// Spawns the writer task and returns its handle.
pub struct HintsService;

impl HintsService {
    pub fn spawn(
        config: HintsConfig,
        identity: NodeIdentity,
        engine: Arc<dyn SecretSharing>,
        submitter: Arc<dyn Submitter>,
    ) -> HintsHandle {
        let (commands_tx, commands_rx) = mpsc::channel(1024);
        let (snapshot_tx, snapshot_rx) = watch::channel(ReadSnapshot::default());
        let pool = Arc::new(Semaphore::new(config.crypto_workers));

        let writer = Writer {
            coordinator: RosterTransitionCoordinator::new(config, identity),
            rosters: RosterStore::new(),
            constructions: ConstructionStore::new(),
            signing_context: SigningContext::new(),
            signing: SigningCoordinator::new(),
            engine,
            submitter,
            pool,
            snapshot: snapshot_tx,
            commands: commands_tx.clone(),
            seq: 0,
        };
        tokio::spawn(writer.run(commands_rx));

        HintsHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
        }
    }
}

struct Writer {
    coordinator: RosterTransitionCoordinator,
    rosters: RosterStore,
    constructions: ConstructionStore,
    signing_context: SigningContext,
    signing: SigningCoordinator,
    engine: Arc<dyn SecretSharing>,
    submitter: Arc<dyn Submitter>,
    pool: Arc<Semaphore>,
    snapshot: watch::Sender<ReadSnapshot>,
    commands: mpsc::Sender<Command>,
    seq: u64,
}

impl Writer {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        while let Some(command) = commands.recv().await {
            match command {
                Command::Reconcile { now, active, reply } => {
                    let result = self.handle_reconcile(now, &active);
                    let _ = reply.send(result);
                }
                Command::Sign {
                    message_hash,
                    reply,
                } => {
                    let result = self.handle_sign(message_hash);
                    let _ = reply.send(result);
                }
                Command::RegisterRoster(roster) => {
                    self.rosters.put(roster);
                }
                Command::Inbound(event) => self.handle_inbound(event).await,
                Command::SubmissionFailed {
                    source_roster_hash,
                    target_roster_hash,
                    share_id,
                } => {
                    self.coordinator.submission_failed(
                        source_roster_hash,
                        target_roster_hash,
                        share_id,
                    );
                }
            }
        }
        tracing::debug!("writer task shutting down");
    }

    fn handle_reconcile(&mut self, now: u64, active: &ActiveRosters) -> Result<()> {
        let outcome = self.coordinator.reconcile(
            now,
            active,
            &self.rosters,
            &mut self.constructions,
            &mut self.signing_context,
            self.engine.as_ref(),
        )?;
        if outcome.adopted {
            self.publish_snapshot();
        }
        let node_id = self.coordinator.node_id();
        for assignment in outcome.assignments {
            let engine = self.engine.clone();
            let submitter = self.submitter.clone();
            let pool = self.pool.clone();
            let commands = self.commands.clone();
            tokio::spawn(async move {
                let Ok(permit) = pool.acquire_owned().await else {
                    return;
                };
                let source = assignment.source_roster_hash;
                let target = assignment.target_roster_hash;
                let share_id = assignment.dealer_share_id;
                let generated = tokio::task::spawn_blocking(move || {
                    engine.generate_message(
                        &assignment.target_directory,
                        assignment.dealer_share_id,
                        assignment.secret.as_ref(),
                        &assignment.context,
                    )
                })
                .await;
                drop(permit);

                let submitted = match generated {
                    Ok(Ok(message)) => submitter.submit_message(MessageEnvelope {
                        source_roster_hash: source,
                        target_roster_hash: target,
                        node_id,
                        message,
                    }),
                    Ok(Err(error)) => Err(error),
                    Err(join_error) => Err(HintsError::Submission(join_error.to_string())),
                };
                if let Err(error) = submitted {
                    tracing::warn!(share_id, %error, "dealing submission failed");
                    let _ = commands
                        .send(Command::SubmissionFailed {
                            source_roster_hash: source,
                            target_roster_hash: target,
                            share_id,
                        })
                        .await;
                }
            });
        }
        Ok(())
    }

    fn handle_sign(&mut self, message_hash: MessageHash) -> Result<SignatureFuture> {
        let (future, shares_to_sign) = self.signing.sign(&self.signing_context, message_hash)?;
        let node_id = self.coordinator.node_id();
        for share in shares_to_sign {
            let engine = self.engine.clone();
            let submitter = self.submitter.clone();
            let pool = self.pool.clone();
            tokio::spawn(async move {
                let Ok(permit) = pool.acquire_owned().await else {
                    return;
                };
                let share_id = share.share_id();
                let signed = tokio::task::spawn_blocking(move || {
                    engine.partial_sign(&message_hash, &share)
                })
                .await;
                drop(permit);

                let submitted = match signed {
                    Ok(Ok(signature)) => submitter.submit_partial_signature(PartialSignature {
                        node_id,
                        share_id,
                        message_hash,
                        signature,
                    }),
                    Ok(Err(error)) => Err(error),
                    Err(join_error) => Err(HintsError::Submission(join_error.to_string())),
                };
                if let Err(error) = submitted {
                    // Other honest nodes may still reach threshold; the
                    // future stays pending rather than failing.
                    tracing::warn!(share_id, %error, "partial signature submission failed");
                }
            });
        }
        Ok(future)
    }

    async fn handle_inbound(&mut self, event: InboundEvent) {
        let seq = self.seq;
        self.seq += 1;
        match event {
            InboundEvent::Message(envelope) => self.handle_message(seq, envelope).await,
            InboundEvent::PartialSignature(partial) => {
                self.handle_partial(seq, partial).await;
            }
            InboundEvent::KeyVote(vote) => {
                if self.constructions.record_vote(&vote) {
                    tracing::debug!(
                        node = vote.node_id,
                        construction = vote.construction_id,
                        "recorded key vote"
                    );
                }
            }
        }
    }

    async fn handle_message(&mut self, seq: u64, envelope: MessageEnvelope) {
        let Some(validation) = self.coordinator.message_validation(
            envelope.source_roster_hash,
            envelope.target_roster_hash,
            &envelope.message,
            &self.rosters,
            &mut self.constructions,
        ) else {
            return;
        };

        // Verification is CPU-bound; run it on the pool while the writer
        // waits (events stay in consensus order).
        let engine = self.engine.clone();
        let message = envelope.message.clone();
        let valid = self
            .run_pooled(move || validation.run(engine.as_ref(), &message))
            .await
            .unwrap_or(false);
        if !valid {
            tracing::warn!(
                node = envelope.node_id,
                share_id = envelope.message.share_id,
                "discarding invalid dealing"
            );
            return;
        }

        match self.coordinator.apply_message(
            envelope.source_roster_hash,
            envelope.target_roster_hash,
            seq,
            envelope.message,
            &mut self.constructions,
            self.engine.as_ref(),
        ) {
            Ok(Some(vote)) => {
                if let Err(error) = self.submitter.submit_key_vote(vote) {
                    tracing::warn!(%error, "key vote submission failed");
                }
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(%error, "failed to apply dealing");
            }
        }
    }

    async fn handle_partial(&mut self, seq: u64, partial: PartialSignature) {
        if !self.signing_context.is_ready() {
            tracing::warn!(
                node = partial.node_id,
                "discarding partial signature before active key"
            );
            return;
        }

        // Ownership check is cheap; the pairing check goes to the pool.
        let engine = self.engine.clone();
        let valid = {
            let Some(active) = self.signing_context.active() else {
                return;
            };
            if active.directory.owner_of(partial.share_id) != Some(partial.node_id) {
                tracing::warn!(
                    node = partial.node_id,
                    share_id = partial.share_id,
                    "partial signature from non-owner"
                );
                return;
            }
            let Some(public_share) = active.public_shares.get(&partial.share_id).cloned() else {
                return;
            };
            let message_hash = partial.message_hash;
            let signature = partial.signature.clone();
            self.run_pooled(move || {
                engine.verify_partial(&message_hash, &public_share, &signature)
            })
            .await
            .unwrap_or(false)
        };
        if !valid {
            tracing::warn!(
                node = partial.node_id,
                share_id = partial.share_id,
                "discarding invalid partial signature"
            );
            return;
        }

        match self.signing.apply_validated(
            &self.signing_context,
            self.engine.as_ref(),
            seq,
            partial,
        ) {
            Ok(true) => {}
            Ok(false) => {}
            Err(error) => tracing::warn!(%error, "failed to apply partial signature"),
        }
    }

    async fn run_pooled<T, F>(&self, job: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let permit = self.pool.clone().acquire_owned().await.ok()?;
        let result = tokio::task::spawn_blocking(job).await;
        drop(permit);
        result.ok()
    }

    fn publish_snapshot(&self) {
        let snapshot = ReadSnapshot {
            ready: self.signing_context.is_ready(),
            verification_key: self.signing_context.active_verification_key().ok(),
        };
        self.snapshot.send_replace(snapshot);
    }
}
