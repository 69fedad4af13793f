//! Shared harness for multi-node scenarios.
//!
//! A [`LoopbackNet`] stands in for the consensus transport: every
//! submission from every node lands in one global queue, and a router task
//! delivers each event to every node in the same order. That reproduces
//! the total-order, at-least-once delivery the subsystem is specified
//! against, without a real network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use tessera_crypto::bls::ProofKeypair;
use tessera_hints::config::HintsConfig;
use tessera_hints::construction::KeyVote;
use tessera_hints::coordinator::NodeIdentity;
use tessera_hints::pvss::Groth21Engine;
use tessera_hints::service::{
    HintsHandle, HintsService, InboundEvent, MessageEnvelope, Submitter,
};
use tessera_hints::signing::PartialSignature;
use tessera_hints::Result;
use tessera_types::roster::{Roster, RosterEntry};
use tessera_types::NodeId;

/// Delivery counters, for idempotence and dedup assertions.
#[derive(Default)]
pub struct TrafficCounters {
    /// Dealings submitted, keyed by (dealer node, source share id).
    pub messages: Mutex<HashMap<(NodeId, u32), usize>>,
    /// Key votes submitted, keyed by (voter, construction id).
    pub votes: Mutex<HashMap<(NodeId, u64), usize>>,
    /// Partial signatures submitted.
    pub partials: AtomicUsize,
}

/// The shared outbound side: every node submits into one ordered queue.
pub struct LoopbackNet {
    queue: mpsc::UnboundedSender<InboundEvent>,
    counters: Arc<TrafficCounters>,
}

impl Submitter for LoopbackNet {
    fn submit_message(&self, envelope: MessageEnvelope) -> Result<()> {
        *self
            .counters
            .messages
            .lock()
            .expect("counter lock")
            .entry((envelope.node_id, envelope.message.share_id))
            .or_insert(0) += 1;
        let _ = self.queue.send(InboundEvent::Message(envelope));
        Ok(())
    }

    fn submit_partial_signature(&self, partial: PartialSignature) -> Result<()> {
        self.counters.partials.fetch_add(1, Ordering::Relaxed);
        let _ = self.queue.send(InboundEvent::PartialSignature(partial));
        Ok(())
    }

    fn submit_key_vote(&self, vote: KeyVote) -> Result<()> {
        *self
            .counters
            .votes
            .lock()
            .expect("counter lock")
            .entry((vote.node_id, vote.construction_id))
            .or_insert(0) += 1;
        let _ = self.queue.send(InboundEvent::KeyVote(vote));
        Ok(())
    }
}

/// A simulated committee: one service per node, one ordered event stream.
pub struct Cluster {
    pub handles: Vec<(NodeId, HintsHandle)>,
    pub keypairs: Vec<(NodeId, ProofKeypair)>,
    pub counters: Arc<TrafficCounters>,
}

impl Cluster {
    /// Spawn services for `node_ids` with equal weights under `config`,
    /// plus a router task fanning the global queue out to every node.
    pub async fn spawn(node_ids: &[NodeId], config: HintsConfig) -> Self {
        let keypairs: Vec<(NodeId, ProofKeypair)> = node_ids
            .iter()
            .map(|id| (*id, ProofKeypair::generate()))
            .collect();

        let counters = Arc::new(TrafficCounters::default());
        let (queue_tx, mut queue_rx) = mpsc::unbounded_channel();

        let mut handles = Vec::with_capacity(keypairs.len());
        for (node_id, keypair) in &keypairs {
            let submitter = Arc::new(LoopbackNet {
                queue: queue_tx.clone(),
                counters: counters.clone(),
            });
            let handle = HintsService::spawn(
                config.clone(),
                NodeIdentity {
                    node_id: *node_id,
                    keypair: keypair.clone(),
                },
                Arc::new(Groth21Engine::new()),
                submitter,
            );
            handles.push((*node_id, handle));
        }

        // Router: total-order fan-out of every submission to every node.
        let router_handles: Vec<HintsHandle> =
            handles.iter().map(|(_, handle)| handle.clone()).collect();
        tokio::spawn(async move {
            while let Some(event) = queue_rx.recv().await {
                for handle in &router_handles {
                    let _ = handle.deliver(event.clone()).await;
                }
            }
        });

        Self {
            handles,
            keypairs,
            counters,
        }
    }

    /// Build the equal-weight roster for a subset of this cluster's nodes.
    pub fn roster_of(&self, node_ids: &[NodeId]) -> Roster {
        let entries = self
            .keypairs
            .iter()
            .filter(|(id, _)| node_ids.contains(id))
            .map(|(node_id, keypair)| RosterEntry {
                node_id: *node_id,
                weight: 10,
                consensus_key: [*node_id as u8; 32],
                proof_key: keypair.encryption_key_bytes().expect("proof key"),
            })
            .collect();
        Roster::new(entries).expect("roster")
    }

    /// Register a roster on every node.
    pub async fn register_roster(&self, roster: &Roster) {
        for (_, handle) in &self.handles {
            handle
                .register_roster(roster.clone())
                .await
                .expect("register roster");
        }
    }

    /// Run one reconcile round on every node.
    pub async fn reconcile_all(
        &self,
        now: u64,
        active: tessera_types::roster::ActiveRosters,
    ) {
        for (_, handle) in &self.handles {
            handle.reconcile(now, active).await.expect("reconcile");
        }
    }

    /// The handle for a node id.
    pub fn handle(&self, node_id: NodeId) -> &HintsHandle {
        &self
            .handles
            .iter()
            .find(|(id, _)| *id == node_id)
            .expect("node handle")
            .1
    }
}

/// Poll until `condition` holds or the timeout elapses.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Install a test subscriber once per process.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
