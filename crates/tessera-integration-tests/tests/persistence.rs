//! Integration test: durable state round-trips.
//!
//! Drives a bootstrap construction to readiness with the synchronous core,
//! persists the resulting state through tessera-db, and restores it as a
//! restarting node would.

use tessera_crypto::bls::ProofKeypair;
use tessera_db::queries::{constructions, ledger, proof_keys, signatures, votes};
use tessera_db::queries::constructions::Slot;
use tessera_hints::config::HintsConfig;
use tessera_hints::construction::{Construction, ConstructionController, KeyVote};
use tessera_hints::pvss::{Groth21Engine, SecretSharing};
use tessera_hints::signing::PartialSignature;
use tessera_types::roster::{Roster, RosterEntry};
use tessera_types::NodeId;

const TEST_TIMESTAMP: u64 = 1_700_000_000;

fn frozen_construction() -> (Construction, Vec<(NodeId, ProofKeypair)>) {
    let keypairs: Vec<(NodeId, ProofKeypair)> =
        (1..=4u64).map(|id| (id, ProofKeypair::generate())).collect();
    let entries = keypairs
        .iter()
        .map(|(node_id, keypair)| RosterEntry {
            node_id: *node_id,
            weight: 10,
            consensus_key: [*node_id as u8; 32],
            proof_key: keypair.encryption_key_bytes().expect("proof key"),
        })
        .collect();
    let roster = Roster::new(entries).expect("roster");
    let config = HintsConfig {
        max_shares_per_node: 1,
        ..HintsConfig::default()
    };
    let engine = Groth21Engine::new();
    let mut controller =
        ConstructionController::new(&roster, &roster, &config, true, None).expect("controller");
    let mut construction = Construction::new(1, roster.hash(), roster.hash(), true);
    for (seq, dealer) in [1u32, 2, 3].iter().enumerate() {
        let message = engine
            .generate_message(
                controller.target_directory(),
                *dealer,
                None,
                controller.context(),
            )
            .expect("generate");
        controller
            .apply_validated(&mut construction, seq as u64, message, &engine)
            .expect("apply");
    }
    assert!(construction.has_preprocessed_keys());
    (construction, keypairs)
}

#[test]
fn construction_and_ledger_id_survive_restart() {
    let (construction, keypairs) = frozen_construction();
    let verification_key = construction
        .verification_key()
        .expect("verification key")
        .to_vec();

    let conn = tessera_db::open_memory().expect("open");

    // Persist what a running node would: the adopted construction, the
    // ledger id, and every node's proof keys.
    constructions::put(&conn, Slot::Active, &construction, TEST_TIMESTAMP).expect("put");
    ledger::set(&conn, &verification_key, TEST_TIMESTAMP).expect("ledger id");
    for (node_id, keypair) in &keypairs {
        proof_keys::upsert(
            &conn,
            *node_id,
            &keypair.encryption_key_bytes().expect("proof key"),
            TEST_TIMESTAMP,
        )
        .expect("proof keys");
    }

    // Restore as a restarting node would.
    let restored = constructions::get(&conn, Slot::Active).expect("restore");
    assert_eq!(restored.id, construction.id);
    assert!(restored.has_preprocessed_keys());
    assert_eq!(
        restored.verification_key().expect("key"),
        verification_key.as_slice()
    );
    assert_eq!(restored.chosen_share_ids(), construction.chosen_share_ids());
    assert_eq!(ledger::get(&conn).expect("ledger id"), verification_key);
    assert_eq!(proof_keys::count(&conn).expect("count"), 4);

    // The restored construction still decrypts shares: an engine built from
    // the snapshot produces working key material.
    let engine = Groth21Engine::new();
    let chosen = restored.chosen_dealings();
    let shares = engine
        .decrypt_private_shares(
            // Same roster, same config, so the directory matches.
            &{
                let entries = keypairs
                    .iter()
                    .map(|(node_id, keypair)| RosterEntry {
                        node_id: *node_id,
                        weight: 10,
                        consensus_key: [*node_id as u8; 32],
                        proof_key: keypair.encryption_key_bytes().expect("proof key"),
                    })
                    .collect();
                let roster = Roster::new(entries).expect("roster");
                tessera_hints::directory::ParticipantDirectory::compute(
                    &roster,
                    &HintsConfig {
                        max_shares_per_node: 1,
                        ..HintsConfig::default()
                    },
                )
                .expect("directory")
            },
            1,
            &keypairs[0].1,
            &chosen,
        )
        .expect("decrypt");
    assert_eq!(shares.len(), 1);
}

#[test]
fn observed_artifacts_survive_restart() {
    let conn = tessera_db::open_memory().expect("open");

    let partial = PartialSignature {
        node_id: 2,
        share_id: 2,
        message_hash: [0xCD; 32],
        signature: vec![7u8; 96],
    };
    signatures::insert(&conn, 1, &partial, TEST_TIMESTAMP).expect("signature");

    let vote = KeyVote {
        node_id: 2,
        construction_id: 1,
        key_digest: [0xEF; 32],
    };
    votes::insert(&conn, &vote, TEST_TIMESTAMP).expect("vote");

    let restored = signatures::for_message(&conn, &[0xCD; 32]).expect("signatures");
    assert_eq!(restored, vec![partial]);
    let restored = votes::for_construction(&conn, 1).expect("votes");
    assert_eq!(restored, vec![vote]);

    // Retiring a construction drops its artifacts.
    signatures::purge_construction(&conn, 1).expect("purge");
    votes::purge_construction(&conn, 1).expect("purge");
    assert!(signatures::for_message(&conn, &[0xCD; 32])
        .expect("signatures")
        .is_empty());
    assert!(votes::for_construction(&conn, 1).expect("votes").is_empty());
}
