//! The pluggable secret-sharing capability.
//!
//! The protocol core never touches curve arithmetic directly; it talks to a
//! [`SecretSharing`] implementation selected at construction time. The
//! production scheme is [`Groth21Engine`], a publicly-verifiable sharing
//! over BLS12-381 built on `tessera_crypto::pvss`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tessera_crypto::bls::{self, ProofKeypair, SecretShare};
use tessera_crypto::pvss::{
    self, Dealing, MultishareCiphertext, PolynomialCommitment, Recipient,
};
use tessera_crypto::CryptoError;
use tessera_types::{MessageHash, NodeId, RosterHash, ShareId};

use crate::directory::ParticipantDirectory;
use crate::{HintsError, Result};

/// One node's contribution toward a target directory: the dealing that
/// re-shares (or, at genesis, freshly shares) the secret behind one source
/// share id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TssMessage {
    /// The dealer's source share id.
    pub share_id: ShareId,
    /// Serialized multishare ciphertext (ephemeral + masked evaluations).
    pub multishare_ciphertext: Vec<u8>,
    /// Serialized per-coefficient polynomial commitment.
    pub polynomial_commitment: Vec<u8>,
    /// Serialized consistency proof.
    pub proof: Vec<u8>,
}

impl TssMessage {
    fn to_dealing(&self) -> std::result::Result<Dealing, CryptoError> {
        Ok(Dealing {
            commitment: PolynomialCommitment::from_bytes(&self.polynomial_commitment)?,
            ciphertext: MultishareCiphertext::from_bytes(&self.multishare_ciphertext)?,
            proof: tessera_crypto::pvss::DealingProof::from_bytes(&self.proof)?,
        })
    }

    fn from_dealing(share_id: ShareId, dealing: &Dealing) -> Result<Self> {
        Ok(Self {
            share_id,
            multishare_ciphertext: dealing.ciphertext.to_bytes()?,
            polynomial_commitment: dealing.commitment.to_bytes()?,
            proof: dealing.proof.to_bytes()?,
        })
    }
}

/// The qualified dealings a construction froze on, with the weighting mode
/// the aggregation must use.
#[derive(Clone, Debug)]
pub struct ChosenDealings<'a> {
    /// True for bootstrap constructions (fresh secrets, unit weights);
    /// false for rekeying (Lagrange weights over the dealer share ids).
    pub genesis: bool,
    /// The chosen messages, ascending by dealer share id.
    pub messages: Vec<&'a TssMessage>,
}

/// The output of freezing a construction: the aggregate verification key
/// and every target share's public share.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessedKeys {
    /// The target verification key (compressed G1). For rekeying this
    /// equals the incumbent ledger id.
    pub verification_key: Vec<u8>,
    /// Public share per target share id (compressed G1).
    pub public_shares: BTreeMap<ShareId, Vec<u8>>,
}

/// The secret-sharing scheme capability.
///
/// Implementations are selected when the coordinator is built; everything
/// above this trait is scheme-agnostic.
pub trait SecretSharing: Send + Sync {
    /// Generate this node's dealing for `dealer_share_id` toward the
    /// target directory. `secret` is the incumbent share being re-shared;
    /// `None` samples a fresh secret (genesis).
    fn generate_message(
        &self,
        target: &ParticipantDirectory,
        dealer_share_id: ShareId,
        secret: Option<&SecretShare>,
        context: &[u8],
    ) -> Result<TssMessage>;

    /// Verify a message against the target directory and, when rekeying,
    /// the dealer's known public share. Returns `false` on any failure.
    fn verify(
        &self,
        message: &TssMessage,
        target: &ParticipantDirectory,
        known_public_share: Option<&[u8]>,
        context: &[u8],
    ) -> bool;

    /// Decrypt this node's new private shares from the chosen dealings.
    fn decrypt_private_shares(
        &self,
        target: &ParticipantDirectory,
        node_id: NodeId,
        keypair: &ProofKeypair,
        chosen: &ChosenDealings<'_>,
    ) -> Result<Vec<SecretShare>>;

    /// Aggregate the chosen dealings into the target verification key and
    /// public shares.
    fn aggregate(
        &self,
        target: &ParticipantDirectory,
        chosen: &ChosenDealings<'_>,
    ) -> Result<PreprocessedKeys>;

    /// Compute a partial signature over `message_hash` with one owned
    /// share.
    fn partial_sign(&self, message_hash: &MessageHash, share: &SecretShare) -> Result<Vec<u8>>;

    /// Verify a partial signature against a public share.
    fn verify_partial(
        &self,
        message_hash: &MessageHash,
        public_share: &[u8],
        signature: &[u8],
    ) -> bool;

    /// Aggregate threshold-many partials into the group signature and
    /// verify it against the verification key.
    fn aggregate_signatures(
        &self,
        message_hash: &MessageHash,
        partials: &[(ShareId, Vec<u8>)],
        verification_key: &[u8],
    ) -> Result<Vec<u8>>;
}

/// Domain context binding dealings to one construction.
pub fn dealing_context(source: &RosterHash, target: &RosterHash) -> Vec<u8> {
    tessera_crypto::blake3::encode_multi_field(&[source, target])
}

/// The production Groth21-style scheme over BLS12-381.
#[derive(Clone, Copy, Debug, Default)]
pub struct Groth21Engine;

impl Groth21Engine {
    pub fn new() -> Self {
        Self
    }

    fn recipients(target: &ParticipantDirectory) -> Result<Vec<Recipient>> {
        let mut recipients = Vec::with_capacity(target.total_shares() as usize);
        for entry in target.entries() {
            let encryption_key = bls::deserialize_g1(&entry.proof_key)?;
            for share_id in entry.share_ids() {
                recipients.push(Recipient {
                    share_id,
                    encryption_key,
                });
            }
        }
        Ok(recipients)
    }
}

impl SecretSharing for Groth21Engine {
    fn generate_message(
        &self,
        target: &ParticipantDirectory,
        dealer_share_id: ShareId,
        secret: Option<&SecretShare>,
        context: &[u8],
    ) -> Result<TssMessage> {
        let recipients = Self::recipients(target)?;
        let mut rng = rand::rngs::OsRng;
        let secret_scalar = match secret {
            Some(share) => share.scalar(),
            None => SecretShare::random(dealer_share_id).scalar(),
        };
        let dealing = pvss::generate(
            &secret_scalar,
            target.threshold(),
            &recipients,
            dealer_share_id,
            context,
            &mut rng,
        )?;
        TssMessage::from_dealing(dealer_share_id, &dealing)
    }

    fn verify(
        &self,
        message: &TssMessage,
        target: &ParticipantDirectory,
        known_public_share: Option<&[u8]>,
        context: &[u8],
    ) -> bool {
        let dealing = match message.to_dealing() {
            Ok(dealing) => dealing,
            Err(_) => return false,
        };
        if let Some(expected) = known_public_share {
            let expected = match bls::deserialize_g1(expected) {
                Ok(point) => point,
                Err(_) => return false,
            };
            match dealing.secret_commitment() {
                Ok(actual) if actual == expected => {}
                _ => return false,
            }
        }
        pvss::verify(
            &dealing,
            message.share_id,
            target.threshold(),
            &target.share_ids(),
            context,
        )
    }

    fn decrypt_private_shares(
        &self,
        target: &ParticipantDirectory,
        node_id: NodeId,
        keypair: &ProofKeypair,
        chosen: &ChosenDealings<'_>,
    ) -> Result<Vec<SecretShare>> {
        let decryption_key = keypair.decryption_key();
        let mut shares = Vec::new();
        for share_id in target.owned_share_ids(node_id) {
            let mut evaluations = Vec::with_capacity(chosen.messages.len());
            for message in &chosen.messages {
                let dealing = message.to_dealing()?;
                let evaluation = pvss::decrypt_entry(&dealing, share_id, &decryption_key)?;
                evaluations.push((message.share_id, evaluation));
            }
            let combined = pvss::combine_shares(&evaluations, chosen.genesis)?;
            shares.push(SecretShare::new(share_id, &combined));
        }
        Ok(shares)
    }

    fn aggregate(
        &self,
        target: &ParticipantDirectory,
        chosen: &ChosenDealings<'_>,
    ) -> Result<PreprocessedKeys> {
        let dealings: Vec<(ShareId, Dealing)> = chosen
            .messages
            .iter()
            .map(|message| Ok((message.share_id, message.to_dealing()?)))
            .collect::<std::result::Result<_, CryptoError>>()?;

        let (verification_key, share_points) =
            pvss::aggregate_dealings(&dealings, &target.share_ids(), chosen.genesis)?;

        let mut public_shares = BTreeMap::new();
        for (share_id, point) in &share_points {
            public_shares.insert(*share_id, bls::serialize_g1(point)?);
        }

        Ok(PreprocessedKeys {
            verification_key: bls::serialize_g1(&verification_key)?,
            public_shares,
        })
    }

    fn partial_sign(&self, message_hash: &MessageHash, share: &SecretShare) -> Result<Vec<u8>> {
        let point = bls::message_point(message_hash)?;
        let signature = bls::partial_sign(&point, &share.scalar());
        Ok(bls::serialize_g2(&signature)?)
    }

    fn verify_partial(
        &self,
        message_hash: &MessageHash,
        public_share: &[u8],
        signature: &[u8],
    ) -> bool {
        let (Ok(point), Ok(public_share), Ok(signature)) = (
            bls::message_point(message_hash),
            bls::deserialize_g1(public_share),
            bls::deserialize_g2(signature),
        ) else {
            return false;
        };
        bls::verify_partial(&public_share, &point, &signature)
    }

    fn aggregate_signatures(
        &self,
        message_hash: &MessageHash,
        partials: &[(ShareId, Vec<u8>)],
        verification_key: &[u8],
    ) -> Result<Vec<u8>> {
        let mut typed = Vec::with_capacity(partials.len());
        for (share_id, bytes) in partials {
            typed.push((*share_id, bls::deserialize_g2(bytes)?));
        }
        let aggregate = bls::aggregate_signatures(&typed)?;
        let point = bls::message_point(message_hash)?;
        let verification_key = bls::deserialize_g1(verification_key)?;
        if !bls::verify_aggregate(&verification_key, &point, &aggregate) {
            return Err(HintsError::Crypto(CryptoError::InvalidInput(
                "aggregate signature failed verification".to_string(),
            )));
        }
        Ok(bls::serialize_g2(&aggregate)?)
    }
}
