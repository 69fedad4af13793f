//! Publicly-verifiable secret-sharing dealings (Groth21-style).
//!
//! A dealing shares one secret scalar toward a set of recipient share ids.
//! The dealer samples a random polynomial `f` of degree `t-1` with
//! `f(0) = secret`, publishes per-coefficient commitments `A_j = g1 * a_j`,
//! and encrypts `f(x)` to each recipient share id `x` by masking it with a
//! scalar derived from a Diffie-Hellman secret: one ephemeral `r` per
//! dealing, `mask_x = H(ek^r || x)` where `ek` is the recipient node's
//! encryption key. Each entry carries a commitment `M_x = g1 * mask_x`, so
//! any observer can check `g1 * c_x == M_x + f(x) * g1` against the
//! polynomial commitments without learning anything. A Fiat-Shamir Schnorr
//! proof over the ephemeral binds the whole dealing together; the challenge
//! covers every commitment and ciphertext entry, so flipping any bit of the
//! dealing invalidates it.

use ark_bls12_381::{Fr, G1Projective as G1};
use ark_ec::Group;
use ark_ff::{BigInteger, PrimeField, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::ops::Mul;
use ark_std::rand::Rng;
use ark_std::{One, Zero};

use crate::blake3::{self, contexts};
use crate::bls::serialize_g1;
use crate::CryptoError;

/// One recipient slot of a dealing: a target share id and the encryption
/// key of the node that owns it.
#[derive(Clone, Debug)]
pub struct Recipient {
    /// Target share id (1-based evaluation point).
    pub share_id: u32,
    /// The owning node's G1 encryption key.
    pub encryption_key: G1,
}

/// One masked polynomial evaluation.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct DealingEntry {
    /// Target share id this entry encrypts `f(share_id)` for.
    pub share_id: u32,
    /// The masked evaluation `f(share_id) + mask`.
    pub masked: Fr,
    /// Commitment to the mask, `g1 * mask`.
    pub mask_commitment: G1,
}

/// Schnorr proof of knowledge of the dealing ephemeral.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct DealingProof {
    /// Prover commitment `g1 * k`.
    pub commit: G1,
    /// Response `k + e * r`.
    pub response: Fr,
}

/// The multishare ciphertext: one shared ephemeral plus one masked
/// evaluation per target share id.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct MultishareCiphertext {
    /// The dealing ephemeral `R = g1 * r`, shared by all entries.
    pub ephemeral: G1,
    /// Masked evaluations, ascending by share id.
    pub entries: Vec<DealingEntry>,
}

/// The per-coefficient polynomial commitment; `A_0` commits to the shared
/// secret.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct PolynomialCommitment {
    pub coefficients: Vec<G1>,
}

/// A complete dealing: commitment, multishare ciphertext, and proof.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dealing {
    pub commitment: PolynomialCommitment,
    pub ciphertext: MultishareCiphertext,
    pub proof: DealingProof,
}

macro_rules! part_bytes {
    ($type:ty) => {
        impl $type {
            /// Serialize this dealing part (compressed points).
            pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
                let mut out = Vec::new();
                self.serialize_compressed(&mut out)
                    .map_err(|e| CryptoError::MalformedElement(e.to_string()))?;
                Ok(out)
            }

            /// Deserialize this dealing part.
            pub fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
                Self::deserialize_compressed(bytes)
                    .map_err(|e| CryptoError::MalformedElement(e.to_string()))
            }
        }
    };
}

part_bytes!(PolynomialCommitment);
part_bytes!(MultishareCiphertext);
part_bytes!(DealingProof);

impl Dealing {
    /// The commitment to the shared secret, `A_0`.
    pub fn secret_commitment(&self) -> crate::Result<G1> {
        self.commitment
            .coefficients
            .first()
            .copied()
            .ok_or_else(|| CryptoError::InvalidDealing("empty commitment".to_string()))
    }
}

/// Evaluate the polynomial commitment at `x`: `g1 * f(x)` by Horner over
/// the committed coefficients.
pub fn eval_commitment(commitment: &[G1], share_id: u32) -> G1 {
    let x = Fr::from(share_id as u64);
    commitment
        .iter()
        .rev()
        .fold(G1::zero(), |acc, coefficient| acc.mul(x) + coefficient)
}

/// Generate a dealing of `secret` toward the given recipients.
///
/// `threshold` is the reconstruction threshold of the target sharing; the
/// sampled polynomial has degree `threshold - 1`. `context` binds the
/// dealing to its construction (roster hash pair) and `dealer_share_id` to
/// the source share being re-shared.
pub fn generate<R: Rng>(
    secret: &Fr,
    threshold: u32,
    recipients: &[Recipient],
    dealer_share_id: u32,
    context: &[u8],
    rng: &mut R,
) -> crate::Result<Dealing> {
    if threshold == 0 {
        return Err(CryptoError::InvalidInput("threshold must be >= 1".to_string()));
    }
    if (recipients.len() as u32) < threshold {
        return Err(CryptoError::InvalidInput(format!(
            "{} recipients cannot support threshold {threshold}",
            recipients.len()
        )));
    }

    // Sample f with f(0) = secret.
    let mut coefficients = Vec::with_capacity(threshold as usize);
    coefficients.push(*secret);
    for _ in 1..threshold {
        coefficients.push(Fr::rand(rng));
    }
    let commitment: Vec<G1> = coefficients
        .iter()
        .map(|a| G1::generator().mul(*a))
        .collect();

    // One ephemeral per dealing, shared by every entry.
    let r = Fr::rand(rng);
    let ephemeral = G1::generator().mul(r);

    let mut entries = Vec::with_capacity(recipients.len());
    for recipient in recipients {
        if recipient.share_id == 0 {
            return Err(CryptoError::InvalidInput(
                "share id 0 is not a valid evaluation point".to_string(),
            ));
        }
        let evaluation = eval_poly(&coefficients, recipient.share_id);
        let shared = recipient.encryption_key.mul(r);
        let mask = mask_scalar(&shared, recipient.share_id)?;
        entries.push(DealingEntry {
            share_id: recipient.share_id,
            masked: evaluation + mask,
            mask_commitment: G1::generator().mul(mask),
        });
    }
    entries.sort_by_key(|entry| entry.share_id);

    // Fiat-Shamir Schnorr over the ephemeral, challenge bound to the whole
    // dealing.
    let k = Fr::rand(rng);
    let commit = G1::generator().mul(k);
    let challenge = challenge(dealer_share_id, context, &commitment, &ephemeral, &commit, &entries)?;
    let response = k + challenge * r;

    Ok(Dealing {
        commitment: PolynomialCommitment {
            coefficients: commitment,
        },
        ciphertext: MultishareCiphertext { ephemeral, entries },
        proof: DealingProof { commit, response },
    })
}

/// Verify a dealing against its declared dealer share id and the expected
/// target share ids.
///
/// Checks, in order: structural shape (threshold-sized commitment, exactly
/// the expected entries in ascending order), the Schnorr equation under the
/// recomputed challenge, and every entry's algebraic consistency
/// `g1 * masked == mask_commitment + g1 * f(share_id)`. Returns `false` on
/// any failure.
pub fn verify(
    dealing: &Dealing,
    dealer_share_id: u32,
    threshold: u32,
    expected_share_ids: &[u32],
    context: &[u8],
) -> bool {
    let coefficients = &dealing.commitment.coefficients;
    let entries = &dealing.ciphertext.entries;
    if coefficients.len() != threshold as usize {
        return false;
    }
    if entries.len() != expected_share_ids.len() {
        return false;
    }
    let mut expected = expected_share_ids.to_vec();
    expected.sort_unstable();
    for (entry, expected_id) in entries.iter().zip(expected.iter()) {
        if entry.share_id != *expected_id {
            return false;
        }
    }

    let challenge = match challenge(
        dealer_share_id,
        context,
        coefficients,
        &dealing.ciphertext.ephemeral,
        &dealing.proof.commit,
        entries,
    ) {
        Ok(challenge) => challenge,
        Err(_) => return false,
    };
    let lhs = G1::generator().mul(dealing.proof.response);
    let rhs = dealing.proof.commit + dealing.ciphertext.ephemeral.mul(challenge);
    if lhs != rhs {
        return false;
    }

    for entry in entries {
        let lhs = G1::generator().mul(entry.masked);
        let rhs = entry.mask_commitment + eval_commitment(coefficients, entry.share_id);
        if lhs != rhs {
            return false;
        }
    }
    true
}

/// Decrypt the evaluation a dealing encrypts for `share_id`, using the
/// recipient node's decryption key.
///
/// The unmasked value is checked against the polynomial commitment; a
/// mismatch means the dealer published a mask commitment inconsistent with
/// the Diffie-Hellman derivation and the dealing must be treated as
/// hostile.
pub fn decrypt_entry(dealing: &Dealing, share_id: u32, decryption_key: &Fr) -> crate::Result<Fr> {
    let entry = dealing
        .ciphertext
        .entries
        .iter()
        .find(|entry| entry.share_id == share_id)
        .ok_or_else(|| {
            CryptoError::InvalidDealing(format!("no entry for share id {share_id}"))
        })?;

    let shared = dealing.ciphertext.ephemeral.mul(*decryption_key);
    let mask = mask_scalar(&shared, share_id)?;
    let evaluation = entry.masked - mask;

    if G1::generator().mul(evaluation)
        != eval_commitment(&dealing.commitment.coefficients, share_id)
    {
        return Err(CryptoError::ShareDecryption(share_id));
    }
    Ok(evaluation)
}

fn eval_poly(coefficients: &[Fr], share_id: u32) -> Fr {
    let x = Fr::from(share_id as u64);
    coefficients
        .iter()
        .rev()
        .fold(Fr::zero(), |acc, c| acc * x + c)
}

/// Derive an entry mask from the Diffie-Hellman point, uniform in the
/// scalar field (64-byte XOF reduction).
fn mask_scalar(shared: &G1, share_id: u32) -> crate::Result<Fr> {
    let point_bytes = serialize_g1(shared)?;
    let material =
        blake3::encode_multi_field(&[&point_bytes, &share_id.to_le_bytes()]);
    let mut wide = [0u8; 64];
    blake3::derive_key_xof(contexts::DEALING_MASK, &material, &mut wide);
    Ok(Fr::from_le_bytes_mod_order(&wide))
}

/// Fiat-Shamir challenge over the full dealing transcript.
fn challenge(
    dealer_share_id: u32,
    context: &[u8],
    commitment: &[G1],
    ephemeral: &G1,
    proof_commit: &G1,
    entries: &[DealingEntry],
) -> crate::Result<Fr> {
    let mut transcript = Vec::new();
    let mut push = |bytes: &[u8]| {
        transcript.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        transcript.extend_from_slice(bytes);
    };
    push(&dealer_share_id.to_le_bytes());
    push(context);
    for coefficient in commitment {
        push(&serialize_g1(coefficient)?);
    }
    push(&serialize_g1(ephemeral)?);
    push(&serialize_g1(proof_commit)?);
    for entry in entries {
        push(&entry.share_id.to_le_bytes());
        push(&entry.masked.into_bigint().to_bytes_le());
        push(&serialize_g1(&entry.mask_commitment)?);
    }

    let mut wide = [0u8; 64];
    blake3::derive_key_xof(contexts::DEALING_CHALLENGE, &transcript, &mut wide);
    Ok(Fr::from_le_bytes_mod_order(&wide))
}

fn dealing_weights(dealer_share_ids: &[u32], genesis: bool) -> crate::Result<Vec<Fr>> {
    if genesis {
        Ok(vec![Fr::one(); dealer_share_ids.len()])
    } else {
        crate::bls::lagrange_at_zero(dealer_share_ids)
    }
}

/// Aggregate chosen dealings into the target verification key and one
/// public share per target share id.
///
/// Genesis dealings (fresh secrets) aggregate with unit weights, so the
/// group secret becomes the sum of the dealt secrets. Rekey dealings
/// aggregate with Lagrange-at-zero weights over the dealer share ids, which
/// preserves the incumbent group secret.
pub fn aggregate_dealings(
    dealings: &[(u32, Dealing)],
    target_share_ids: &[u32],
    genesis: bool,
) -> crate::Result<(G1, Vec<(u32, G1)>)> {
    if dealings.is_empty() {
        return Err(CryptoError::InvalidInput("no dealings to aggregate".to_string()));
    }
    let dealer_ids: Vec<u32> = dealings.iter().map(|(id, _)| *id).collect();
    let weights = dealing_weights(&dealer_ids, genesis)?;

    let mut verification_key = G1::zero();
    for ((_, dealing), weight) in dealings.iter().zip(weights.iter()) {
        verification_key += dealing.secret_commitment()?.mul(*weight);
    }

    let mut public_shares = Vec::with_capacity(target_share_ids.len());
    for share_id in target_share_ids {
        let mut accumulated = G1::zero();
        for ((_, dealing), weight) in dealings.iter().zip(weights.iter()) {
            accumulated +=
                eval_commitment(&dealing.commitment.coefficients, *share_id).mul(*weight);
        }
        public_shares.push((*share_id, accumulated));
    }

    Ok((verification_key, public_shares))
}

/// Combine one target share's decrypted evaluations across the chosen
/// dealings into the final share secret, using the same weighting as
/// [`aggregate_dealings`].
pub fn combine_shares(evaluations: &[(u32, Fr)], genesis: bool) -> crate::Result<Fr> {
    if evaluations.is_empty() {
        return Err(CryptoError::InvalidInput("no evaluations to combine".to_string()));
    }
    let dealer_ids: Vec<u32> = evaluations.iter().map(|(id, _)| *id).collect();
    let weights = dealing_weights(&dealer_ids, genesis)?;
    Ok(evaluations
        .iter()
        .zip(weights.iter())
        .map(|((_, evaluation), weight)| *evaluation * *weight)
        .sum())
}
