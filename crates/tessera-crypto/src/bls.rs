//! BLS12-381 threshold-signature primitives.
//!
//! Public keys and polynomial commitments live in G1 (minimal-pubkey
//! convention); message points and signatures live in G2. A partial
//! signature for share `x` is `H2(m) * s_x`; an aggregate over a qualified
//! set is the Lagrange-weighted sum of partials, verified with one pairing
//! equation against the group verification key.

use ark_bls12_381::{Bls12_381, Fr, G1Projective as G1, G2Affine, G2Projective as G2};
use ark_ec::hashing::curve_maps::wb::WBMap;
use ark_ec::hashing::map_to_curve_hasher::MapToCurveBasedHasher;
use ark_ec::hashing::HashToCurve;
use ark_ec::pairing::Pairing;
use ark_ec::{CurveGroup, Group};
use ark_ff::field_hashers::DefaultFieldHasher;
use ark_ff::{BigInteger, Field, PrimeField, UniformRand};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::ops::Mul;
use ark_std::{One, Zero};
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{CryptoError, Result};

/// Domain separation tag for hashing ledger messages into G2.
pub const SIGNATURE_DST: &[u8] = b"TESSERA-V1-CS01-BLS12381G2_XMD:SHA-256_SSWU_RO_";

/// Serialize a G1 element (compressed, 48 bytes).
pub fn serialize_g1(point: &G1) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    point
        .into_affine()
        .serialize_compressed(&mut out)
        .map_err(|e| CryptoError::MalformedElement(e.to_string()))?;
    Ok(out)
}

/// Deserialize a compressed G1 element.
pub fn deserialize_g1(bytes: &[u8]) -> Result<G1> {
    let affine = ark_bls12_381::G1Affine::deserialize_compressed(bytes)
        .map_err(|e| CryptoError::MalformedElement(e.to_string()))?;
    Ok(affine.into())
}

/// Serialize a G2 element (compressed, 96 bytes).
pub fn serialize_g2(point: &G2) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    point
        .into_affine()
        .serialize_compressed(&mut out)
        .map_err(|e| CryptoError::MalformedElement(e.to_string()))?;
    Ok(out)
}

/// Deserialize a compressed G2 element.
pub fn deserialize_g2(bytes: &[u8]) -> Result<G2> {
    let affine = G2Affine::deserialize_compressed(bytes)
        .map_err(|e| CryptoError::MalformedElement(e.to_string()))?;
    Ok(affine.into())
}

/// A node's proof keypair: the G1 encryption key published to the network
/// and the scalar decryption key kept local.
///
/// The secret scalar is stored as little-endian bytes so it can be wiped
/// on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ProofKeypair {
    secret: [u8; 32],
}

impl ProofKeypair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        let secret = Fr::rand(&mut rng);
        Self::from_scalar(&secret)
    }

    fn from_scalar(secret: &Fr) -> Self {
        let mut bytes = [0u8; 32];
        let repr = secret.into_bigint().to_bytes_le();
        bytes.copy_from_slice(&repr);
        Self { secret: bytes }
    }

    /// The scalar decryption key.
    pub fn decryption_key(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.secret)
    }

    /// The public encryption key `g1 * sk`.
    pub fn encryption_key(&self) -> G1 {
        G1::generator().mul(self.decryption_key())
    }

    /// The compressed public encryption key.
    pub fn encryption_key_bytes(&self) -> Result<Vec<u8>> {
        serialize_g1(&self.encryption_key())
    }
}

/// A secret share: the evaluation of a sharing polynomial at this share's
/// id. Stored as little-endian scalar bytes so it can be wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretShare {
    share_id: u32,
    secret: [u8; 32],
}

impl SecretShare {
    /// Wrap a scalar evaluation for `share_id`.
    pub fn new(share_id: u32, secret: &Fr) -> Self {
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&secret.into_bigint().to_bytes_le());
        Self {
            share_id,
            secret: bytes,
        }
    }

    /// Sample a fresh random share secret (genesis dealings share a secret
    /// nobody held before).
    pub fn random(share_id: u32) -> Self {
        let mut rng = OsRng;
        Self::new(share_id, &Fr::rand(&mut rng))
    }

    /// The share id this secret belongs to.
    pub fn share_id(&self) -> u32 {
        self.share_id
    }

    /// The scalar value.
    pub fn scalar(&self) -> Fr {
        Fr::from_le_bytes_mod_order(&self.secret)
    }
}

impl std::fmt::Debug for SecretShare {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the secret.
        f.debug_struct("SecretShare")
            .field("share_id", &self.share_id)
            .finish_non_exhaustive()
    }
}

/// Hash a message into G2 using the standard WB map with an SHA-256 XMD
/// expander.
pub fn hash_to_g2(message: &[u8], dst: &[u8]) -> Result<G2> {
    let hasher = MapToCurveBasedHasher::<
        G2,
        DefaultFieldHasher<Sha256, 128>,
        WBMap<ark_bls12_381::g2::Config>,
    >::new(dst)
    .map_err(|e| CryptoError::HashToCurve(e.to_string()))?;
    let point = hasher
        .hash(message)
        .map_err(|e| CryptoError::HashToCurve(e.to_string()))?;
    Ok(point.into())
}

/// Hash a ledger message (block hash or arbitrary bytes) to its G2 signing
/// point under the protocol DST.
pub fn message_point(message: &[u8]) -> Result<G2> {
    hash_to_g2(message, SIGNATURE_DST)
}

/// Produce a partial signature: `H2(m) * s_x`.
pub fn partial_sign(message_point: &G2, share_secret: &Fr) -> G2 {
    message_point.mul(*share_secret)
}

/// Verify a partial signature against the public share `g1 * s_x`.
pub fn verify_partial(public_share: &G1, message_point: &G2, signature: &G2) -> bool {
    Bls12_381::pairing(G1::generator().into_affine(), signature.into_affine())
        == Bls12_381::pairing(public_share.into_affine(), message_point.into_affine())
}

/// Verify an aggregate signature against the group verification key.
///
/// Same pairing equation as [`verify_partial`]; the verification key is the
/// constant-term aggregate of the qualified dealings.
pub fn verify_aggregate(verification_key: &G1, message_point: &G2, signature: &G2) -> bool {
    verify_partial(verification_key, message_point, signature)
}

/// Lagrange coefficients at zero for the evaluation domain `{x_1..x_k}`,
/// where each `x` is a 1-based share id.
///
/// Returns one coefficient per input id, in input order. Ids must be
/// distinct and nonzero.
pub fn lagrange_at_zero(share_ids: &[u32]) -> Result<Vec<Fr>> {
    if share_ids.is_empty() {
        return Err(CryptoError::InterpolationDomain("empty domain".to_string()));
    }
    for (i, id) in share_ids.iter().enumerate() {
        if *id == 0 {
            return Err(CryptoError::InterpolationDomain(
                "share id 0 is not a valid evaluation point".to_string(),
            ));
        }
        if share_ids[..i].contains(id) {
            return Err(CryptoError::InterpolationDomain(format!(
                "duplicate share id {id}"
            )));
        }
    }

    let xs: Vec<Fr> = share_ids.iter().map(|id| Fr::from(*id as u64)).collect();
    let mut coefficients = Vec::with_capacity(xs.len());
    for (j, xj) in xs.iter().enumerate() {
        let mut numerator = Fr::one();
        let mut denominator = Fr::one();
        for (k, xk) in xs.iter().enumerate() {
            if k == j {
                continue;
            }
            numerator *= xk;
            denominator *= *xk - *xj;
        }
        let inverse = denominator.inverse().ok_or_else(|| {
            CryptoError::InterpolationDomain("non-invertible denominator".to_string())
        })?;
        coefficients.push(numerator * inverse);
    }
    Ok(coefficients)
}

/// Aggregate partial signatures over distinct share ids into the group
/// signature via Lagrange interpolation at zero.
pub fn aggregate_signatures(partials: &[(u32, G2)]) -> Result<G2> {
    let ids: Vec<u32> = partials.iter().map(|(id, _)| *id).collect();
    let coefficients = lagrange_at_zero(&ids)?;
    let mut aggregate = G2::zero();
    for ((_, sig), coefficient) in partials.iter().zip(coefficients.iter()) {
        aggregate += sig.mul(*coefficient);
    }
    Ok(aggregate)
}
