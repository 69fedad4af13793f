//! # tessera-crypto
//!
//! Cryptographic primitives for the Tessera ledger-id subsystem.
//!
//! This crate implements the curve arithmetic and hashing the threshold
//! protocol is built on. No algorithm negotiation is permitted — the suite
//! is fixed to BLS12-381 with domain-separated BLAKE3.
//!
//! ## Modules
//!
//! - [`blake3`] — Domain-separated BLAKE3 hashing (registered context strings)
//! - [`bls`] — BLS12-381 keys, partial signatures, pairing checks, Lagrange
//!   interpolation at zero
//! - [`pvss`] — Publicly-verifiable secret-sharing dealings (Groth21-style):
//!   polynomial commitments, multi-recipient masked share encryption, and
//!   the non-interactive consistency proof

pub mod blake3;
pub mod bls;
pub mod pvss;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Point or scalar deserialization failed.
    #[error("malformed curve element: {0}")]
    MalformedElement(String),

    /// Hash-to-curve failed.
    #[error("hash-to-curve error: {0}")]
    HashToCurve(String),

    /// Lagrange interpolation over an invalid evaluation domain.
    #[error("invalid interpolation domain: {0}")]
    InterpolationDomain(String),

    /// A dealing is structurally invalid for the requested operation.
    #[error("invalid dealing: {0}")]
    InvalidDealing(String),

    /// A decrypted share does not match the dealing commitment.
    #[error("share decryption failed for share id {0}")]
    ShareDecryption(u32),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
