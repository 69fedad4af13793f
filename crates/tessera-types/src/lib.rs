//! # tessera-types
//!
//! Shared domain types for the Tessera ledger-id subsystem: validator
//! rosters, roster-transition phases, and the id aliases used across the
//! workspace.

pub mod roster;

/// A validator node identifier.
pub type NodeId = u64;

/// A secret-share identifier: 1-based evaluation point of the sharing
/// polynomials. Share id 0 is reserved (the group secret lives at 0).
pub type ShareId = u32;

/// Content hash of a roster.
pub type RosterHash = [u8; 32];

/// Hash of a message submitted for threshold signing.
pub type MessageHash = [u8; 32];

/// Upper bound on proof-key records a node may persist.
pub const MAX_PROOF_KEY_RECORDS: u64 = 1 << 21;

/// Error types for domain-type construction.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// A roster contained duplicate node ids.
    #[error("duplicate node id {0} in roster")]
    DuplicateNode(NodeId),

    /// A roster was empty or carried no weight.
    #[error("invalid roster: {0}")]
    InvalidRoster(String),
}

pub type Result<T> = std::result::Result<T, TypeError>;
