//! # tessera-hints
//!
//! Threshold-signature construction and roster-transition protocol for the
//! Tessera ledger id.
//!
//! A rotating committee of weighted validators collectively maintains one
//! long-lived verification key whose private counterpart is never assembled
//! anywhere. Each roster transition runs a publicly-verifiable resharing
//! ("construction") toward the incoming roster; once enough dealings have
//! accumulated the construction freezes, the new roster's keys are
//! preprocessed, and signing continues uninterrupted under the same ledger
//! id.
//!
//! ## Modules
//!
//! - [`config`] — Deployment configuration (share sizing, threshold policy).
//! - [`directory`] — Deterministic share-id assignment per roster.
//! - [`pvss`] — The pluggable secret-sharing capability and its
//!   Groth21-style implementation.
//! - [`construction`] — One roster-pair's key construction and its
//!   controller.
//! - [`store`] — Arena-style stores for rosters and constructions.
//! - [`coordinator`] — The per-round roster-transition state machine.
//! - [`signing`] — Partial-signature collection and aggregate resolution.
//! - [`service`] — Tokio wiring: single-writer event loop, bounded crypto
//!   pool, outbound submission.

pub mod config;
pub mod construction;
pub mod coordinator;
pub mod directory;
pub mod pvss;
pub mod service;
pub mod signing;
pub mod store;

/// Error types for the construction and signing protocol.
#[derive(Debug, thiserror::Error)]
pub enum HintsError {
    /// `sign` was called before any construction reached readiness.
    #[error("not ready to sign")]
    NotReadyToSign,

    /// No active verification key has been established.
    #[error("no active verification key")]
    NoActiveKey,

    /// A roster hash could not be resolved against the roster store.
    #[error("unknown roster {0}")]
    UnknownRoster(String),

    /// The construction expected to survive a handoff is missing. This is
    /// an upstream consistency violation, not a recoverable condition.
    #[error("no retained construction for active roster {0}")]
    MissingConstruction(String),

    /// Configuration cannot produce a valid share assignment.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Underlying cryptographic failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] tessera_crypto::CryptoError),

    /// Domain-type failure (malformed roster).
    #[error("type error: {0}")]
    Type(#[from] tessera_types::TypeError),

    /// Outbound submission failed; retried on the next reconcile.
    #[error("submission failed: {0}")]
    Submission(String),

    /// The service writer task is gone.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A pending signing was dropped before resolution.
    #[error("signing aborted")]
    SigningAborted,
}

pub type Result<T> = std::result::Result<T, HintsError>;
