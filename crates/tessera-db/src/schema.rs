//! SQL schema definitions.

/// Upper bound on rows in the per-node bounded tables.
pub const MAX_BOUNDED_ROWS: u64 = 1 << 21;

/// Complete schema for the Tessera v1 database.
pub const SCHEMA_V1: &str = r#"
-- The ledger id: one long-lived verification key.
CREATE TABLE IF NOT EXISTS ledger_id (
    id INTEGER PRIMARY KEY CHECK (id = 0),
    verification_key BLOB NOT NULL,
    adopted_at INTEGER NOT NULL
);

-- Active and next construction snapshots (CBOR).
CREATE TABLE IF NOT EXISTS construction_slots (
    slot TEXT PRIMARY KEY CHECK (slot IN ('active', 'next')),
    construction_id INTEGER NOT NULL,
    state BLOB NOT NULL,
    updated_at INTEGER NOT NULL
);

-- Proof (share-encryption) keys per node.
CREATE TABLE IF NOT EXISTS proof_keys (
    node_id INTEGER PRIMARY KEY,
    key_set BLOB NOT NULL,
    registered_at INTEGER NOT NULL
);

-- Observed partial signatures, keyed by signer and construction.
CREATE TABLE IF NOT EXISTS assembly_signatures (
    node_id INTEGER NOT NULL,
    construction_id INTEGER NOT NULL,
    share_id INTEGER NOT NULL,
    message_hash BLOB NOT NULL,
    signature BLOB NOT NULL,
    observed_at INTEGER NOT NULL,
    PRIMARY KEY (node_id, construction_id, share_id, message_hash)
);

CREATE INDEX IF NOT EXISTS idx_assembly_signatures_message
    ON assembly_signatures(message_hash);

-- Key votes, one per (voter, construction).
CREATE TABLE IF NOT EXISTS key_votes (
    node_id INTEGER NOT NULL,
    construction_id INTEGER NOT NULL,
    key_digest BLOB NOT NULL,
    observed_at INTEGER NOT NULL,
    PRIMARY KEY (node_id, construction_id)
);
"#;
