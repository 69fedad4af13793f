//! Assembly-signature queries: observed partial signatures, keyed by the
//! signing node and construction. Bounded like the proof-key registry.

use rusqlite::Connection;

use tessera_hints::signing::PartialSignature;
use tessera_types::{MessageHash, NodeId};

use crate::schema::MAX_BOUNDED_ROWS;
use crate::{DbError, Result};

/// Record an observed partial signature. Duplicates (same signer,
/// construction, share and message) are ignored.
pub fn insert(
    conn: &Connection,
    construction_id: u64,
    partial: &PartialSignature,
    now: u64,
) -> Result<()> {
    if count(conn)? >= MAX_BOUNDED_ROWS {
        return Err(DbError::Constraint(format!(
            "assembly signature table is full ({MAX_BOUNDED_ROWS} rows)"
        )));
    }
    conn.execute(
        "INSERT OR IGNORE INTO assembly_signatures
             (node_id, construction_id, share_id, message_hash, signature, observed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        rusqlite::params![
            partial.node_id as i64,
            construction_id as i64,
            partial.share_id as i64,
            partial.message_hash.as_slice(),
            partial.signature,
            now as i64,
        ],
    )?;
    Ok(())
}

/// All partials observed for a message hash, ascending by share id.
pub fn for_message(conn: &Connection, message_hash: &MessageHash) -> Result<Vec<PartialSignature>> {
    let mut stmt = conn.prepare(
        "SELECT node_id, share_id, message_hash, signature
         FROM assembly_signatures WHERE message_hash = ?1 ORDER BY share_id",
    )?;
    let rows = stmt
        .query_map([message_hash.as_slice()], |row| {
            let hash: Vec<u8> = row.get(2)?;
            let mut message_hash = [0u8; 32];
            message_hash.copy_from_slice(&hash);
            Ok(PartialSignature {
                node_id: row.get::<_, i64>(0)? as NodeId,
                share_id: row.get::<_, i64>(1)? as u32,
                message_hash,
                signature: row.get(3)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Drop every signature for a retired construction.
pub fn purge_construction(conn: &Connection, construction_id: u64) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM assembly_signatures WHERE construction_id = ?1",
        [construction_id as i64],
    )?;
    Ok(removed)
}

fn count(conn: &Connection) -> Result<u64> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM assembly_signatures", [], |row| row.get(0))?;
    Ok(count as u64)
}
