//! Proof-key registry queries.
//!
//! One row per node: the share-encryption key set the node published. The
//! table is bounded; inserts beyond the bound are a constraint violation.

use rusqlite::Connection;

use tessera_types::NodeId;

use crate::schema::MAX_BOUNDED_ROWS;
use crate::{DbError, Result};

/// Register (or replace) a node's proof key set.
pub fn upsert(conn: &Connection, node_id: NodeId, key_set: &[u8], now: u64) -> Result<()> {
    if !exists(conn, node_id)? && count(conn)? >= MAX_BOUNDED_ROWS {
        return Err(DbError::Constraint(format!(
            "proof key registry is full ({MAX_BOUNDED_ROWS} rows)"
        )));
    }
    conn.execute(
        "INSERT INTO proof_keys (node_id, key_set, registered_at)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(node_id) DO UPDATE SET
             key_set = excluded.key_set,
             registered_at = excluded.registered_at",
        rusqlite::params![node_id as i64, key_set, now as i64],
    )?;
    Ok(())
}

/// Get a node's proof key set.
pub fn get(conn: &Connection, node_id: NodeId) -> Result<Vec<u8>> {
    conn.query_row(
        "SELECT key_set FROM proof_keys WHERE node_id = ?1",
        [node_id as i64],
        |row| row.get::<_, Vec<u8>>(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => {
            DbError::NotFound(format!("proof keys for node {node_id}"))
        }
        other => DbError::Sqlite(other),
    })
}

/// Number of registered nodes.
pub fn count(conn: &Connection) -> Result<u64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM proof_keys", [], |row| row.get(0))?;
    Ok(count as u64)
}

fn exists(conn: &Connection, node_id: NodeId) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM proof_keys WHERE node_id = ?1",
        [node_id as i64],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_memory;

    #[test]
    fn test_upsert_and_get() {
        let conn = open_memory().expect("open");
        upsert(&conn, 7, &[1, 2, 3], 100).expect("upsert");
        assert_eq!(get(&conn, 7).expect("get"), vec![1, 2, 3]);
        assert!(matches!(get(&conn, 8), Err(DbError::NotFound(_))));

        // Replacement does not grow the table.
        upsert(&conn, 7, &[9, 9], 200).expect("replace");
        assert_eq!(get(&conn, 7).expect("get"), vec![9, 9]);
        assert_eq!(count(&conn).expect("count"), 1);
    }
}
