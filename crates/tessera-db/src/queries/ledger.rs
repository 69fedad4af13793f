//! Ledger-id singleton queries.

use rusqlite::Connection;

use crate::{DbError, Result};

/// Set (or replace) the ledger verification key.
pub fn set(conn: &Connection, verification_key: &[u8], adopted_at: u64) -> Result<()> {
    conn.execute(
        "INSERT INTO ledger_id (id, verification_key, adopted_at)
         VALUES (0, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET
             verification_key = excluded.verification_key,
             adopted_at = excluded.adopted_at",
        rusqlite::params![verification_key, adopted_at as i64],
    )?;
    Ok(())
}

/// Get the ledger verification key.
pub fn get(conn: &Connection) -> Result<Vec<u8>> {
    conn.query_row(
        "SELECT verification_key FROM ledger_id WHERE id = 0",
        [],
        |row| row.get::<_, Vec<u8>>(0),
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => DbError::NotFound("ledger id".into()),
        other => DbError::Sqlite(other),
    })
}
