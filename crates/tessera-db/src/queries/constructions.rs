//! Construction snapshot queries.
//!
//! The in-memory construction store is authoritative; these snapshots let
//! a restarting node resume from its last adopted and in-progress
//! constructions without replaying the full history.

use rusqlite::Connection;

use tessera_hints::construction::Construction;

use crate::{DbError, Result};

/// The two persisted construction slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    /// The construction signing currently runs against.
    Active,
    /// The in-progress construction for the next roster.
    Next,
}

impl Slot {
    fn as_str(&self) -> &'static str {
        match self {
            Slot::Active => "active",
            Slot::Next => "next",
        }
    }
}

/// Write a construction snapshot into a slot.
pub fn put(conn: &Connection, slot: Slot, construction: &Construction, now: u64) -> Result<()> {
    let mut state = Vec::new();
    ciborium::into_writer(construction, &mut state)
        .map_err(|e| DbError::Serialization(e.to_string()))?;
    conn.execute(
        "INSERT INTO construction_slots (slot, construction_id, state, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(slot) DO UPDATE SET
             construction_id = excluded.construction_id,
             state = excluded.state,
             updated_at = excluded.updated_at",
        rusqlite::params![slot.as_str(), construction.id as i64, state, now as i64],
    )?;
    Ok(())
}

/// Read the construction snapshot in a slot.
pub fn get(conn: &Connection, slot: Slot) -> Result<Construction> {
    let state: Vec<u8> = conn
        .query_row(
            "SELECT state FROM construction_slots WHERE slot = ?1",
            [slot.as_str()],
            |row| row.get(0),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                DbError::NotFound(format!("{} construction", slot.as_str()))
            }
            other => DbError::Sqlite(other),
        })?;
    ciborium::from_reader(state.as_slice()).map_err(|e| DbError::Serialization(e.to_string()))
}

/// Clear a slot (after handoff retires the next construction into active).
pub fn clear(conn: &Connection, slot: Slot) -> Result<()> {
    conn.execute(
        "DELETE FROM construction_slots WHERE slot = ?1",
        [slot.as_str()],
    )?;
    Ok(())
}
