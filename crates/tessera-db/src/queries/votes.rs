//! Key-vote queries: each replica's vote on the verification key a
//! construction froze on.

use rusqlite::Connection;

use tessera_hints::construction::KeyVote;
use tessera_types::NodeId;

use crate::schema::MAX_BOUNDED_ROWS;
use crate::{DbError, Result};

/// Record a vote. The first vote per (voter, construction) wins.
pub fn insert(conn: &Connection, vote: &KeyVote, now: u64) -> Result<()> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM key_votes", [], |row| row.get(0))?;
    if count as u64 >= MAX_BOUNDED_ROWS {
        return Err(DbError::Constraint(format!(
            "key vote table is full ({MAX_BOUNDED_ROWS} rows)"
        )));
    }
    conn.execute(
        "INSERT OR IGNORE INTO key_votes (node_id, construction_id, key_digest, observed_at)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![
            vote.node_id as i64,
            vote.construction_id as i64,
            vote.key_digest.as_slice(),
            now as i64,
        ],
    )?;
    Ok(())
}

/// All votes for a construction, ascending by voter.
pub fn for_construction(conn: &Connection, construction_id: u64) -> Result<Vec<KeyVote>> {
    let mut stmt = conn.prepare(
        "SELECT node_id, key_digest FROM key_votes
         WHERE construction_id = ?1 ORDER BY node_id",
    )?;
    let rows = stmt
        .query_map([construction_id as i64], |row| {
            let digest: Vec<u8> = row.get(1)?;
            let mut key_digest = [0u8; 32];
            key_digest.copy_from_slice(&digest);
            Ok(KeyVote {
                node_id: row.get::<_, i64>(0)? as NodeId,
                construction_id,
                key_digest,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Drop every vote for a retired construction.
pub fn purge_construction(conn: &Connection, construction_id: u64) -> Result<usize> {
    let removed = conn.execute(
        "DELETE FROM key_votes WHERE construction_id = ?1",
        [construction_id as i64],
    )?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::open_memory;

    fn vote(node_id: NodeId, construction_id: u64, digest: u8) -> KeyVote {
        KeyVote {
            node_id,
            construction_id,
            key_digest: [digest; 32],
        }
    }

    #[test]
    fn test_first_vote_wins() {
        let conn = open_memory().expect("open");
        insert(&conn, &vote(1, 1, 0x11), 100).expect("insert");
        insert(&conn, &vote(1, 1, 0x22), 200).expect("conflicting vote");

        let votes = for_construction(&conn, 1).expect("query");
        assert_eq!(votes.len(), 1);
        assert_eq!(votes[0].key_digest, [0x11; 32]);
    }

    #[test]
    fn test_votes_ordered_by_node() {
        let conn = open_memory().expect("open");
        insert(&conn, &vote(3, 1, 0x33), 100).expect("insert");
        insert(&conn, &vote(1, 1, 0x11), 100).expect("insert");
        insert(&conn, &vote(2, 2, 0x22), 100).expect("insert");

        let votes = for_construction(&conn, 1).expect("query");
        assert_eq!(votes.len(), 2);
        assert_eq!(votes[0].node_id, 1);
        assert_eq!(votes[1].node_id, 3);
    }

    #[test]
    fn test_purge() {
        let conn = open_memory().expect("open");
        insert(&conn, &vote(1, 1, 0x11), 100).expect("insert");
        insert(&conn, &vote(1, 2, 0x22), 100).expect("insert");
        assert_eq!(purge_construction(&conn, 1).expect("purge"), 1);
        assert!(for_construction(&conn, 1).expect("query").is_empty());
        assert_eq!(for_construction(&conn, 2).expect("query").len(), 1);
    }
}
