use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tracing::{debug, warn};

use super::Database;
use crate::game::outbound::{KillLog, KillRecord, OutboundError};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StoredKill {
    pub id: i64,
    pub match_id: String,
    pub tick: i64,
    pub ts: String,
    pub killer_id: Option<i64>,
    pub victim_id: i64,
    pub x: f64,
    pub y: f64,
    pub victim_length: i64,
    pub killer_length: Option<i64>,
    pub reason: String,
    pub bounty: f64,
}

impl Database {
    pub fn insert_kill(&self, record: &KillRecord) -> rusqlite::Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO kills (match_id, tick, ts, killer_id, victim_id, x, y,
                                victim_length, killer_length, reason, bounty)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                record.match_id,
                record.tick as i64,
                record.timestamp.to_rfc3339(),
                record.killer_id.map(|k| k as i64),
                record.victim_id as i64,
                record.x,
                record.y,
                record.victim_length as i64,
                record.killer_length.map(|l| l as i64),
                record.reason.as_str(),
                record.bounty,
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn recent_kills(&self, limit: u32) -> rusqlite::Result<Vec<StoredKill>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, match_id, tick, ts, killer_id, victim_id, x, y,
                    victim_length, killer_length, reason, bounty
             FROM kills ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit], |row| {
            Ok(StoredKill {
                id: row.get(0)?,
                match_id: row.get(1)?,
                tick: row.get(2)?,
                ts: row.get(3)?,
                killer_id: row.get(4)?,
                victim_id: row.get(5)?,
                x: row.get(6)?,
                y: row.get(7)?,
                victim_length: row.get(8)?,
                killer_length: row.get(9)?,
                reason: row.get(10)?,
                bounty: row.get(11)?,
            })
        })?;
        let kills = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(kills)
    }
}

/// Kill log backed by SQLite. Records are queued to a writer thread so the
/// caller never waits on disk.
pub struct SqliteKillLog {
    tx: mpsc::Sender<KillRecord>,
}

impl SqliteKillLog {
    pub fn spawn(db: Arc<Database>) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel::<KillRecord>();
        thread::Builder::new()
            .name("kill-log".into())
            .spawn(move || {
                for record in rx {
                    if let Err(e) = db.insert_kill(&record) {
                        warn!(error = %e, victim = record.victim_id, "failed to store kill");
                    }
                }
                debug!("kill log writer stopped");
            })?;
        Ok(SqliteKillLog { tx })
    }
}

impl KillLog for SqliteKillLog {
    fn log(&self, record: &KillRecord) -> Result<(), OutboundError> {
        self.tx
            .send(record.clone())
            .map_err(|_| OutboundError::Unavailable("writer thread stopped".into()))
    }
}
