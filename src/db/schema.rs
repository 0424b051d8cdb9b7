use rusqlite::Connection;

pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS kills (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            match_id      TEXT    NOT NULL,
            tick          INTEGER NOT NULL,
            ts            TEXT    NOT NULL,
            killer_id     INTEGER,
            victim_id     INTEGER NOT NULL,
            x             REAL    NOT NULL,
            y             REAL    NOT NULL,
            victim_length INTEGER NOT NULL,
            killer_length INTEGER,
            reason        TEXT    NOT NULL,
            bounty        REAL    NOT NULL DEFAULT 0
        );

        CREATE INDEX IF NOT EXISTS kills_match_tick ON kills(match_id, tick);
        ",
    )
}
