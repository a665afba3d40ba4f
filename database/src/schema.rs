//! Table layout of the usage database and idempotent initialisation.

use rusqlite::Connection;
use tracing::{info, instrument};

use crate::error::Result;

pub const PRAGMAS: &str = "\
PRAGMA journal_mode = WAL;
PRAGMA synchronous  = NORMAL;
PRAGMA foreign_keys = ON;
";

pub const TABLES_DDL: &str = "\
CREATE TABLE IF NOT EXISTS LogEntries (
    log_id          INTEGER PRIMARY KEY,
    timestamp       DATETIME NOT NULL,
    unix_timestamp  INTEGER  NOT NULL,
    UNIQUE(unix_timestamp)
);
CREATE TABLE IF NOT EXISTS Users (
    user_id          INTEGER PRIMARY KEY,
    username         TEXT NOT NULL,
    user_role        TEXT,
    user_affiliation TEXT,
    full_name        TEXT,
    title            TEXT,
    image_url        TEXT,
    is_alumni        INTEGER NOT NULL DEFAULT 0,
    UNIQUE(username)
);
CREATE TABLE IF NOT EXISTS Machines (
    machine_id   INTEGER PRIMARY KEY,
    machine_name TEXT NOT NULL,
    machine_type TEXT NOT NULL,
    UNIQUE(machine_name, machine_type)
);
CREATE TABLE IF NOT EXISTS IOSizeRanges (
    range_id     INTEGER PRIMARY KEY,
    min_bytes    INTEGER NOT NULL,
    max_bytes    INTEGER NOT NULL,
    display_text TEXT    NOT NULL,
    UNIQUE(min_bytes, max_bytes)
);
CREATE TABLE IF NOT EXISTS UserSessions (
    session_id INTEGER PRIMARY KEY,
    log_id     INTEGER NOT NULL REFERENCES LogEntries (log_id),
    user_id    INTEGER NOT NULL REFERENCES Users (user_id),
    machine_id INTEGER NOT NULL REFERENCES Machines (machine_id),
    UNIQUE(log_id, user_id, machine_id)
);
CREATE TABLE IF NOT EXISTS IOOperations (
    operation_id    INTEGER PRIMARY KEY,
    session_id      INTEGER NOT NULL REFERENCES UserSessions (session_id),
    range_id        INTEGER NOT NULL REFERENCES IOSizeRanges (range_id),
    operation_count INTEGER NOT NULL,
    UNIQUE(session_id, range_id)
);
CREATE TABLE IF NOT EXISTS Jobs (
    job_id     INTEGER PRIMARY KEY,
    user_id    INTEGER NOT NULL REFERENCES Users (user_id),
    machine_id INTEGER NOT NULL REFERENCES Machines (machine_id),
    partition  TEXT,
    cpus       INTEGER NOT NULL,
    memory     INTEGER NOT NULL,
    gpus       INTEGER NOT NULL,
    nodes      INTEGER,
    runtime    TEXT    NOT NULL,
    state      TEXT    NOT NULL,
    command    TEXT,
    end_time   TEXT,
    created_at DATETIME
);
CREATE TABLE IF NOT EXISTS JobHistory (
    job_id     INTEGER PRIMARY KEY,
    user_id    INTEGER NOT NULL REFERENCES Users (user_id),
    machine_id INTEGER NOT NULL REFERENCES Machines (machine_id),
    gpus       INTEGER NOT NULL,
    runtime    TEXT    NOT NULL,
    state      TEXT    NOT NULL,
    end_time   TEXT,
    first_seen DATETIME NOT NULL,
    last_seen  DATETIME NOT NULL
);
CREATE TABLE IF NOT EXISTS PeriodicTaskLogs (
    log_id    INTEGER PRIMARY KEY,
    timestamp DATETIME NOT NULL,
    task_name TEXT NOT NULL,
    status    TEXT NOT NULL,
    message   TEXT,
    details   TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_user    ON UserSessions(user_id);
CREATE INDEX IF NOT EXISTS idx_sessions_machine ON UserSessions(machine_id);
CREATE INDEX IF NOT EXISTS idx_logentries_ts    ON LogEntries(timestamp);
";

/// Columns added after the first databases were created: `(table, column, definition)`.
const PATCHED_COLUMNS: [(&str, &str, &str); 8] = [
    ("Users", "full_name", "TEXT"),
    ("Users", "title", "TEXT"),
    ("Users", "image_url", "TEXT"),
    ("Users", "is_alumni", "INTEGER NOT NULL DEFAULT 0"),
    ("Jobs", "partition", "TEXT"),
    ("Jobs", "nodes", "INTEGER"),
    ("Jobs", "end_time", "TEXT"),
    ("Jobs", "created_at", "DATETIME"),
];

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>("name"))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Adds whatever [`PATCHED_COLUMNS`] an older database is missing. Returns the number of columns added.
pub fn patch_columns(conn: &Connection) -> Result<usize> {
    let mut added = 0;
    for (table, column, definition) in PATCHED_COLUMNS {
        if !has_column(conn, table, column)? {
            info!("adding column {table}.{column}");
            conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {definition};"))?;
            added += 1;
        }
    }
    Ok(added)
}

/// Creates all tables (if missing) and patches older layouts. Safe to run on every start.
#[instrument(skip(conn))]
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(PRAGMAS)?;
    conn.execute_batch(TABLES_DDL)?;
    patch_columns(conn)?;
    Ok(())
}
