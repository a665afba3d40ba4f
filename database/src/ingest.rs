//! Writes parsed I/O histogram logs into the store.
//!
//! One file is one transaction: either every session and bucket of the file lands, or nothing does.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension as _};
use serde::Serialize;
use tracing::{debug, error, info, instrument};
use usage_data::{
    iolog::{self, LogLine, LogTimestamp, SessionHeader},
    size::SizeRange,
};

use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub log_entries: usize,
    pub sessions: usize,
    pub operations: usize,
    /// histogram lines that appeared before any session header
    pub orphaned_buckets: usize,
}

pub fn log_entry_id(conn: &Connection, unix_timestamp: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT log_id FROM LogEntries WHERE unix_timestamp = ?1",
            [unix_timestamp],
            |row| row.get(0),
        )
        .optional()?)
}

/// Existing row for `unix_timestamp`, or a new one.
pub fn get_or_create_log_entry(conn: &Connection, entry: &LogTimestamp) -> Result<i64> {
    if let Some(log_id) = log_entry_id(conn, entry.unix_timestamp)? {
        debug!(log_id, unix_timestamp = entry.unix_timestamp, "log entry already known");
        return Ok(log_id);
    }
    conn.execute(
        "INSERT INTO LogEntries (timestamp, unix_timestamp) VALUES (?1, ?2)",
        params![entry.timestamp_text(), entry.unix_timestamp],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Role and affiliation are only written on creation, later sightings do not change them.
pub fn get_or_create_user(conn: &Connection, username: &str, role: Option<&str>, affiliation: Option<&str>) -> Result<i64> {
    if let Some(user_id) = conn
        .query_row("SELECT user_id FROM Users WHERE username = ?1", [username], |row| row.get(0))
        .optional()?
    {
        return Ok(user_id);
    }
    conn.execute(
        "INSERT INTO Users (username, user_role, user_affiliation) VALUES (?1, ?2, ?3)",
        params![username, role, affiliation],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_or_create_machine(conn: &Connection, name: &str, machine_type: &str) -> Result<i64> {
    if let Some(machine_id) = conn
        .query_row(
            "SELECT machine_id FROM Machines WHERE machine_name = ?1 AND machine_type = ?2",
            [name, machine_type],
            |row| row.get(0),
        )
        .optional()?
    {
        return Ok(machine_id);
    }
    conn.execute(
        "INSERT INTO Machines (machine_name, machine_type) VALUES (?1, ?2)",
        [name, machine_type],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Buckets are keyed on their byte bounds, the label of the first sighting sticks.
pub fn get_or_create_size_range(conn: &Connection, range: &SizeRange) -> Result<i64> {
    if let Some(range_id) = conn
        .query_row(
            "SELECT range_id FROM IOSizeRanges WHERE min_bytes = ?1 AND max_bytes = ?2",
            [*range.min, *range.max],
            |row| row.get(0),
        )
        .optional()?
    {
        return Ok(range_id);
    }
    conn.execute(
        "INSERT INTO IOSizeRanges (min_bytes, max_bytes, display_text) VALUES (?1, ?2, ?3)",
        params![*range.min, *range.max, range.display_text],
    )?;
    Ok(conn.last_insert_rowid())
}

/// The session of `(log, user, machine)`; a conflicting insert resolves to the existing row.
pub fn get_or_create_session(conn: &Connection, log_id: i64, user_id: i64, machine_id: i64) -> Result<i64> {
    let inserted = conn.execute(
        "INSERT INTO UserSessions (log_id, user_id, machine_id) VALUES (?1, ?2, ?3)
         ON CONFLICT (log_id, user_id, machine_id) DO NOTHING",
        [log_id, user_id, machine_id],
    )?;
    if inserted == 1 {
        return Ok(conn.last_insert_rowid());
    }
    Ok(conn.query_row(
        "SELECT session_id FROM UserSessions WHERE log_id = ?1 AND user_id = ?2 AND machine_id = ?3",
        [log_id, user_id, machine_id],
        |row| row.get(0),
    )?)
}

/// Last write wins: a re-ingested bucket overwrites the count instead of adding to it.
pub fn upsert_operation(conn: &Connection, session_id: i64, range_id: i64, count: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO IOOperations (session_id, range_id, operation_count) VALUES (?1, ?2, ?3)
         ON CONFLICT (session_id, range_id) DO UPDATE SET operation_count = excluded.operation_count",
        [session_id, range_id, count],
    )?;
    Ok(())
}

fn store_session(conn: &Connection, log_id: i64, header: &SessionHeader) -> Result<i64> {
    let user_id = get_or_create_user(conn, &header.user, header.role.as_deref(), header.affiliation.as_deref())?;
    let machine_id = get_or_create_machine(conn, &header.machine, &header.machine_type)?;
    get_or_create_session(conn, log_id, user_id, machine_id)
}

/// Folds parsed lines into rows. Sessions attach to the latest timestamp header, buckets to the
/// latest session of that header; anything without such an anchor is dropped.
pub fn write_log_lines(conn: &Connection, lines: &[LogLine]) -> Result<IngestSummary> {
    let mut summary = IngestSummary::default();
    let mut current_log: Option<i64> = None;
    let mut current_session: Option<i64> = None;

    for line in lines {
        match line {
            LogLine::Timestamp(entry) => {
                current_log = Some(get_or_create_log_entry(conn, entry)?);
                current_session = None;
                summary.log_entries += 1;
            }
            LogLine::Session(header) => {
                let Some(log_id) = current_log else {
                    debug!(?header, "session header before any timestamp, ignored");
                    continue;
                };
                current_session = Some(store_session(conn, log_id, header)?);
                summary.sessions += 1;
            }
            LogLine::Histogram(bucket) => {
                let Some(session_id) = current_session else {
                    summary.orphaned_buckets += 1;
                    continue;
                };
                let range_id = get_or_create_size_range(conn, &bucket.range)?;
                upsert_operation(conn, session_id, range_id, bucket.operation_count)?;
                summary.operations += 1;
            }
        }
    }

    Ok(summary)
}

/// Parses `content` and stores it in a single transaction. Any error rolls everything back.
pub fn store_log_content(conn: &mut Connection, content: &str) -> Result<IngestSummary> {
    let lines = iolog::parse_log(content)?;
    let tx = conn.transaction()?;
    let summary = write_log_lines(&tx, &lines)?;
    tx.commit()?;
    Ok(summary)
}

/// `nfs.log` processed on 2025-03-01 becomes `nfs_2025-03-01.log`.
pub fn archive_file_name(file_name: &str, processed_on: NaiveDate) -> String {
    let date = processed_on.format("%Y-%m-%d");
    match file_name.strip_suffix(".log") {
        Some(stem) => format!("{stem}_{date}.log"),
        None => format!("{file_name}_{date}"),
    }
}

fn archive(log_path: &Path, archive_dir: &Path, processed_on: NaiveDate) -> Result<PathBuf> {
    let file_name = log_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = archive_dir.join(archive_file_name(&file_name, processed_on));
    std::fs::create_dir_all(archive_dir).map_err(StoreError::file("creating", archive_dir))?;
    if std::fs::rename(log_path, &target).is_err() {
        // rename does not cross filesystems
        std::fs::copy(log_path, &target).map_err(StoreError::file("copying", log_path))?;
        std::fs::remove_file(log_path).map_err(StoreError::file("removing", log_path))?;
    }
    Ok(target)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFile {
    pub summary: IngestSummary,
    pub archived_to: Option<PathBuf>,
}

/// Reads, stores and (optionally) archives one log file.
pub fn try_process_log_file(conn: &mut Connection, log_path: &Path, archive_dir: Option<&Path>) -> Result<ProcessedFile> {
    let content = std::fs::read_to_string(log_path).map_err(StoreError::file("reading", log_path))?;
    let summary = store_log_content(conn, &content)?;
    let archived_to = archive_dir
        .map(|dir| archive(log_path, dir, Local::now().date_naive()))
        .transpose()?;
    Ok(ProcessedFile { summary, archived_to })
}

/// `true` if the file was stored. A failed file stays where it is so the next run retries it.
#[instrument(skip(conn))]
pub fn process_log_file(conn: &mut Connection, log_path: &Path, archive_dir: Option<&Path>) -> bool {
    match try_process_log_file(conn, log_path, archive_dir) {
        Ok(ProcessedFile { summary, archived_to }) => {
            info!(?summary, ?archived_to, "processed log file");
            true
        }
        Err(e) => {
            error!("processing log file {}: {e}", log_path.display());
            false
        }
    }
}
