#![allow(non_snake_case)]

use chrono::NaiveDate;
use color_eyre::Result;
use database::{
    ingest::{archive_file_name, process_log_file, store_log_content, try_process_log_file},
    queries::database_stats,
    Connection,
};

const SNAPSHOT: &str = "\
Log: 2025-03-01 12:00:00 (1740830400)
------------------------------------------------
@rd_client(tikgpu01,gpu)[alice(phd/itet)]:
[512, 1K)  100 |@@@@@@@@@@
[1K, 2K)  20 |@@
@rd_client(tikgpu02,gpu)[bob(staff/dinfk)]:
[512, 1K)  5 |@
[4M, 8M)  1 |
";

fn count(conn: &Connection, table: &str) -> Result<i64> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
}

fn operation_count(conn: &Connection, username: &str, display_text: &str) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT io.operation_count
         FROM IOOperations io
         JOIN UserSessions us ON io.session_id = us.session_id
         JOIN Users u ON us.user_id = u.user_id
         JOIN IOSizeRanges r ON io.range_id = r.range_id
         WHERE u.username = ?1 AND r.display_text = ?2
         ORDER BY us.session_id",
    )?;
    let counts = stmt
        .query_map([username, display_text], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(counts)
}

#[test_log::test]
fn store_log_content__creates_rows() -> Result<()> {
    let mut conn = database::open_in_memory()?;
    let summary = store_log_content(&mut conn, SNAPSHOT)?;
    assert_eq!(summary.log_entries, 1);
    assert_eq!(summary.sessions, 2);
    assert_eq!(summary.operations, 4);

    assert_eq!(count(&conn, "LogEntries")?, 1);
    assert_eq!(count(&conn, "Users")?, 2);
    assert_eq!(count(&conn, "Machines")?, 2);
    assert_eq!(count(&conn, "UserSessions")?, 2);
    // [512, 1K) is shared by both sessions
    assert_eq!(count(&conn, "IOSizeRanges")?, 3);
    assert_eq!(count(&conn, "IOOperations")?, 4);

    let (role, affiliation): (Option<String>, Option<String>) = conn.query_row(
        "SELECT user_role, user_affiliation FROM Users WHERE username = 'alice'",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    assert_eq!(role.as_deref(), Some("phd"));
    assert_eq!(affiliation.as_deref(), Some("itet"));

    let (min, max): (i64, i64) = conn.query_row(
        "SELECT min_bytes, max_bytes FROM IOSizeRanges WHERE display_text = '[4M, 8M)'",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    assert_eq!((min, max), (4 * 1024 * 1024, 8 * 1024 * 1024));
    Ok(())
}

#[test_log::test]
fn store_log_content__idempotent() -> Result<()> {
    let mut conn = database::open_in_memory()?;
    store_log_content(&mut conn, SNAPSHOT)?;
    let first = database_stats(&conn)?;
    store_log_content(&mut conn, SNAPSHOT)?;
    let second = database_stats(&conn)?;

    assert_eq!(first, second);
    assert_eq!(second.log_count, 1);
    assert_eq!(second.session_count, 2);
    assert_eq!(second.operation_count, 4);
    // not doubled
    assert_eq!(second.total_operations, 126);
    Ok(())
}

#[test]
fn store_log_content__last_write_wins() -> Result<()> {
    let mut conn = database::open_in_memory()?;
    store_log_content(&mut conn, SNAPSHOT)?;
    assert_eq!(operation_count(&conn, "alice", "[512, 1K)")?, vec![100]);

    store_log_content(&mut conn, &SNAPSHOT.replace("[512, 1K)  100", "[512, 1K)  150"))?;
    assert_eq!(operation_count(&conn, "alice", "[512, 1K)")?, vec![150]);
    assert_eq!(count(&conn, "IOOperations")?, 4);
    Ok(())
}

#[test]
fn store_log_content__equal_bytes_share_a_bucket() -> Result<()> {
    let mut conn = database::open_in_memory()?;
    store_log_content(
        &mut conn,
        "Log: 2025-03-01 12:00:00 (1740830400)\n\
         @rd_client(n1,cpu)[carol(msc/itet)]:\n\
         [1024, 2048)  3 |\n\
         @rd_client(n2,cpu)[carol(msc/itet)]:\n\
         [1K, 2K)  4 |\n",
    )?;
    assert_eq!(count(&conn, "IOSizeRanges")?, 1);
    let label: String = conn.query_row("SELECT display_text FROM IOSizeRanges", [], |row| row.get(0))?;
    assert_eq!(label, "[1024, 2048)");
    Ok(())
}

#[test]
fn store_log_content__malformed_timestamp_rolls_back() -> Result<()> {
    let mut conn = database::open_in_memory()?;
    store_log_content(&mut conn, SNAPSHOT)?;
    let before = database_stats(&conn)?;

    let broken = format!(
        "{}\nLog: 2025-02-30 12:00:00 (1740916800)\n@rd_client(tikgpu03,gpu)[dave(phd/itet)]:\n[512, 1K)  9 |\n",
        SNAPSHOT.replace("[512, 1K)  100", "[512, 1K)  999")
    );
    assert!(store_log_content(&mut conn, &broken).is_err());

    assert_eq!(database_stats(&conn)?, before);
    assert_eq!(operation_count(&conn, "alice", "[512, 1K)")?, vec![100]);
    assert_eq!(count(&conn, "Users")?, 2);
    Ok(())
}

#[test]
fn store_log_content__sections_and_orphans() -> Result<()> {
    let mut conn = database::open_in_memory()?;
    let content = "\
[512, 1K)  77 |
Log: 2025-03-01 12:00:00 (1740830400)
[512, 1K)  78 |
@rd_client(tikgpu01,gpu)[alice(phd/itet)]:
[512, 1K)  1 |
Log: 2025-03-01 12:10:00 (1740831000)
[512, 1K)  79 |
@rd_client(tikgpu01,gpu)[alice(phd/itet)]:
[512, 1K)  2 |
";
    let summary = store_log_content(&mut conn, content)?;
    assert_eq!(summary.log_entries, 2);
    assert_eq!(summary.sessions, 2);
    assert_eq!(summary.operations, 2);
    assert_eq!(summary.orphaned_buckets, 3);
    assert_eq!(operation_count(&conn, "alice", "[512, 1K)")?, vec![1, 2]);
    Ok(())
}

#[test]
fn archive_file_name__embeds_processing_date() {
    let day = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
    assert_eq!(archive_file_name("nfs.log", day), "nfs_2025-03-01.log");
    assert_eq!(archive_file_name("nfs.txt", day), "nfs.txt_2025-03-01");
}

#[test]
fn process_log_file__archives_on_success() -> Result<()> {
    let incoming = tempfile::tempdir()?;
    let archive = tempfile::tempdir()?;
    let log_path = incoming.path().join("io.log");
    std::fs::write(&log_path, SNAPSHOT)?;

    let mut conn = database::open_in_memory()?;
    let processed = try_process_log_file(&mut conn, &log_path, Some(archive.path()))?;

    assert!(!log_path.exists());
    let archived = processed.archived_to.expect("archived path");
    assert!(archived.exists());
    assert_eq!(archived.parent(), Some(archive.path()));
    let name = archived.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("io_") && name.ends_with(".log"), "{name}");
    assert_eq!(count(&conn, "LogEntries")?, 1);
    Ok(())
}

#[test]
fn process_log_file__failure_keeps_file() -> Result<()> {
    let incoming = tempfile::tempdir()?;
    let archive = tempfile::tempdir()?;
    let log_path = incoming.path().join("broken.log");
    std::fs::write(&log_path, "Log: 2025-13-01 12:00:00 (1)\n")?;

    let mut conn = database::open_in_memory()?;
    assert!(!process_log_file(&mut conn, &log_path, Some(archive.path())));
    assert!(log_path.exists());
    assert_eq!(std::fs::read_dir(archive.path())?.count(), 0);
    assert_eq!(count(&conn, "LogEntries")?, 0);

    assert!(!process_log_file(&mut conn, &incoming.path().join("missing.log"), None));
    Ok(())
}

#[test]
fn process_log_file__without_archive_leaves_file() -> Result<()> {
    let incoming = tempfile::tempdir()?;
    let log_path = incoming.path().join("io.log");
    std::fs::write(&log_path, SNAPSHOT)?;

    let mut conn = database::open_in_memory()?;
    assert!(process_log_file(&mut conn, &log_path, None));
    assert!(log_path.exists());
    Ok(())
}
