//! Bookkeeping for the periodic ingestion tasks.

use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Success,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "success",
            TaskStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskLog {
    pub log_id: i64,
    pub timestamp: String,
    pub task_name: String,
    pub status: String,
    pub message: Option<String>,
    pub details: Option<String>,
}

pub fn log_task_execution_at(
    conn: &Connection,
    at: NaiveDateTime,
    task_name: &str,
    status: TaskStatus,
    message: Option<&str>,
    details: Option<&str>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO PeriodicTaskLogs (timestamp, task_name, status, message, details) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            at.format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
            task_name,
            status.as_str(),
            message,
            details
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn log_task_execution(
    conn: &Connection,
    task_name: &str,
    status: TaskStatus,
    message: Option<&str>,
    details: Option<&str>,
) -> Result<i64> {
    log_task_execution_at(conn, Local::now().naive_local(), task_name, status, message, details)
}

/// Newest first.
pub fn task_logs(conn: &Connection, limit: usize, offset: usize) -> Result<Vec<TaskLog>> {
    let mut stmt = conn.prepare(
        "SELECT log_id, timestamp, task_name, status, message, details
         FROM PeriodicTaskLogs
         ORDER BY timestamp DESC, log_id DESC
         LIMIT ?1 OFFSET ?2",
    )?;
    let logs = stmt
        .query_map([limit as i64, offset as i64], |row| {
            Ok(TaskLog {
                log_id: row.get(0)?,
                timestamp: row.get(1)?,
                task_name: row.get(2)?,
                status: row.get(3)?,
                message: row.get(4)?,
                details: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(logs)
}

pub fn task_logs_count(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM PeriodicTaskLogs", [], |row| row.get(0))?)
}
