//! Read-only aggregations behind the dashboard endpoints.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDateTime;
use itertools::Itertools as _;
use rusqlite::{Connection, OptionalExtension as _, Row};
use serde::Serialize;
use usage_data::gpu_hours::{is_missing_end_time, GpuUsageMap, GpuWindow, JobUsageRecord};

use crate::error::Result;

/// How a user or machine is addressed by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    Name(&'a str),
    Id(i64),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub log_count: i64,
    pub user_count: i64,
    pub machine_count: i64,
    pub session_count: i64,
    pub operation_count: i64,
    pub total_operations: i64,
    pub min_date: Option<String>,
    pub max_date: Option<String>,
}

fn count(conn: &Connection, table: &str) -> Result<i64> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?)
}

pub fn database_stats(conn: &Connection) -> Result<DatabaseStats> {
    let (min_date, max_date) = conn.query_row("SELECT MIN(timestamp), MAX(timestamp) FROM LogEntries", [], |row| {
        Ok((row.get(0)?, row.get(1)?))
    })?;
    Ok(DatabaseStats {
        log_count: count(conn, "LogEntries")?,
        user_count: count(conn, "Users")?,
        machine_count: count(conn, "Machines")?,
        session_count: count(conn, "UserSessions")?,
        operation_count: count(conn, "IOOperations")?,
        total_operations: conn.query_row("SELECT COALESCE(SUM(operation_count), 0) FROM IOOperations", [], |row| {
            row.get(0)
        })?,
        min_date,
        max_date,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub user_id: i64,
    pub username: String,
    pub user_role: Option<String>,
    pub user_affiliation: Option<String>,
    pub session_count: i64,
    pub machine_count: i64,
}

pub fn all_users(conn: &Connection) -> Result<Vec<UserSummary>> {
    let mut stmt = conn.prepare(
        "SELECT u.user_id, u.username, u.user_role, u.user_affiliation,
                COUNT(DISTINCT us.session_id), COUNT(DISTINCT us.machine_id)
         FROM Users u
         LEFT JOIN UserSessions us ON u.user_id = us.user_id
         GROUP BY u.user_id
         ORDER BY COUNT(DISTINCT us.session_id) DESC, u.username",
    )?;
    let users = stmt
        .query_map([], |row| {
            Ok(UserSummary {
                user_id: row.get(0)?,
                username: row.get(1)?,
                user_role: row.get(2)?,
                user_affiliation: row.get(3)?,
                session_count: row.get(4)?,
                machine_count: row.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(users)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineSummary {
    pub machine_id: i64,
    pub machine_name: String,
    pub machine_type: String,
    pub session_count: i64,
    pub user_count: i64,
}

pub fn all_machines(conn: &Connection) -> Result<Vec<MachineSummary>> {
    let mut stmt = conn.prepare(
        "SELECT m.machine_id, m.machine_name, m.machine_type,
                COUNT(DISTINCT us.session_id), COUNT(DISTINCT us.user_id)
         FROM Machines m
         LEFT JOIN UserSessions us ON m.machine_id = us.machine_id
         GROUP BY m.machine_id
         ORDER BY COUNT(DISTINCT us.session_id) DESC, m.machine_name",
    )?;
    let machines = stmt
        .query_map([], |row| {
            Ok(MachineSummary {
                machine_id: row.get(0)?,
                machine_name: row.get(1)?,
                machine_type: row.get(2)?,
                session_count: row.get(3)?,
                user_count: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(machines)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BucketTotal {
    pub display_text: String,
    pub total_operations: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimePoint {
    pub timestamp: String,
    pub total_operations: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub user_id: i64,
    pub username: String,
    pub user_role: Option<String>,
    pub user_affiliation: Option<String>,
    pub full_name: Option<String>,
    pub title: Option<String>,
    pub image_url: Option<String>,
    pub is_alumni: bool,
}

impl UserProfile {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(UserProfile {
            user_id: row.get("user_id")?,
            username: row.get("username")?,
            user_role: row.get("user_role")?,
            user_affiliation: row.get("user_affiliation")?,
            full_name: row.get("full_name")?,
            title: row.get("title")?,
            image_url: row.get("image_url")?,
            is_alumni: row.get("is_alumni")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineSessions {
    pub machine_id: i64,
    pub machine_name: String,
    pub machine_type: String,
    pub session_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserUsage {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub machines: Vec<MachineSessions>,
    pub io_distribution: Vec<BucketTotal>,
    pub time_series: Vec<TimePoint>,
}

pub fn user_profile(conn: &Connection, user: Lookup<'_>) -> Result<Option<UserProfile>> {
    const COLUMNS: &str =
        "SELECT user_id, username, user_role, user_affiliation, full_name, title, image_url, is_alumni FROM Users";
    let profile = match user {
        Lookup::Name(name) => conn
            .query_row(&format!("{COLUMNS} WHERE username = ?1"), [name], UserProfile::from_row)
            .optional()?,
        Lookup::Id(id) => conn
            .query_row(&format!("{COLUMNS} WHERE user_id = ?1"), [id], UserProfile::from_row)
            .optional()?,
    };
    Ok(profile)
}

fn bucket_totals(conn: &Connection, filter: &str, id: i64) -> Result<Vec<BucketTotal>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT r.display_text, SUM(io.operation_count)
         FROM IOOperations io
         JOIN UserSessions us ON io.session_id = us.session_id
         JOIN IOSizeRanges r ON io.range_id = r.range_id
         WHERE {filter} = ?1
         GROUP BY r.range_id
         ORDER BY r.min_bytes, r.max_bytes"
    ))?;
    let buckets = stmt
        .query_map([id], |row| {
            Ok(BucketTotal {
                display_text: row.get(0)?,
                total_operations: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(buckets)
}

fn time_points(conn: &Connection, filter: &str, id: i64) -> Result<Vec<TimePoint>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT l.timestamp, SUM(io.operation_count)
         FROM IOOperations io
         JOIN UserSessions us ON io.session_id = us.session_id
         JOIN LogEntries l ON us.log_id = l.log_id
         WHERE {filter} = ?1
         GROUP BY l.timestamp
         ORDER BY l.timestamp"
    ))?;
    let points = stmt
        .query_map([id], |row| {
            Ok(TimePoint {
                timestamp: row.get(0)?,
                total_operations: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(points)
}

pub fn user_usage(conn: &Connection, user: Lookup<'_>) -> Result<Option<UserUsage>> {
    let Some(profile) = user_profile(conn, user)? else {
        return Ok(None);
    };
    let mut stmt = conn.prepare(
        "SELECT m.machine_id, m.machine_name, m.machine_type, COUNT(DISTINCT us.session_id)
         FROM Machines m
         JOIN UserSessions us ON m.machine_id = us.machine_id
         WHERE us.user_id = ?1
         GROUP BY m.machine_id
         ORDER BY COUNT(DISTINCT us.session_id) DESC, m.machine_name",
    )?;
    let machines = stmt
        .query_map([profile.user_id], |row| {
            Ok(MachineSessions {
                machine_id: row.get(0)?,
                machine_name: row.get(1)?,
                machine_type: row.get(2)?,
                session_count: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(UserUsage {
        io_distribution: bucket_totals(conn, "us.user_id", profile.user_id)?,
        time_series: time_points(conn, "us.user_id", profile.user_id)?,
        machines,
        profile,
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSessions {
    pub user_id: i64,
    pub username: String,
    pub user_role: Option<String>,
    pub user_affiliation: Option<String>,
    pub session_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineUsage {
    pub machine_id: i64,
    pub machine_name: String,
    pub machine_type: String,
    pub users: Vec<UserSessions>,
    pub io_distribution: Vec<BucketTotal>,
    pub time_series: Vec<TimePoint>,
}

/// By name, the first machine of that name (names are only unique together with the type).
pub fn machine_usage(conn: &Connection, machine: Lookup<'_>) -> Result<Option<MachineUsage>> {
    const COLUMNS: &str = "SELECT machine_id, machine_name, machine_type FROM Machines";
    let header = |row: &Row<'_>| -> rusqlite::Result<(i64, String, String)> { Ok((row.get(0)?, row.get(1)?, row.get(2)?)) };
    let found = match machine {
        Lookup::Name(name) => conn
            .query_row(&format!("{COLUMNS} WHERE machine_name = ?1 ORDER BY machine_id LIMIT 1"), [name], header)
            .optional()?,
        Lookup::Id(id) => conn.query_row(&format!("{COLUMNS} WHERE machine_id = ?1"), [id], header).optional()?,
    };
    let Some((machine_id, machine_name, machine_type)) = found else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT u.user_id, u.username, u.user_role, u.user_affiliation, COUNT(DISTINCT us.session_id)
         FROM Users u
         JOIN UserSessions us ON u.user_id = us.user_id
         WHERE us.machine_id = ?1
         GROUP BY u.user_id
         ORDER BY COUNT(DISTINCT us.session_id) DESC, u.username",
    )?;
    let users = stmt
        .query_map([machine_id], |row| {
            Ok(UserSessions {
                user_id: row.get(0)?,
                username: row.get(1)?,
                user_role: row.get(2)?,
                user_affiliation: row.get(3)?,
                session_count: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(MachineUsage {
        io_distribution: bucket_totals(conn, "us.machine_id", machine_id)?,
        time_series: time_points(conn, "us.machine_id", machine_id)?,
        machine_id,
        machine_name,
        machine_type,
        users,
    }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityPoint {
    pub timestamp: String,
    pub total_operations: i64,
    pub active_users: i64,
    pub active_machines: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatternPoint {
    /// `00`..`23` for the hour of day, `0` (Sunday)..`6` for the day of week
    pub slot: String,
    pub total_operations: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimeUsage {
    pub time_series: Vec<ActivityPoint>,
    pub hourly_pattern: Vec<PatternPoint>,
    pub daily_pattern: Vec<PatternPoint>,
}

fn pattern(conn: &Connection, strftime: &str) -> Result<Vec<PatternPoint>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT strftime('{strftime}', l.timestamp) AS slot, SUM(io.operation_count)
         FROM IOOperations io
         JOIN UserSessions us ON io.session_id = us.session_id
         JOIN LogEntries l ON us.log_id = l.log_id
         GROUP BY slot
         ORDER BY slot"
    ))?;
    let points = stmt
        .query_map([], |row| {
            Ok(PatternPoint {
                slot: row.get(0)?,
                total_operations: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(points)
}

pub fn time_usage(conn: &Connection) -> Result<TimeUsage> {
    let mut stmt = conn.prepare(
        "SELECT l.timestamp, SUM(io.operation_count), COUNT(DISTINCT us.user_id), COUNT(DISTINCT us.machine_id)
         FROM IOOperations io
         JOIN UserSessions us ON io.session_id = us.session_id
         JOIN LogEntries l ON us.log_id = l.log_id
         GROUP BY l.timestamp
         ORDER BY l.timestamp",
    )?;
    let time_series = stmt
        .query_map([], |row| {
            Ok(ActivityPoint {
                timestamp: row.get(0)?,
                total_operations: row.get(1)?,
                active_users: row.get(2)?,
                active_machines: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(TimeUsage {
        time_series,
        hourly_pattern: pattern(conn, "%H")?,
        daily_pattern: pattern(conn, "%w")?,
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RangeTotal {
    pub display_text: String,
    pub min_bytes: i64,
    pub max_bytes: i64,
    pub total_operations: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeDistribution {
    pub overall: Vec<RangeTotal>,
    pub by_role: BTreeMap<String, Vec<BucketTotal>>,
    pub by_machine_type: BTreeMap<String, Vec<BucketTotal>>,
}

/// `group_column` must be a column of the joined `Users u` / `Machines m`.
fn grouped_buckets(conn: &Connection, group_column: &str) -> Result<BTreeMap<String, Vec<BucketTotal>>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {group_column}, r.display_text, SUM(io.operation_count)
         FROM IOOperations io
         JOIN UserSessions us ON io.session_id = us.session_id
         JOIN Users u ON us.user_id = u.user_id
         JOIN Machines m ON us.machine_id = m.machine_id
         JOIN IOSizeRanges r ON io.range_id = r.range_id
         WHERE {group_column} IS NOT NULL
         GROUP BY {group_column}, r.range_id
         ORDER BY {group_column}, r.min_bytes, r.max_bytes"
    ))?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                BucketTotal {
                    display_text: row.get(1)?,
                    total_operations: row.get(2)?,
                },
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows.into_iter().into_group_map().into_iter().collect())
}

pub fn size_distribution(conn: &Connection) -> Result<SizeDistribution> {
    let mut stmt = conn.prepare(
        "SELECT r.display_text, r.min_bytes, r.max_bytes, SUM(io.operation_count)
         FROM IOOperations io
         JOIN IOSizeRanges r ON io.range_id = r.range_id
         GROUP BY r.range_id
         ORDER BY r.min_bytes, r.max_bytes",
    )?;
    let overall = stmt
        .query_map([], |row| {
            Ok(RangeTotal {
                display_text: row.get(0)?,
                min_bytes: row.get(1)?,
                max_bytes: row.get(2)?,
                total_operations: row.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SizeDistribution {
        overall,
        by_role: grouped_buckets(conn, "u.user_role")?,
        by_machine_type: grouped_buckets(conn, "m.machine_type")?,
    })
}

/// Operations of `username` at every known log timestamp, `0` where the user was not active.
pub fn user_time_series(conn: &Connection, username: &str) -> Result<Vec<TimePoint>> {
    let mut stmt = conn.prepare("SELECT DISTINCT timestamp FROM LogEntries ORDER BY timestamp")?;
    let timestamps = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut stmt = conn.prepare(
        "SELECT l.timestamp, SUM(io.operation_count)
         FROM IOOperations io
         JOIN UserSessions us ON io.session_id = us.session_id
         JOIN Users u ON us.user_id = u.user_id
         JOIN LogEntries l ON us.log_id = l.log_id
         WHERE u.username = ?1
         GROUP BY l.timestamp",
    )?;
    let active: HashMap<String, i64> = stmt
        .query_map([username], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<_, _>>()?;

    Ok(timestamps
        .into_iter()
        .map(|timestamp| TimePoint {
            total_operations: active.get(&timestamp).copied().unwrap_or(0),
            timestamp,
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopUser {
    pub username: String,
    pub user_role: Option<String>,
    pub user_affiliation: Option<String>,
    pub total_operations: i64,
    pub session_count: i64,
    pub machine_count: i64,
    pub machines: Vec<String>,
}

impl TopUser {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let machines: Option<String> = row.get(6)?;
        Ok(TopUser {
            username: row.get(0)?,
            user_role: row.get(1)?,
            user_affiliation: row.get(2)?,
            total_operations: row.get(3)?,
            session_count: row.get(4)?,
            machine_count: row.get(5)?,
            machines: machines
                .map(|machines| machines.split(',').map(str::to_owned).sorted().collect())
                .unwrap_or_default(),
        })
    }
}

const TOP_USER_COLUMNS: &str = "u.username, u.user_role, u.user_affiliation, SUM(io.operation_count) AS total_operations,
    COUNT(DISTINCT us.session_id), COUNT(DISTINCT m.machine_id), GROUP_CONCAT(DISTINCT m.machine_name)";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateRange {
    pub min_date: Option<String>,
    pub max_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopUsers {
    pub users: Vec<TopUser>,
    pub date_range: DateRange,
}

/// Heaviest users over the `log_count` most recent snapshots.
pub fn top_users_recent_logs(conn: &Connection, log_count: usize, user_count: usize) -> Result<TopUsers> {
    let (log_count, user_count) = (log_count as i64, user_count as i64);
    let mut stmt = conn.prepare(&format!(
        "WITH RecentLogs AS (SELECT log_id FROM LogEntries ORDER BY timestamp DESC LIMIT ?1)
         SELECT {TOP_USER_COLUMNS}
         FROM IOOperations io
         JOIN UserSessions us ON io.session_id = us.session_id
         JOIN Users u ON us.user_id = u.user_id
         JOIN Machines m ON us.machine_id = m.machine_id
         JOIN RecentLogs rl ON us.log_id = rl.log_id
         GROUP BY u.user_id
         ORDER BY total_operations DESC, u.username
         LIMIT ?2"
    ))?;
    let users = stmt
        .query_map([log_count, user_count], TopUser::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    let date_range = conn.query_row(
        "WITH RecentLogs AS (SELECT timestamp FROM LogEntries ORDER BY timestamp DESC LIMIT ?1)
         SELECT MIN(timestamp), MAX(timestamp) FROM RecentLogs",
        [log_count],
        |row| {
            Ok(DateRange {
                min_date: row.get(0)?,
                max_date: row.get(1)?,
            })
        },
    )?;

    Ok(TopUsers { users, date_range })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoricLog {
    pub log_id: i64,
    pub timestamp: String,
    pub top_users: Vec<TopUser>,
}

/// Every snapshot, newest first, with its `top_n` users.
pub fn historic_usage(conn: &Connection, top_n: usize) -> Result<Vec<HistoricLog>> {
    let mut logs = conn.prepare("SELECT log_id, timestamp FROM LogEntries ORDER BY timestamp DESC")?;
    let mut top = conn.prepare(&format!(
        "SELECT {TOP_USER_COLUMNS}
         FROM IOOperations io
         JOIN UserSessions us ON io.session_id = us.session_id
         JOIN Users u ON us.user_id = u.user_id
         JOIN Machines m ON us.machine_id = m.machine_id
         WHERE us.log_id = ?1
         GROUP BY u.user_id
         ORDER BY total_operations DESC, u.username
         LIMIT ?2"
    ))?;

    let entries = logs
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    entries
        .into_iter()
        .map(|(log_id, timestamp)| -> Result<HistoricLog> {
            let top_users = top
                .query_map([log_id, top_n as i64], TopUser::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(HistoricLog {
                log_id,
                timestamp,
                top_users,
            })
        })
        .collect()
}

/// Where GPU accounting takes its jobs from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobSource {
    /// The latest slurm snapshot only.
    #[default]
    Live,
    /// Every job ever seen, so jobs that ended between snapshots still count.
    History,
}

impl JobSource {
    fn table(&self) -> &'static str {
        match self {
            JobSource::Live => "Jobs",
            JobSource::History => "JobHistory",
        }
    }

    /// When the job was last seen, if it is no longer in the live table.
    fn evicted_at(&self) -> &'static str {
        match self {
            JobSource::Live => "NULL",
            JobSource::History => {
                "CASE WHEN NOT EXISTS (SELECT 1 FROM Jobs live WHERE live.job_id = j.job_id) THEN j.last_seen END"
            }
        }
    }
}

/// A history job that left the live table without an end time is taken to have ended when it
/// was last seen, so it drops out of the window instead of counting as still running.
pub fn job_usage_records(conn: &Connection, user: Option<&str>, source: JobSource) -> Result<Vec<JobUsageRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT u.username, m.machine_name, j.gpus, j.runtime, j.end_time, {evicted_at}
         FROM {table} j
         JOIN Machines m ON j.machine_id = m.machine_id
         JOIN Users u ON j.user_id = u.user_id
         WHERE ?1 IS NULL OR u.username = ?1",
        table = source.table(),
        evicted_at = source.evicted_at(),
    ))?;
    let records = stmt
        .query_map([user], |row| {
            let end_time = row.get::<_, Option<String>>(4)?.unwrap_or_default();
            let evicted_at: Option<String> = row.get(5)?;
            Ok(JobUsageRecord {
                user: row.get(0)?,
                machine: row.get(1)?,
                gpus: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                runtime: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                end_time: match evicted_at {
                    Some(last_seen) if is_missing_end_time(&end_time) => last_seen,
                    _ => end_time,
                },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(records)
}

/// Normalised GPU usage per user and machine within the rolling window ending at `now`.
pub fn gpu_usage_per_user(
    conn: &Connection,
    user: Option<&str>,
    source: JobSource,
    window: GpuWindow,
    now: NaiveDateTime,
) -> Result<GpuUsageMap> {
    Ok(GpuUsageMap::aggregate(job_usage_records(conn, user, source)?, window, now))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRow {
    pub job_id: i64,
    pub username: String,
    pub machine_name: String,
    pub partition: Option<String>,
    pub cpus: i64,
    pub memory: i64,
    pub gpus: i64,
    pub runtime: String,
    pub state: String,
    pub command: Option<String>,
    pub end_time: Option<String>,
    pub created_at: Option<String>,
}

/// The current snapshot, optionally for one user only.
pub fn jobs(conn: &Connection, user: Option<&str>) -> Result<Vec<JobRow>> {
    let mut stmt = conn.prepare(
        "SELECT j.job_id, u.username, m.machine_name, j.partition, j.cpus, j.memory, j.gpus,
                j.runtime, j.state, j.command, j.end_time, j.created_at
         FROM Jobs j
         JOIN Machines m ON j.machine_id = m.machine_id
         JOIN Users u ON j.user_id = u.user_id
         WHERE ?1 IS NULL OR u.username = ?1
         ORDER BY j.job_id",
    )?;
    let jobs = stmt
        .query_map([user], |row| {
            Ok(JobRow {
                job_id: row.get(0)?,
                username: row.get(1)?,
                machine_name: row.get(2)?,
                partition: row.get(3)?,
                cpus: row.get(4)?,
                memory: row.get(5)?,
                gpus: row.get(6)?,
                runtime: row.get(7)?,
                state: row.get(8)?,
                command: row.get(9)?,
                end_time: row.get(10)?,
                created_at: row.get(11)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(jobs)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserResourceUsage {
    pub user: String,
    pub user_role: Option<String>,
    pub total_cpus: i64,
    pub total_memory_gb: f64,
    pub total_gpus: i64,
    pub running_jobs: i64,
    pub hosts: Vec<String>,
}

/// Resources held by running jobs, per user, biggest GPU consumers first.
pub fn current_usage_summary(conn: &Connection) -> Result<Vec<UserResourceUsage>> {
    let mut stmt = conn.prepare(
        "SELECT u.username, u.user_role, SUM(j.cpus), SUM(j.memory), SUM(j.gpus), COUNT(*),
                GROUP_CONCAT(DISTINCT m.machine_name)
         FROM Jobs j
         JOIN Machines m ON j.machine_id = m.machine_id
         JOIN Users u ON j.user_id = u.user_id
         WHERE j.state = 'RUNNING'
         GROUP BY u.user_id
         ORDER BY SUM(j.gpus) DESC, u.username",
    )?;
    let usage = stmt
        .query_map([], |row| {
            let memory_mb: i64 = row.get(3)?;
            let hosts: Option<String> = row.get(6)?;
            let hosts = hosts
                .iter()
                .flat_map(|hosts| hosts.split(','))
                .filter(|host| !host.is_empty() && *host != "None assigned")
                .map(str::to_owned)
                .sorted()
                .collect_vec();
            Ok(UserResourceUsage {
                user: row.get(0)?,
                user_role: row.get(1)?,
                total_cpus: row.get(2)?,
                total_memory_gb: (memory_mb as f64 / 1024f64 * 100f64).round() / 100f64,
                total_gpus: row.get(4)?,
                running_jobs: row.get(5)?,
                hosts: if hosts.is_empty() { vec!["None assigned".to_owned()] } else { hosts },
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(usage)
}
