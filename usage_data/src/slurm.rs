use std::{fmt::Debug, num::ParseIntError, str::FromStr};

use chrono::NaiveDateTime;
use derive_more::derive::{Deref, Display, From, Into};
use itertools::Itertools as _;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Number of `|`-separated fields per job line:
/// `job_id|user|partition|cpus|memory_mb|gpus|nodes|node_list|elapsed_time|state|command|end_time`
pub const JOB_FIELDS: usize = 12;

/// Stands in for a missing `collected at` header. Deliberately far in the past so stale data is
/// never mistaken for a fresh snapshot.
pub const COLLECTION_TIME_SENTINEL: &str = "1970-01-01 00:00:00";
pub const COLLECTION_TIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

#[allow(clippy::unwrap_used)]
static COLLECTED_AT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"collected at (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2})").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, Into, From, Display, Serialize)]
pub struct SlurmUser(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    Running,
    Completed,
    Failed,
    Cancelled,
    Pending,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Running => "RUNNING",
            JobState::Completed => "COMPLETED",
            JobState::Failed => "FAILED",
            JobState::Cancelled => "CANCELLED",
            JobState::Pending => "PENDING",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = JobParseError;

    /// `CANCELLED by 1234` and friends all collapse into [`JobState::Cancelled`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "RUNNING" => Ok(JobState::Running),
            "COMPLETED" => Ok(JobState::Completed),
            "FAILED" => Ok(JobState::Failed),
            "PENDING" => Ok(JobState::Pending),
            cancelled if cancelled.starts_with("CANCELLED") => Ok(JobState::Cancelled),
            other => Err(JobParseError::State(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobParseError {
    #[error("expected {JOB_FIELDS} fields, got {0}")]
    TooFewFields(usize),
    #[error("field `{field}`: {value:?} is not an integer: {source}")]
    Number {
        field: &'static str,
        value: String,
        source: ParseIntError,
    },
    #[error("unknown job state {0:?}")]
    State(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlurmJob {
    pub job_id: i64,
    pub user: SlurmUser,
    pub partition: String,
    pub cpus: u32,
    pub memory_mb: i64,
    pub gpus: u32,
    pub nodes: u32,
    pub node_list: String,
    /// `[D-]HH:MM:SS`, kept verbatim
    pub elapsed_time: String,
    pub state: JobState,
    pub command: String,
    /// ISO timestamp, or whatever sentinel slurm printed (`Unknown`, ...)
    pub end_time: String,
}

fn number<T: FromStr<Err = ParseIntError>>(field: &'static str, value: &str) -> Result<T, JobParseError> {
    value.trim().parse().map_err(|source| JobParseError::Number {
        field,
        value: value.to_owned(),
        source,
    })
}

impl FromStr for SlurmJob {
    type Err = JobParseError;

    /// Surplus fields are taken to be `|` inside the command, the last field is always the end time.
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields = line.trim().split('|').collect_vec();
        if fields.len() < JOB_FIELDS {
            return Err(JobParseError::TooFewFields(fields.len()));
        }
        let (end_time, fields) = fields.split_last().ok_or(JobParseError::TooFewFields(0))?;

        Ok(SlurmJob {
            job_id: number("job_id", fields[0])?,
            user: SlurmUser(fields[1].to_owned()),
            partition: fields[2].to_owned(),
            cpus: number("cpus", fields[3])?,
            memory_mb: number("memory_mb", fields[4])?,
            gpus: number("gpus", fields[5])?,
            nodes: number("nodes", fields[6])?,
            node_list: fields[7].to_owned(),
            elapsed_time: fields[8].to_owned(),
            state: fields[9].parse()?,
            command: fields[10..].join("|"),
            end_time: (*end_time).to_owned(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line: usize,
    pub error: JobParseError,
}

/// One parsed `slurm.log`: every well-formed job plus the lines that had to be dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmSnapshot {
    pub collected_at: Option<NaiveDateTime>,
    pub jobs: Vec<SlurmJob>,
    pub skipped: Vec<SkippedLine>,
}

impl SlurmSnapshot {
    /// Blank and `#` lines are not jobs. A broken job line only costs that one job.
    pub fn parse(content: &str) -> Self {
        let (jobs, skipped): (Vec<_>, Vec<_>) = content
            .lines()
            .enumerate()
            .filter(|(_, line)| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with('#')
            })
            .map(|(i, line)| line.parse::<SlurmJob>().map_err(|error| SkippedLine { line: i + 1, error }))
            .partition_result();

        for SkippedLine { line, error } in &skipped {
            warn!("slurm log line {line} skipped: {error}");
        }

        SlurmSnapshot {
            collected_at: collection_time(content),
            jobs,
            skipped,
        }
    }

    /// Collection time as stored in the database, [`COLLECTION_TIME_SENTINEL`] if unknown.
    pub fn collected_at_text(&self) -> String {
        self.collected_at
            .map(|time| time.format(COLLECTION_TIME_FMT).to_string())
            .unwrap_or_else(|| COLLECTION_TIME_SENTINEL.to_owned())
    }
}

/// Reads the `# ... collected at YYYY-MM-DD HH:MM:SS` header comment.
pub fn collection_time(content: &str) -> Option<NaiveDateTime> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with('#'))
        .filter_map(|line| COLLECTED_AT.captures(line))
        .find_map(|captures| NaiveDateTime::parse_from_str(&captures[1], COLLECTION_TIME_FMT).ok())
}

pub fn parse_slurm_log(content: &str) -> Vec<SlurmJob> {
    SlurmSnapshot::parse(content).jobs
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    const LINE: &str = "1001|alice|gpu|8|32000|2|1|tikgpu01|01:30:00|RUNNING|python train.py|Unknown";

    #[test]
    fn JobState__from_str__cancelled_by() {
        assert_eq!("CANCELLED".parse::<JobState>(), Ok(JobState::Cancelled));
        assert_eq!("CANCELLED by admin".parse::<JobState>(), Ok(JobState::Cancelled));
        assert_eq!("CANCELLED by 12345".parse::<JobState>(), Ok(JobState::Cancelled));
        assert_eq!("RUNNING".parse::<JobState>(), Ok(JobState::Running));
        assert!(matches!("TIMEOUT".parse::<JobState>(), Err(JobParseError::State(_))));
        assert!(matches!("running".parse::<JobState>(), Err(JobParseError::State(_))));
    }

    #[test]
    fn SlurmJob__from_str() {
        let job: SlurmJob = LINE.parse().unwrap();
        assert_eq!(job.job_id, 1001);
        assert_eq!(*job.user, "alice");
        assert_eq!(job.cpus, 8);
        assert_eq!(job.memory_mb, 32000);
        assert_eq!(job.gpus, 2);
        assert_eq!(job.node_list, "tikgpu01");
        assert_eq!(job.elapsed_time, "01:30:00");
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.command, "python train.py");
        assert_eq!(job.end_time, "Unknown");
    }

    #[test]
    fn SlurmJob__from_str__pipe_in_command() {
        let job: SlurmJob = "7|bob|gpu|1|100|0|1|n1|00:00:01|COMPLETED|cat a | grep b|2025-03-01T10:00:00"
            .parse()
            .unwrap();
        assert_eq!(job.command, "cat a | grep b");
        assert_eq!(job.end_time, "2025-03-01T10:00:00");
    }

    #[test]
    fn SlurmJob__from_str__errors() {
        assert_eq!("1|alice|gpu|8".parse::<SlurmJob>(), Err(JobParseError::TooFewFields(4)));
        assert!(matches!(
            "x|alice|gpu|8|32000|2|1|n|01:00:00|RUNNING|cmd|Unknown".parse::<SlurmJob>(),
            Err(JobParseError::Number { field: "job_id", .. })
        ));
        assert!(matches!(
            "1|alice|gpu|8|32000|two|1|n|01:00:00|RUNNING|cmd|Unknown".parse::<SlurmJob>(),
            Err(JobParseError::Number { field: "gpus", .. })
        ));
    }

    #[test]
    fn SlurmJob__from_str__beyond_i64() {
        assert!(matches!(
            "3|carol|gpu|1|18446744073709551615|1|1|n|01:00:00|RUNNING|cmd|Unknown".parse::<SlurmJob>(),
            Err(JobParseError::Number { field: "memory_mb", .. })
        ));
        assert!(matches!(
            "9223372036854775808|carol|gpu|1|1024|1|1|n|01:00:00|RUNNING|cmd|Unknown".parse::<SlurmJob>(),
            Err(JobParseError::Number { field: "job_id", .. })
        ));
    }

    #[test]
    fn SlurmSnapshot__parse__fault_isolation() {
        let mut lines = (1..=10)
            .map(|i| format!("{i}|user{i}|gpu|4|1000|1|1|node{i}|01:00:00|COMPLETED|cmd|2025-03-01T10:00:00"))
            .collect_vec();
        lines[4] = "5|user5|gpu|4|1000|1|1|node5|01:00:00|EXPLODED|cmd|2025-03-01T10:00:00".to_owned();
        lines[6] = "7|user7|gpu|4|1000|1|1|node7".to_owned();
        let content = format!("# slurm snapshot collected at 2025-03-01 12:00:00\n{}\n", lines.join("\n"));

        let snapshot = SlurmSnapshot::parse(&content);
        assert_eq!(snapshot.jobs.len(), 8);
        assert_eq!(snapshot.skipped.len(), 2);
        assert_eq!(snapshot.skipped[0].line, 6);
        assert!(matches!(snapshot.skipped[0].error, JobParseError::State(_)));
        assert_eq!(snapshot.skipped[1].error, JobParseError::TooFewFields(8));
        assert!(snapshot.jobs.iter().all(|job| job.job_id != 5 && job.job_id != 7));
    }

    #[test]
    fn SlurmSnapshot__parse__comments_and_blanks() {
        let content = format!("# header\n\n   \n#1|x|y\n{LINE}\n");
        let snapshot = SlurmSnapshot::parse(&content);
        assert_eq!(snapshot.jobs.len(), 1);
        assert!(snapshot.skipped.is_empty());
        assert_eq!(snapshot.collected_at, None);
        assert_eq!(snapshot.collected_at_text(), COLLECTION_TIME_SENTINEL);
    }

    #[test]
    fn collection_time__header() {
        let content = format!("# Slurm jobs collected at 2025-03-01 12:34:56\n{LINE}\n");
        assert_eq!(
            collection_time(&content),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap().and_hms_opt(12, 34, 56)
        );
        assert_eq!(SlurmSnapshot::parse(&content).collected_at_text(), "2025-03-01 12:34:56");

        // only comment lines count
        assert_eq!(collection_time("collected at 2025-03-01 12:34:56\n"), None);
        assert_eq!(collection_time("# collected at 2025-02-30 12:34:56\n"), None);
    }
}
