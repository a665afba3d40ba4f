use std::collections::BTreeMap;

use chrono::{Duration, NaiveDateTime};
use derive_more::derive::{Add, AddAssign, Deref, Display, From, Into};
use serde::Serialize;
use tracing::debug;

use crate::{
    misc::parsing::{datetime, SlurmDuration},
    slurm::SlurmJob,
};

/// Default length of the rolling window in hours (`gpu_max_hours` in the config).
pub const DEFAULT_MAX_WINDOW_HOURS: f64 = 4.0;

/// End times slurm prints for jobs that have not ended (yet).
const END_TIME_SENTINELS: [&str; 3] = ["Unknown", "None", "N/A"];

#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd, Display, Deref, Into, From, Add, AddAssign, Serialize)]
pub struct GpuHours(pub f64);

/// The fields of one job row that matter for GPU accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUsageRecord {
    pub user: String,
    pub machine: String,
    pub gpus: i64,
    pub runtime: String,
    pub end_time: String,
}

impl From<&SlurmJob> for JobUsageRecord {
    fn from(job: &SlurmJob) -> Self {
        JobUsageRecord {
            user: job.user.to_string(),
            machine: job.node_list.clone(),
            gpus: job.gpus.into(),
            runtime: job.elapsed_time.clone(),
            end_time: job.end_time.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum EndTime {
    Known(NaiveDateTime),
    Missing,
    Invalid,
}

/// `true` for the empty string and the sentinels slurm prints for jobs without an end time.
pub fn is_missing_end_time(text: &str) -> bool {
    let text = text.trim();
    text.is_empty() || END_TIME_SENTINELS.iter().any(|sentinel| text.contains(sentinel))
}

fn end_time(text: &str) -> EndTime {
    if is_missing_end_time(text) {
        return EndTime::Missing;
    }
    let text = text.trim();
    datetime::parse_iso(text).map_or(EndTime::Invalid, EndTime::Known)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpuWindow {
    pub max_hours: f64,
}

impl Default for GpuWindow {
    fn default() -> Self {
        GpuWindow {
            max_hours: DEFAULT_MAX_WINDOW_HOURS,
        }
    }
}

impl GpuWindow {
    pub fn new(max_hours: f64) -> Self {
        GpuWindow { max_hours }
    }

    fn window(&self) -> Duration {
        Duration::milliseconds((self.max_hours * 3_600_000f64) as i64)
    }

    /// Hours of the job that fall into the window ending at `now`.
    ///
    /// With a known end time the job is assumed to have started `runtime` before it and the start
    /// is clamped to `now - max_hours`. Without one (still running) the runtime itself is capped.
    /// Anything unparseable contributes nothing.
    pub fn capped_hours(&self, runtime: &str, end_time_text: &str, now: NaiveDateTime) -> f64 {
        let runtime = match runtime.parse::<SlurmDuration>() {
            Ok(runtime) => runtime,
            Err(e) => {
                debug!("runtime {runtime:?} counts as 0h: {e:#}");
                return 0.0;
            }
        };
        match end_time(end_time_text) {
            EndTime::Known(end) => {
                let window_start = now.checked_sub_signed(self.window()).unwrap_or(NaiveDateTime::MIN);
                let start = end
                    .checked_sub_signed(*runtime)
                    .map_or(window_start, |start| start.max(window_start));
                ((end - start).num_milliseconds() as f64 / 3_600_000f64).max(0.0)
            }
            EndTime::Missing => runtime.as_hours().min(self.max_hours),
            EndTime::Invalid => {
                debug!("end time {end_time_text:?} counts as 0h");
                0.0
            }
        }
    }

    pub fn contribution(&self, record: &JobUsageRecord, now: NaiveDateTime) -> GpuHours {
        GpuHours(record.gpus as f64 * self.capped_hours(&record.runtime, &record.end_time, now))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MachineGpuUsage {
    pub total_gpus: i64,
    pub job_count: u64,
    /// Normalised by the window length once aggregation is done, `1.0` = one GPU busy for the
    /// whole window.
    pub total_gpu_hours: GpuHours,
}

/// user -> machine -> usage
#[derive(Debug, Clone, Default, PartialEq, Deref, Into, Serialize)]
pub struct GpuUsageMap(BTreeMap<String, BTreeMap<String, MachineGpuUsage>>);

impl GpuUsageMap {
    pub fn aggregate(records: impl IntoIterator<Item = JobUsageRecord>, window: GpuWindow, now: NaiveDateTime) -> Self {
        let mut usage: BTreeMap<String, BTreeMap<String, MachineGpuUsage>> = BTreeMap::new();
        for record in records {
            let contribution = window.contribution(&record, now);
            let entry = usage.entry(record.user).or_default().entry(record.machine).or_default();
            entry.total_gpus += record.gpus;
            entry.job_count += 1;
            entry.total_gpu_hours += contribution;
        }
        for machine in usage.values_mut().flat_map(|machines| machines.values_mut()) {
            machine.total_gpu_hours = GpuHours(*machine.total_gpu_hours / window.max_hours);
        }
        GpuUsageMap(usage)
    }

    pub fn user_total(&self, user: &str) -> GpuHours {
        self.0
            .get(user)
            .map(|machines| GpuHours(machines.values().map(|usage| *usage.total_gpu_hours).sum()))
            .unwrap_or_default()
    }
}
