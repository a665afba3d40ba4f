//! The live job table.
//!
//! Slurm only ever reports the jobs that are currently around, so every snapshot replaces the
//! `Jobs` table wholesale. Each job is also upserted into `JobHistory`, which is never cleared, so
//! jobs that finished between two snapshots are not lost for GPU accounting.

use std::path::Path;

use rusqlite::{params, Connection};
use tracing::{info, instrument, warn};
use usage_data::slurm::{SlurmJob, SlurmSnapshot};

use crate::{
    error::{Result, StoreError},
    ingest::{get_or_create_machine, get_or_create_user},
};

/// Machine type of every node that shows up in a slurm snapshot.
pub const GPU_MACHINE_TYPE: &str = "gpu";

fn insert_job(conn: &Connection, job: &SlurmJob, created_at: &str) -> Result<()> {
    let user_id = get_or_create_user(conn, &job.user, None, None)?;
    let machine_id = get_or_create_machine(conn, &job.node_list, GPU_MACHINE_TYPE)?;

    // a job id listed twice in one snapshot keeps its last line
    conn.execute(
        "INSERT OR REPLACE INTO Jobs (
             job_id, user_id, machine_id, partition, cpus, memory, gpus, nodes,
             runtime, state, command, end_time, created_at
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            job.job_id,
            user_id,
            machine_id,
            job.partition,
            job.cpus,
            job.memory_mb,
            job.gpus,
            job.nodes,
            job.elapsed_time,
            job.state.as_str(),
            job.command,
            job.end_time,
            created_at,
        ],
    )?;

    conn.execute(
        "INSERT INTO JobHistory (
             job_id, user_id, machine_id, gpus, runtime, state, end_time, first_seen, last_seen
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT (job_id) DO UPDATE SET
             user_id = excluded.user_id,
             machine_id = excluded.machine_id,
             gpus = excluded.gpus,
             runtime = excluded.runtime,
             state = excluded.state,
             end_time = excluded.end_time,
             last_seen = excluded.last_seen",
        params![
            job.job_id,
            user_id,
            machine_id,
            job.gpus,
            job.elapsed_time,
            job.state.as_str(),
            job.end_time,
            created_at,
        ],
    )?;
    Ok(())
}

/// Replaces the `Jobs` table with `snapshot`, stamped with its collection time. Returns the
/// number of stored jobs.
#[instrument(skip_all, fields(jobs = snapshot.jobs.len(), collected_at = %snapshot.collected_at_text()))]
pub fn store_slurm_jobs(conn: &mut Connection, snapshot: &SlurmSnapshot) -> Result<usize> {
    let created_at = snapshot.collected_at_text();
    if snapshot.collected_at.is_none() {
        warn!("slurm snapshot has no collection time, stamping jobs with {created_at}");
    }

    let tx = conn.transaction()?;
    tx.execute("DELETE FROM Jobs", [])?;
    for job in &snapshot.jobs {
        insert_job(&tx, job, &created_at)?;
    }
    tx.commit()?;

    Ok(snapshot.jobs.len())
}

/// Parses and stores the slurm log at `path`. `None` if there is no such file (yet).
pub fn process_slurm_file(conn: &mut Connection, path: &Path) -> Result<Option<usize>> {
    if !path.exists() {
        warn!("slurm log file not found: {}", path.display());
        return Ok(None);
    }
    let content = std::fs::read_to_string(path).map_err(StoreError::file("reading", path))?;
    let snapshot = SlurmSnapshot::parse(&content);
    let stored = store_slurm_jobs(conn, &snapshot)?;
    info!(stored, skipped = snapshot.skipped.len(), "slurm snapshot stored");
    Ok(Some(stored))
}
