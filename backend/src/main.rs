mod cli;
mod collect;
mod config;
mod scheduler;

use std::time::Duration;

use chrono::Local;
use clap::Parser as _;
use cli::{Args, Command};
use color_eyre::{
    eyre::{ensure, eyre, WrapErr as _},
    Result,
};
use database::{
    ingest::process_log_file,
    queries::{database_stats, gpu_usage_per_user, user_usage, JobSource, Lookup},
    slurm::process_slurm_file,
    tasks::task_logs,
    Connection,
};
use scheduler::{AbortHandler, TaskScheduler};
use serde::Serialize;
use tracing::{debug, info, instrument, warn, Level};
use usage_data::gpu_hours::GpuWindow;

use crate::config::Settings;

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    register_logging(args.log_level)?;

    let settings = Settings::new(args.config.as_deref()).wrap_err("loading configuration")?;
    debug!(?settings);

    let mut conn = database::open_database(&settings.db_path)
        .wrap_err_with(|| format!("opening database {}", settings.db_path.display()))?;

    match args.command {
        Command::Init => info!("database initialised at {}", settings.db_path.display()),
        Command::ProcessLogs => {
            let report = collect::process_logs(&mut conn, &settings.incoming_logs_dir, settings.archive_dir())?;
            println!("{report}");
            ensure!(
                report.all_succeeded(),
                "{} of {} log files failed",
                report.total - report.processed,
                report.total
            );
        }
        Command::ProcessFile { file, archive } => {
            let archive_dir = archive.then(|| settings.archive_dir()).flatten();
            if archive && archive_dir.is_none() {
                warn!("--archive given but no archive directory is configured");
            }
            ensure!(
                process_log_file(&mut conn, &file, archive_dir),
                "processing {} failed",
                file.display()
            );
        }
        Command::IngestSlurm { file } => {
            let path = file.unwrap_or_else(|| settings.slurm_log_file.clone());
            match process_slurm_file(&mut conn, &path)? {
                Some(stored) => println!("stored {stored} jobs"),
                None => println!("no slurm log at {}, skipped", path.display()),
            }
        }
        Command::GpuUsage { user, history } => {
            let source = if history { JobSource::History } else { JobSource::Live };
            let usage = gpu_usage_per_user(
                &conn,
                user.as_deref(),
                source,
                GpuWindow::new(settings.gpu_max_hours),
                Local::now().naive_local(),
            )?;
            print_json(&usage)?;
        }
        Command::Stats => print_json(&database_stats(&conn)?)?,
        Command::User { username } => {
            let usage = user_usage(&conn, Lookup::Name(&username))?.ok_or_else(|| eyre!("unknown user {username}"))?;
            print_json(&usage)?;
        }
        Command::Tasks { limit, offset } => print_json(&task_logs(&conn, limit, offset)?)?,
        Command::Run => run_scheduler(conn, &settings)?,
    }

    Ok(())
}

fn register_logging(level: Option<Level>) -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level.unwrap_or(Level::INFO))
        .finish();

    tracing::subscriber::set_global_default(subscriber).wrap_err("setting default subscriber failed")
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn minutes(minutes: u64) -> Duration {
    Duration::from_secs(minutes * 60)
}

#[instrument(skip_all)]
fn run_scheduler(conn: Connection, settings: &Settings) -> Result<()> {
    let abort_handler = AbortHandler::new()?;
    let mut scheduler = TaskScheduler::new();

    let incoming = settings.incoming_logs_dir.clone();
    let archive = settings.archive_dir().map(ToOwned::to_owned);
    scheduler.add_task(
        "io_log_ingest",
        minutes(settings.io_log_interval_minutes),
        Duration::ZERO,
        move |conn| {
            let report = collect::process_logs(conn, &incoming, archive.as_deref())?;
            ensure!(report.all_succeeded(), "{report}");
            Ok(report.to_string())
        },
    );

    let slurm_log = settings.slurm_log_file.clone();
    scheduler.add_task(
        "slurm_ingest",
        minutes(settings.slurm_interval_minutes),
        Duration::ZERO,
        move |conn| match process_slurm_file(conn, &slurm_log)? {
            Some(stored) => Ok(format!("stored {stored} jobs")),
            None => Ok(format!("no slurm log at {}", slurm_log.display())),
        },
    );

    info!(tasks = ?scheduler.task_names().collect::<Vec<_>>(), "running periodic tasks, stop with SIGINT/SIGTERM");
    let handle = scheduler.start(conn, abort_handler)?;
    handle.join()?;
    Ok(())
}
