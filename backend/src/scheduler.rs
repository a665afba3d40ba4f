//! Interval scheduler for the periodic ingestion tasks.
//!
//! All tasks share one background thread and one database connection. Every run is recorded in
//! `PeriodicTaskLogs`.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use color_eyre::{eyre::eyre, Result};
use database::{
    tasks::{log_task_execution, TaskStatus},
    Connection,
};
use tracing::{debug, error, info, info_span, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Set by SIGINT/SIGTERM once registered through [`AbortHandler::new`].
#[derive(Debug, Clone, Default)]
pub struct AbortHandler {
    atom: Arc<AtomicBool>,
}

impl AbortHandler {
    pub fn new() -> Result<Self> {
        let result = Self::default();

        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&result.atom))?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&result.atom))?;

        Ok(result)
    }

    pub fn abort(&self) -> bool {
        self.atom.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub fn trigger(&self) {
        self.atom.store(true, Ordering::Relaxed);
    }
}

/// Returns a short summary on success, which ends up as the task log message.
pub type TaskFn = Box<dyn FnMut(&mut Connection) -> Result<String> + Send>;

struct Task {
    name: String,
    interval: Duration,
    initial_delay: Duration,
    next_run: Option<Instant>,
    run: TaskFn,
}

pub struct TaskScheduler {
    tasks: Vec<Task>,
    poll_interval: Duration,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        TaskScheduler {
            tasks: Vec::new(),
            poll_interval: POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// The first run happens `initial_delay` after the scheduler starts, then every `interval`.
    pub fn add_task(
        &mut self,
        name: impl Into<String>,
        interval: Duration,
        initial_delay: Duration,
        run: impl FnMut(&mut Connection) -> Result<String> + Send + 'static,
    ) {
        let name = name.into();
        debug!(%name, ?interval, ?initial_delay, "task registered");
        self.tasks.push(Task {
            name,
            interval,
            initial_delay,
            next_run: None,
            run: Box::new(run),
        });
    }

    pub fn task_names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|task| task.name.as_str())
    }

    /// Runs every task that is due at `now` and returns how many ran.
    pub fn run_due(&mut self, conn: &mut Connection, now: Instant) -> usize {
        let mut ran = 0;
        for task in &mut self.tasks {
            let next_run = *task.next_run.get_or_insert(now + task.initial_delay);
            if now < next_run {
                continue;
            }
            task.next_run = Some(now + task.interval);
            ran += 1;

            let _span = info_span!("task", name = %task.name).entered();
            let outcome = (task.run)(conn);
            let logged = match &outcome {
                Ok(message) => {
                    info!("{message}");
                    log_task_execution(conn, &task.name, TaskStatus::Success, Some(message.as_str()), None)
                }
                Err(e) => {
                    error!("{e:#}");
                    let (message, details) = (e.to_string(), format!("{e:?}"));
                    log_task_execution(
                        conn,
                        &task.name,
                        TaskStatus::Error,
                        Some(message.as_str()),
                        Some(details.as_str()),
                    )
                }
            };
            if let Err(e) = logged {
                warn!("recording task run failed: {e}");
            }
        }
        ran
    }

    /// Polls until `abort` is set.
    pub fn run(mut self, mut conn: Connection, abort: &AbortHandler) -> Connection {
        info!(tasks = self.tasks.len(), "scheduler started");
        while !abort.abort() {
            self.run_due(&mut conn, Instant::now());
            thread::sleep(self.poll_interval);
        }
        info!("scheduler stopped");
        conn
    }

    /// Moves the scheduler and `conn` onto a background thread that stops once `abort` is set.
    pub fn start(self, conn: Connection, abort: AbortHandler) -> Result<SchedulerHandle> {
        let thread = thread::Builder::new()
            .name("task-scheduler".to_owned())
            .spawn(move || self.run(conn, &abort))?;
        Ok(SchedulerHandle { thread })
    }
}

pub struct SchedulerHandle {
    thread: JoinHandle<Connection>,
}

impl SchedulerHandle {
    /// Blocks until the abort flag handed to [`TaskScheduler::start`] is set, e.g. by a signal.
    pub fn join(self) -> Result<Connection> {
        self.thread.join().map_err(|_| eyre!("scheduler thread panicked"))
    }
}
