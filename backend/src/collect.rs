//! Batch ingestion of the incoming log directory.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use color_eyre::{eyre::WrapErr as _, Result};
use database::{ingest::process_log_file, Connection};
use itertools::Itertools as _;
use tracing::{info, instrument, warn};

/// `*.log` files directly inside `dir`, sorted by name. A missing directory has no files.
pub fn find_log_files(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        warn!("log directory {} does not exist", dir.display());
        return Ok(Vec::new());
    }
    let entries = std::fs::read_dir(dir).wrap_err_with(|| format!("listing {}", dir.display()))?;
    let files = entries
        .map(|entry| entry.map(|entry| entry.path()))
        .filter_ok(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "log"))
        .collect::<std::io::Result<Vec<_>>>()
        .wrap_err_with(|| format!("listing {}", dir.display()))?;
    Ok(files.into_iter().sorted().collect())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub processed: usize,
    pub total: usize,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.processed == self.total
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "processed {}/{} log files", self.processed, self.total)
    }
}

/// Ingests every log file of `incoming`. A failing file is counted and left in place, it never
/// stops the batch.
#[instrument(skip(conn))]
pub fn process_logs(conn: &mut Connection, incoming: &Path, archive: Option<&Path>) -> Result<BatchReport> {
    let files = find_log_files(incoming)?;
    let processed = files
        .iter()
        .filter(|file| process_log_file(conn, file, archive))
        .count();
    let report = BatchReport {
        processed,
        total: files.len(),
    };
    if report.all_succeeded() {
        info!("{report}");
    } else {
        warn!("{report}, {} failed", report.total - report.processed);
    }
    Ok(report)
}

#[allow(non_snake_case)]
#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = "\
Log: 2025-03-01 12:00:00 (1740830400)
@rd_client(tikgpu01,gpu)[alice(phd/itet)]:
[512, 1K)  100 |@@@@@@@@@@
";

    #[test]
    fn find_log_files__only_logs() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("b.log"), "")?;
        std::fs::write(dir.path().join("a.log"), "")?;
        std::fs::write(dir.path().join("notes.txt"), "")?;
        std::fs::create_dir(dir.path().join("nested.log"))?;

        let files = find_log_files(dir.path())?;
        assert_eq!(files, vec![dir.path().join("a.log"), dir.path().join("b.log")]);
        Ok(())
    }

    #[test]
    fn find_log_files__missing_dir() -> Result<()> {
        let dir = tempfile::tempdir()?;
        assert!(find_log_files(&dir.path().join("missing"))?.is_empty());
        Ok(())
    }

    #[test]
    fn process_logs__partial_success() -> Result<()> {
        let incoming = tempfile::tempdir()?;
        let archive = tempfile::tempdir()?;
        std::fs::write(incoming.path().join("good.log"), LOG)?;
        std::fs::write(incoming.path().join("bad.log"), "Log: 2025-02-30 12:00:00 (1)\n")?;

        let mut conn = database::open_in_memory()?;
        let report = process_logs(&mut conn, incoming.path(), Some(archive.path()))?;

        assert_eq!(report, BatchReport { processed: 1, total: 2 });
        assert!(!report.all_succeeded());
        assert_eq!(report.to_string(), "processed 1/2 log files");
        assert!(incoming.path().join("bad.log").exists());
        assert!(!incoming.path().join("good.log").exists());
        assert_eq!(std::fs::read_dir(archive.path())?.count(), 1);
        Ok(())
    }
}
