pub mod error;
pub mod ingest;
pub mod queries;
pub mod schema;
pub mod slurm;
pub mod tasks;
pub mod users;

use std::path::Path;

pub use error::{Result, StoreError};
pub use rusqlite::Connection;
use tracing::{info, instrument};

/// Opens (creating if needed) the database at `path` and brings its layout up to date.
#[instrument]
pub fn open_database(path: &Path) -> Result<Connection> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).map_err(StoreError::file("creating", dir))?;
    }
    let conn = Connection::open(path)?;
    schema::initialize(&conn)?;
    info!("database ready");
    Ok(conn)
}

/// A fresh, initialised in-memory database.
pub fn open_in_memory() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    schema::initialize(&conn)?;
    Ok(conn)
}
