pub mod comb;
pub mod export;
pub mod ingest;
pub mod purge;
pub mod reconcile;
pub mod refresh;
pub mod show;
pub mod users;

use crate::output::{CliError, OutputMode, render_error};
use anyhow::{Context, Result, anyhow};
use reelstats_core::config::load_config;
use reelstats_core::kv::SqliteKv;
use reelstats_core::lock::WriterLock;
use reelstats_core::{MetricsStore, StoreError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Database file inside the data directory.
pub const DB_FILE: &str = "reelstats.db";
/// Writer lock file inside the data directory.
pub const LOCK_FILE: &str = "reelstats.lock";

const WRITER_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a command mutates the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// An open store plus the writer lock when the command mutates.
pub struct Session {
    pub store: MetricsStore<SqliteKv>,
    pub data_dir: PathBuf,
    // Dropped after the store so the connection closes before unlock.
    _writer: Option<WriterLock>,
}

impl Session {
    /// Open the store in `data_dir`, taking the writer lock for [`Access::Write`].
    ///
    /// # Errors
    ///
    /// Renders and returns an error if the config is invalid, the writer
    /// lock is contended, or the database cannot be opened.
    pub fn open(data_dir: &Path, access: Access, output: OutputMode) -> Result<Self> {
        let config = match load_config(data_dir) {
            Ok(config) => config,
            Err(err) => {
                render_error(
                    output,
                    &CliError::with_details(
                        format!("{err:#}"),
                        "Fix syntax in config.toml and retry.",
                        "E1001",
                    ),
                )?;
                return Err(err);
            }
        };

        let writer = match access {
            Access::Read => None,
            Access::Write => {
                let lock_path = data_dir.join(LOCK_FILE);
                match WriterLock::acquire(&lock_path, WRITER_LOCK_TIMEOUT) {
                    Ok(lock) => Some(lock),
                    Err(err) => {
                        render_error(output, &CliError::from(&err))?;
                        return Err(anyhow::Error::new(err).context("acquire writer lock"));
                    }
                }
            }
        };

        let db_path = data_dir.join(DB_FILE);
        let kv = SqliteKv::open(&db_path)
            .with_context(|| format!("open database {}", db_path.display()))?;
        let store = MetricsStore::open(kv, config).map_err(|err| fail(output, err))?;
        debug!(path = %db_path.display(), ?access, "store opened");

        Ok(Self {
            store,
            data_dir: data_dir.to_path_buf(),
            _writer: writer,
        })
    }
}

/// Render a store error in the active output mode and convert it for `?`.
pub fn fail(output: OutputMode, err: StoreError) -> anyhow::Error {
    if let Err(render_err) = render_error(output, &CliError::from(&err)) {
        return render_err;
    }
    anyhow!(err)
}
