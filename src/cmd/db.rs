//! Database commands: `folio init-db`.

use anyhow::{Context, Result};
use std::path::Path;

use folio::config::FolioConfig;
use folio::reset::db::ResetDb;

/// Open the configured database, creating parent directories as needed.
pub fn open_db(path: &Path) -> Result<ResetDb> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    ResetDb::new(path).with_context(|| format!("Failed to open database at {}", path.display()))
}

pub fn cmd_init_db(config: &FolioConfig) -> Result<()> {
    open_db(&config.database.path)?;
    println!("Database initialized at {}", config.database.path.display());
    Ok(())
}
