//! Storage Layer
//!
//! Application directories and the SQLite history store.

pub mod database;

use anyhow::Result;
use std::path::PathBuf;

pub use database::{Database, OcrHistoryRecord};

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "rapireport", "RapiReport")
        .ok_or_else(|| anyhow::anyhow!("Could not determine application directories"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;

    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;

    Ok(config_dir)
}

/// Database location: configured path or `<data dir>/rapireport.db`
pub fn default_database_path(configured: Option<PathBuf>) -> Result<PathBuf> {
    match configured {
        Some(path) => Ok(path),
        None => Ok(get_data_dir()?.join("rapireport.db")),
    }
}
