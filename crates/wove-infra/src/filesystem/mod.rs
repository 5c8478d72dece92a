//! Data directory layout.
//!
//! Everything Wove keeps on disk lives under one directory: `config.toml`
//! and the `wove.db` SQLite database.

use std::path::{Path, PathBuf};

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `WOVE_DATA_DIR` environment variable
/// 2. `~/.wove`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("WOVE_DATA_DIR") {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".wove");
    }

    // Last resort: current directory
    PathBuf::from(".wove")
}

/// Create the data directory if it does not exist yet.
pub async fn ensure_data_dir(data_dir: &Path) -> Result<(), std::io::Error> {
    tokio::fs::create_dir_all(data_dir).await
}
