//! Data directory resolution.

use std::path::PathBuf;

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "COURIER_DATA_DIR";

/// Resolve the data directory from environment or platform defaults.
///
/// Priority:
/// 1. `COURIER_DATA_DIR` environment variable
/// 2. `~/.courier`
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".courier");
    }

    // Last resort: current directory
    PathBuf::from(".courier")
}

/// Resolve the data directory and create it if needed.
pub async fn ensure_data_dir() -> std::io::Result<PathBuf> {
    let dir = resolve_data_dir();
    tokio::fs::create_dir_all(&dir).await?;
    Ok(dir)
}
