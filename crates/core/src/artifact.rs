//! Spawn-artifact handling.
//!
//! External executables (the bot process, the backtest/optimize tools) take
//! their configuration as a JSON file passed via `--config`. The artifact is
//! written atomically — a temp file in the same directory, then a rename —
//! so a concurrently starting process never reads a half-written config.

use std::path::{Path, PathBuf};

use crate::error::CoreError;

/// Write `config` as pretty-printed JSON to `<dir>/<name>.json`, atomically.
///
/// Creates `dir` if it does not exist. Any previous artifact at the target
/// path is replaced by the rename.
pub async fn write_config_artifact(
    dir: &Path,
    name: &str,
    config: &serde_json::Value,
) -> Result<PathBuf, CoreError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| CoreError::Internal(format!("create artifact dir: {e}")))?;

    let target = dir.join(format!("{name}.json"));
    let tmp = dir.join(format!(".{name}.json.tmp"));

    let bytes = serde_json::to_vec_pretty(config)
        .map_err(|e| CoreError::Internal(format!("serialize config artifact: {e}")))?;

    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| CoreError::Internal(format!("write config artifact: {e}")))?;
    tokio::fs::rename(&tmp, &target)
        .await
        .map_err(|e| CoreError::Internal(format!("publish config artifact: {e}")))?;

    Ok(target)
}

/// Remove a previously written artifact. Missing files are not an error.
pub async fn remove_config_artifact(dir: &Path, name: &str) {
    let target = dir.join(format!("{name}.json"));
    if let Err(e) = tokio::fs::remove_file(&target).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %target.display(), error = %e, "Failed to remove config artifact");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
