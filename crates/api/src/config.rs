use std::path::PathBuf;
use std::time::Duration;

use gridpilot_engine::{SupervisorConfig, ToolConfig};

/// Entry script launched for each supervised instance, resolved against
/// `bot_dir`.
pub const BOT_ENTRY_SCRIPT: &str = "bot.py";

/// Server configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development; override via
/// environment variables (or a `.env` file) in production.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Interpreter used to launch bot and tool scripts.
    pub python_bin: PathBuf,
    /// Directory containing the bot entry script and the tool scripts; also
    /// their working directory.
    pub bot_dir: PathBuf,
    /// Directory where per-entity and per-job config artifacts are written.
    pub artifact_dir: PathBuf,
    /// Seconds between SIGTERM and SIGKILL when stopping an instance.
    pub stop_grace_secs: u64,
    /// Seconds between dashboard metrics publications.
    pub metrics_interval_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default                   |
    /// |-------------------------|---------------------------|
    /// | `HOST`                  | `0.0.0.0`                 |
    /// | `PORT`                  | `3000`                    |
    /// | `CORS_ORIGINS`          | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`  | `30`                      |
    /// | `PYTHON_BIN`            | `python3`                 |
    /// | `BOT_DIR`               | `./bot`                   |
    /// | `ARTIFACT_DIR`          | `./run`                   |
    /// | `STOP_GRACE_SECS`       | `2`                       |
    /// | `METRICS_INTERVAL_SECS` | `2`                       |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let python_bin =
            PathBuf::from(std::env::var("PYTHON_BIN").unwrap_or_else(|_| "python3".into()));
        let bot_dir = PathBuf::from(std::env::var("BOT_DIR").unwrap_or_else(|_| "./bot".into()));
        let artifact_dir =
            PathBuf::from(std::env::var("ARTIFACT_DIR").unwrap_or_else(|_| "./run".into()));

        let stop_grace_secs: u64 = std::env::var("STOP_GRACE_SECS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("STOP_GRACE_SECS must be a valid u64");

        let metrics_interval_secs: u64 = std::env::var("METRICS_INTERVAL_SECS")
            .unwrap_or_else(|_| "2".into())
            .parse()
            .expect("METRICS_INTERVAL_SECS must be a valid u64");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            python_bin,
            bot_dir,
            artifact_dir,
            stop_grace_secs,
            metrics_interval_secs,
        }
    }

    /// Supervisor settings derived from this configuration.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig::new(self.artifact_dir.clone())
            .with_grace_period(Duration::from_secs(self.stop_grace_secs))
    }

    /// External tool settings derived from this configuration.
    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            python: self.python_bin.clone(),
            bot_dir: self.bot_dir.clone(),
            artifact_dir: self.artifact_dir.clone(),
        }
    }
}
