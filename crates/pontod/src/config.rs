use std::path::PathBuf;

/// Daemon process options, loaded from environment variables.
///
/// Controller, store and storage settings live in [`ponto_core::Settings`];
/// these only shape the daemon itself.
pub struct DaemonOptions {
    /// TOML settings file (default: none, built-in defaults plus `PONTO_*`).
    pub config_path: Option<PathBuf>,
    /// Frames that may wait for the controller before input reading blocks.
    pub queue_depth: usize,
    /// Seconds to wait for the in-flight frame after shutdown is requested.
    pub shutdown_grace_secs: u64,
    /// Whether each decision is echoed to stdout as a JSON line.
    pub emit_decisions: bool,
}

impl DaemonOptions {
    /// Load options from `PONTO_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            config_path: std::env::var_os("PONTO_CONFIG").map(PathBuf::from),
            queue_depth: env_usize("PONTO_QUEUE_DEPTH", 4).max(1),
            shutdown_grace_secs: env_u64("PONTO_SHUTDOWN_GRACE_SECS", 5),
            emit_decisions: std::env::var("PONTO_EMIT_DECISIONS")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
