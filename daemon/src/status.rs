use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// No monitored application is running; the display is at the default rate
    /// (or the daemon has not yet performed its first cycle).
    Default,
    /// A monitored application is running and its rate override is applied.
    Overridden,
}

/// Runtime status written by the daemon to %APPDATA%\Rateshift\status.toml.
/// The GUI reads this file (read-only) to display daemon state.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Current operational state.
    pub state: DaemonState,
    /// Executable name of the application whose override is active, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_application: Option<String>,
    /// The rate the daemon last applied, in Hz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_rate_hz: Option<u32>,
    /// The default rate captured from the live mode at startup, in Hz.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_rate_hz: Option<u32>,
    /// RFC 3339 timestamp of the most recent rate change, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_transition: Option<String>,
    /// Human-readable error message if the daemon encountered a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    /// Constructs the initial status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Default,
            active_application: None,
            current_rate_hz: None,
            default_rate_hz: None,
            last_transition: None,
            error: None,
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// Logs errors to stderr rather than panicking — a status write failure should
/// never crash the daemon.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("[status] Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                eprintln!("[status] Failed to write status file: {e}");
            }
        }
        Err(e) => eprintln!("[status] Failed to serialize status: {e}"),
    }
}
