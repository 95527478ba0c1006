/// Canonical locations for the two files the daemon shares with the GUI:
///   - config.toml  Written by the GUI, read by the daemon.
///   - status.toml  Written by the daemon, read by the GUI.
///
/// On Windows both live under %APPDATA%\Rateshift\. When APPDATA is absent
/// (development runs on other platforms) they fall back to
/// ~/.config/rateshift/ so the daemon still starts instead of panicking.
use std::path::PathBuf;

const APP_DIR_NAME: &str = "Rateshift";
const FALLBACK_DIR_NAME: &str = "rateshift";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the Rateshift application data directory.
pub fn app_data_dir() -> PathBuf {
    if let Ok(appdata) = std::env::var("APPDATA") {
        return PathBuf::from(appdata).join(APP_DIR_NAME);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".config").join(FALLBACK_DIR_NAME)
}

/// Returns the full path to the config file.
pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

/// Returns the full path to the status file.
pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}
