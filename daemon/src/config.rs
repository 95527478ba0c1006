use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::event::DaemonEvent;

/// Root configuration structure. Deserialized from %APPDATA%\Rateshift\config.toml.
///
/// The file is written by the GUI/editor; the daemon only ever reads it.
#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

/// A single refresh-rate rule: while `executable_name` is running, the display
/// should run at `refresh_rate_hz`.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RuleConfig {
    /// Executable filename (e.g. "RocketLeague.exe") used for process detection.
    /// Matched case-insensitively, following Windows filename semantics.
    pub executable_name: String,
    /// Desired vertical refresh rate in Hz while the application is running.
    pub refresh_rate_hz: u32,
}

impl Config {
    /// Drops rules with a zero rate and collapses duplicate executable names
    /// (case-insensitive). A duplicate keeps the first occurrence's position
    /// in the list and the last occurrence's rate, so re-adding an
    /// application updates its rate without changing its match priority.
    pub fn normalize(&mut self) {
        let mut index_by_name: HashMap<String, usize> = HashMap::new();
        let mut normalized: Vec<RuleConfig> = Vec::new();

        for rule in self.rules.drain(..) {
            if rule.refresh_rate_hz == 0 {
                eprintln!(
                    "[config] Ignoring rule for '{}': refresh rate must be positive",
                    rule.executable_name
                );
                continue;
            }
            let key = rule.executable_name.to_lowercase();
            match index_by_name.get(&key) {
                Some(&i) => normalized[i] = rule,
                None => {
                    index_by_name.insert(key, normalized.len());
                    normalized.push(rule);
                }
            }
        }

        self.rules = normalized;
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config.normalize();
    Ok(config)
}

/// How long to keep coalescing watcher events after a relevant one arrives.
/// An editor save shows up as a burst (create + several modifies, or
/// write-new + rename); one reload per burst is enough.
const RELOAD_DEBOUNCE: std::time::Duration = std::time::Duration::from_millis(250);

/// True when `event` is a write-style change touching the config file itself.
fn is_reload_event(event: &notify::Event, config_path: &Path) -> bool {
    let affects_config = event.paths.iter().any(|p| p == config_path);
    let is_write = matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
    );
    affects_config && is_write
}

/// Spawns a file watcher on the parent directory of `path`.  Whenever the config
/// file is created or modified, reloads it and sends a `ConfigReloaded` event.
pub async fn watch_config(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            eprintln!("[config] Failed to create file watcher: {e}");
            return;
        }
    };

    // Watch the parent directory rather than the file directly so we catch
    // editor-style atomic saves (write-new + rename).
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            eprintln!("[config] Config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        eprintln!("[config] Failed to watch config directory: {e}");
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        if !is_reload_event(&event, &path) {
            continue;
        }

        // Swallow the rest of the save burst before reloading once.
        loop {
            match tokio::time::timeout(RELOAD_DEBOUNCE, watch_rx.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return,
                Err(_) => break,
            }
        }

        match load_or_default(&path) {
            Ok(config) => {
                if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                    break;
                }
            }
            Err(e) => eprintln!("[config] Failed to reload config: {e}"),
        }
    }
}
