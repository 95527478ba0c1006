mod config;
mod display;
mod event;
mod paths;
mod process_list;
mod reconciler;
mod startup;
mod status;

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

#[tokio::main]
async fn main() {
    // ── Startup registration flags ────────────────────────────────────────────
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--register-startup") {
        if let Err(e) = startup::register_startup() {
            eprintln!("[startup] {e}");
            std::process::exit(1);
        }
        return;
    }
    if args.iter().any(|a| a == "--unregister-startup") {
        if let Err(e) = startup::unregister_startup() {
            eprintln!("[startup] {e}");
            std::process::exit(1);
        }
        return;
    }

    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        eprintln!("Failed to create app data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        eprintln!("[config] Error (using defaults): {e}");
        config::Config::default()
    });
    let shared_config = Arc::new(RwLock::new(initial_config));

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path();
    let mut current_status = status::DaemonStatus::new();
    status::write_status(&status_path, &current_status);

    let (event_tx, mut event_rx) = mpsc::channel::<event::DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));
    tokio::spawn(reconciler::run(Arc::clone(&shared_config), event_tx.clone()));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(event::DaemonEvent::Shutdown).await;
            }
        });
    }

    println!("rateshift-daemon v{} started", env!("CARGO_PKG_VERSION"));

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            event::DaemonEvent::DefaultCaptured { rate_hz } => {
                println!("Default refresh rate: {rate_hz} Hz");
                current_status.default_rate_hz = Some(rate_hz);
                status::write_status(&status_path, &current_status);
            }

            event::DaemonEvent::OverrideApplied { executable_name, rate_hz } => {
                println!("Override active: {executable_name} -> {rate_hz} Hz");
                current_status.state = status::DaemonState::Overridden;
                current_status.active_application = Some(executable_name);
                current_status.current_rate_hz = Some(rate_hz);
                current_status.last_transition = Some(chrono::Local::now().to_rfc3339());
                status::write_status(&status_path, &current_status);
            }

            event::DaemonEvent::DefaultRestored { rate_hz } => {
                println!("Default restored: {rate_hz} Hz");
                current_status.state = status::DaemonState::Default;
                current_status.active_application = None;
                current_status.current_rate_hz = Some(rate_hz);
                current_status.last_transition = Some(chrono::Local::now().to_rfc3339());
                status::write_status(&status_path, &current_status);
            }

            event::DaemonEvent::Fault(message) => {
                current_status.error = Some(message);
                status::write_status(&status_path, &current_status);
            }

            event::DaemonEvent::FaultCleared => {
                if current_status.error.take().is_some() {
                    status::write_status(&status_path, &current_status);
                }
            }

            event::DaemonEvent::ConfigReloaded(new_config) => {
                println!("Config reloaded ({} rules)", new_config.rules.len());
                *shared_config.write().await = new_config;
            }

            event::DaemonEvent::Shutdown => {
                println!("Shutting down");
                current_status.error = None;
                status::write_status(&status_path, &current_status);
                break;
            }
        }
    }
}
