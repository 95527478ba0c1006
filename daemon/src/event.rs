use crate::config::Config;

pub enum DaemonEvent {
    /// The reconciler captured the startup default rate from the live mode.
    DefaultCaptured { rate_hz: u32 },
    /// A monitored application was observed running and its rate was applied.
    OverrideApplied { executable_name: String, rate_hz: u32 },
    /// No monitored application is running; the default rate was restored.
    DefaultRestored { rate_hz: u32 },
    /// A non-fatal display query/apply failure; the reconciler keeps retrying.
    Fault(String),
    /// The previously reported fault resolved on a later cycle.
    FaultCleared,
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// Ctrl+C received; the daemon should write a final status and exit.
    Shutdown,
}
