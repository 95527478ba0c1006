use std::collections::HashSet;
use sysinfo::{ProcessesToUpdate, System};
use thiserror::Error;

/// Process enumeration failed as a whole. Individual processes vanishing
/// mid-scan never surface here; they are simply absent from the snapshot.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("process enumeration failed: {0}")]
pub struct EnumerationError(pub String);

/// Capability consumed by the reconciliation engine: a point-in-time snapshot
/// of the executable names of all running processes.
pub trait ProcessList {
    /// Returns the lowercased executable names of all currently running
    /// processes. Every call is an independent snapshot; nothing is diffed
    /// against previous calls.
    fn running_names(&mut self) -> Result<HashSet<String>, EnumerationError>;
}

/// Production provider backed by [`sysinfo`]. The `System` is reused across
/// cycles so each refresh only updates the process table.
pub struct SystemProcessList {
    sys: System,
}

impl SystemProcessList {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl ProcessList for SystemProcessList {
    fn running_names(&mut self) -> Result<HashSet<String>, EnumerationError> {
        // Dead processes must be evicted from the reused table, otherwise an
        // exited application would stay in every later snapshot and its
        // override could never be reverted.
        //
        // sysinfo skips processes that exit while the table is being read, so
        // a vanished process degrades to a missing entry, not a failed call.
        self.sys.refresh_processes(ProcessesToUpdate::All, true);
        Ok(self
            .sys
            .processes()
            .values()
            .map(|p| p.name().to_string_lossy().to_lowercase())
            .collect())
    }
}
