use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval, Duration};

use crate::config::{Config, RuleConfig};
use crate::display::{DisplayControl, DisplayError, PlatformDisplay};
use crate::event::DaemonEvent;
use crate::process_list::{ProcessList, SystemProcessList};

const POLL_INTERVAL_SECS: u64 = 3;

/// A display change the engine performed during a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A rule matched and its rate was applied.
    Overridden { executable_name: String, rate_hz: u32 },
    /// No rule matched and the startup default rate was restored.
    Reverted { rate_hz: u32 },
}

/// Returns the first rule (in stored order) whose executable is present in
/// `running`. `running` holds lowercased names as produced by [`ProcessList`];
/// rule names are lowercased here before the lookup.
///
/// This is deliberately first-match, not best-match: when several monitored
/// applications run at once, the earliest rule wins and the rest are ignored
/// for the cycle.
pub fn first_match<'a>(rules: &'a [RuleConfig], running: &HashSet<String>) -> Option<&'a RuleConfig> {
    rules
        .iter()
        .find(|rule| running.contains(&rule.executable_name.to_lowercase()))
}

/// The reconciliation engine: a two-state machine (default / overridden)
/// holding the daemon's own belief of the last applied rate.
///
/// `default_hz` is captured from the live mode on the first cycle where the
/// query succeeds and never recomputed afterwards — once overrides start
/// being applied, the live value may itself be an override.
///
/// `believed_hz` is the last rate successfully applied by this engine. It is
/// intentionally NOT re-queried from the OS each cycle; an out-of-band rate
/// change (user, another tool) goes unnoticed until the next rule transition.
pub struct Engine<D: DisplayControl> {
    display: D,
    default_hz: Option<u32>,
    believed_hz: Option<u32>,
}

impl<D: DisplayControl> Engine<D> {
    pub fn new(display: D) -> Self {
        Self {
            display,
            default_hz: None,
            believed_hz: None,
        }
    }

    /// The startup default rate, once captured.
    pub fn default_hz(&self) -> Option<u32> {
        self.default_hz
    }

    /// Runs one reconciliation cycle against a point-in-time rule snapshot
    /// and process snapshot. Pure policy plus at most one OS call:
    ///
    /// - first-match selects the target rate (falling back to the default),
    /// - nothing is applied when the target equals the believed current rate,
    /// - on apply failure the believed rate is left untouched, so the same
    ///   target is retried next cycle for as long as the mismatch persists.
    pub fn tick(
        &mut self,
        rules: &[RuleConfig],
        running: &HashSet<String>,
    ) -> Result<Option<Transition>, DisplayError> {
        let default_hz = match self.default_hz {
            Some(hz) => hz,
            None => {
                let hz = self.display.current_refresh_rate()?;
                self.default_hz = Some(hz);
                hz
            }
        };

        let matched = first_match(rules, running);
        let target_hz = matched.map_or(default_hz, |rule| rule.refresh_rate_hz);

        if self.believed_hz == Some(target_hz) {
            return Ok(None);
        }

        self.display.set_refresh_rate(target_hz)?;
        self.believed_hz = Some(target_hz);

        Ok(Some(match matched {
            Some(rule) => Transition::Overridden {
                executable_name: rule.executable_name.clone(),
                rate_hz: target_hz,
            },
            None => Transition::Reverted { rate_hz: target_hz },
        }))
    }
}

/// Drives an [`Engine`] against a process snapshot provider, forwarding
/// transitions and faults to the main event loop. Generic over both
/// capabilities so the full cycle (including the enumeration-failure path)
/// runs against in-memory doubles in tests.
pub struct Reconciler<P: ProcessList, D: DisplayControl> {
    provider: P,
    engine: Engine<D>,
    default_reported: bool,
    last_fault: Option<String>,
}

impl<P: ProcessList, D: DisplayControl> Reconciler<P, D> {
    pub fn new(provider: P, display: D) -> Self {
        Self {
            provider,
            engine: Engine::new(display),
            default_reported: false,
            last_fault: None,
        }
    }

    /// One full reconciliation cycle: snapshot the process list, snapshot the
    /// shared rule table, tick the engine, and forward the outcome. No
    /// failure is fatal — enumeration failures skip the cycle entirely (no
    /// display call, no state change), display failures are reported and
    /// retried implicitly on the next cycle.
    ///
    /// Returns `false` once the event channel is closed and the loop should
    /// stop.
    async fn cycle(&mut self, config: &RwLock<Config>, tx: &mpsc::Sender<DaemonEvent>) -> bool {
        let running = match self.provider.running_names() {
            Ok(names) => names,
            Err(e) => {
                eprintln!("[reconciler] Skipping cycle: {e}");
                return true;
            }
        };

        // Clone the rule snapshot so the read lock is not held across awaits.
        let rules = config.read().await.rules.clone();

        match self.engine.tick(&rules, &running) {
            Ok(transition) => {
                if self.last_fault.take().is_some()
                    && tx.send(DaemonEvent::FaultCleared).await.is_err()
                {
                    return false;
                }
                if !self.default_reported {
                    if let Some(hz) = self.engine.default_hz() {
                        self.default_reported = true;
                        if tx.send(DaemonEvent::DefaultCaptured { rate_hz: hz }).await.is_err() {
                            return false;
                        }
                    }
                }
                match transition {
                    Some(Transition::Overridden { executable_name, rate_hz }) => {
                        eprintln!("[reconciler] {executable_name} running, applied {rate_hz} Hz");
                        let evt = DaemonEvent::OverrideApplied { executable_name, rate_hz };
                        tx.send(evt).await.is_ok()
                    }
                    Some(Transition::Reverted { rate_hz }) => {
                        eprintln!("[reconciler] No monitored application running, restored {rate_hz} Hz");
                        tx.send(DaemonEvent::DefaultRestored { rate_hz }).await.is_ok()
                    }
                    None => true,
                }
            }
            Err(e) => {
                // Retried on the next cycle; only report a fault once until
                // it either changes or resolves.
                let msg = e.to_string();
                if self.last_fault.as_deref() != Some(msg.as_str()) {
                    eprintln!("[reconciler] {msg}");
                    self.last_fault = Some(msg.clone());
                    return tx.send(DaemonEvent::Fault(msg)).await.is_ok();
                }
                true
            }
        }
    }
}

/// Runs the reconciler on a fixed cadence until the daemon exits.
pub async fn run(config: Arc<RwLock<Config>>, tx: mpsc::Sender<DaemonEvent>) {
    let mut reconciler = Reconciler::new(SystemProcessList::new(), PlatformDisplay::new());
    let mut ticker = interval(Duration::from_secs(POLL_INTERVAL_SECS));

    loop {
        ticker.tick().await;
        if !reconciler.cycle(&config, &tx).await {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};

    /// In-memory display: reports a fixed "live" rate and records every
    /// applied rate. Query and apply can each be forced to fail.
    struct FakeDisplay {
        live_hz: u32,
        fail_query: Cell<bool>,
        fail_apply: Cell<bool>,
        applied: RefCell<Vec<u32>>,
    }

    impl FakeDisplay {
        fn at(live_hz: u32) -> Self {
            Self {
                live_hz,
                fail_query: Cell::new(false),
                fail_apply: Cell::new(false),
                applied: RefCell::new(Vec::new()),
            }
        }
    }

    impl DisplayControl for FakeDisplay {
        fn current_refresh_rate(&self) -> Result<u32, DisplayError> {
            if self.fail_query.get() {
                return Err(DisplayError::Query("no display".to_string()));
            }
            Ok(self.live_hz)
        }

        fn set_refresh_rate(&self, hz: u32) -> Result<(), DisplayError> {
            if self.fail_apply.get() {
                return Err(DisplayError::Apply { hz, code: -1 });
            }
            self.applied.borrow_mut().push(hz);
            Ok(())
        }
    }

    fn rule(exe: &str, hz: u32) -> RuleConfig {
        RuleConfig {
            executable_name: exe.to_string(),
            refresh_rate_hz: hz,
        }
    }

    fn running(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    // ── first_match ───────────────────────────────────────────────────────────

    #[test]
    fn first_match_returns_none_when_nothing_runs() {
        let rules = vec![rule("GameA.exe", 144)];
        assert!(first_match(&rules, &running(&[])).is_none());
    }

    #[test]
    fn first_match_prefers_earliest_rule_not_best_rate() {
        let rules = vec![rule("GameA.exe", 60), rule("GameB.exe", 240)];
        let observed = running(&["gameb.exe", "gamea.exe"]);
        assert_eq!(first_match(&rules, &observed), Some(&rules[0]));
    }

    #[test]
    fn first_match_is_case_insensitive_on_rule_names() {
        let rules = vec![rule("GameA.EXE", 144)];
        let observed = running(&["gamea.exe"]);
        assert_eq!(first_match(&rules, &observed), Some(&rules[0]));
    }

    #[test]
    fn first_match_ignores_unmonitored_processes() {
        let rules = vec![rule("GameA.exe", 144)];
        let observed = running(&["explorer.exe", "svchost.exe"]);
        assert!(first_match(&rules, &observed).is_none());
    }

    // ── Engine::tick ──────────────────────────────────────────────────────────

    #[test]
    fn first_cycle_with_no_match_applies_default() {
        // The believed rate starts unset, so the engine syncs the display to
        // the default once even though nothing may have changed.
        let mut engine = Engine::new(FakeDisplay::at(60));
        let out = engine.tick(&[], &running(&[])).unwrap();
        assert_eq!(out, Some(Transition::Reverted { rate_hz: 60 }));
        assert_eq!(engine.display.applied.borrow().as_slice(), &[60]);
    }

    #[test]
    fn match_applies_rule_rate() {
        let rules = vec![rule("GameA.exe", 144)];
        let mut engine = Engine::new(FakeDisplay::at(60));
        let out = engine.tick(&rules, &running(&["gamea.exe"])).unwrap();
        assert_eq!(
            out,
            Some(Transition::Overridden {
                executable_name: "GameA.exe".to_string(),
                rate_hz: 144,
            })
        );
        assert_eq!(engine.display.applied.borrow().as_slice(), &[144]);
    }

    #[test]
    fn unchanged_conditions_make_no_further_os_calls() {
        let rules = vec![rule("GameA.exe", 144)];
        let observed = running(&["gamea.exe"]);
        let mut engine = Engine::new(FakeDisplay::at(60));

        assert!(engine.tick(&rules, &observed).unwrap().is_some());
        for _ in 0..5 {
            assert_eq!(engine.tick(&rules, &observed).unwrap(), None);
        }
        assert_eq!(engine.display.applied.borrow().len(), 1);
    }

    #[test]
    fn matching_rule_equal_to_default_still_counts_as_override_state() {
        // A rule whose rate equals the default changes nothing after the
        // initial sync; the engine must not flap between the two.
        let rules = vec![rule("GameA.exe", 60)];
        let mut engine = Engine::new(FakeDisplay::at(60));

        assert!(engine.tick(&[], &running(&[])).unwrap().is_some()); // initial sync to 60
        assert_eq!(engine.tick(&rules, &running(&["gamea.exe"])).unwrap(), None);
        assert_eq!(engine.tick(&rules, &running(&[])).unwrap(), None);
        assert_eq!(engine.display.applied.borrow().as_slice(), &[60]);
    }

    #[test]
    fn override_tiebreak_then_revert_sequence() {
        let rules = vec![rule("GameA.exe", 144), rule("GameB.exe", 120)];
        let mut engine = Engine::new(FakeDisplay::at(60));

        // Cycle 1: GameA running, 144 applied.
        let out = engine.tick(&rules, &running(&["gamea.exe"])).unwrap();
        assert_eq!(
            out,
            Some(Transition::Overridden {
                executable_name: "GameA.exe".to_string(),
                rate_hz: 144,
            })
        );

        // Cycle 2: both running; GameA is earlier in the list, already
        // applied, so no OS call at all.
        let out = engine
            .tick(&rules, &running(&["gamea.exe", "gameb.exe"]))
            .unwrap();
        assert_eq!(out, None);

        // Cycle 3: neither running, default restored.
        let out = engine.tick(&rules, &running(&[])).unwrap();
        assert_eq!(out, Some(Transition::Reverted { rate_hz: 60 }));

        assert_eq!(engine.display.applied.borrow().as_slice(), &[144, 60]);
    }

    #[test]
    fn apply_failure_keeps_believed_rate_and_retries() {
        let rules = vec![rule("GameA.exe", 144)];
        let observed = running(&["gamea.exe"]);
        let mut engine = Engine::new(FakeDisplay::at(60));
        engine.display.fail_apply.set(true);

        let err = engine.tick(&rules, &observed).unwrap_err();
        assert_eq!(err, DisplayError::Apply { hz: 144, code: -1 });
        assert!(engine.believed_hz.is_none());

        // Same conditions next cycle: the mismatch persists, so the same
        // target is attempted again and succeeds.
        engine.display.fail_apply.set(false);
        let out = engine.tick(&rules, &observed).unwrap();
        assert_eq!(
            out,
            Some(Transition::Overridden {
                executable_name: "GameA.exe".to_string(),
                rate_hz: 144,
            })
        );
        assert_eq!(engine.display.applied.borrow().as_slice(), &[144]);
    }

    #[test]
    fn revert_failure_stays_overridden_until_it_succeeds() {
        let rules = vec![rule("GameA.exe", 144)];
        let mut engine = Engine::new(FakeDisplay::at(60));
        engine.tick(&rules, &running(&["gamea.exe"])).unwrap();

        engine.display.fail_apply.set(true);
        assert!(engine.tick(&rules, &running(&[])).is_err());
        assert_eq!(engine.believed_hz, Some(144));

        engine.display.fail_apply.set(false);
        let out = engine.tick(&rules, &running(&[])).unwrap();
        assert_eq!(out, Some(Transition::Reverted { rate_hz: 60 }));
    }

    #[test]
    fn query_failure_defers_default_capture() {
        let mut engine = Engine::new(FakeDisplay::at(60));
        engine.display.fail_query.set(true);

        let err = engine.tick(&[], &running(&[])).unwrap_err();
        assert!(matches!(err, DisplayError::Query(_)));
        assert!(engine.default_hz().is_none());
        assert!(engine.display.applied.borrow().is_empty());

        // The default is captured on the first cycle where the query works.
        engine.display.fail_query.set(false);
        engine.tick(&[], &running(&[])).unwrap();
        assert_eq!(engine.default_hz(), Some(60));
    }

    #[test]
    fn default_is_captured_once_and_never_recomputed() {
        let rules = vec![rule("GameA.exe", 144)];
        let mut engine = Engine::new(FakeDisplay::at(60));
        engine.tick(&rules, &running(&["gamea.exe"])).unwrap();

        // The live rate is now 144 as far as the OS is concerned, but the
        // captured default must stay 60.
        engine.display.live_hz = 144;
        let out = engine.tick(&rules, &running(&[])).unwrap();
        assert_eq!(out, Some(Transition::Reverted { rate_hz: 60 }));
        assert_eq!(engine.default_hz(), Some(60));
    }

    #[test]
    fn rule_change_under_same_process_applies_new_rate() {
        let mut engine = Engine::new(FakeDisplay::at(60));
        let observed = running(&["gamea.exe"]);

        engine.tick(&[rule("GameA.exe", 144)], &observed).unwrap();
        let out = engine.tick(&[rule("GameA.exe", 165)], &observed).unwrap();
        assert_eq!(
            out,
            Some(Transition::Overridden {
                executable_name: "GameA.exe".to_string(),
                rate_hz: 165,
            })
        );
        assert_eq!(engine.display.applied.borrow().as_slice(), &[144, 165]);
    }

    // ── Reconciler::cycle ─────────────────────────────────────────────────────

    use crate::process_list::EnumerationError;
    use std::collections::VecDeque;

    /// Scripted snapshot provider: pops one pre-arranged result per cycle.
    struct ScriptedList {
        snapshots: VecDeque<Result<HashSet<String>, EnumerationError>>,
    }

    impl ScriptedList {
        fn new(
            snapshots: impl IntoIterator<Item = Result<HashSet<String>, EnumerationError>>,
        ) -> Self {
            Self {
                snapshots: snapshots.into_iter().collect(),
            }
        }
    }

    impl ProcessList for ScriptedList {
        fn running_names(&mut self) -> Result<HashSet<String>, EnumerationError> {
            self.snapshots
                .pop_front()
                .unwrap_or_else(|| Ok(HashSet::new()))
        }
    }

    fn shared_rules(rules: Vec<RuleConfig>) -> RwLock<Config> {
        RwLock::new(Config { rules })
    }

    #[tokio::test]
    async fn enumeration_failure_skips_cycle_without_display_calls() {
        let provider = ScriptedList::new([Err(EnumerationError("listing failed".to_string()))]);
        let mut reconciler = Reconciler::new(provider, FakeDisplay::at(60));
        let config = shared_rules(vec![rule("GameA.exe", 144)]);
        let (tx, mut rx) = mpsc::channel(8);

        assert!(reconciler.cycle(&config, &tx).await);

        // No display query or apply, no engine state change, no events.
        assert!(reconciler.engine.display.applied.borrow().is_empty());
        assert!(reconciler.engine.default_hz().is_none());
        assert!(reconciler.engine.believed_hz.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn enumeration_failure_recovers_on_next_cycle() {
        let provider = ScriptedList::new([
            Err(EnumerationError("listing failed".to_string())),
            Ok(running(&["gamea.exe"])),
        ]);
        let mut reconciler = Reconciler::new(provider, FakeDisplay::at(60));
        let config = shared_rules(vec![rule("GameA.exe", 144)]);
        let (tx, mut rx) = mpsc::channel(8);

        assert!(reconciler.cycle(&config, &tx).await);
        assert!(rx.try_recv().is_err());

        // Listing works again: the cycle proceeds normally.
        assert!(reconciler.cycle(&config, &tx).await);
        assert!(matches!(
            rx.try_recv(),
            Ok(DaemonEvent::DefaultCaptured { rate_hz: 60 })
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(DaemonEvent::OverrideApplied { rate_hz: 144, .. })
        ));
        assert_eq!(reconciler.engine.display.applied.borrow().as_slice(), &[144]);
    }

    #[tokio::test]
    async fn display_fault_is_reported_once_and_cleared_on_recovery() {
        let provider = ScriptedList::new([
            Ok(running(&[])),
            Ok(running(&[])),
            Ok(running(&[])),
        ]);
        let mut reconciler = Reconciler::new(provider, FakeDisplay::at(60));
        reconciler.engine.display.fail_query.set(true);
        let config = shared_rules(vec![]);
        let (tx, mut rx) = mpsc::channel(8);

        // Two failing cycles produce exactly one Fault event.
        assert!(reconciler.cycle(&config, &tx).await);
        assert!(reconciler.cycle(&config, &tx).await);
        assert!(matches!(rx.try_recv(), Ok(DaemonEvent::Fault(_))));
        assert!(rx.try_recv().is_err());

        // Recovery clears the fault before reporting normal progress.
        reconciler.engine.display.fail_query.set(false);
        assert!(reconciler.cycle(&config, &tx).await);
        assert!(matches!(rx.try_recv(), Ok(DaemonEvent::FaultCleared)));
        assert!(matches!(
            rx.try_recv(),
            Ok(DaemonEvent::DefaultCaptured { rate_hz: 60 })
        ));
    }
}
