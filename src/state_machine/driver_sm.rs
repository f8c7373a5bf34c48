//! Hypervisor lifecycle state machine.
//!
//! ```text
//! NotStarted ──Launched──► Running{1} ──Exited(0)──► Restarting ──Launched──► Running{2}
//!                              │                          │                       │
//!                              │                   RelaunchFailed            Exited(rc)
//!                              │                          ▼                       ▼
//!                              └──Exited(rc≠0)──────► Stopped{rc} ◄───────────────┘
//!
//! Running ──StopRequested──► Stopping ──Exited(rc)──► Stopped{rc}
//! ```
//!
//! The hypervisor exits 0 when the guest reboots. Only the installer's reboot
//! is followed; whatever ends the second boot cycle is final, and its
//! poweroff code is reported as success.

use statig::prelude::*;
use tracing::{info, warn};

/// Hypervisor exit status when the guest rebooted.
pub const EXIT_REBOOT: i32 = 0;
/// Hypervisor exit status when the guest powered off.
pub const EXIT_POWEROFF: i32 = 1;
/// Reported for relaunch failures and signal-terminated processes.
pub const EXIT_ABNORMAL: i32 = -1;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// A hypervisor process was spawned.
    Launched,
    /// The relaunch after a reboot could not be spawned.
    RelaunchFailed(String),
    /// The tracked process exited with the given status.
    Exited(i32),
    /// A caller asked for the VM to be killed.
    StopRequested,
}

// ---------------------------------------------------------------------------
// Shared storage
// ---------------------------------------------------------------------------

pub struct DriverMachine {
    pub vm_name: String,
    /// Number of processes launched so far.
    pub launches: u32,
}

impl DriverMachine {
    pub fn new(vm_name: impl Into<String>) -> Self {
        Self {
            vm_name: vm_name.into(),
            launches: 0,
        }
    }
}

impl State {
    /// Final exit code once the machine reached `Stopped`.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            State::Stopped { rc } => Some(*rc),
            _ => None,
        }
    }

    /// `true` while a process is (or is about to be) alive.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            State::Running { .. } | State::Restarting {} | State::Stopping {}
        )
    }
}

// ---------------------------------------------------------------------------
// State machine implementation
// ---------------------------------------------------------------------------

#[state_machine(
    initial = "State::not_started()",
    state(derive(Debug, Clone, PartialEq))
)]
impl DriverMachine {
    #[state]
    fn not_started(&mut self, event: &DriverEvent) -> Outcome<State> {
        match event {
            DriverEvent::Launched => {
                self.launches += 1;
                Transition(State::running(1))
            }
            _ => Handled,
        }
    }

    /// A hypervisor process for boot cycle `cycle` is alive.
    #[state]
    fn running(&mut self, event: &DriverEvent, cycle: &u8) -> Outcome<State> {
        match event {
            DriverEvent::Exited(EXIT_REBOOT) if *cycle == 1 => {
                info!(target: "driver", vm = %self.vm_name, "guest rebooted, relaunching without install media");
                Transition(State::restarting())
            }
            DriverEvent::Exited(code) => {
                let rc = if *cycle > 1 && *code == EXIT_POWEROFF {
                    0
                } else {
                    *code
                };
                info!(target: "driver", vm = %self.vm_name, cycle, code, rc, "hypervisor exited");
                Transition(State::stopped(rc))
            }
            DriverEvent::StopRequested => Transition(State::stopping()),
            _ => Handled,
        }
    }

    #[state]
    fn restarting(&mut self, event: &DriverEvent) -> Outcome<State> {
        match event {
            DriverEvent::Launched => {
                self.launches += 1;
                Transition(State::running(2))
            }
            DriverEvent::RelaunchFailed(reason) => {
                warn!(target: "driver", vm = %self.vm_name, %reason, "relaunch after reboot failed");
                Transition(State::stopped(EXIT_ABNORMAL))
            }
            _ => Handled,
        }
    }

    /// Kill was sent; waiting for the process to go away.
    #[state]
    fn stopping(&mut self, event: &DriverEvent) -> Outcome<State> {
        match event {
            DriverEvent::Exited(code) => Transition(State::stopped(*code)),
            _ => Handled,
        }
    }

    #[state]
    fn stopped(&mut self, event: &DriverEvent, rc: &i32) -> Outcome<State> {
        let _ = (event, rc);
        Handled
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> StateMachine<DriverMachine> {
        DriverMachine::new("packer-test").state_machine()
    }

    #[test]
    fn install_reboot_then_poweroff_reports_success() {
        let mut sm = machine();
        sm.handle(&DriverEvent::Launched);
        assert_eq!(sm.state(), &State::Running { cycle: 1 });

        sm.handle(&DriverEvent::Exited(EXIT_REBOOT));
        assert_eq!(sm.state(), &State::Restarting {});

        sm.handle(&DriverEvent::Launched);
        assert_eq!(sm.state(), &State::Running { cycle: 2 });

        sm.handle(&DriverEvent::Exited(EXIT_POWEROFF));
        assert_eq!(sm.state().exit_code(), Some(0));
        assert_eq!(sm.inner().launches, 2);
    }

    #[test]
    fn first_cycle_failure_stops_with_observed_code() {
        let mut sm = machine();
        sm.handle(&DriverEvent::Launched);
        sm.handle(&DriverEvent::Exited(4));
        assert_eq!(sm.state(), &State::Stopped { rc: 4 });
    }

    #[test]
    fn first_cycle_poweroff_is_not_remapped() {
        let mut sm = machine();
        sm.handle(&DriverEvent::Launched);
        sm.handle(&DriverEvent::Exited(EXIT_POWEROFF));
        assert_eq!(sm.state().exit_code(), Some(EXIT_POWEROFF));
    }

    #[test]
    fn second_reboot_is_final() {
        let mut sm = machine();
        sm.handle(&DriverEvent::Launched);
        sm.handle(&DriverEvent::Exited(EXIT_REBOOT));
        sm.handle(&DriverEvent::Launched);
        sm.handle(&DriverEvent::Exited(EXIT_REBOOT));
        assert_eq!(sm.state().exit_code(), Some(0));
        assert_eq!(sm.inner().launches, 2);
    }

    #[test]
    fn relaunch_failure_stops_abnormally() {
        let mut sm = machine();
        sm.handle(&DriverEvent::Launched);
        sm.handle(&DriverEvent::Exited(EXIT_REBOOT));
        sm.handle(&DriverEvent::RelaunchFailed("no such file".to_string()));
        assert_eq!(sm.state().exit_code(), Some(EXIT_ABNORMAL));
    }

    #[test]
    fn stop_request_suppresses_relaunch() {
        let mut sm = machine();
        sm.handle(&DriverEvent::Launched);
        sm.handle(&DriverEvent::StopRequested);
        assert_eq!(sm.state(), &State::Stopping {});
        sm.handle(&DriverEvent::Exited(EXIT_REBOOT));
        assert_eq!(sm.state().exit_code(), Some(EXIT_REBOOT));
    }

    #[test]
    fn stopped_ignores_further_events() {
        let mut sm = machine();
        sm.handle(&DriverEvent::Launched);
        sm.handle(&DriverEvent::Exited(2));
        sm.handle(&DriverEvent::Launched);
        assert_eq!(sm.state(), &State::Stopped { rc: 2 });
        assert!(!sm.state().is_active());
    }
}
