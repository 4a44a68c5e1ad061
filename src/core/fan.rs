//! Fan state machine.
//!
//! [`FanController`] owns the only mutable state shared between the sensor
//! flow and the command flow. Every transition is a short read-modify-write
//! under one mutex; nothing inside the lock blocks or performs I/O. Callers
//! act on the returned signal after the lock is released.
//!
//! ```text
//!                 FanOn                       FanOff
//!   ┌──────────┐ ─────▶ ┌──────────┐  ◀───── ┌───────────┐
//!   │   Auto   │        │ ManualOn │ ──────▶ │ ManualOff │
//!   │ on / off │ ◀───── └──────────┘  FanOff └───────────┘
//!   └──────────┘ FanAuto      ▲                  │
//!        ▲                    └───── FanOn ──────┘
//!        └──────────────── FanAuto ──────────────┘
//! ```
//!
//! Automatic toggles inside `Auto` are separated by at least the cooldown.
//! Manual commands are never throttled.

use super::anomaly::AnomalyVerdict;
use super::command::ControlCommand;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Actuator intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FanState {
    /// Automatic control; `last_transition_at` is `None` before the first toggle
    Auto {
        actuator_on: bool,
        last_transition_at: Option<DateTime<Utc>>,
    },
    /// Operator forced the fan on
    ManualOn,
    /// Operator forced the fan off
    ManualOff,
}

impl FanState {
    /// State at process start: automatic, fan off, never toggled.
    pub const INITIAL: FanState = FanState::Auto {
        actuator_on: false,
        last_transition_at: None,
    };

    /// Whether this state wants the fan running.
    pub fn actuator_on(&self) -> bool {
        match self {
            FanState::Auto { actuator_on, .. } => *actuator_on,
            FanState::ManualOn => true,
            FanState::ManualOff => false,
        }
    }

    pub fn is_manual(&self) -> bool {
        !matches!(self, FanState::Auto { .. })
    }

    /// Short label used in payloads and logs.
    pub fn mode(&self) -> &'static str {
        if self.is_manual() {
            "manual"
        } else {
            "auto"
        }
    }
}

impl Default for FanState {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Instruction for the actuator adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorSignal {
    TurnOn,
    TurnOff,
}

impl ActuatorSignal {
    pub fn from_on(on: bool) -> Self {
        if on {
            ActuatorSignal::TurnOn
        } else {
            ActuatorSignal::TurnOff
        }
    }

    pub fn is_on(self) -> bool {
        matches!(self, ActuatorSignal::TurnOn)
    }
}

/// What an automatic verdict did to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoOutcome {
    /// Output toggled; the actuator must follow
    Switched(ActuatorSignal),
    /// Verdict already matches the current output
    Steady,
    /// A toggle was wanted but the cooldown has not elapsed
    CoolingDown { remaining: chrono::Duration },
    /// A manual override is active; the verdict was only recorded
    ManualOverride,
}

impl AutoOutcome {
    pub fn signal(&self) -> Option<ActuatorSignal> {
        match self {
            AutoOutcome::Switched(signal) => Some(*signal),
            _ => None,
        }
    }
}

/// Result of a manual command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualOutcome {
    /// State after the command
    pub state: FanState,
    /// `None` for `FanAuto`, which never forces a hardware change
    pub signal: Option<ActuatorSignal>,
}

#[derive(Debug)]
struct ControllerInner {
    state: FanState,
    last_verdict: Option<bool>,
    suppressed_verdicts: u64,
}

/// Shared fan state machine.
#[derive(Debug)]
pub struct FanController {
    cooldown: chrono::Duration,
    inner: Mutex<ControllerInner>,
}

impl FanController {
    pub fn new(cooldown: Duration) -> Self {
        // Out-of-range cooldowns are rejected by config validation.
        let cooldown = chrono::Duration::from_std(cooldown)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));

        Self {
            cooldown,
            inner: Mutex::new(ControllerInner {
                state: FanState::INITIAL,
                last_verdict: None,
                suppressed_verdicts: 0,
            }),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> FanState {
        self.lock().state
    }

    /// Whether the current intent is for the fan to run.
    pub fn actuator_intent(&self) -> bool {
        self.lock().state.actuator_on()
    }

    /// Most recent automatic verdict, including ones absorbed by an override.
    pub fn last_verdict(&self) -> Option<bool> {
        self.lock().last_verdict
    }

    /// Number of verdicts recorded while a manual override was active.
    pub fn suppressed_verdicts(&self) -> u64 {
        self.lock().suppressed_verdicts
    }

    /// Feed an automatic verdict.
    pub fn apply_auto(&self, verdict: &AnomalyVerdict, now: DateTime<Utc>) -> AutoOutcome {
        let mut inner = self.lock();
        inner.last_verdict = Some(verdict.is_anomalous);

        let (actuator_on, last_transition_at) = match inner.state {
            FanState::Auto {
                actuator_on,
                last_transition_at,
            } => (actuator_on, last_transition_at),
            FanState::ManualOn | FanState::ManualOff => {
                inner.suppressed_verdicts += 1;
                return AutoOutcome::ManualOverride;
            }
        };

        let wanted = verdict.is_anomalous;
        if wanted == actuator_on {
            return AutoOutcome::Steady;
        }

        if let Some(last) = last_transition_at {
            let elapsed = now - last;
            if elapsed < self.cooldown {
                return AutoOutcome::CoolingDown {
                    remaining: self.cooldown - elapsed,
                };
            }
        }

        inner.state = FanState::Auto {
            actuator_on: wanted,
            last_transition_at: Some(now),
        };
        AutoOutcome::Switched(ActuatorSignal::from_on(wanted))
    }

    /// Apply an operator command. Manual commands bypass the cooldown.
    pub fn apply_manual(&self, command: ControlCommand, now: DateTime<Utc>) -> ManualOutcome {
        let mut inner = self.lock();

        let (state, signal) = match command {
            ControlCommand::FanOn => (FanState::ManualOn, Some(ActuatorSignal::TurnOn)),
            ControlCommand::FanOff => (FanState::ManualOff, Some(ActuatorSignal::TurnOff)),
            ControlCommand::FanAuto => (
                FanState::Auto {
                    actuator_on: inner.state.actuator_on(),
                    last_transition_at: Some(now),
                },
                None,
            ),
        };

        inner.state = state;
        ManualOutcome { state, signal }
    }

    fn lock(&self) -> MutexGuard<'_, ControllerInner> {
        // Transitions cannot panic mid-update, so a poisoned lock still holds a valid state.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::baseline::PeerStatistics;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn verdict(is_anomalous: bool, secs: i64) -> AnomalyVerdict {
        AnomalyVerdict {
            is_anomalous,
            local_value: if is_anomalous { 300 } else { 40 },
            baseline: PeerStatistics {
                mean: 100.0,
                stddev: None,
                sample_count: 3,
            },
            decided_at: at(secs),
        }
    }

    fn controller() -> FanController {
        FanController::new(Duration::from_secs(5))
    }

    #[test]
    fn test_initial_state() {
        let fan = controller();
        assert_eq!(fan.state(), FanState::INITIAL);
        assert!(!fan.actuator_intent());
        assert_eq!(fan.last_verdict(), None);
    }

    #[test]
    fn test_first_toggle_is_not_blocked_by_cooldown() {
        let fan = controller();
        assert_eq!(
            fan.apply_auto(&verdict(true, 0), at(0)),
            AutoOutcome::Switched(ActuatorSignal::TurnOn)
        );
        assert_eq!(
            fan.state(),
            FanState::Auto {
                actuator_on: true,
                last_transition_at: Some(at(0)),
            }
        );
    }

    #[test]
    fn test_repeated_anomalies_switch_once() {
        let fan = controller();
        let switches = (0..10)
            .map(|t| fan.apply_auto(&verdict(true, t), at(t)))
            .filter(|o| o.signal().is_some())
            .count();
        assert_eq!(switches, 1);
    }

    #[test]
    fn test_cooldown_delays_turn_off() {
        let fan = controller();
        fan.apply_auto(&verdict(true, 0), at(0));

        assert_eq!(
            fan.apply_auto(&verdict(false, 2), at(2)),
            AutoOutcome::CoolingDown {
                remaining: chrono::Duration::seconds(3)
            }
        );
        assert!(fan.actuator_intent());

        // Exactly the cooldown is enough.
        assert_eq!(
            fan.apply_auto(&verdict(false, 5), at(5)),
            AutoOutcome::Switched(ActuatorSignal::TurnOff)
        );
        assert!(!fan.actuator_intent());
    }

    #[test]
    fn test_readings_scenario_turns_on_at_third_sample() {
        let fan = controller();
        let outcomes: Vec<_> = [(false, 0), (false, 1), (true, 2)]
            .into_iter()
            .map(|(anomalous, t)| fan.apply_auto(&verdict(anomalous, t), at(t)))
            .collect();

        assert_eq!(
            outcomes,
            vec![
                AutoOutcome::Steady,
                AutoOutcome::Steady,
                AutoOutcome::Switched(ActuatorSignal::TurnOn)
            ]
        );
    }

    #[test]
    fn test_manual_on_pins_output() {
        let fan = controller();
        let outcome = fan.apply_manual(ControlCommand::FanOn, at(0));
        assert_eq!(outcome.signal, Some(ActuatorSignal::TurnOn));
        assert_eq!(outcome.state, FanState::ManualOn);

        for t in 1..50 {
            assert_eq!(
                fan.apply_auto(&verdict(false, t), at(t)),
                AutoOutcome::ManualOverride
            );
        }
        assert!(fan.actuator_intent());
        assert_eq!(fan.last_verdict(), Some(false));
        assert_eq!(fan.suppressed_verdicts(), 49);
    }

    #[test]
    fn test_manual_off_overrides_running_auto() {
        let fan = controller();
        fan.apply_auto(&verdict(true, 0), at(0));
        fan.apply_manual(ControlCommand::FanOff, at(1));

        assert_eq!(
            fan.apply_auto(&verdict(true, 2), at(2)),
            AutoOutcome::ManualOverride
        );
        assert_eq!(fan.state(), FanState::ManualOff);
        assert!(!fan.actuator_intent());
    }

    #[test]
    fn test_fan_auto_keeps_physical_state() {
        let fan = controller();
        fan.apply_manual(ControlCommand::FanOn, at(0));

        let outcome = fan.apply_manual(ControlCommand::FanAuto, at(10));
        assert_eq!(outcome.signal, None);
        assert_eq!(
            outcome.state,
            FanState::Auto {
                actuator_on: true,
                last_transition_at: Some(at(10)),
            }
        );

        // Cooldown restarts at the release.
        assert!(matches!(
            fan.apply_auto(&verdict(false, 12), at(12)),
            AutoOutcome::CoolingDown { .. }
        ));
        assert_eq!(
            fan.apply_auto(&verdict(false, 15), at(15)),
            AutoOutcome::Switched(ActuatorSignal::TurnOff)
        );
    }

    #[test]
    fn test_manual_commands_are_not_throttled() {
        let fan = controller();
        let signals: Vec<_> = [
            ControlCommand::FanOn,
            ControlCommand::FanOff,
            ControlCommand::FanOn,
        ]
        .into_iter()
        .map(|c| fan.apply_manual(c, at(0)).signal)
        .collect();

        assert_eq!(
            signals,
            vec![
                Some(ActuatorSignal::TurnOn),
                Some(ActuatorSignal::TurnOff),
                Some(ActuatorSignal::TurnOn)
            ]
        );
    }

    #[test]
    fn test_manual_command_wins_over_concurrent_verdicts() {
        let fan = Arc::new(controller());

        let workers: Vec<_> = (0..4)
            .map(|i| {
                let fan = fan.clone();
                std::thread::spawn(move || {
                    for t in 0..500 {
                        fan.apply_auto(&verdict((t + i) % 2 == 0, t), at(t));
                    }
                })
            })
            .collect();

        fan.apply_manual(ControlCommand::FanOff, at(0));
        for w in workers {
            w.join().unwrap();
        }

        // Whatever interleaving happened, the override is still in force.
        assert_eq!(fan.state(), FanState::ManualOff);
        assert_eq!(
            fan.apply_auto(&verdict(true, 1_000), at(1_000)),
            AutoOutcome::ManualOverride
        );
    }
}
