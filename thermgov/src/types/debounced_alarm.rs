//! A one-shot alarm that fires once per episode of a persistent condition.
//!
//! The governor uses it for the over-temperature shutdown path: the
//! shutdown request must go out once per excursion above the shutdown
//! threshold, not once per poll.
//!
//! # State Machine
//!
//! ```text
//!          check(true)              elapsed >= debounce
//!  Idle ──────────────► Timing ──────────────────────► Fired
//!   ▲                     │                              │
//!   │     check(false)    │                              │
//!   ├─────────────────────┘                              │
//!   │            check(false) / reset()                  │
//!   └────────────────────────────────────────────────────┘
//! ```
//!
//! With a zero debounce, `check(true)` from `Idle` goes straight to
//! `Fired`.

use std::time::Duration;

use tokio::time::Instant;

/// Result of [`DebouncedAlarm::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmStatus {
    /// Condition is false and nothing is pending.
    Idle,

    /// Condition is true but has not held for the debounce window.
    Pending,

    /// Alarm fired on this call. Returned once per episode.
    Triggered,

    /// Already fired and the condition still holds.
    Active,

    /// Was fired, condition just cleared. Returned once; the alarm is
    /// re-armed afterwards.
    Resolved,
}

#[derive(Debug)]
enum State {
    Idle,
    Timing(Instant),
    Fired,
}

#[derive(Debug)]
pub struct DebouncedAlarm {
    debounce: Duration,
    state: State,
}

impl DebouncedAlarm {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            state: State::Idle,
        }
    }

    /// Feed the current condition and report what happened.
    ///
    /// | Previous state | condition | Result |
    /// |----------------|-----------|--------|
    /// | Idle | false | `Idle` |
    /// | Idle | true | `Pending`, or `Triggered` when debounce is zero |
    /// | Timing | false | `Idle` |
    /// | Timing | true | `Pending` or `Triggered` |
    /// | Fired | false | `Resolved` |
    /// | Fired | true | `Active` |
    pub fn check(&mut self, condition: bool) -> AlarmStatus {
        match (&self.state, condition) {
            (State::Idle, false) => AlarmStatus::Idle,

            (State::Idle, true) if self.debounce.is_zero() => {
                self.state = State::Fired;
                AlarmStatus::Triggered
            }

            (State::Idle, true) => {
                self.state = State::Timing(Instant::now());
                AlarmStatus::Pending
            }

            (State::Timing(_), false) => {
                self.state = State::Idle;
                AlarmStatus::Idle
            }

            (State::Timing(since), true) => {
                if since.elapsed() >= self.debounce {
                    self.state = State::Fired;
                    AlarmStatus::Triggered
                } else {
                    AlarmStatus::Pending
                }
            }

            (State::Fired, false) => {
                self.state = State::Idle;
                AlarmStatus::Resolved
            }

            (State::Fired, true) => AlarmStatus::Active,
        }
    }

    /// Re-arm regardless of the current state.
    pub fn reset(&mut self) {
        self.state = State::Idle;
    }

    pub fn is_fired(&self) -> bool {
        matches!(self.state, State::Fired)
    }
}
