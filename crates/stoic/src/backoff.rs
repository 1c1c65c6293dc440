//! Restart backoff for the supervised child.
//!
//! The policy is evaluated once per child exit. Children that die before
//! their backoff window has elapsed wait out the remainder of the window and
//! double it for next time; children that outlive the window restart at once
//! and decay the window back towards the default.
//!
//! The elapsed time is measured from the moment the previous child was
//! started: when its delay ran out, or earlier if the wait was interrupted.
//! The backoff sleep itself never counts as survival time.

use std::time::{Duration, Instant};

/// Stateful restart backoff tracker owned by the runner.
#[derive(Debug, Clone)]
pub struct Backoff {
    default: Duration,
    current: Duration,
    last_restart: Option<Instant>,
}

impl Backoff {
    /// Creates a tracker whose window starts at (and decays to) `default`.
    #[must_use]
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            current: default,
            last_restart: None,
        }
    }

    /// Current backoff window.
    #[must_use]
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns true once at least one restart decision has been made.
    #[must_use]
    pub fn has_history(&self) -> bool {
        self.last_restart.is_some()
    }

    /// Records when the restart actually happened.
    ///
    /// [`Backoff::next_delay`] assumes the whole delay is slept; a wait cut
    /// short by an explicit restart calls this with the real wake time.
    pub fn restarted_at(&mut self, at: Instant) {
        if self.last_restart.is_some() {
            self.last_restart = Some(at);
        }
    }

    /// Decides how long to wait before restarting a child that exited at `now`.
    ///
    /// `None` means restart immediately.
    pub fn next_delay(&mut self, now: Instant) -> Option<Duration> {
        let delay = match self.last_restart {
            None => None,
            Some(previous) => {
                let elapsed = now.saturating_duration_since(previous);
                let decision = decide(self.default, self.current, elapsed);
                self.current = decision.next_backoff;
                decision.delay
            }
        };
        let due = delay.and_then(|delay| now.checked_add(delay)).unwrap_or(now);
        self.last_restart = Some(due);
        delay
    }
}

/// Outcome of a single backoff evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Time to wait before restarting, if any.
    pub delay: Option<Duration>,
    /// Window to use for the next evaluation.
    pub next_backoff: Duration,
}

/// Pure backoff rule: the child survived `elapsed` under a `current` window.
#[must_use]
pub fn decide(default: Duration, current: Duration, elapsed: Duration) -> Decision {
    if current <= elapsed {
        let decayed = 2.0 * current.as_secs_f64() - elapsed.as_secs_f64() / 2.0;
        let next_backoff = Duration::try_from_secs_f64(decayed.max(default.as_secs_f64()))
            .unwrap_or(Duration::MAX);
        Decision {
            delay: None,
            next_backoff,
        }
    } else {
        Decision {
            delay: Some(current - elapsed),
            next_backoff: current.saturating_mul(2),
        }
    }
}
