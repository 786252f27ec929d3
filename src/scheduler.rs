//! Send scheduling for one sender: tick cadence, coalescing, idle stop.

use std::time::Duration;

use crate::error::ValidationError;

/// Longest step table a single transition may precompute: a little over
/// seven hours at 40 frames per second.
pub const MAX_STEPS: u32 = 1 << 20;

/// What a `send_data` request should do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDecision {
    /// Scheduler was idle: transmit immediately and arm the tick.
    TransmitNow,
    /// A tick is armed: leave the frame dirty for the next tick.
    Coalesce,
}

/// Result of one scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    pub transmitted: bool,
    pub rearm: bool,
    pub finished: usize,
}

/// Tick interval in ms: the refresh interval when spontaneous sends are
/// disabled (`max_rate == 0`), otherwise the faster of `1000 / max_rate` and
/// the refresh interval.
pub fn tick_interval_ms(max_rate: u32, refresh_ms: u64) -> u64 {
    let interval = if max_rate == 0 {
        refresh_ms
    } else {
        let per_rate = (1000.0 / f64::from(max_rate)).round() as u64;
        per_rate.min(refresh_ms)
    };
    interval.max(1)
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    tick_interval_ms: u64,
    active: bool,
}

impl Scheduler {
    pub fn new(max_rate: u32, refresh_ms: u64) -> Self {
        Self {
            tick_interval_ms: tick_interval_ms(max_rate, refresh_ms),
            active: false,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }

    /// Number of ticks covering `duration_ms`, rounded to the nearest tick.
    pub fn steps_for(&self, duration_ms: u64) -> u32 {
        let steps = (duration_ms as f64 / self.tick_interval_ms as f64).round();
        steps.min(f64::from(u32::MAX)) as u32
    }

    /// Like `steps_for`, but rejects durations longer than `MAX_STEPS` ticks.
    pub fn checked_steps(&self, duration_ms: u64) -> Result<u32, ValidationError> {
        let steps = self.steps_for(duration_ms);
        if steps > MAX_STEPS {
            return Err(ValidationError::DurationTooLong {
                duration_ms,
                max_ms: u64::from(MAX_STEPS) * self.tick_interval_ms,
            });
        }
        Ok(steps)
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Arms the tick without transmitting (a transition was scheduled).
    pub fn activate(&mut self) {
        self.active = true;
    }

    pub fn stop(&mut self) {
        self.active = false;
    }

    pub fn request_send(&mut self) -> SendDecision {
        if self.active {
            SendDecision::Coalesce
        } else {
            self.active = true;
            SendDecision::TransmitNow
        }
    }

    /// Decides whether the tick stays armed after a tick.
    ///
    /// A tick that transmitted stays armed so a burst of sends right after it
    /// is coalesced; a clean tick with nothing left to advance stops ticking.
    pub fn after_tick(&mut self, transmitted: bool, transitions_left: usize) -> bool {
        self.active = transmitted || transitions_left > 0;
        self.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_interval_follows_rate_and_refresh() {
        assert_eq!(tick_interval_ms(40, 1000), 25);
        assert_eq!(tick_interval_ms(30, 1000), 33);
        assert_eq!(tick_interval_ms(0, 1000), 1000);
        assert_eq!(tick_interval_ms(2, 100), 100);
        assert_eq!(tick_interval_ms(5000, 1000), 1);
    }

    #[test]
    fn steps_round_to_nearest_tick() {
        let scheduler = Scheduler::new(40, 1000);
        assert_eq!(scheduler.steps_for(1000), 40);
        assert_eq!(scheduler.steps_for(30), 1);
        assert_eq!(scheduler.steps_for(10), 0);
        assert_eq!(scheduler.steps_for(0), 0);
    }

    #[test]
    fn overlong_durations_are_rejected() {
        let scheduler = Scheduler::new(40, 1000);
        assert_eq!(scheduler.checked_steps(60_000), Ok(2400));
        assert_eq!(scheduler.checked_steps(u64::from(MAX_STEPS) * 25), Ok(MAX_STEPS));
        assert_eq!(
            scheduler.checked_steps(200_000_000_000),
            Err(ValidationError::DurationTooLong {
                duration_ms: 200_000_000_000,
                max_ms: u64::from(MAX_STEPS) * 25,
            })
        );
    }

    #[test]
    fn first_send_transmits_then_coalesces() {
        let mut scheduler = Scheduler::new(40, 1000);
        assert_eq!(scheduler.request_send(), SendDecision::TransmitNow);
        for _ in 0..4 {
            assert_eq!(scheduler.request_send(), SendDecision::Coalesce);
        }
        assert!(scheduler.after_tick(true, 0));
        assert!(!scheduler.after_tick(false, 0));
        assert_eq!(scheduler.request_send(), SendDecision::TransmitNow);
    }

    #[test]
    fn stays_armed_while_transitions_run() {
        let mut scheduler = Scheduler::new(40, 1000);
        scheduler.activate();
        assert!(scheduler.after_tick(false, 2));
        assert!(scheduler.is_active());
    }
}
