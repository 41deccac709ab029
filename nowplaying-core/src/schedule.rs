use std::time::Duration;
use tracing::{error, warn};

/// How a poll tick ended, as far as scheduling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The upstream answered (playing or not)
    Completed,
    /// Network failure or unexpected upstream status
    Transient,
    /// Upstream asked us to slow down
    RateLimited { retry_after: Duration },
    /// No usable credential; waiting for the user to log in
    Unauthorized,
}

/// Poll cadence settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub error_backoff: Duration,
    pub unauthorized_delay: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            error_backoff: Duration::from_secs(15),
            unauthorized_delay: Duration::from_secs(5),
        }
    }
}

/// Number of consecutive failures after which backoff is logged as an error
const LOUD_FAILURE_THRESHOLD: u32 = 5;

/// Single authority for the delay before the next poll tick.
#[derive(Debug, Clone)]
pub struct PollScheduler {
    schedule: PollSchedule,
    consecutive_errors: u32,
}

impl PollScheduler {
    #[must_use]
    pub const fn new(schedule: PollSchedule) -> Self {
        Self {
            schedule,
            consecutive_errors: 0,
        }
    }

    /// Compute the delay before the next tick given how the last one ended.
    ///
    /// A completed tick resets to the nominal interval; failures back off for a
    /// fixed period instead of retrying immediately.
    pub fn next_delay(&mut self, outcome: TickOutcome) -> Duration {
        match outcome {
            TickOutcome::Completed => {
                self.consecutive_errors = 0;
                self.schedule.interval
            }
            TickOutcome::Unauthorized => {
                self.consecutive_errors = 0;
                self.schedule.unauthorized_delay
            }
            TickOutcome::Transient => {
                self.record_failure();
                self.schedule.error_backoff
            }
            TickOutcome::RateLimited { retry_after } => {
                self.record_failure();
                retry_after.max(self.schedule.error_backoff)
            }
        }
    }

    fn record_failure(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        if self.consecutive_errors >= LOUD_FAILURE_THRESHOLD {
            error!(
                "{} consecutive poll failures, backing off {}s",
                self.consecutive_errors,
                self.schedule.error_backoff.as_secs()
            );
        } else {
            warn!(
                "Poll failed (attempt {}), backing off {}s",
                self.consecutive_errors,
                self.schedule.error_backoff.as_secs()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_uses_interval() {
        let mut scheduler = PollScheduler::new(PollSchedule::default());
        assert_eq!(scheduler.next_delay(TickOutcome::Completed), Duration::from_secs(1));
    }

    #[test]
    fn test_transient_backs_off_then_resets() {
        let mut scheduler = PollScheduler::new(PollSchedule::default());
        assert_eq!(scheduler.next_delay(TickOutcome::Transient), Duration::from_secs(15));
        assert_eq!(scheduler.next_delay(TickOutcome::Transient), Duration::from_secs(15));
        assert_eq!(scheduler.consecutive_errors, 2);

        assert_eq!(scheduler.next_delay(TickOutcome::Completed), Duration::from_secs(1));
        assert_eq!(scheduler.consecutive_errors, 0);
    }

    #[test]
    fn test_rate_limit_honours_longer_retry_after() {
        let mut scheduler = PollScheduler::new(PollSchedule::default());
        let long = TickOutcome::RateLimited {
            retry_after: Duration::from_secs(40),
        };
        let short = TickOutcome::RateLimited {
            retry_after: Duration::from_secs(2),
        };
        assert_eq!(scheduler.next_delay(long), Duration::from_secs(40));
        assert_eq!(scheduler.next_delay(short), Duration::from_secs(15));
    }

    #[test]
    fn test_unauthorized_waits_for_login() {
        let mut scheduler = PollScheduler::new(PollSchedule::default());
        assert_eq!(scheduler.next_delay(TickOutcome::Unauthorized), Duration::from_secs(5));
        assert_eq!(scheduler.consecutive_errors, 0);
    }
}
