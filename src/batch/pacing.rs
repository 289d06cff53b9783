use std::time::{Duration, Instant};

use crate::tracker::{RateLimitAction, RateTracker, SharedTracker};

/// How the orchestrator spaces out chunks.
///
/// `interval` is the fixed minimum between chunk starts. `tracker` decides
/// what happens when the model's tracker reports it is near a limit.
/// With `enforce_rpm`, the interval is raised so that one chunk per interval
/// stays under the rpm ceiling.
#[derive(Debug, Clone, PartialEq)]
pub struct PacingPolicy {
    pub interval: Duration,
    pub tracker: RateLimitAction,
    pub enforce_rpm: bool,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            tracker: RateLimitAction::Warn,
            enforce_rpm: false,
        }
    }
}

impl PacingPolicy {
    pub fn effective_interval(&self, batch_size: usize, rpm_limit: u32) -> Duration {
        if !self.enforce_rpm || rpm_limit == 0 {
            return self.interval;
        }
        let floor = Duration::from_secs_f64(batch_size as f64 * 60.0 / rpm_limit as f64);
        self.interval.max(floor)
    }

    /// Consults the tracker before a chunk. Returns how long to sleep.
    pub fn tracker_wait(&self, tracker: &SharedTracker, buffer_percent: f64) -> Option<Duration> {
        if self.tracker == RateLimitAction::Ignore {
            return None;
        }

        let status = tracker.lock().check_rate_limits(buffer_percent);
        if !status.is_near_limit() {
            return None;
        }

        tracing::warn!("Rate limits approaching: {}", status.limit_messages.join(", "));
        match self.tracker {
            RateLimitAction::Wait => RateTracker::wait_for_status(&status).map(Duration::from_secs),
            _ => None,
        }
    }
}

/// Time left before the next chunk may start, measured from the start of
/// the previous one.
pub fn should_wait(last_start: Option<Instant>, interval: Duration, now: Instant) -> Option<Duration> {
    let elapsed = now.saturating_duration_since(last_start?);
    interval.checked_sub(elapsed).filter(|wait| !wait.is_zero())
}

/// Requests per minute achieved by `requests` calls over `elapsed`.
pub fn effective_rpm(requests: usize, elapsed: Duration) -> f64 {
    let minutes = elapsed.as_secs_f64() / 60.0;
    if minutes <= 0.0 {
        return 0.0;
    }
    requests as f64 / minutes
}
