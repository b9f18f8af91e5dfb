//! Cooperative wall-clock timers.
//!
//! [`CountdownTimer`] is checked between pattern evaluations and inside the
//! generator's enumeration loop; tight inner loops (abstract-operator
//! multiplication, Dijkstra pops) never consult it. [`StopTimer`] is a
//! resumable accounting timer for per-phase statistics.

use std::time::{Duration, Instant};

/// A one-shot countdown against wall-clock time.
///
/// `Duration::MAX` means "no limit" and never expires.
#[derive(Debug, Clone)]
pub struct CountdownTimer {
    start: Instant,
    limit: Duration,
}

impl CountdownTimer {
    pub fn new(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    /// A countdown that never expires.
    pub fn unlimited() -> Self {
        Self::new(Duration::MAX)
    }

    pub fn is_expired(&self) -> bool {
        self.limit != Duration::MAX && self.start.elapsed() >= self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left before expiry (`Duration::MAX` if unlimited).
    pub fn remaining(&self) -> Duration {
        if self.limit == Duration::MAX {
            Duration::MAX
        } else {
            self.limit.saturating_sub(self.start.elapsed())
        }
    }
}

/// A stoppable, resumable accumulating timer.
#[derive(Debug)]
pub struct StopTimer {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl StopTimer {
    /// Create a stopped timer.
    pub fn new() -> Self {
        Self {
            accumulated: Duration::ZERO,
            running_since: None,
        }
    }

    /// Create a timer that is already running.
    pub fn started() -> Self {
        Self {
            accumulated: Duration::ZERO,
            running_since: Some(Instant::now()),
        }
    }

    pub fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self.running_since {
            Some(since) => self.accumulated + since.elapsed(),
            None => self.accumulated,
        }
    }
}

impl Default for StopTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_expires() {
        let timer = CountdownTimer::unlimited();
        assert!(!timer.is_expired());
        assert_eq!(timer.remaining(), Duration::MAX);
    }

    #[test]
    fn test_zero_limit_expires_immediately() {
        let timer = CountdownTimer::new(Duration::ZERO);
        assert!(timer.is_expired());
        assert_eq!(timer.remaining(), Duration::ZERO);
    }

    #[test]
    fn test_future_limit_not_expired() {
        let timer = CountdownTimer::new(Duration::from_secs(60));
        assert!(!timer.is_expired());
        assert!(timer.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn test_stop_timer_accumulates_only_while_running() {
        let mut timer = StopTimer::new();
        assert_eq!(timer.elapsed(), Duration::ZERO);
        timer.resume();
        timer.stop();
        let after_first = timer.elapsed();
        std::thread::sleep(Duration::from_millis(5));
        // Stopped: no further accumulation.
        assert_eq!(timer.elapsed(), after_first);
    }

    #[test]
    fn test_stop_timer_double_resume_is_noop() {
        let mut timer = StopTimer::started();
        timer.resume();
        timer.stop();
        timer.stop();
        assert!(timer.elapsed() < Duration::from_secs(1));
    }
}
