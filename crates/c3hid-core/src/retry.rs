//! Bounded polling policy and the clock it waits on.

use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Source of time for waits. Swapped for [`FakeClock`] in tests.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    fn sleep(&mut self, duration: Duration);
}

/// Wall clock backed by `std::thread::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that advances only when slept on, and records every sleep.
#[derive(Debug, Clone, Default)]
pub struct FakeClock {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> &[Duration] {
        &self.sleeps
    }

    /// Sum of all sleeps so far.
    pub fn total_slept(&self) -> Duration {
        self.sleeps.iter().sum()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        self.now
    }

    fn sleep(&mut self, duration: Duration) {
        self.now += duration;
        self.sleeps.push(duration);
    }
}

/// Result of one polling attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    Ready(T),
    Pending,
}

/// Why a poll ended without a ready value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollError<E> {
    /// Attempt budget or deadline used up.
    Exhausted { attempts: u32 },
    /// The attempt itself failed.
    Failed(E),
}

/// Bounded retry: at most `max_attempts` tries, `delay_ms` apart, optionally
/// cut short by an overall deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
    pub deadline_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            delay_ms: 10,
            deadline_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// Call `attempt` until it is ready, fails, or the budget runs out.
    pub fn poll<T, E, C: Clock>(
        &self,
        clock: &mut C,
        mut attempt: impl FnMut() -> Result<Attempt<T>, E>,
    ) -> Result<T, PollError<E>> {
        let start = clock.now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            if let Attempt::Ready(value) = attempt().map_err(PollError::Failed)? {
                return Ok(value);
            }
            let past_deadline = self
                .deadline()
                .is_some_and(|d| clock.now().saturating_sub(start) >= d);
            if attempts >= self.max_attempts.max(1) || past_deadline {
                return Err(PollError::Exhausted { attempts });
            }
            clock.sleep(self.delay());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_after_pending() {
        let policy = RetryPolicy::default();
        let mut clock = FakeClock::new();
        let mut left = 3;
        let value = policy
            .poll(&mut clock, || -> Result<_, ()> {
                if left == 0 {
                    Ok(Attempt::Ready(7))
                } else {
                    left -= 1;
                    Ok(Attempt::Pending)
                }
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(clock.sleeps().len(), 3);
        assert_eq!(clock.total_slept(), Duration::from_millis(30));
    }

    #[test]
    fn test_exhausts_attempt_budget() {
        let policy = RetryPolicy::default();
        let mut clock = FakeClock::new();
        let mut calls = 0;
        let result: Result<(), _> = policy.poll(&mut clock, || -> Result<_, ()> {
            calls += 1;
            Ok(Attempt::Pending)
        });
        assert_eq!(result, Err(PollError::Exhausted { attempts: 50 }));
        assert_eq!(calls, 50);
        assert_eq!(clock.sleeps().len(), 49);
    }

    #[test]
    fn test_deadline_cuts_polling_short() {
        let policy = RetryPolicy {
            max_attempts: 1000,
            delay_ms: 10,
            deadline_ms: Some(35),
        };
        let mut clock = FakeClock::new();
        let result: Result<(), _> = policy.poll(&mut clock, || -> Result<_, ()> { Ok(Attempt::Pending) });
        assert_eq!(result, Err(PollError::Exhausted { attempts: 5 }));
    }

    #[test]
    fn test_failure_stops_immediately() {
        let policy = RetryPolicy::default();
        let mut clock = FakeClock::new();
        let result: Result<(), _> = policy.poll(&mut clock, || Err("boom"));
        assert_eq!(result, Err(PollError::Failed("boom")));
        assert!(clock.sleeps().is_empty());
    }
}
