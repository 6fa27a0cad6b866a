//! Rate limiting for prod confirmation dialogs: single-flight, a cooldown
//! after a denial, and a sliding-window attempt cap.
//!
//! Purely synchronous; `acquire` returns a decision instantly and never
//! blocks. The current instant is passed in by the caller, so tests control
//! the clock.

use std::{collections::VecDeque, time::Duration, time::Instant};

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    /// How long prod requests are refused after a denial.
    pub cooldown: Duration,
    /// Width of the sliding attempt window.
    pub window: Duration,
    /// Max acquires allowed within one window.
    pub max_attempts_per_window: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            window: Duration::from_secs(60),
            max_attempts_per_window: 5,
        }
    }
}

/// How the guarded prod request concluded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ReleaseOutcome {
    Granted,
    Denied,
    Error,
}

#[derive(Debug)]
pub struct ProdRateLimiter {
    config: RateLimitConfig,
    /// Whether a confirmation dialog is currently outstanding.
    in_flight: bool,
    /// End of the active post-denial cooldown, if any.
    cooldown_until: Option<Instant>,
    /// Recent acquire instants, pruned to the window on each acquire.
    attempts: VecDeque<Instant>,
}

impl Default for ProdRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl ProdRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            in_flight: false,
            cooldown_until: None,
            attempts: VecDeque::new(),
        }
    }

    /// Try to start a prod confirmation. `Err` carries the refusal reason.
    ///
    /// Every `Ok` must be paired with exactly one [`release`].
    ///
    /// [`release`]: ProdRateLimiter::release
    pub fn acquire(&mut self, now: Instant) -> Result<(), String> {
        if self.in_flight {
            return Err(
                "a production access request is already pending".to_owned()
            );
        }

        if let Some(cooldown_until) = self.cooldown_until
            && now < cooldown_until
        {
            let remaining_ms = cooldown_until
                .saturating_duration_since(now)
                .as_millis();
            let secs = remaining_ms.div_ceil(1000);
            return Err(format!("retry in {secs}s"));
        }

        while let Some(&oldest) = self.attempts.front() {
            if now.saturating_duration_since(oldest) > self.config.window {
                self.attempts.pop_front();
            } else {
                break;
            }
        }
        if self.attempts.len() >= self.config.max_attempts_per_window {
            let max = self.config.max_attempts_per_window;
            let minutes = self.config.window.as_secs().div_ceil(60);
            return Err(format!(
                "Rate limit exceeded: max {max} attempts per {minutes} minutes"
            ));
        }

        self.attempts.push_back(now);
        self.in_flight = true;
        Ok(())
    }

    /// Finish the outstanding confirmation. A denial starts the cooldown;
    /// grants and errors don't.
    pub fn release(&mut self, now: Instant, outcome: ReleaseOutcome) {
        self.in_flight = false;
        if outcome == ReleaseOutcome::Denied {
            self.cooldown_until = Some(now + self.config.cooldown);
        }
    }
}
