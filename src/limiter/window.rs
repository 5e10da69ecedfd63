//! Rate Window
//!
//! Admission bookkeeping for the rate-limiting overlay.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// How admissions are counted against the period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Count resets once the period has elapsed since the window started
    Fixed,

    /// No trailing interval of one period ever holds more than capacity admissions
    #[default]
    Sliding,
}

/// Admission state for one overlay
#[derive(Debug)]
pub struct RateWindow {
    policy: WindowPolicy,

    /// Maximum admissions per period
    capacity: u32,

    period: Duration,

    /// Start of the current window; the oldest admission under the sliding policy
    window_start: Option<Instant>,

    /// Admissions since `window_start`
    count: u32,

    /// Instants of the most recent admissions, oldest first (sliding only)
    admitted: VecDeque<Instant>,
}

impl RateWindow {
    /// Create a window admitting `capacity` requests per `period`.
    ///
    /// A capacity of zero is treated as one.
    pub fn new(capacity: u32, period: Duration, policy: WindowPolicy) -> Self {
        let capacity = capacity.max(1);
        Self {
            policy,
            capacity,
            period,
            window_start: None,
            count: 0,
            admitted: VecDeque::with_capacity((capacity as usize).min(1024)),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn policy(&self) -> WindowPolicy {
        self.policy
    }

    /// Admit a request at `now`, or report how long to wait before retrying
    pub fn try_admit(&mut self, now: Instant) -> Option<Duration> {
        match self.policy {
            WindowPolicy::Fixed => self.try_admit_fixed(now),
            WindowPolicy::Sliding => self.try_admit_sliding(now),
        }
    }

    fn try_admit_fixed(&mut self, now: Instant) -> Option<Duration> {
        match self.window_start {
            Some(start) if now.duration_since(start) < self.period => {
                if self.count < self.capacity {
                    self.count += 1;
                    None
                } else {
                    Some(self.period - now.duration_since(start))
                }
            }
            _ => {
                self.window_start = Some(now);
                self.count = 1;
                None
            }
        }
    }

    fn try_admit_sliding(&mut self, now: Instant) -> Option<Duration> {
        while let Some(&oldest) = self.admitted.front() {
            if now.duration_since(oldest) >= self.period {
                self.admitted.pop_front();
            } else {
                break;
            }
        }

        match self.admitted.front() {
            Some(&oldest) if self.admitted.len() >= self.capacity as usize => {
                Some(self.period - now.duration_since(oldest))
            }
            _ => {
                self.admitted.push_back(now);
                self.window_start = self.admitted.front().copied();
                self.count = self.admitted.len() as u32;
                None
            }
        }
    }

    /// Admissions counted in the current window
    pub fn count(&self) -> u32 {
        self.count
    }

    /// When the current window started, if any request was admitted yet
    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }
}
