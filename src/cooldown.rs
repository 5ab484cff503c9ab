//! Escalation cooldown
//!
//! Limits how often automatic escalation may fire. Checking never records;
//! the caller records explicitly once it decides to act.

use std::time::Duration;

/// Default minimum interval between two escalations (5 minutes)
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(300_000);

/// Cooldown gate over caller-supplied timestamps (ms)
#[derive(Debug, Clone)]
pub struct CooldownGate {
    interval_ms: u64,
    last_triggered_at: Option<u64>,
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

impl CooldownGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: interval.as_millis() as u64,
            last_triggered_at: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn last_triggered_at(&self) -> Option<u64> {
        self.last_triggered_at
    }

    /// True if nothing was recorded yet or the interval has fully elapsed
    pub fn can_trigger(&self, now_ms: u64) -> bool {
        match self.last_triggered_at {
            None => true,
            // A clock stepping backwards counts as no time elapsed
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        }
    }

    pub fn record_trigger(&mut self, now_ms: u64) {
        self.last_triggered_at = Some(now_ms);
    }
}
