//! Rolling-window request weight budget.
//!
//! Pure accounting: no I/O and no sleeping. Check-and-record happens under
//! one lock, so concurrent callers can never jointly overspend the ceiling.

use parking_lot::Mutex;
use scout_telemetry::Metrics;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Budget configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BudgetConfig {
    /// Maximum total weight within one window.
    pub ceiling: u32,
    pub window: Duration,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            ceiling: 1200,
            window: Duration::from_secs(60),
        }
    }
}

impl BudgetConfig {
    /// Weight consumed per window by a schedule that spends `batch_weight`
    /// every `interval`.
    pub fn steady_state_per_window(&self, batch_weight: u32, interval: Duration) -> f64 {
        if interval.is_zero() {
            return f64::INFINITY;
        }
        f64::from(batch_weight) * self.window.as_secs_f64() / interval.as_secs_f64()
    }

    /// Whether a schedule stays within two thirds of the ceiling.
    pub fn is_comfortable(&self, batch_weight: u32, interval: Duration) -> bool {
        self.steady_state_per_window(batch_weight, interval) <= f64::from(self.ceiling) * 2.0 / 3.0
    }
}

#[derive(Debug, Default)]
struct Ledger {
    spends: VecDeque<(Instant, u32)>,
    used: u32,
}

impl Ledger {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&(at, weight)) = self.spends.front() {
            if now.duration_since(at) < window {
                break;
            }
            self.spends.pop_front();
            self.used -= weight;
        }
    }
}

/// Rolling-window rate budget.
///
/// Uses tokio time so tests can drive the window with a paused clock.
#[derive(Debug)]
pub struct RateBudget {
    config: BudgetConfig,
    ledger: Mutex<Ledger>,
}

impl RateBudget {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(Ledger::default()),
        }
    }

    pub fn config(&self) -> BudgetConfig {
        self.config
    }

    /// Spend `weight` if it fits under the ceiling. Returns whether it was spent.
    pub fn try_acquire(&self, weight: u32) -> bool {
        let mut ledger = self.ledger.lock();
        ledger.prune(Instant::now(), self.config.window);

        let Some(total) = ledger.used.checked_add(weight) else {
            return false;
        };
        if total > self.config.ceiling {
            return false;
        }

        ledger.spends.push_back((Instant::now(), weight));
        ledger.used = total;
        Metrics::budget_consumed(total);
        true
    }

    /// Weight spent in the current window.
    pub fn consumed(&self) -> u32 {
        let mut ledger = self.ledger.lock();
        ledger.prune(Instant::now(), self.config.window);
        ledger.used
    }

    pub fn remaining(&self) -> u32 {
        self.config.ceiling.saturating_sub(self.consumed())
    }

    /// How many requests of `weight` fit right now.
    pub fn affordable(&self, weight: u32) -> usize {
        if weight == 0 {
            return usize::MAX;
        }
        (self.remaining() / weight) as usize
    }
}
