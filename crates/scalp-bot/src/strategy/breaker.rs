//! Post-crash circuit breaker.
//!
//! After a stop-loss, entries stay blocked until BOTH gates pass:
//!
//! - time gate: a minimum cooldown since the stop fired
//! - stability gate: the crashed token's bid holds above the crash low for a
//!   required number of consecutive monitor observations
//!
//! Stability is tracked even while the time gate is still unmet; a new low
//! resets the counter. Breakeven exits never arm the breaker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};

/// Configuration for the crash breaker.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Minimum time since the stop-loss fired (milliseconds).
    pub min_cooldown_ms: i64,
    /// Consecutive stable observations required.
    pub stability_ticks_required: u32,
}

/// State while the breaker is engaged.
#[derive(Debug, Clone)]
struct CrashState {
    token_id: String,
    crash_low: Decimal,
    stable_ticks: u32,
    armed_at: DateTime<Utc>,
}

/// Crash circuit breaker owned by the strategy core.
#[derive(Debug)]
pub struct CrashBreaker {
    config: BreakerConfig,
    state: Option<CrashState>,
    /// Lifetime trip count (survives release, dies at rotation reset).
    trips: u32,
}

impl CrashBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: None,
            trips: 0,
        }
    }

    /// True while entries are blocked.
    pub fn is_engaged(&self) -> bool {
        self.state.is_some()
    }

    /// Token whose crash armed the breaker.
    pub fn crash_token(&self) -> Option<&str> {
        self.state.as_ref().map(|s| s.token_id.as_str())
    }

    /// Milliseconds left on the time gate (0 when met or disengaged).
    pub fn remaining_cooldown_ms(&self, now: DateTime<Utc>) -> i64 {
        match &self.state {
            Some(state) => {
                let elapsed = (now - state.armed_at).num_milliseconds();
                (self.config.min_cooldown_ms - elapsed).max(0)
            }
            None => 0,
        }
    }

    /// Stable observations accumulated so far.
    pub fn stable_ticks(&self) -> u32 {
        self.state.as_ref().map(|s| s.stable_ticks).unwrap_or(0)
    }

    pub fn trip_count(&self) -> u32 {
        self.trips
    }

    /// Arm after a (non-breakeven) stop-loss fill.
    pub fn arm(&mut self, token_id: &str, crash_bid: Decimal, now: DateTime<Utc>) {
        self.trips += 1;
        info!(
            token = token_id,
            crash_low = %crash_bid,
            cooldown_ms = self.config.min_cooldown_ms,
            "COOLDOWN armed after stop loss"
        );
        self.state = Some(CrashState {
            token_id: token_id.to_string(),
            crash_low: crash_bid,
            stable_ticks: 0,
            armed_at: now,
        });
    }

    /// Feed one monitor observation of the crashed token's bid.
    pub fn observe(&mut self, bid: Decimal) {
        let required = self.config.stability_ticks_required;
        if let Some(state) = self.state.as_mut() {
            if bid > state.crash_low {
                state.stable_ticks += 1;
                debug!(
                    token = %state.token_id,
                    stable = state.stable_ticks,
                    required,
                    "stability tick"
                );
            } else {
                if bid < state.crash_low {
                    state.crash_low = bid;
                }
                if state.stable_ticks > 0 {
                    debug!(token = %state.token_id, bid = %bid, "stability reset at new low");
                }
                state.stable_ticks = 0;
            }
        }
    }

    /// Release when both gates are met. Returns true on release.
    pub fn try_release(&mut self, now: DateTime<Utc>) -> bool {
        let ready = match &self.state {
            Some(state) => {
                self.remaining_cooldown_ms(now) == 0
                    && state.stable_ticks >= self.config.stability_ticks_required
            }
            None => false,
        };

        if ready {
            if let Some(state) = self.state.take() {
                info!(token = %state.token_id, "circuit breaker released");
            }
        }
        ready
    }

    /// Drop all state (market rotation).
    pub fn reset(&mut self) {
        self.state = None;
        self.trips = 0;
    }
}
