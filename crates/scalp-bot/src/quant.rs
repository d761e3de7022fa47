//! Quant engine: rolling volatility and fair value for outcome tokens.
//!
//! Prices enter as `Decimal` and are converted once at this boundary; all
//! statistics run in f64 and never touch money directly.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use scalp_common::Direction;

/// Ring capacity for price history.
pub const HISTORY_CAPACITY: usize = 60;

/// Minimum samples before the measured volatility is trusted.
const MIN_SAMPLES: usize = 5;

/// Default volatility (per minute) with insufficient history.
const DEFAULT_VOLATILITY: f64 = 10.0;

/// Floor on measured volatility. Flat tape must not read as certainty.
const MIN_VOLATILITY: f64 = 5.0;

/// One price observation.
#[derive(Debug, Clone, Copy)]
pub struct PricePoint {
    pub price: Decimal,
    pub at: DateTime<Utc>,
}

/// Bounded FIFO ring of recent price samples.
#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    points: VecDeque<PricePoint>,
}

impl PriceHistory {
    pub fn new() -> Self {
        Self {
            points: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Push a sample, evicting the oldest once at capacity.
    pub fn push(&mut self, price: Decimal, at: DateTime<Utc>) {
        if self.points.len() == HISTORY_CAPACITY {
            self.points.pop_front();
        }
        self.points.push_back(PricePoint { price, at });
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn latest(&self) -> Option<&PricePoint> {
        self.points.back()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    fn iter(&self) -> impl Iterator<Item = &PricePoint> {
        self.points.iter()
    }
}

/// Fair-value and volatility calculator over a spot-price ring.
#[derive(Debug, Default)]
pub struct QuantEngine {
    history: PriceHistory,
}

impl QuantEngine {
    pub fn new() -> Self {
        Self {
            history: PriceHistory::new(),
        }
    }

    /// Record a spot sample (main tick only).
    pub fn record_spot(&mut self, price: Decimal, at: DateTime<Utc>) {
        self.history.push(price, at);
    }

    pub fn sample_count(&self) -> usize {
        self.history.len()
    }

    /// Drop all history (market rotation).
    pub fn reset(&mut self) {
        self.history.clear();
    }

    /// Volatility of the underlying, normalized per minute.
    ///
    /// Population standard deviation of tick-to-tick differences, scaled by
    /// the square root of the measured ticks-per-minute rate.
    pub fn volatility_per_minute(&self) -> f64 {
        let n = self.history.len();
        if n < MIN_SAMPLES {
            return DEFAULT_VOLATILITY;
        }

        let prices: Vec<f64> = self
            .history
            .iter()
            .map(|p| p.price.to_f64().unwrap_or(0.0))
            .collect();

        let first = self.history.iter().next().map(|p| p.at);
        let last = self.history.latest().map(|p| p.at);
        let span_secs = match (first, last) {
            (Some(a), Some(b)) => (b - a).num_milliseconds() as f64 / 1000.0,
            _ => 0.0,
        };
        if span_secs <= 0.0 {
            return DEFAULT_VOLATILITY;
        }

        let diffs: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let variance =
            diffs.iter().map(|d| (d - mean) * (d - mean)).sum::<f64>() / diffs.len() as f64;
        let sigma_tick = variance.sqrt();

        let ticks_per_minute = n as f64 / span_secs * 60.0;
        let vol = sigma_tick * ticks_per_minute.sqrt();

        vol.max(MIN_VOLATILITY)
    }

    /// Probability that `direction` resolves in-the-money.
    ///
    /// At or past expiry the value collapses to 0 or 1 by the sign of the
    /// distance; before expiry it is the normal CDF of the Z-score of the
    /// distance against the expected move over the remaining time.
    pub fn fair_value(
        &self,
        direction: Direction,
        spot: Decimal,
        strike: Decimal,
        remaining_secs: i64,
    ) -> f64 {
        let spot = spot.to_f64().unwrap_or(0.0);
        let strike = strike.to_f64().unwrap_or(0.0);

        if remaining_secs <= 0 {
            let in_the_money = match direction {
                Direction::Up => spot > strike,
                Direction::Down => spot < strike,
            };
            return if in_the_money { 1.0 } else { 0.0 };
        }

        let distance = match direction {
            Direction::Up => spot - strike,
            Direction::Down => strike - spot,
        };

        let minutes = (remaining_secs as f64 / 60.0).max(0.01);
        let expected_move = self.volatility_per_minute() * minutes.sqrt();
        let z = distance / expected_move;

        normal_cdf(z).clamp(1e-9, 1.0 - 1e-9)
    }
}

/// Standard normal CDF via the Abramowitz-Stegun 26.2.17 rational
/// approximation (|error| < 7.5e-8).
pub fn normal_cdf(z: f64) -> f64 {
    const P: f64 = 0.2316419;
    const B1: f64 = 0.319381530;
    const B2: f64 = -0.356563782;
    const B3: f64 = 1.781477937;
    const B4: f64 = -1.821255978;
    const B5: f64 = 1.330274429;

    if z < 0.0 {
        return 1.0 - normal_cdf(-z);
    }

    let t = 1.0 / (1.0 + P * z);
    let poly = t * (B1 + t * (B2 + t * (B3 + t * (B4 + t * B5))));
    let pdf = (-z * z / 2.0).exp() / (2.0 * std::f64::consts::PI).sqrt();

    1.0 - pdf * poly
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn at(offset_s: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_766_223_000 + offset_s, 0).unwrap()
    }

    /// High-precision reference values for the standard normal CDF.
    const CDF_REFERENCE: &[(f64, f64)] = &[
        (0.0, 0.5),
        (0.5, 0.6914624612740131),
        (1.0, 0.8413447460685429),
        (1.5, 0.9331927987311419),
        (2.0, 0.9772498680518208),
        (2.5, 0.9937903346742240),
        (3.0, 0.9986501019683699),
        (4.0, 0.9999683287581669),
        (5.0, 0.9999997133484281),
    ];

    #[test]
    fn test_normal_cdf_matches_reference_to_1e6() {
        for &(z, expected) in CDF_REFERENCE {
            assert!(
                (normal_cdf(z) - expected).abs() < 1e-6,
                "cdf({}) = {} vs {}",
                z,
                normal_cdf(z),
                expected
            );
            assert!(
                (normal_cdf(-z) - (1.0 - expected)).abs() < 1e-6,
                "cdf({}) mismatch",
                -z
            );
        }
    }

    #[test]
    fn test_normal_cdf_at_zero() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_normal_cdf_symmetry() {
        let mut z = -5.0;
        while z <= 5.0 {
            let sum = normal_cdf(z) + normal_cdf(-z);
            assert!((sum - 1.0).abs() < 1e-6, "symmetry broken at z={}", z);
            z += 0.25;
        }
    }

    #[test]
    fn test_normal_cdf_monotonic() {
        let mut prev = normal_cdf(-6.0);
        let mut z = -5.9;
        while z <= 6.0 {
            let cur = normal_cdf(z);
            assert!(cur >= prev, "not monotonic at z={}", z);
            prev = cur;
            z += 0.1;
        }
    }

    #[test]
    fn test_volatility_default_with_few_samples() {
        let mut q = QuantEngine::new();
        for i in 0..4 {
            q.record_spot(dec!(89800) + Decimal::from(i), at(i));
        }
        assert_eq!(q.volatility_per_minute(), DEFAULT_VOLATILITY);
    }

    #[test]
    fn test_volatility_floor_on_flat_tape() {
        let mut q = QuantEngine::new();
        for i in 0..30 {
            q.record_spot(dec!(89800), at(i));
        }
        assert_eq!(q.volatility_per_minute(), MIN_VOLATILITY);
    }

    #[test]
    fn test_volatility_scales_with_movement() {
        // Alternating +/-50 moves every second: sigma_tick = 50,
        // 60 samples over 59s -> ~61 ticks/min, vol ~ 50 * sqrt(61) >> 5.
        let mut q = QuantEngine::new();
        for i in 0..60 {
            let price = if i % 2 == 0 { dec!(89800) } else { dec!(89850) };
            q.record_spot(price, at(i));
        }
        let vol = q.volatility_per_minute();
        assert!(vol > 100.0, "vol = {}", vol);
    }

    #[test]
    fn test_history_ring_capacity() {
        let mut q = QuantEngine::new();
        for i in 0..100 {
            q.record_spot(Decimal::from(i), at(i));
        }
        assert_eq!(q.sample_count(), HISTORY_CAPACITY);
        // Oldest entries evicted FIFO.
        assert_eq!(q.history.latest().unwrap().price, Decimal::from(99));
        assert_eq!(
            q.history.iter().next().unwrap().price,
            Decimal::from(100 - HISTORY_CAPACITY as i64)
        );
    }

    #[test]
    fn test_fair_value_at_expiry_is_binary() {
        let q = QuantEngine::new();
        assert_eq!(q.fair_value(Direction::Up, dec!(89800), dec!(89750), 0), 1.0);
        assert_eq!(q.fair_value(Direction::Down, dec!(89800), dec!(89750), 0), 0.0);
        assert_eq!(q.fair_value(Direction::Up, dec!(89700), dec!(89750), -5), 0.0);
        assert_eq!(q.fair_value(Direction::Down, dec!(89700), dec!(89750), -5), 1.0);
        // Exactly at strike: UP is out of the money.
        assert_eq!(q.fair_value(Direction::Up, dec!(89750), dec!(89750), 0), 0.0);
    }

    #[test]
    fn test_fair_value_open_interval_before_expiry() {
        let q = QuantEngine::new();
        let deep = q.fair_value(Direction::Up, dec!(99000), dec!(89750), 400);
        assert!(deep > 0.99 && deep < 1.0);

        let hopeless = q.fair_value(Direction::Down, dec!(99000), dec!(89750), 400);
        assert!(hopeless > 0.0 && hopeless < 0.01);
    }

    #[test]
    fn test_fair_value_at_strike_is_half() {
        let q = QuantEngine::new();
        let fv = q.fair_value(Direction::Up, dec!(89750), dec!(89750), 400);
        assert!((fv - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_fair_value_complementary() {
        let mut q = QuantEngine::new();
        for i in 0..30 {
            let price = if i % 2 == 0 { dec!(89790) } else { dec!(89810) };
            q.record_spot(price, at(i));
        }
        let up = q.fair_value(Direction::Up, dec!(89800), dec!(89750), 300);
        let down = q.fair_value(Direction::Down, dec!(89800), dec!(89750), 300);
        assert!((up + down - 1.0).abs() < 1e-6);
        assert!(up > 0.5);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut q = QuantEngine::new();
        for i in 0..10 {
            q.record_spot(dec!(89800), at(i));
        }
        q.reset();
        assert_eq!(q.sample_count(), 0);
        assert_eq!(q.volatility_per_minute(), DEFAULT_VOLATILITY);
    }
}
