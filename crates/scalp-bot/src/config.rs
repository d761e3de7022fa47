//! Configuration for scalp-bot.
//!
//! Everything is read from the environment (a `.env` file is honoured);
//! the process starts with no required flags. Validation failures abort
//! the process before any network connection is opened.

use std::env;
use std::str::FromStr;

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

use scalp_common::CryptoAsset;

/// Top-level configuration, one instance per process.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Paper (simulated) vs. live execution. Process-wide, chosen at startup.
    pub paper_trade: bool,

    /// Underlying asset whose 15-minute windows we trade.
    pub asset: CryptoAsset,

    /// Logging level string (trace|debug|info|warn|error).
    pub log_level: String,

    /// Main loop cadence (milliseconds).
    pub tick_interval_ms: u64,

    /// Stop-loss monitor cadence (milliseconds).
    pub stop_loss_check_interval_ms: u64,

    /// Seconds before expiry at which we rotate to the next window.
    pub market_rotation_threshold_s: i64,

    /// Initial paper cash.
    pub bankroll: Decimal,

    /// Directory session reports are written to.
    pub report_dir: String,

    /// Operator strike override (used when the strike endpoint is down).
    pub strike_price_override: Option<Decimal>,

    /// Live-mode credentials. Unused in paper mode.
    pub signer_private_key: String,
    pub funder_address: String,

    /// Strategy parameters.
    pub strategy: StrategyParams,
}

/// Tunables for the v2.1 scalping policy.
#[derive(Debug, Clone)]
pub struct StrategyParams {
    /// Entry size as a share of current cash.
    pub trade_size_pct: Decimal,
    /// Minimum entry value (also the venue's minimum order).
    pub min_order_size: Decimal,
    /// Hard floor on the candidate token's ask.
    pub min_entry_price: Decimal,
    /// Hard ceiling on the candidate token's ask.
    pub max_entry_price: Decimal,
    /// Maximum tolerated ask - bid at execution time.
    pub max_allowed_spread: Decimal,
    /// Offset of the resting profit-taking SELL above entry.
    pub fixed_profit_target: Decimal,
    /// Distance of the stop below entry.
    pub fixed_stop_loss: Decimal,
    /// Profit level at which the stop moves to entry.
    pub breakeven_trigger: Decimal,
    /// Session P&L at which the session locks profitably.
    pub session_profit_target: Decimal,
    /// Session loss at which the session locks (stored positive).
    pub session_loss_limit: Decimal,
    /// Consecutive stable monitor observations needed post-crash.
    pub stability_ticks_required: u32,
    /// Post-crash time gate (milliseconds).
    pub min_cooldown_ms: i64,
    /// Minimum gap between entries (milliseconds).
    pub min_trade_interval_ms: i64,
    /// Entry time gate: required seconds remaining.
    pub min_time_remaining_s: i64,
    /// Hold-to-maturity window (seconds before expiry).
    pub hold_to_maturity_s: i64,
    /// Hold-to-maturity bid threshold.
    pub hold_to_maturity_bid: Decimal,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            trade_size_pct: dec!(0.10),
            min_order_size: dec!(1.00),
            min_entry_price: dec!(0.65),
            max_entry_price: dec!(0.85),
            max_allowed_spread: dec!(0.03),
            fixed_profit_target: dec!(0.02),
            fixed_stop_loss: dec!(0.04),
            breakeven_trigger: dec!(0.015),
            session_profit_target: dec!(0.50),
            session_loss_limit: dec!(0.40),
            stability_ticks_required: 15,
            min_cooldown_ms: 15_000,
            min_trade_interval_ms: 5_000,
            min_time_remaining_s: 150,
            hold_to_maturity_s: 45,
            hold_to_maturity_bid: dec!(0.94),
        }
    }
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            paper_trade: true,
            asset: CryptoAsset::Btc,
            log_level: "info".to_string(),
            tick_interval_ms: 500,
            stop_loss_check_interval_ms: 150,
            market_rotation_threshold_s: 30,
            bankroll: dec!(20.00),
            report_dir: "reports".to_string(),
            strike_price_override: None,
            signer_private_key: String::new(),
            funder_address: String::new(),
            strategy: StrategyParams::default(),
        }
    }
}

impl BotConfig {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self> {
        let defaults = StrategyParams::default();

        let config = Self {
            paper_trade: env_bool("PAPER_TRADE", true),
            asset: env_parse("ASSET", CryptoAsset::Btc)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            tick_interval_ms: env_u64("TICK_INTERVAL", 500),
            stop_loss_check_interval_ms: env_u64("STOP_LOSS_CHECK_INTERVAL", 150),
            market_rotation_threshold_s: env_i64("MARKET_ROTATION_THRESHOLD", 30),
            bankroll: env_decimal("BANKROLL", dec!(20.00))?,
            report_dir: env::var("REPORT_DIR").unwrap_or_else(|_| "reports".to_string()),
            strike_price_override: env_decimal_opt("STRIKE_PRICE_OVERRIDE")?,
            signer_private_key: env::var("SIGNER_PRIVATE_KEY").unwrap_or_default(),
            funder_address: env::var("FUNDER_ADDRESS").unwrap_or_default(),
            strategy: StrategyParams {
                trade_size_pct: env_decimal("TRADE_SIZE_PCT", defaults.trade_size_pct)?,
                min_order_size: env_decimal("MIN_ORDER_SIZE", defaults.min_order_size)?,
                min_entry_price: env_decimal("MIN_ENTRY_PRICE", defaults.min_entry_price)?,
                max_entry_price: env_decimal("MAX_ENTRY_PRICE", defaults.max_entry_price)?,
                max_allowed_spread: env_decimal("MAX_ALLOWED_SPREAD", defaults.max_allowed_spread)?,
                fixed_profit_target: env_decimal("FIXED_PROFIT_TARGET", defaults.fixed_profit_target)?,
                fixed_stop_loss: env_decimal("FIXED_STOP_LOSS", defaults.fixed_stop_loss)?,
                breakeven_trigger: env_decimal("BREAKEVEN_TRIGGER", defaults.breakeven_trigger)?,
                session_profit_target: env_decimal(
                    "SESSION_PROFIT_TARGET",
                    defaults.session_profit_target,
                )?,
                session_loss_limit: env_decimal("SESSION_LOSS_LIMIT", defaults.session_loss_limit)?,
                stability_ticks_required: env_u64("STABILITY_TICKS_REQUIRED", 15) as u32,
                min_cooldown_ms: env_i64("MIN_COOLDOWN_MS", 15_000),
                min_trade_interval_ms: env_i64("MIN_TRADE_INTERVAL_MS", 5_000),
                min_time_remaining_s: env_i64("MIN_TIME_REMAINING_SECS", 150),
                hold_to_maturity_s: env_i64("HOLD_TO_MATURITY_SECS", 45),
                hold_to_maturity_bid: env_decimal("HOLD_TO_MATURITY_BID", defaults.hold_to_maturity_bid)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values; collects every problem before failing.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();
        let s = &self.strategy;

        if !self.paper_trade {
            if self.signer_private_key.is_empty() {
                errors.push("SIGNER_PRIVATE_KEY is required for live trading".to_string());
            }
            if self.funder_address.is_empty() {
                errors.push("FUNDER_ADDRESS is required for live trading".to_string());
            }
        }

        if self.tick_interval_ms == 0 {
            errors.push("TICK_INTERVAL must be positive".to_string());
        }
        if self.stop_loss_check_interval_ms == 0 {
            errors.push("STOP_LOSS_CHECK_INTERVAL must be positive".to_string());
        }
        if self.market_rotation_threshold_s < 5 || self.market_rotation_threshold_s > 300 {
            errors.push("MARKET_ROTATION_THRESHOLD must be between 5 and 300 seconds".to_string());
        }
        if self.bankroll <= Decimal::ZERO {
            errors.push("BANKROLL must be positive".to_string());
        }
        if s.trade_size_pct <= Decimal::ZERO || s.trade_size_pct > Decimal::ONE {
            errors.push("TRADE_SIZE_PCT must be in (0, 1]".to_string());
        }
        if s.min_order_size <= Decimal::ZERO {
            errors.push("MIN_ORDER_SIZE must be positive".to_string());
        }
        if s.min_entry_price <= Decimal::ZERO || s.min_entry_price >= Decimal::ONE {
            errors.push("MIN_ENTRY_PRICE must be in (0, 1)".to_string());
        }
        if s.max_entry_price <= s.min_entry_price || s.max_entry_price >= Decimal::ONE {
            errors.push("MAX_ENTRY_PRICE must be in (MIN_ENTRY_PRICE, 1)".to_string());
        }
        if s.max_allowed_spread <= Decimal::ZERO {
            errors.push("MAX_ALLOWED_SPREAD must be positive".to_string());
        }
        if s.fixed_profit_target <= Decimal::ZERO {
            errors.push("FIXED_PROFIT_TARGET must be positive".to_string());
        }
        if s.fixed_stop_loss <= Decimal::ZERO {
            errors.push("FIXED_STOP_LOSS must be positive".to_string());
        }
        if s.breakeven_trigger <= Decimal::ZERO {
            errors.push("BREAKEVEN_TRIGGER must be positive".to_string());
        }
        if s.session_profit_target <= Decimal::ZERO {
            errors.push("SESSION_PROFIT_TARGET must be positive".to_string());
        }
        if s.session_loss_limit <= Decimal::ZERO {
            errors.push("SESSION_LOSS_LIMIT must be positive".to_string());
        }
        if s.min_time_remaining_s <= self.market_rotation_threshold_s {
            errors.push(
                "MIN_TIME_REMAINING_SECS must exceed MARKET_ROTATION_THRESHOLD".to_string(),
            );
        }

        if !errors.is_empty() {
            bail!("Configuration validation failed:\n{}", errors.join("\n"));
        }
        Ok(())
    }

    /// Log the effective configuration at startup.
    pub fn summary(&self) {
        info!(
            mode = if self.paper_trade { "PAPER" } else { "LIVE" },
            asset = %self.asset,
            tick_ms = self.tick_interval_ms,
            monitor_ms = self.stop_loss_check_interval_ms,
            bankroll = %self.bankroll,
            "configuration loaded"
        );
        info!(
            entry_band = %format!("[{}, {}]", self.strategy.min_entry_price, self.strategy.max_entry_price),
            max_spread = %self.strategy.max_allowed_spread,
            profit_target = %self.strategy.fixed_profit_target,
            stop_loss = %self.strategy.fixed_stop_loss,
            breakeven = %self.strategy.breakeven_trigger,
            "strategy parameters"
        );
        info!(
            session_profit_target = %self.strategy.session_profit_target,
            session_loss_limit = %self.strategy.session_loss_limit,
            cooldown_ms = self.strategy.min_cooldown_ms,
            stability_ticks = self.strategy.stability_ticks_required,
            "session and circuit-breaker limits"
        );
    }
}

// Environment parsing helpers.

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| v.to_lowercase() == "true" || v == "1")
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Result<Decimal> {
    match env::var(key) {
        Ok(raw) => match Decimal::from_str(&raw) {
            Ok(v) => Ok(v),
            Err(_) => bail!("{} is not a valid decimal: {}", key, raw),
        },
        Err(_) => Ok(default),
    }
}

fn env_decimal_opt(key: &str) -> Result<Option<Decimal>> {
    match env::var(key) {
        Ok(raw) if !raw.is_empty() => match Decimal::from_str(&raw) {
            Ok(v) => Ok(Some(v)),
            Err(_) => bail!("{} is not a valid decimal: {}", key, raw),
        },
        _ => Ok(None),
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(v) => Ok(v),
            Err(e) => bail!("{} is invalid: {}", key, e),
        },
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BotConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.paper_trade);
        assert_eq!(config.tick_interval_ms, 500);
        assert_eq!(config.stop_loss_check_interval_ms, 150);
        assert_eq!(config.bankroll, dec!(20.00));
    }

    #[test]
    fn test_default_strategy_params() {
        let s = StrategyParams::default();
        assert_eq!(s.min_entry_price, dec!(0.65));
        assert_eq!(s.max_entry_price, dec!(0.85));
        assert_eq!(s.max_allowed_spread, dec!(0.03));
        assert_eq!(s.fixed_profit_target, dec!(0.02));
        assert_eq!(s.fixed_stop_loss, dec!(0.04));
        assert_eq!(s.breakeven_trigger, dec!(0.015));
        assert_eq!(s.min_cooldown_ms, 15_000);
        assert_eq!(s.min_trade_interval_ms, 5_000);
        assert_eq!(s.stability_ticks_required, 15);
        assert_eq!(s.min_time_remaining_s, 150);
    }

    #[test]
    fn test_live_mode_requires_credentials() {
        let config = BotConfig {
            paper_trade: false,
            ..Default::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("SIGNER_PRIVATE_KEY"));
        assert!(err.contains("FUNDER_ADDRESS"));
    }

    #[test]
    fn test_inverted_entry_band_rejected() {
        let mut config = BotConfig::default();
        config.strategy.min_entry_price = dec!(0.90);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_bankroll_rejected() {
        let config = BotConfig {
            bankroll: Decimal::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_time_gate_must_exceed_rotation_threshold() {
        let mut config = BotConfig::default();
        config.strategy.min_time_remaining_s = 20;
        assert!(config.validate().is_err());
    }
}
