use anyhow::Context;
use std::time::Duration;

/// Runtime configuration, read once at startup and passed by value to the
/// components that branch on it. `live_trading` decides whether orders are
/// actually sent to the broker or only simulated against local state.
#[derive(Debug, Clone)]
pub struct Config {
    pub live_trading: bool,
    /// Fixed currency budget committed per buy signal.
    pub buy_budget: f64,
    /// Capital the wallet is seeded with on first start.
    pub initial_balance: f64,
    /// Pause between monitor iterations.
    pub poll_interval: Duration,
    /// Sell trigger is registered at entry price times this (> 1).
    pub sell_threshold_multiplier: f64,
    /// Buy limit premium over the current price (> 1).
    pub buy_limit_multiplier: f64,
    /// Sell limit discount under the current price (< 1).
    pub sell_limit_multiplier: f64,
    /// Hard ceiling on the quoted price of anything we buy.
    pub max_ticker_price: f64,
    /// Stricter ceiling applied when the signal carried hype language.
    pub max_no_filter_price: f64,
    /// Upper bound on continuation-marker pages per fill sweep.
    pub max_fill_pages: u32,
    pub currency: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // paper by default; flipping live is an explicit operator act
            live_trading: false,
            buy_budget: 1000.0,
            initial_balance: 1000.0,
            poll_interval: Duration::from_secs(30),
            sell_threshold_multiplier: 1.5,
            buy_limit_multiplier: 1.1,
            sell_limit_multiplier: 0.95,
            max_ticker_price: 0.002,
            max_no_filter_price: 0.0009,
            max_fill_pages: 16,
            currency: "USD".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `PENNYBOT_*` environment variables, falling
    /// back to the defaults above for anything unset.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Config::default();

        override_from_env("PENNYBOT_LIVE_TRADING", &mut config.live_trading)?;
        override_from_env("PENNYBOT_BUY_BUDGET", &mut config.buy_budget)?;
        override_from_env("PENNYBOT_INITIAL_BALANCE", &mut config.initial_balance)?;
        override_from_env(
            "PENNYBOT_SELL_THRESHOLD_MULTIPLIER",
            &mut config.sell_threshold_multiplier,
        )?;
        override_from_env(
            "PENNYBOT_BUY_LIMIT_MULTIPLIER",
            &mut config.buy_limit_multiplier,
        )?;
        override_from_env(
            "PENNYBOT_SELL_LIMIT_MULTIPLIER",
            &mut config.sell_limit_multiplier,
        )?;
        override_from_env("PENNYBOT_MAX_TICKER_PRICE", &mut config.max_ticker_price)?;
        override_from_env(
            "PENNYBOT_MAX_NO_FILTER_PRICE",
            &mut config.max_no_filter_price,
        )?;
        override_from_env("PENNYBOT_MAX_FILL_PAGES", &mut config.max_fill_pages)?;
        override_from_env("PENNYBOT_CURRENCY", &mut config.currency)?;

        if let Ok(raw) = std::env::var("PENNYBOT_POLL_INTERVAL_SECS") {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid PENNYBOT_POLL_INTERVAL_SECS: {raw}"))?;
            config.poll_interval = Duration::from_secs(secs);
        }

        Ok(config)
    }
}

fn override_from_env<T>(key: &str, slot: &mut T) -> anyhow::Result<()>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Ok(raw) = std::env::var(key) {
        *slot = raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}"))?;
    }
    Ok(())
}
