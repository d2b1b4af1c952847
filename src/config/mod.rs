//! Configuration management for the options scalper.
//!
//! Loads settings from environment variables and config files. The resulting
//! bundle is immutable for the lifetime of a trading session.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Broker connection settings
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Instruments and loop cadence
    #[serde(default)]
    pub scalper: ScalperConfig,
    /// Stop-loss / profit-target parameters
    #[serde(default)]
    pub stops: StopConfig,
    /// Session risk gates
    #[serde(default)]
    pub risk: RiskConfig,
    /// Timeouts for external waits
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Simulated broker parameters
    #[serde(default)]
    pub paper: PaperConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    /// Candidate ports, tried in order (TWS live, TWS paper, Gateway live, Gateway paper)
    #[serde(default = "default_ports")]
    pub ports: Vec<u16>,
    /// Fixed client id. When unset the identity allocator resolves one.
    #[serde(default)]
    pub client_id: Option<u32>,
    /// Key into the static client id table
    #[serde(default = "default_script_name")]
    pub script_name: String,
    /// Directory holding the shared client id state and lock files
    #[serde(default = "default_client_id_dir")]
    pub client_id_dir: String,
    /// Age after which a client id lock is considered abandoned
    #[serde(default = "default_client_id_lock_timeout")]
    pub client_id_lock_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalperConfig {
    /// Underlying futures symbols, rotated once per cycle for entries
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,
    /// Option expiry in contract-month format
    #[serde(default = "default_options_expiry")]
    pub options_expiry: String,
    /// Strike quoting interval per symbol
    #[serde(default = "default_strike_intervals")]
    pub strike_intervals: HashMap<String, Decimal>,
    /// Interval for symbols missing from `strike_intervals`
    #[serde(default = "default_strike_interval")]
    pub default_strike_interval: Decimal,
    /// Contracts per order
    #[serde(default = "default_quantity")]
    pub quantity: u32,
    /// Dollar value of one point of option premium
    #[serde(default = "default_contract_multiplier")]
    pub contract_multiplier: Decimal,
    #[serde(default = "default_cycle_interval_ms")]
    pub cycle_interval_ms: u64,
    /// Number of history points the momentum classifier needs
    #[serde(default = "default_momentum_period")]
    pub momentum_period: usize,
    /// Exit on opposite-direction momentum
    #[serde(default = "default_allow_reversals")]
    pub allow_reversals: bool,
    /// Cycles between performance summaries
    #[serde(default = "default_stats_every_cycles")]
    pub stats_every_cycles: u64,
}

impl ScalperConfig {
    /// Strike interval for a symbol.
    pub fn strike_interval(&self, symbol: &str) -> Decimal {
        self.strike_intervals
            .get(symbol)
            .copied()
            .unwrap_or(self.default_strike_interval)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopConfig {
    /// Scales the 10% stop distance
    #[serde(default = "default_stop_loss_multiplier")]
    pub stop_loss_multiplier: Decimal,
    /// Scales the 25% target distance
    #[serde(default = "default_profit_target_multiplier")]
    pub profit_target_multiplier: Decimal,
    /// Trailing distance below the high since entry (0.0-1.0)
    #[serde(default = "default_trailing_pct")]
    pub trailing_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_trades_per_day")]
    pub max_trades_per_day: u32,
    /// Maximum daily loss as a fraction of account balance (0.0-1.0)
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: Decimal,
    #[serde(default = "default_account_balance")]
    pub account_balance: Decimal,
    /// Minimum seconds between a closed trade and the next entry
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_trade_limit_backoff")]
    pub trade_limit_backoff_secs: u64,
    #[serde(default = "default_daily_loss_backoff")]
    pub daily_loss_backoff_secs: u64,
    #[serde(default = "default_cooldown_backoff")]
    pub cooldown_backoff_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Seconds an order may stay unacknowledged before it is cancelled locally
    #[serde(default = "default_order_ack_timeout")]
    pub order_ack_timeout_secs: u64,
    /// Seconds to hold new orders after a timeout while the broker confirms the cancel
    #[serde(default = "default_cancel_grace")]
    pub cancel_grace_secs: u64,
    #[serde(default = "default_chain_timeout")]
    pub chain_timeout_secs: u64,
    #[serde(default = "default_first_price_timeout")]
    pub first_price_timeout_secs: u64,
    /// Bounded wait for the closing order on shutdown
    #[serde(default = "default_shutdown_close_timeout")]
    pub shutdown_close_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// RNG seed for reproducible price paths
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default = "default_start_prices")]
    pub start_prices: HashMap<String, Decimal>,
    #[serde(default = "default_start_price")]
    pub default_start_price: Decimal,
    /// Per-tick relative volatility of the random walk
    #[serde(default = "default_volatility")]
    pub volatility: f64,
    /// Minimum price increment of the underlying
    #[serde(default = "default_price_tick")]
    pub price_tick: Decimal,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_fill_latency_ms")]
    pub fill_latency_ms: u64,
    #[serde(default = "default_chain_latency_ms")]
    pub chain_latency_ms: u64,
    /// Fraction of orders rejected (0.0-1.0)
    #[serde(default)]
    pub reject_rate: f64,
    /// Strikes listed on each side of the current price
    #[serde(default = "default_chain_width")]
    pub chain_width: u32,
    #[serde(default = "default_paper_expirations")]
    pub expirations: Vec<String>,
    /// Ports the simulated gateway accepts
    #[serde(default = "default_accepted_ports")]
    pub accepted_ports: Vec<u16>,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_ports() -> Vec<u16> {
    vec![7496, 7497, 4001, 4002]
}

fn default_script_name() -> String {
    "options_scalper.py".to_string()
}

fn default_client_id_dir() -> String {
    "data".to_string()
}

fn default_client_id_lock_timeout() -> u64 {
    5
}

fn default_symbols() -> Vec<String> {
    vec!["MES".to_string()]
}

fn default_options_expiry() -> String {
    "202512".to_string()
}

fn default_strike_intervals() -> HashMap<String, Decimal> {
    HashMap::from([
        ("MES".to_string(), Decimal::new(5, 0)),
        ("MNQ".to_string(), Decimal::new(50, 0)),
    ])
}

fn default_strike_interval() -> Decimal {
    Decimal::new(5, 0)
}

fn default_quantity() -> u32 {
    1
}

fn default_contract_multiplier() -> Decimal {
    Decimal::new(5, 0) // $5 per point (micro E-mini options)
}

fn default_cycle_interval_ms() -> u64 {
    1000
}

fn default_momentum_period() -> usize {
    20
}

fn default_allow_reversals() -> bool {
    true
}

fn default_stats_every_cycles() -> u64 {
    60
}

fn default_stop_loss_multiplier() -> Decimal {
    Decimal::ONE
}

fn default_profit_target_multiplier() -> Decimal {
    Decimal::new(2, 0)
}

fn default_trailing_pct() -> Decimal {
    Decimal::new(8, 2) // 0.08
}

fn default_max_trades_per_day() -> u32 {
    50
}

fn default_max_daily_loss_pct() -> Decimal {
    Decimal::new(10, 2) // 0.10
}

fn default_account_balance() -> Decimal {
    Decimal::new(10000, 0)
}

fn default_cooldown_seconds() -> u64 {
    10
}

fn default_trade_limit_backoff() -> u64 {
    60
}

fn default_daily_loss_backoff() -> u64 {
    300
}

fn default_cooldown_backoff() -> u64 {
    1
}

fn default_order_ack_timeout() -> u64 {
    30
}

fn default_chain_timeout() -> u64 {
    15
}

fn default_first_price_timeout() -> u64 {
    10
}

fn default_shutdown_close_timeout() -> u64 {
    10
}

fn default_cancel_grace() -> u64 {
    10
}

fn default_start_prices() -> HashMap<String, Decimal> {
    HashMap::from([
        ("MES".to_string(), Decimal::new(5000, 0)),
        ("MNQ".to_string(), Decimal::new(17500, 0)),
    ])
}

fn default_start_price() -> Decimal {
    Decimal::new(100, 0)
}

fn default_volatility() -> f64 {
    0.0005
}

fn default_price_tick() -> Decimal {
    Decimal::new(25, 2) // 0.25
}

fn default_tick_interval_ms() -> u64 {
    250
}

fn default_fill_latency_ms() -> u64 {
    200
}

fn default_chain_latency_ms() -> u64 {
    500
}

fn default_chain_width() -> u32 {
    20
}

fn default_paper_expirations() -> Vec<String> {
    vec!["202512".to_string(), "202603".to_string()]
}

fn default_accepted_ports() -> Vec<u16> {
    vec![7497]
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("scalper").required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .prefix("SCALPER")
                    .list_separator(",")
                    .with_list_parse_key("gateway.ports")
                    .with_list_parse_key("scalper.symbols")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.scalper.symbols.is_empty(),
            "at least one symbol must be configured"
        );

        anyhow::ensure!(!self.gateway.ports.is_empty(), "gateway.ports must not be empty");

        anyhow::ensure!(self.scalper.quantity >= 1, "quantity must be >= 1");

        anyhow::ensure!(
            self.scalper.momentum_period >= 2,
            "momentum_period must be >= 2"
        );

        anyhow::ensure!(
            self.scalper.default_strike_interval > Decimal::ZERO
                && self
                    .scalper
                    .strike_intervals
                    .values()
                    .all(|i| *i > Decimal::ZERO),
            "strike intervals must be positive"
        );

        anyhow::ensure!(
            self.stops.trailing_pct > Decimal::ZERO && self.stops.trailing_pct < Decimal::ONE,
            "trailing_pct must be between 0 and 1"
        );

        anyhow::ensure!(
            self.stops.stop_loss_multiplier > Decimal::ZERO
                && self.stops.profit_target_multiplier > Decimal::ZERO,
            "stop/target multipliers must be positive"
        );

        anyhow::ensure!(
            self.risk.max_daily_loss_pct > Decimal::ZERO
                && self.risk.max_daily_loss_pct <= Decimal::ONE,
            "max_daily_loss_pct must be between 0 and 1"
        );

        anyhow::ensure!(
            self.risk.account_balance > Decimal::ZERO,
            "account_balance must be positive"
        );

        anyhow::ensure!(
            self.execution.order_ack_timeout_secs > 0,
            "order_ack_timeout_secs must be positive"
        );

        anyhow::ensure!(
            (0.0..=1.0).contains(&self.paper.reject_rate),
            "paper.reject_rate must be between 0 and 1"
        );

        Ok(())
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            ports: default_ports(),
            client_id: None,
            script_name: default_script_name(),
            client_id_dir: default_client_id_dir(),
            client_id_lock_timeout_secs: default_client_id_lock_timeout(),
        }
    }
}

impl Default for ScalperConfig {
    fn default() -> Self {
        Self {
            symbols: default_symbols(),
            options_expiry: default_options_expiry(),
            strike_intervals: default_strike_intervals(),
            default_strike_interval: default_strike_interval(),
            quantity: default_quantity(),
            contract_multiplier: default_contract_multiplier(),
            cycle_interval_ms: default_cycle_interval_ms(),
            momentum_period: default_momentum_period(),
            allow_reversals: default_allow_reversals(),
            stats_every_cycles: default_stats_every_cycles(),
        }
    }
}

impl Default for StopConfig {
    fn default() -> Self {
        Self {
            stop_loss_multiplier: default_stop_loss_multiplier(),
            profit_target_multiplier: default_profit_target_multiplier(),
            trailing_pct: default_trailing_pct(),
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_trades_per_day: default_max_trades_per_day(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            account_balance: default_account_balance(),
            cooldown_seconds: default_cooldown_seconds(),
            trade_limit_backoff_secs: default_trade_limit_backoff(),
            daily_loss_backoff_secs: default_daily_loss_backoff(),
            cooldown_backoff_secs: default_cooldown_backoff(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            order_ack_timeout_secs: default_order_ack_timeout(),
            cancel_grace_secs: default_cancel_grace(),
            chain_timeout_secs: default_chain_timeout(),
            first_price_timeout_secs: default_first_price_timeout(),
            shutdown_close_timeout_secs: default_shutdown_close_timeout(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            seed: None,
            start_prices: default_start_prices(),
            default_start_price: default_start_price(),
            volatility: default_volatility(),
            price_tick: default_price_tick(),
            tick_interval_ms: default_tick_interval_ms(),
            fill_latency_ms: default_fill_latency_ms(),
            chain_latency_ms: default_chain_latency_ms(),
            reject_rate: 0.0,
            chain_width: default_chain_width(),
            expirations: default_paper_expirations(),
            accepted_ports: default_accepted_ports(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_strike_interval_lookup() {
        let config = ScalperConfig::default();
        assert_eq!(config.strike_interval("MES"), dec!(5));
        assert_eq!(config.strike_interval("MNQ"), dec!(50));
        assert_eq!(config.strike_interval("M2K"), dec!(5));
    }

    #[test]
    fn test_rejects_empty_symbols() {
        let mut config = Config::default();
        config.scalper.symbols.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_trailing_pct() {
        let mut config = Config::default();
        config.stops.trailing_pct = dec!(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_section_uses_defaults() {
        let json = r#"{ "risk": { "max_trades_per_day": 5 } }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.risk.max_trades_per_day, 5);
        assert_eq!(config.risk.cooldown_seconds, 10);
        assert_eq!(config.scalper.symbols, vec!["MES".to_string()]);
        assert_eq!(config.stops.trailing_pct, dec!(0.08));
    }
}
