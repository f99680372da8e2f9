//! Configuration sections

use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Bot version tag for logging
    pub tag: String,
    /// Swap symbols to trade (`BTC-USDT` or `BTC/USDT:USDT`)
    pub symbols: Vec<String>,
    /// Discover all online `*-USDT` swaps instead of using `symbols`
    pub auto_discover_symbols: bool,
    /// Bar timeframe (1m .. 1d)
    pub timeframe: String,
    /// Dry run mode (paper fills, no real orders)
    pub dry_run: bool,
    /// Trading loop period in seconds
    pub loop_interval_secs: u64,
    /// Trailing stop refresh period in seconds
    pub trailing_update_secs: u64,
    /// Exchange position reconciliation period in seconds
    pub reconcile_interval_secs: u64,
    /// PnL report period in seconds
    pub pnl_report_secs: u64,
    /// Bars fetched per loop iteration
    pub lookback_bars: usize,
    /// Minimum bars required to evaluate a symbol
    pub min_bars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    pub base_url: String,
    pub demo_base_url: String,
    /// Use the demo (VST) environment
    pub demo: bool,
    pub recv_window_ms: u64,
    pub timeout_secs: u64,
    pub leverage: u32,
    /// Virtual balance for dry-run fills
    pub paper_equity: f64,
    /// Simulated taker fee in basis points for dry-run fills
    pub paper_fee_bps: f64,
}

impl ExchangeConfig {
    pub fn active_base_url(&self) -> &str {
        if self.demo {
            &self.demo_base_url
        } else {
            &self.base_url
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StrategyConfig {
    /// Include close > SMA200 in the trend score
    pub use_sma200: bool,
    pub rsi_long_threshold: f64,
    pub rsi_short_threshold: f64,
    /// Score needed for buy_signal / sell_signal
    pub signal_threshold: u8,
    /// Score needed for a strong (tradeable) signal
    pub strong_threshold: u8,
    /// Minimum directional model confidence (exclusive)
    pub confidence_threshold: f64,
    /// Block longs above +x% funding and shorts below -x%
    #[serde(default)]
    pub funding_filter_pct: Option<f64>,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// "ohlcv" or "engineered"
    pub feature_mode: String,
    /// Ensemble member lookbacks
    pub lookbacks: Vec<usize>,
    pub hidden1: usize,
    pub hidden2: usize,
    pub dense_units: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub grad_clip: f64,
    pub epochs: usize,
    pub finetune_epochs: usize,
    /// Label horizon in bars
    pub horizon: usize,
    pub train_fetch_bars: usize,
    pub min_train_bars: usize,
    pub validation_split: f64,
    pub accuracy_floor: f64,
    pub retrain_interval_secs: u64,
    pub max_model_age_secs: u64,
    pub seed: u64,
    pub weights_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    /// Percent of equity risked per trade
    pub risk_percent: f64,
    /// Equity used when the balance endpoint is unavailable
    pub fallback_equity: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub trailing_pct: f64,
    /// Favourable move from entry before trailing starts
    pub trailing_activation_pct: f64,
    /// Stop distance in ATRs used for sizing
    pub atr_multiplier: f64,
    pub default_min_lot: f64,
    /// Minimum order size per symbol
    #[serde(default = "default_min_lots")]
    pub min_lots: HashMap<String, f64>,
}

pub fn default_min_lots() -> HashMap<String, f64> {
    [
        ("BTC-USDT", 0.001),
        ("ETH-USDT", 0.001),
        ("BNB-USDT", 0.01),
        ("SOL-USDT", 0.01),
        ("XRP-USDT", 1.0),
        ("ADA-USDT", 1.0),
        ("DOGE-USDT", 1.0),
        ("DOT-USDT", 0.1),
        ("MATIC-USDT", 1.0),
        ("LTC-USDT", 0.01),
    ]
    .into_iter()
    .map(|(s, lot)| (s.to_string(), lot))
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// "market" or "post_only"
    pub entry_mode: String,
    /// Limit price offset from last for post-only entries
    pub slip_buffer: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    /// Journal and report directory
    pub data_dir: String,
    /// Base equity for the PnL curve
    pub starting_equity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    pub api_url: String,
}
