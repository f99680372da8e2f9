//! Configuration management for QuantEdge
//!
//! Loads defaults, then TOML files, then environment variables (with .env)

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::types::{exchange_symbol, Timeframe};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub exchange: ExchangeConfig,
    pub strategy: StrategyConfig,
    pub model: ModelConfig,
    pub risk: RiskConfig,
    pub execution: ExecutionConfig,
    pub persistence: PersistenceConfig,
    pub telegram: TelegramConfig,
}

fn env_flag(var: &str) -> Option<bool> {
    std::env::var(var)
        .ok()
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn env_nonempty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let leverage = env_nonempty("LEVERAGE")
            .map(|v| v.trim().parse::<i64>())
            .transpose()
            .context("LEVERAGE must be an integer")?;

        let config = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default(
                "bot.symbols",
                vec![
                    "BTC-USDT", "ETH-USDT", "SOL-USDT", "BNB-USDT", "XRP-USDT", "DOGE-USDT",
                    "TON-USDT", "AVAX-USDT", "SHIB-USDT", "LINK-USDT", "PENGU-USDT",
                ],
            )?
            .set_default("bot.auto_discover_symbols", false)?
            .set_default("bot.timeframe", "1h")?
            .set_default("bot.dry_run", true)?
            .set_default("bot.loop_interval_secs", 60)?
            .set_default("bot.trailing_update_secs", 300)?
            .set_default("bot.reconcile_interval_secs", 120)?
            .set_default("bot.pnl_report_secs", 1800)?
            .set_default("bot.lookback_bars", 200)?
            .set_default("bot.min_bars", 100)?
            // Exchange defaults
            .set_default("exchange.base_url", "https://open-api.bingx.com")?
            .set_default("exchange.demo_base_url", "https://open-api-vst.bingx.com")?
            .set_default("exchange.demo", false)?
            .set_default("exchange.recv_window_ms", 5000)?
            .set_default("exchange.timeout_secs", 30)?
            .set_default("exchange.leverage", 3)?
            .set_default("exchange.paper_equity", 100.0)?
            .set_default("exchange.paper_fee_bps", 5.0)?
            // Strategy defaults
            .set_default("strategy.use_sma200", false)?
            .set_default("strategy.rsi_long_threshold", 55.0)?
            .set_default("strategy.rsi_short_threshold", 45.0)?
            .set_default("strategy.signal_threshold", 4)?
            .set_default("strategy.strong_threshold", 5)?
            .set_default("strategy.confidence_threshold", 0.75)?
            .set_default("strategy.cooldown_secs", 3600)?
            // Model defaults
            .set_default("model.feature_mode", "ohlcv")?
            .set_default("model.lookbacks", vec![60i64, 90])?
            .set_default("model.hidden1", 64)?
            .set_default("model.hidden2", 32)?
            .set_default("model.dense_units", 16)?
            .set_default("model.dropout", 0.3)?
            .set_default("model.learning_rate", 0.001)?
            .set_default("model.batch_size", 32)?
            .set_default("model.grad_clip", 1.0)?
            .set_default("model.epochs", 5)?
            .set_default("model.finetune_epochs", 2)?
            .set_default("model.horizon", 1)?
            .set_default("model.train_fetch_bars", 500)?
            .set_default("model.min_train_bars", 400)?
            .set_default("model.validation_split", 0.2)?
            .set_default("model.accuracy_floor", 0.52)?
            .set_default("model.retrain_interval_secs", 600)?
            .set_default("model.max_model_age_secs", 86400)?
            .set_default("model.seed", 42)?
            .set_default("model.weights_dir", "./weights")?
            // Risk defaults
            .set_default("risk.risk_percent", 1.0)?
            .set_default("risk.fallback_equity", 100.0)?
            .set_default("risk.stop_loss_pct", 1.5)?
            .set_default("risk.take_profit_pct", 3.0)?
            .set_default("risk.trailing_pct", 1.0)?
            .set_default("risk.trailing_activation_pct", 1.0)?
            .set_default("risk.atr_multiplier", 1.5)?
            .set_default("risk.default_min_lot", 0.001)?
            // Execution defaults
            .set_default("execution.entry_mode", "market")?
            .set_default("execution.slip_buffer", 0.001)?
            // Persistence defaults
            .set_default("persistence.data_dir", "./data")?
            .set_default("persistence.starting_equity", 100.0)?
            // Telegram defaults
            .set_default("telegram.api_url", "https://api.telegram.org")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (QUANTEDGE__SECTION__KEY)
            .add_source(Environment::with_prefix("QUANTEDGE").separator("__"))
            // Short legacy variables win over everything else
            .set_override_option("exchange.demo", env_flag("USE_DEMO"))?
            .set_override_option("exchange.leverage", leverage)?
            .set_override_option("telegram.bot_token", env_nonempty("TG_TOKEN"))?
            .set_override_option("telegram.chat_id", env_nonempty("TG_CHAT"))?
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Sanity checks that do not depend on the environment
    pub fn validate(&self) -> Result<()> {
        if self.timeframe().is_none() {
            bail!("Unsupported bot.timeframe '{}'", self.bot.timeframe);
        }
        if self.bot.min_bars > self.bot.lookback_bars {
            bail!(
                "bot.min_bars ({}) exceeds bot.lookback_bars ({})",
                self.bot.min_bars,
                self.bot.lookback_bars
            );
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            bail!("model.dropout must be in [0, 1)");
        }
        if !(0.0..1.0).contains(&self.model.validation_split) {
            bail!("model.validation_split must be in [0, 1)");
        }
        if self.model.lookbacks.is_empty() || self.model.lookbacks.contains(&0) {
            bail!("model.lookbacks must list at least one non-zero lookback");
        }
        if !(1..=5).contains(&self.model.horizon) {
            bail!("model.horizon must be between 1 and 5 bars");
        }
        if self.exchange.leverage == 0 {
            bail!("exchange.leverage must be at least 1");
        }
        if !matches!(self.execution.entry_mode.as_str(), "market" | "post_only") {
            bail!(
                "execution.entry_mode must be 'market' or 'post_only', got '{}'",
                self.execution.entry_mode
            );
        }
        Ok(())
    }

    /// Parsed bar timeframe (validated on load)
    pub fn timeframe(&self) -> Option<Timeframe> {
        Timeframe::from_str(&self.bot.timeframe)
    }

    /// Configured symbols in exchange form, deduplicated
    pub fn symbols(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for s in &self.bot.symbols {
            let sym = exchange_symbol(s);
            if !sym.is_empty() && !out.contains(&sym) {
                out.push(sym);
            }
        }
        out
    }

    /// Generate a digest of the config (without secrets) for logging
    pub fn digest(&self) -> String {
        format!(
            "bot={} symbols={} timeframe={} dry_run={} demo={} leverage={} conf>{:.2} risk={}% sl={}% tp={}% trail={}%",
            self.bot.tag,
            self.bot.symbols.len(),
            self.bot.timeframe,
            self.bot.dry_run,
            self.exchange.demo,
            self.exchange.leverage,
            self.strategy.confidence_threshold,
            self.risk.risk_percent,
            self.risk.stop_loss_pct,
            self.risk.take_profit_pct,
            self.risk.trailing_pct,
        )
    }

    /// Validate required environment variables
    pub fn validate_env(&self) -> Result<()> {
        if self.bot.dry_run {
            return Ok(());
        }
        for var in ["BINGX_API_KEY", "BINGX_SECRET_KEY"] {
            if env_nonempty(var).is_none() {
                bail!("Required environment variable {} is not set", var);
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
