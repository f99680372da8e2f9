//! Market data source
//!
//! Thin layer over an `Exchange` for bars, funding rates and symbol discovery.

use anyhow::{bail, Result};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::exchange::Exchange;
use crate::types::{Bar, Timeframe};

/// Symbols used when discovery fails or returns nothing
pub const FALLBACK_SYMBOLS: [&str; 2] = ["BTC-USDT", "ETH-USDT"];

pub struct MarketData {
    exchange: Arc<dyn Exchange>,
    timeframe: Timeframe,
}

impl MarketData {
    pub fn new(exchange: Arc<dyn Exchange>, timeframe: Timeframe) -> Self {
        Self {
            exchange,
            timeframe,
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Ascending bars, at most `limit`
    pub async fn fetch_bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>> {
        let mut bars = self
            .exchange
            .fetch_bars(symbol, self.timeframe, limit)
            .await?;
        if bars.is_empty() {
            bail!("No bars returned for {}", symbol);
        }
        if bars.windows(2).any(|w| w[0].timestamp >= w[1].timestamp) {
            bars = crate::types::normalize_bars(bars);
        }
        if bars.len() > limit {
            bars.drain(..bars.len() - limit);
        }
        debug!(%symbol, bars = bars.len(), "Fetched bars");
        Ok(bars)
    }

    /// Last funding rate in percent; 0.0 when unavailable
    pub async fn fetch_funding_rate(&self, symbol: &str) -> f64 {
        match self.exchange.fetch_funding_rate(symbol).await {
            Ok(rate) => rate * 100.0,
            Err(e) => {
                warn!(%symbol, error = %e, "Funding rate unavailable");
                0.0
            }
        }
    }

    /// Online `*-USDT` swaps, sorted; falls back to BTC/ETH
    pub async fn discover_symbols(&self) -> Vec<String> {
        match self.exchange.list_contracts().await {
            Ok(contracts) => {
                let mut symbols: Vec<String> = contracts
                    .into_iter()
                    .filter(|c| c.online && c.symbol.ends_with("-USDT"))
                    .map(|c| c.symbol)
                    .collect();
                symbols.sort();
                symbols.dedup();
                if symbols.is_empty() {
                    warn!("No USDT swaps discovered, using fallback symbols");
                    return fallback_symbols();
                }
                info!(count = symbols.len(), "🔎 Discovered USDT swaps");
                symbols
            }
            Err(e) => {
                warn!(error = %e, "Symbol discovery failed, using fallback symbols");
                fallback_symbols()
            }
        }
    }

    /// Configured symbols, or discovered ones when enabled
    pub async fn resolve_symbols(&self, config: &AppConfig) -> Vec<String> {
        if config.bot.auto_discover_symbols {
            return self.discover_symbols().await;
        }
        let symbols = config.symbols();
        if symbols.is_empty() {
            return fallback_symbols();
        }
        symbols
    }
}

fn fallback_symbols() -> Vec<String> {
    FALLBACK_SYMBOLS.iter().map(|s| s.to_string()).collect()
}
