//! Core types used throughout QuantEdge
//!
//! Defines common data structures for bars, sides, signals, positions, etc.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One OHLCV candle. `timestamp` is the bar open time in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// True range against the previous close
    pub fn true_range(&self, prev_close: f64) -> f64 {
        let hl = self.high - self.low;
        let hc = (self.high - prev_close).abs();
        let lc = (self.low - prev_close).abs();
        hl.max(hc).max(lc)
    }
}

/// Sort bars by timestamp and drop duplicated timestamps (last one wins).
pub fn normalize_bars(mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.sort_by_key(|b| b.timestamp);
    let mut out: Vec<Bar> = Vec::with_capacity(bars.len());
    for bar in bars {
        match out.last_mut() {
            Some(last) if last.timestamp == bar.timestamp => *last = bar,
            _ => out.push(bar),
        }
    }
    out
}

/// Supported bar timeframes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    Min1,
    Min3,
    Min5,
    Min15,
    Min30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour12,
    Day1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Hour1
    }
}

impl Timeframe {
    /// Duration in minutes
    pub fn minutes(&self) -> u64 {
        match self {
            Timeframe::Min1 => 1,
            Timeframe::Min3 => 3,
            Timeframe::Min5 => 5,
            Timeframe::Min15 => 15,
            Timeframe::Min30 => 30,
            Timeframe::Hour1 => 60,
            Timeframe::Hour2 => 120,
            Timeframe::Hour4 => 240,
            Timeframe::Hour6 => 360,
            Timeframe::Hour12 => 720,
            Timeframe::Day1 => 1440,
        }
    }

    pub fn duration_secs(&self) -> u64 {
        self.minutes() * 60
    }

    /// Interval string used by the exchange kline endpoint
    pub fn as_interval(&self) -> &'static str {
        match self {
            Timeframe::Min1 => "1m",
            Timeframe::Min3 => "3m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Min30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour2 => "2h",
            Timeframe::Hour4 => "4h",
            Timeframe::Hour6 => "6h",
            Timeframe::Hour12 => "12h",
            Timeframe::Day1 => "1d",
        }
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Some(Timeframe::Min1),
            "3m" => Some(Timeframe::Min3),
            "5m" => Some(Timeframe::Min5),
            "15m" => Some(Timeframe::Min15),
            "30m" => Some(Timeframe::Min30),
            "1h" | "60m" => Some(Timeframe::Hour1),
            "2h" => Some(Timeframe::Hour2),
            "4h" => Some(Timeframe::Hour4),
            "6h" => Some(Timeframe::Hour6),
            "12h" => Some(Timeframe::Hour12),
            "1d" | "24h" => Some(Timeframe::Day1),
            _ => None,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_interval())
    }
}

/// Order / position side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }

    /// Exchange wire value
    pub fn as_api(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }

    /// Leverage / hedge-mode position side
    pub fn position_side(&self) -> &'static str {
        match self {
            Side::Buy => "LONG",
            Side::Sell => "SHORT",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "BUY" | "LONG" => Some(Side::Buy),
            "SELL" | "SHORT" => Some(Side::Sell),
            _ => None,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Normalise a symbol to the exchange swap form: `BTC/USDT:USDT` → `BTC-USDT`.
pub fn exchange_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    let base_quote = upper.split(':').next().unwrap_or(&upper);
    if let Some((base, quote)) = base_quote.split_once('/') {
        return format!("{base}-{quote}");
    }
    if base_quote.contains('-') {
        return base_quote.to_string();
    }
    match base_quote.strip_suffix("USDT") {
        Some(base) if !base.is_empty() => format!("{base}-USDT"),
        _ => base_quote.to_string(),
    }
}

/// File-safe symbol: `/`, `:` and `-` stripped.
pub fn clean_symbol(symbol: &str) -> String {
    symbol
        .chars()
        .filter(|c| !matches!(c, '/' | ':' | '-'))
        .collect()
}

/// Trade signal produced once per symbol per loop iteration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: String,
    /// `None` when neither side qualifies
    pub side: Option<Side>,
    pub long_score: u8,
    pub short_score: u8,
    /// Model P(price up) for the next horizon
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    /// Open time of the bar the signal was computed on
    pub bar_timestamp: i64,
}

impl Signal {
    /// Confidence in the direction of the signal
    pub fn directional_confidence(&self) -> f64 {
        match self.side {
            Some(Side::Sell) => 1.0 - self.confidence,
            _ => self.confidence,
        }
    }
}

/// Open position owned by a per-symbol trader
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: f64,
    pub amount: f64,
    pub stop_loss_price: f64,
    pub take_profit_price: f64,
    /// Trailing stop level; only ever moves in the favourable direction
    pub trailing_stop_price: f64,
    /// Most favourable price seen when the trailing stop was last moved
    pub last_trailing_price: f64,
    pub opened_at: DateTime<Utc>,
    pub entry_order_id: Option<String>,
    pub stop_order_id: Option<String>,
    pub take_profit_order_id: Option<String>,
}

impl Position {
    /// Unrealised PnL at `price` in quote currency
    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.amount * self.side.sign()
    }

    /// Unrealised PnL as a fraction of entry notional
    pub fn pnl_pct(&self, price: f64) -> f64 {
        if self.entry_price <= 0.0 {
            return 0.0;
        }
        (price - self.entry_price) / self.entry_price * self.side.sign()
    }
}

/// Why a position ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    /// Exchange no longer reports the position (stop, take-profit or manual close)
    ClosedOnExchange,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::ClosedOnExchange => write!(f, "CLOSED_ON_EXCHANGE"),
            ExitReason::Manual => write!(f, "MANUAL"),
        }
    }
}

/// A completed round trip
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub side: Side,
    pub amount: f64,
    pub entry_price: f64,
    pub exit_price: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub opened_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub reason: ExitReason,
}

impl ClosedTrade {
    pub fn from_position(
        position: &Position,
        exit_price: f64,
        closed_at: DateTime<Utc>,
        reason: ExitReason,
    ) -> Self {
        Self {
            symbol: position.symbol.clone(),
            side: position.side,
            amount: position.amount,
            entry_price: position.entry_price,
            exit_price,
            pnl: position.unrealized_pnl(exit_price),
            pnl_pct: position.pnl_pct(exit_price) * 100.0,
            opened_at: position.opened_at,
            closed_at,
            reason,
        }
    }

    pub fn is_win(&self) -> bool {
        self.pnl > 0.0
    }
}
