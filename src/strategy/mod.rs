//! Strategy - turns indicator rows and model confidence into entry decisions
//!
//! A signal is tradeable only when:
//! - the side's score reaches the strong threshold,
//! - the model's directional confidence clears the threshold,
//! - the optional funding filter allows the side,
//! - the symbol is out of cooldown and the bar has not been traded yet.

use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;

use crate::config::{AppConfig, StrategyConfig};
use crate::features::FeatureRow;
use crate::types::{Bar, Side, Signal};

/// Why a symbol was not entered this iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    Warmup,
    NoSignal,
    WeakScore,
    LowConfidence,
    Funding,
    Cooldown,
    DuplicateBar,
    PositionOpen,
}

impl fmt::Display for HoldReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HoldReason::Warmup => "warmup",
            HoldReason::NoSignal => "no_signal",
            HoldReason::WeakScore => "weak_score",
            HoldReason::LowConfidence => "low_confidence",
            HoldReason::Funding => "funding",
            HoldReason::Cooldown => "cooldown",
            HoldReason::DuplicateBar => "duplicate_bar",
            HoldReason::PositionOpen => "position_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Enter(Side),
    Hold(HoldReason),
}

#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: StrategyConfig,
}

impl SignalEngine {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn from_app(cfg: &AppConfig) -> Self {
        Self::new(cfg.strategy.clone())
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    /// Signal for the latest row. Rows still in warm-up never carry a side.
    pub fn build_signal(&self, symbol: &str, row: &FeatureRow, confidence: f64) -> Signal {
        let side = if !row.ready {
            None
        } else if row.buy_signal && (!row.sell_signal || row.long_score >= row.short_score) {
            Some(Side::Buy)
        } else if row.sell_signal {
            Some(Side::Sell)
        } else {
            None
        };
        Signal {
            symbol: symbol.to_string(),
            side,
            long_score: row.long_score,
            short_score: row.short_score,
            confidence,
            timestamp: Utc::now(),
            bar_timestamp: row.timestamp,
        }
    }

    /// Strong-signal gate. `funding_pct` is the last funding rate in percent.
    pub fn evaluate(&self, signal: &Signal, funding_pct: f64) -> Decision {
        let Some(side) = signal.side else {
            return Decision::Hold(HoldReason::NoSignal);
        };
        let score = match side {
            Side::Buy => signal.long_score,
            Side::Sell => signal.short_score,
        };
        if score < self.config.strong_threshold {
            return Decision::Hold(HoldReason::WeakScore);
        }
        if signal.directional_confidence() <= self.config.confidence_threshold {
            return Decision::Hold(HoldReason::LowConfidence);
        }
        if let Some(max) = self.config.funding_filter_pct {
            let blocked = match side {
                Side::Buy => funding_pct > max,
                Side::Sell => funding_pct < -max,
            };
            if blocked {
                return Decision::Hold(HoldReason::Funding);
            }
        }
        Decision::Enter(side)
    }
}

/// Stable fingerprint of a closed bar
pub fn bar_fingerprint(bar: &Bar) -> String {
    let mut hasher = Sha256::new();
    hasher.update(
        format!(
            "{}|{}|{}|{}|{}|{}",
            bar.timestamp, bar.open, bar.high, bar.low, bar.close, bar.volume
        )
        .as_bytes(),
    );
    hex::encode(hasher.finalize())
}

/// Per-symbol entry cooldown and last-traded-bar dedupe
#[derive(Debug, Clone)]
pub struct CooldownTracker {
    cooldown: Duration,
    last_entry: HashMap<String, DateTime<Utc>>,
    last_bar: HashMap<String, String>,
}

impl CooldownTracker {
    pub fn new(cooldown_secs: u64) -> Self {
        Self {
            cooldown: Duration::seconds(cooldown_secs as i64),
            last_entry: HashMap::new(),
            last_bar: HashMap::new(),
        }
    }

    /// Time left before `symbol` may enter again
    pub fn remaining(&self, symbol: &str, now: DateTime<Utc>) -> Option<Duration> {
        let last = self.last_entry.get(symbol)?;
        let left = *last + self.cooldown - now;
        (left > Duration::zero()).then_some(left)
    }

    pub fn is_cooling(&self, symbol: &str, now: DateTime<Utc>) -> bool {
        self.remaining(symbol, now).is_some()
    }

    pub fn is_duplicate_bar(&self, symbol: &str, bar: &Bar) -> bool {
        self.last_bar
            .get(symbol)
            .is_some_and(|fp| *fp == bar_fingerprint(bar))
    }

    /// Record a successful entry on `bar`
    pub fn mark_entry(&mut self, symbol: &str, bar: &Bar, now: DateTime<Utc>) {
        self.last_entry.insert(symbol.to_string(), now);
        self.mark_bar(symbol, bar);
    }

    /// Skip `bar` for `symbol` without starting a cooldown
    pub fn mark_bar(&mut self, symbol: &str, bar: &Bar) {
        self.last_bar.insert(symbol.to_string(), bar_fingerprint(bar));
    }
}
