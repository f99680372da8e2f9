//! Risk Manager - position sizing and protective levels
//!
//! Implements:
//! - ATR-based sizing from percent-of-equity risk
//! - Per-symbol minimum lot and lot-step rounding (rust_decimal)
//! - Percentage stop-loss / take-profit / trailing levels
//! - ATR-based 1:1 stop / target pairs
//! - Trailing-stop advancement that never reverses

use rust_decimal::prelude::*;
use std::collections::HashMap;

use crate::config::{AppConfig, RiskConfig};
use crate::types::{exchange_symbol, Position, Side};

/// Stop-loss, take-profit and initial trailing stop for a fresh entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProtectiveLevels {
    pub stop_loss: f64,
    pub take_profit: f64,
    pub trailing_stop: f64,
}

#[derive(Debug, Clone)]
pub struct RiskManager {
    config: RiskConfig,
    /// Upper-cased exchange symbol -> minimum order size
    min_lots: HashMap<String, f64>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        let min_lots = config
            .min_lots
            .iter()
            .map(|(s, lot)| (exchange_symbol(s), *lot))
            .collect();
        Self { config, min_lots }
    }

    pub fn from_app(cfg: &AppConfig) -> Self {
        Self::new(cfg.risk.clone())
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Minimum lot for a symbol; unknown symbols use `default_min_lot`
    pub fn min_lot(&self, symbol: &str) -> f64 {
        self.min_lots
            .get(&exchange_symbol(symbol))
            .copied()
            .filter(|lot| *lot > 0.0)
            .unwrap_or(self.config.default_min_lot)
    }

    /// Balance when known and positive, otherwise the configured fallback
    pub fn effective_equity(&self, balance: Option<f64>) -> f64 {
        match balance {
            Some(b) if b.is_finite() && b > 0.0 => b,
            _ => self.config.fallback_equity,
        }
    }

    /// `(equity * risk%) / (ATR * multiplier)`, at least one min lot, floored to the lot step
    pub fn position_size(&self, equity: f64, atr: f64, symbol: &str) -> f64 {
        let min_lot = self.min_lot(symbol);
        let stop_distance = atr * self.config.atr_multiplier;
        let raw = if atr.is_finite() && stop_distance > 0.0 && equity > 0.0 {
            equity * self.config.risk_percent / 100.0 / stop_distance
        } else {
            min_lot
        };
        let amount = raw.max(min_lot);

        match (Decimal::from_f64(amount), Decimal::from_f64(min_lot)) {
            (Some(a), Some(step)) => floor_to_step(a, step)
                .max(step)
                .to_f64()
                .unwrap_or(min_lot),
            _ => min_lot,
        }
    }

    pub fn stop_loss_price(&self, entry: f64, side: Side) -> f64 {
        entry * (1.0 - side.sign() * self.config.stop_loss_pct / 100.0)
    }

    pub fn take_profit_price(&self, entry: f64, side: Side) -> f64 {
        entry * (1.0 + side.sign() * self.config.take_profit_pct / 100.0)
    }

    pub fn trailing_stop_price(&self, price: f64, side: Side) -> f64 {
        price * (1.0 - side.sign() * self.config.trailing_pct / 100.0)
    }

    pub fn levels(&self, entry: f64, side: Side) -> ProtectiveLevels {
        ProtectiveLevels {
            stop_loss: self.stop_loss_price(entry, side),
            take_profit: self.take_profit_price(entry, side),
            trailing_stop: self.trailing_stop_price(entry, side),
        }
    }

    /// New stop level when the trailing stop should advance at `price`.
    ///
    /// Requires the price to be beyond entry by more than the activation percent, to be
    /// a new favourable extreme versus `last_trailing_price`, and the resulting stop to
    /// be strictly better than the current stop.
    pub fn trailing_update(&self, position: &Position, price: f64) -> Option<f64> {
        if !price.is_finite() || price <= 0.0 {
            return None;
        }
        let sign = position.side.sign();
        let activation = position.entry_price * (1.0 + sign * self.config.trailing_activation_pct / 100.0);
        let activated = (price - activation) * sign > 0.0;
        let new_extreme = (price - position.last_trailing_price) * sign > 0.0;
        if !activated || !new_extreme {
            return None;
        }
        let candidate = self.trailing_stop_price(price, position.side);
        let current = position.stop_loss_price;
        ((candidate - current) * sign > 0.0).then_some(candidate)
    }
}

/// ATR stop and target at a 1:1 reward-to-risk ratio
pub fn atr_levels(entry: f64, atr: f64, side: Side, multiplier: f64) -> (f64, f64) {
    let distance = atr * multiplier;
    let sign = side.sign();
    (entry - sign * distance, entry + sign * distance)
}

/// Round `amount` down to a multiple of `step`
pub fn floor_to_step(amount: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return amount;
    }
    (amount / step).floor() * step
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_min_lots;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn risk_config() -> RiskConfig {
        RiskConfig {
            risk_percent: 1.0,
            fallback_equity: 100.0,
            stop_loss_pct: 1.5,
            take_profit_pct: 3.0,
            trailing_pct: 1.0,
            trailing_activation_pct: 1.0,
            atr_multiplier: 1.5,
            default_min_lot: 0.001,
            min_lots: default_min_lots(),
        }
    }

    fn long_at(entry: f64, rm: &RiskManager) -> Position {
        let levels = rm.levels(entry, Side::Buy);
        Position {
            symbol: "BTC-USDT".into(),
            side: Side::Buy,
            entry_price: entry,
            amount: 0.01,
            stop_loss_price: levels.stop_loss,
            take_profit_price: levels.take_profit,
            trailing_stop_price: levels.trailing_stop,
            last_trailing_price: entry,
            opened_at: Utc::now(),
            entry_order_id: None,
            stop_order_id: None,
            take_profit_order_id: None,
        }
    }

    #[test]
    fn test_floor_to_step() {
        assert_eq!(floor_to_step(dec!(0.0237), dec!(0.001)), dec!(0.023));
        assert_eq!(floor_to_step(dec!(12.9), dec!(1)), dec!(12));
        assert_eq!(floor_to_step(dec!(0.57), dec!(0.1)), dec!(0.5));
    }

    #[test]
    fn test_position_size_from_atr() {
        let rm = RiskManager::new(risk_config());
        // 1000 * 1% / (400 * 1.5) = 0.01666 -> 0.016
        assert!((rm.position_size(1000.0, 400.0, "BTC-USDT") - 0.016).abs() < 1e-12);
        // Raised to the minimum lot
        assert_eq!(rm.position_size(100.0, 5000.0, "BTC-USDT"), 0.001);
        // Whole-unit lots
        assert_eq!(rm.position_size(1000.0, 0.3, "DOGE-USDT"), 22.0);
    }

    #[test]
    fn test_position_size_non_positive_atr() {
        let rm = RiskManager::new(risk_config());
        assert_eq!(rm.position_size(1000.0, 0.0, "SOL-USDT"), 0.01);
        assert_eq!(rm.position_size(1000.0, f64::NAN, "XRP/USDT:USDT"), 1.0);
    }

    #[test]
    fn test_min_lot_lookup() {
        let rm = RiskManager::new(risk_config());
        assert_eq!(rm.min_lot("btc/usdt:usdt"), 0.001);
        assert_eq!(rm.min_lot("DOT-USDT"), 0.1);
        assert_eq!(rm.min_lot("UNKNOWN-USDT"), 0.001);
    }

    #[test]
    fn test_effective_equity() {
        let rm = RiskManager::new(risk_config());
        assert_eq!(rm.effective_equity(Some(250.0)), 250.0);
        assert_eq!(rm.effective_equity(Some(0.0)), 100.0);
        assert_eq!(rm.effective_equity(None), 100.0);
    }

    #[test]
    fn test_levels_by_side() {
        let rm = RiskManager::new(risk_config());
        let long = rm.levels(100.0, Side::Buy);
        assert!((long.stop_loss - 98.5).abs() < 1e-9);
        assert!((long.take_profit - 103.0).abs() < 1e-9);
        assert!((long.trailing_stop - 99.0).abs() < 1e-9);

        let short = rm.levels(100.0, Side::Sell);
        assert!((short.stop_loss - 101.5).abs() < 1e-9);
        assert!((short.take_profit - 97.0).abs() < 1e-9);
        assert!((short.trailing_stop - 101.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_levels_one_to_one() {
        let (sl, tp) = atr_levels(100.0, 2.0, Side::Buy, 1.5);
        assert_eq!((sl, tp), (97.0, 103.0));
        let (sl, tp) = atr_levels(100.0, 2.0, Side::Sell, 1.5);
        assert_eq!((sl, tp), (103.0, 97.0));
    }

    #[test]
    fn test_trailing_long_only_advances() {
        let rm = RiskManager::new(risk_config());
        let mut pos = long_at(100.0, &rm);

        // Not activated yet
        assert_eq!(rm.trailing_update(&pos, 100.5), None);

        let stop = rm.trailing_update(&pos, 102.0).unwrap();
        assert!((stop - 100.98).abs() < 1e-9);
        pos.stop_loss_price = stop;
        pos.trailing_stop_price = stop;
        pos.last_trailing_price = 102.0;

        // Pullback is not a new extreme
        assert_eq!(rm.trailing_update(&pos, 101.5), None);
        let stop = rm.trailing_update(&pos, 103.0).unwrap();
        assert!((stop - 101.97).abs() < 1e-9);
    }

    #[test]
    fn test_trailing_short() {
        let rm = RiskManager::new(risk_config());
        let mut pos = long_at(100.0, &rm);
        let levels = rm.levels(100.0, Side::Sell);
        pos.side = Side::Sell;
        pos.stop_loss_price = levels.stop_loss;

        assert_eq!(rm.trailing_update(&pos, 101.0), None);
        let stop = rm.trailing_update(&pos, 97.0).unwrap();
        assert!((stop - 97.97).abs() < 1e-9);
    }
}
