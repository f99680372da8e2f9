//! Integration tests: indicators through the signal gate, sizing and PnL stats

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use quantedge::config::{default_min_lots, RiskConfig, StrategyConfig};
    use quantedge::features::{IndicatorConfig, IndicatorEngine};
    use quantedge::persistence::{ClosedTradeRecord, PnlStats};
    use quantedge::risk::RiskManager;
    use quantedge::strategy::{CooldownTracker, Decision, HoldReason, SignalEngine};
    use quantedge::types::{Bar, Side, Timeframe};

    fn bars(n: usize, step: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 500.0 + i as f64 * step;
                Bar::new(i as i64 * 3_600_000, c, c + 1.0, c - 1.0, c, 1_000.0 + i as f64 * 3.0)
            })
            .collect()
    }

    fn strategy() -> StrategyConfig {
        StrategyConfig {
            use_sma200: false,
            rsi_long_threshold: 55.0,
            rsi_short_threshold: 45.0,
            signal_threshold: 4,
            strong_threshold: 5,
            confidence_threshold: 0.75,
            funding_filter_pct: None,
            cooldown_secs: 3600,
        }
    }

    fn risk() -> RiskManager {
        RiskManager::new(RiskConfig {
            risk_percent: 1.0,
            fallback_equity: 100.0,
            stop_loss_pct: 1.5,
            take_profit_pct: 3.0,
            trailing_pct: 1.0,
            trailing_activation_pct: 1.0,
            atr_multiplier: 1.5,
            default_min_lot: 0.001,
            min_lots: default_min_lots(),
        })
    }

    // ============================================================================
    // Indicators -> signal gate
    // ============================================================================

    #[test]
    fn test_uptrend_is_strong_long() {
        let engine = IndicatorEngine::new(IndicatorConfig::for_timeframe(Timeframe::Hour1));
        let row = engine.latest(&bars(150, 2.0)).unwrap();
        assert!(row.ready && row.buy_signal && !row.sell_signal);

        let signals = SignalEngine::new(strategy());
        let signal = signals.build_signal("ETH-USDT", &row, 0.9);
        assert_eq!(signals.evaluate(&signal, 0.0), Decision::Enter(Side::Buy));

        let doubtful = signals.build_signal("ETH-USDT", &row, 0.6);
        assert_eq!(
            signals.evaluate(&doubtful, 0.0),
            Decision::Hold(HoldReason::LowConfidence)
        );
    }

    #[test]
    fn test_downtrend_is_short_with_bearish_model() {
        let engine = IndicatorEngine::default();
        let row = engine.latest(&bars(150, -2.0)).unwrap();
        assert!(row.sell_signal);
        let signals = SignalEngine::new(strategy());
        let signal = signals.build_signal("ETH-USDT", &row, 0.1);
        assert_eq!(signals.evaluate(&signal, 0.0), Decision::Enter(Side::Sell));
    }

    #[test]
    fn test_short_window_gives_no_row() {
        let engine = IndicatorEngine::default();
        assert!(engine.latest(&bars(40, 1.0)).is_none());
    }

    #[test]
    fn test_cooldown_window() {
        let mut cooldowns = CooldownTracker::new(3600);
        let bar = bars(1, 1.0).remove(0);
        let now = Utc::now();
        cooldowns.mark_entry("ETH-USDT", &bar, now);
        let left = cooldowns.remaining("ETH-USDT", now + Duration::minutes(15)).unwrap();
        assert_eq!(left.num_minutes(), 45);
        assert!(cooldowns.remaining("ETH-USDT", now + Duration::hours(2)).is_none());
    }

    // ============================================================================
    // Risk
    // ============================================================================

    #[test]
    fn test_sizing_uses_fallback_equity() {
        let rm = risk();
        let equity = rm.effective_equity(None);
        // 100 * 1% / (2 * 1.5) = 0.333.. -> 0.33
        assert!((rm.position_size(equity, 2.0, "SOL-USDT") - 0.33).abs() < 1e-12);
    }

    #[test]
    fn test_levels_match_percentages() {
        let levels = risk().levels(2000.0, Side::Buy);
        assert!((levels.stop_loss - 1970.0).abs() < 1e-9);
        assert!((levels.take_profit - 2060.0).abs() < 1e-9);
        assert!((levels.trailing_stop - 1980.0).abs() < 1e-9);
    }

    // ============================================================================
    // PnL
    // ============================================================================

    #[test]
    fn test_pnl_stats_over_journal_rows() {
        let rows: Vec<ClosedTradeRecord> = [5.0, -2.0, 3.0, -1.0]
            .iter()
            .map(|&pnl| ClosedTradeRecord {
                opened_at: 0,
                closed_at: 1,
                symbol: "BTC-USDT".into(),
                side: "BUY".into(),
                amount: 0.01,
                entry: 100.0,
                exit: 100.0 + pnl,
                pnl,
                pnl_pct: pnl,
                reason: "CLOSED_ON_EXCHANGE".into(),
            })
            .collect();
        let stats = PnlStats::compute(&rows, 100.0);
        assert!((stats.equity - 105.0).abs() < 1e-9);
        assert_eq!(stats.trades, 4);
        assert!((stats.win_rate - 0.5).abs() < 1e-12);
        assert!(stats.max_drawdown_pct > 1.9 && stats.max_drawdown_pct < 2.0);
    }
}
