//! PnL statistics over the closed-trade journal

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::ClosedTradeRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PnlStats {
    pub generated_at: i64,
    pub starting_equity: f64,
    pub equity: f64,
    pub total_pnl: f64,
    pub current_drawdown_pct: f64,
    pub max_drawdown_pct: f64,
    /// Mean / std of per-trade equity returns, annualised by sqrt(365)
    pub sharpe: f64,
    pub trades: usize,
    pub wins: usize,
    pub win_rate: f64,
}

impl PnlStats {
    pub fn compute(trades: &[ClosedTradeRecord], starting_equity: f64) -> Self {
        let mut equity = starting_equity;
        let mut peak = starting_equity;
        let mut max_dd = 0.0_f64;
        let mut returns = Vec::with_capacity(trades.len());

        for trade in trades {
            let prev = equity;
            equity += trade.pnl;
            if prev.abs() > f64::EPSILON {
                returns.push((equity - prev) / prev);
            }
            peak = peak.max(equity);
            if peak > 0.0 {
                max_dd = max_dd.max((peak - equity) / peak * 100.0);
            }
        }

        let current_dd = if peak > 0.0 {
            (peak - equity) / peak * 100.0
        } else {
            0.0
        };
        let wins = trades.iter().filter(|t| t.pnl > 0.0).count();

        Self {
            generated_at: Utc::now().timestamp_millis(),
            starting_equity,
            equity,
            total_pnl: equity - starting_equity,
            current_drawdown_pct: current_dd,
            max_drawdown_pct: max_dd,
            sharpe: sharpe(&returns),
            trades: trades.len(),
            wins,
            win_rate: if trades.is_empty() {
                0.0
            } else {
                wins as f64 / trades.len() as f64
            },
        }
    }
}

fn sharpe(returns: &[f64]) -> f64 {
    if returns.len() < 2 {
        return 0.0;
    }
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let var = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = var.sqrt();
    if std <= f64::EPSILON {
        return 0.0;
    }
    mean / std * 365f64.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(pnl: f64) -> ClosedTradeRecord {
        ClosedTradeRecord {
            opened_at: 0,
            closed_at: 0,
            symbol: "BTC-USDT".into(),
            side: "BUY".into(),
            amount: 1.0,
            entry: 100.0,
            exit: 100.0 + pnl,
            pnl,
            pnl_pct: pnl,
            reason: "CLOSED_ON_EXCHANGE".into(),
        }
    }

    #[test]
    fn test_empty_journal() {
        let stats = PnlStats::compute(&[], 100.0);
        assert_eq!(stats.equity, 100.0);
        assert_eq!(stats.trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.sharpe, 0.0);
    }

    #[test]
    fn test_drawdown_and_win_rate() {
        // 100 -> 110 -> 99 -> 104.5
        let stats = PnlStats::compute(&[trade(10.0), trade(-11.0), trade(5.5)], 100.0);
        assert!((stats.equity - 104.5).abs() < 1e-9);
        assert!((stats.total_pnl - 4.5).abs() < 1e-9);
        assert!((stats.max_drawdown_pct - 10.0).abs() < 1e-9);
        assert!((stats.current_drawdown_pct - 5.0).abs() < 1e-9);
        assert_eq!(stats.wins, 2);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sharpe_sign() {
        let up = PnlStats::compute(&[trade(1.0), trade(2.0), trade(1.5)], 100.0);
        assert!(up.sharpe > 0.0);
        let down = PnlStats::compute(&[trade(-1.0), trade(-2.0), trade(-1.5)], 100.0);
        assert!(down.sharpe < 0.0);
    }
}
