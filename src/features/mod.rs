//! Indicator Engine - Technical indicators and composite scores
//!
//! Computes per-bar indicator rows from a bar window:
//! - RSI (Wilder's smoothing, period chosen by timeframe)
//! - SMA 20/50/200 and EMA 20
//! - ATR (Wilder's smoothing, same period as RSI)
//! - Bollinger Bands (20, 2σ)
//! - Rolling volume average, volume ratio and "strong volume"
//! - Trend score and long/short composite scores with buy/sell flags

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::types::{Bar, Timeframe};

/// RSI / ATR period for a timeframe: ≤15m → 7, ≤1h → 14, ≤4h → 21, else 28
pub fn rsi_period_for(timeframe: Timeframe) -> usize {
    match timeframe.minutes() {
        0..=15 => 7,
        16..=60 => 14,
        61..=240 => 21,
        _ => 28,
    }
}

/// Indicator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub rsi_period: usize,
    pub atr_period: usize,
    pub sma_fast: usize,
    pub sma_mid: usize,
    pub sma_slow: usize,
    pub ema_period: usize,
    pub bb_period: usize,
    pub bb_std: f64,
    pub volume_period: usize,
    /// Count close > SMA200 in the trend score
    pub use_sma200: bool,
    pub rsi_long_threshold: f64,
    pub rsi_short_threshold: f64,
    pub signal_threshold: u8,
    /// Windows shorter than this are not evaluated
    pub min_bars: usize,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self::for_timeframe(Timeframe::Hour1)
    }
}

impl IndicatorConfig {
    pub fn for_timeframe(timeframe: Timeframe) -> Self {
        let period = rsi_period_for(timeframe);
        Self {
            rsi_period: period,
            atr_period: period,
            sma_fast: 20,
            sma_mid: 50,
            sma_slow: 200,
            ema_period: 20,
            bb_period: 20,
            bb_std: 2.0,
            volume_period: 20,
            use_sma200: false,
            rsi_long_threshold: 55.0,
            rsi_short_threshold: 45.0,
            signal_threshold: 4,
            min_bars: 100,
        }
    }

    pub fn from_app(cfg: &AppConfig) -> Self {
        let mut config = Self::for_timeframe(cfg.timeframe().unwrap_or_default());
        config.use_sma200 = cfg.strategy.use_sma200;
        config.rsi_long_threshold = cfg.strategy.rsi_long_threshold;
        config.rsi_short_threshold = cfg.strategy.rsi_short_threshold;
        config.signal_threshold = cfg.strategy.signal_threshold;
        config.min_bars = cfg.bot.min_bars;
        config
    }

    /// Number of boolean conditions in the trend score
    pub fn trend_max(&self) -> u8 {
        if self.use_sma200 {
            4
        } else {
            3
        }
    }

    /// Upper clip for long/short scores
    pub fn score_max(&self) -> u8 {
        self.trend_max() + 2
    }
}

/// Indicator values for one bar. `None` during warm-up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub timestamp: i64,
    pub close: f64,
    pub volume: f64,
    pub rsi: Option<f64>,
    pub sma20: Option<f64>,
    pub sma50: Option<f64>,
    pub sma200: Option<f64>,
    pub ema20: Option<f64>,
    pub atr: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub vol_avg: Option<f64>,
    pub volume_ratio: Option<f64>,
    pub strong_volume: bool,
    /// All scoring inputs are available
    pub ready: bool,
    pub trend_score: u8,
    pub long_score: u8,
    pub short_score: u8,
    pub buy_signal: bool,
    pub sell_signal: bool,
}

/// Indicator engine for computing feature rows
#[derive(Debug, Clone, Default)]
pub struct IndicatorEngine {
    config: IndicatorConfig,
}

impl IndicatorEngine {
    pub fn new(config: IndicatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &IndicatorConfig {
        &self.config
    }

    /// Rows for a live window; `None` when the window is shorter than `min_bars`
    pub fn compute(&self, bars: &[Bar]) -> Option<Vec<FeatureRow>> {
        if bars.len() < self.config.min_bars.max(2) {
            tracing::debug!(
                bars = bars.len(),
                required = self.config.min_bars,
                "Indicators: not enough bars"
            );
            return None;
        }
        Some(self.compute_all(bars))
    }

    /// Latest row for a live window
    pub fn latest(&self, bars: &[Bar]) -> Option<FeatureRow> {
        self.compute(bars)?.pop()
    }

    /// Rows for every bar regardless of window length (training data)
    pub fn compute_all(&self, bars: &[Bar]) -> Vec<FeatureRow> {
        let cfg = &self.config;
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();

        let rsi = rsi_wilder(&closes, cfg.rsi_period);
        let sma20 = sma(&closes, cfg.sma_fast);
        let sma50 = sma(&closes, cfg.sma_mid);
        let sma200 = sma(&closes, cfg.sma_slow);
        let ema20 = ema(&closes, cfg.ema_period);
        let atr = atr_wilder(bars, cfg.atr_period);
        let bb = bollinger(&closes, cfg.bb_period, cfg.bb_std);
        let vol_avg = sma(&volumes, cfg.volume_period);

        let mut rows = Vec::with_capacity(bars.len());
        for (i, bar) in bars.iter().enumerate() {
            let mut row = FeatureRow {
                timestamp: bar.timestamp,
                close: bar.close,
                volume: bar.volume,
                rsi: rsi[i],
                sma20: sma20[i],
                sma50: sma50[i],
                sma200: sma200[i],
                ema20: ema20[i],
                atr: atr[i],
                bb_upper: bb[i].map(|b| b.0),
                bb_middle: bb[i].map(|b| b.1),
                bb_lower: bb[i].map(|b| b.2),
                vol_avg: vol_avg[i],
                ..Default::default()
            };

            if let Some(avg) = vol_avg[i] {
                if avg > 0.0 {
                    row.volume_ratio = Some(bar.volume / avg);
                }
                row.strong_volume = i > 0 && bar.volume > avg && bar.volume > volumes[i - 1];
            }

            self.score(&mut row);
            rows.push(row);
        }
        rows
    }

    /// Fill trend / long / short scores and signal flags
    fn score(&self, row: &mut FeatureRow) {
        let cfg = &self.config;
        let (Some(rsi), Some(s20), Some(s50)) = (row.rsi, row.sma20, row.sma50) else {
            return;
        };
        if row.vol_avg.is_none() {
            return;
        }
        let mut trend = 0u8;
        trend += (row.close > s20) as u8;
        trend += (row.close > s50) as u8;
        trend += (s20 > s50) as u8;
        if cfg.use_sma200 {
            let Some(s200) = row.sma200 else {
                return;
            };
            trend += (row.close > s200) as u8;
        }

        let vol = row.strong_volume as u8;
        let long = trend + vol + (rsi > cfg.rsi_long_threshold) as u8;
        let short = (cfg.trend_max() - trend) + vol + (rsi < cfg.rsi_short_threshold) as u8;

        row.ready = true;
        row.trend_score = trend;
        row.long_score = long.min(cfg.score_max());
        row.short_score = short.min(cfg.score_max());
        row.buy_signal = row.long_score >= cfg.signal_threshold;
        row.sell_signal = row.short_score >= cfg.signal_threshold;
    }
}

/// Simple moving average
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let mut sum: f64 = values[..period].iter().sum();
    out[period - 1] = Some(sum / period as f64);
    for i in period..values.len() {
        sum += values[i] - values[i - period];
        out[i] = Some(sum / period as f64);
    }
    out
}

/// Exponential moving average seeded with the SMA of the first `period` values
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut value = values[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = Some(value);
    for i in period..values.len() {
        value = alpha * values[i] + (1.0 - alpha) * value;
        out[i] = Some(value);
    }
    out
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        return 50.0; // No movement = neutral
    }
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// RSI with Wilder's smoothing. First value at index `period`.
pub fn rsi_wilder(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() <= period {
        return out;
    }

    // First computation: use simple average to seed
    let mut gains = 0.0;
    let mut losses = 0.0;
    for i in 1..=period {
        let change = closes[i] - closes[i - 1];
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }
    let n = period as f64;
    let mut avg_gain = gains / n;
    let mut avg_loss = losses / n;
    out[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    for i in (period + 1)..closes.len() {
        let change = closes[i] - closes[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (n - 1.0) + gain) / n;
        avg_loss = (avg_loss * (n - 1.0) + loss) / n;
        out[i] = Some(rsi_from_averages(avg_gain, avg_loss));
    }
    out
}

/// Average True Range with Wilder's smoothing, seeded by the mean of the first `period` TRs
pub fn atr_wilder(bars: &[Bar], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; bars.len()];
    if period == 0 || bars.len() < period {
        return out;
    }
    let tr: Vec<f64> = bars
        .iter()
        .enumerate()
        .map(|(i, b)| {
            if i == 0 {
                b.high - b.low
            } else {
                b.true_range(bars[i - 1].close)
            }
        })
        .collect();

    let n = period as f64;
    let mut atr = tr[..period].iter().sum::<f64>() / n;
    out[period - 1] = Some(atr);
    for i in period..bars.len() {
        atr = (atr * (n - 1.0) + tr[i]) / n;
        out[i] = Some(atr);
    }
    out
}

/// Bollinger Bands as (upper, middle, lower), population standard deviation
pub fn bollinger(closes: &[f64], period: usize, num_std: f64) -> Vec<Option<(f64, f64, f64)>> {
    let mut out = vec![None; closes.len()];
    if period == 0 || closes.len() < period {
        return out;
    }
    for i in (period - 1)..closes.len() {
        let window = &closes[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let var = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / period as f64;
        let std = var.sqrt();
        out[i] = Some((mean + num_std * std, mean, mean - num_std * std));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_bar(ts: i64, close: f64, volume: f64) -> Bar {
        Bar::new(ts * 3_600_000, close - 0.5, close + 1.0, close - 1.0, close, volume)
    }

    fn trending_bars(n: usize, start: f64, step: f64) -> Vec<Bar> {
        (0..n)
            .map(|i| make_bar(i as i64, start + step * i as f64, 1000.0 + 10.0 * i as f64))
            .collect()
    }

    #[test]
    fn test_rsi_period_by_timeframe() {
        assert_eq!(rsi_period_for(Timeframe::Min5), 7);
        assert_eq!(rsi_period_for(Timeframe::Min15), 7);
        assert_eq!(rsi_period_for(Timeframe::Min30), 14);
        assert_eq!(rsi_period_for(Timeframe::Hour1), 14);
        assert_eq!(rsi_period_for(Timeframe::Hour4), 21);
        assert_eq!(rsi_period_for(Timeframe::Day1), 28);
    }

    #[test]
    fn test_sma_and_ema() {
        let values = [1.0, 2.0, 3.0, 4.0, 5.0];
        let s = sma(&values, 3);
        assert_eq!(s[1], None);
        assert_eq!(s[2], Some(2.0));
        assert_eq!(s[4], Some(4.0));

        let e = ema(&values, 3);
        assert_eq!(e[2], Some(2.0));
        // alpha = 0.5: 0.5*4 + 0.5*2 = 3
        assert!((e[3].unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_rsi_extremes_and_flat() {
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let rsi = rsi_wilder(&up, 14);
        assert_eq!(rsi[13], None);
        assert_eq!(rsi[14], Some(100.0));

        let down: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert_eq!(*rsi_wilder(&down, 14).last().unwrap(), Some(0.0));

        let flat = vec![50.0; 30];
        assert_eq!(*rsi_wilder(&flat, 14).last().unwrap(), Some(50.0));
    }

    #[test]
    fn test_rsi_mixed_in_range() {
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0)
            .collect();
        for value in rsi_wilder(&closes, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn test_atr_constant_range() {
        // high - low = 2 on every bar and closes flat, so TR = 2 throughout
        let bars: Vec<Bar> = (0..30).map(|i| make_bar(i, 100.0, 1.0)).collect();
        let atr = atr_wilder(&bars, 14);
        assert_eq!(atr[12], None);
        assert!((atr[13].unwrap() - 2.0).abs() < 1e-12);
        assert!((atr[29].unwrap() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_bollinger_flat_series_collapses() {
        let closes = vec![10.0; 25];
        let bb = bollinger(&closes, 20, 2.0);
        assert_eq!(bb[18], None);
        assert_eq!(bb[24], Some((10.0, 10.0, 10.0)));
    }

    #[test]
    fn test_insufficient_history_returns_none() {
        let engine = IndicatorEngine::default();
        let bars = trending_bars(50, 100.0, 1.0);
        assert!(engine.compute(&bars).is_none());
        assert!(engine.latest(&bars).is_none());
    }

    #[test]
    fn test_uptrend_produces_buy_signal() {
        let engine = IndicatorEngine::default();
        let bars = trending_bars(120, 100.0, 1.0);
        let row = engine.latest(&bars).unwrap();
        assert!(row.ready);
        assert_eq!(row.trend_score, 3);
        assert!(row.strong_volume);
        assert_eq!(row.long_score, 5);
        assert_eq!(row.short_score, 1);
        assert!(row.buy_signal);
        assert!(!row.sell_signal);
        assert!(row.volume_ratio.unwrap() > 1.0);
    }

    #[test]
    fn test_downtrend_produces_sell_signal() {
        let engine = IndicatorEngine::default();
        let bars = trending_bars(120, 300.0, -1.0);
        let row = engine.latest(&bars).unwrap();
        assert_eq!(row.trend_score, 0);
        assert_eq!(row.short_score, 5);
        assert!(row.sell_signal);
        assert!(!row.buy_signal);
    }

    #[test]
    fn test_sma200_variant_widens_scores() {
        let mut config = IndicatorConfig::for_timeframe(Timeframe::Hour1);
        config.use_sma200 = true;
        let engine = IndicatorEngine::new(config);

        // Not enough history for SMA200: rows are not scored
        let short = engine.latest(&trending_bars(150, 100.0, 1.0)).unwrap();
        assert!(!short.ready);
        assert!(!short.buy_signal && !short.sell_signal);

        let row = engine.latest(&trending_bars(220, 100.0, 1.0)).unwrap();
        assert_eq!(row.trend_score, 4);
        assert_eq!(row.long_score, 6);
        assert!(row.long_score <= engine.config().score_max());
    }

    #[test]
    fn test_warmup_rows_never_signal() {
        let engine = IndicatorEngine::default();
        let rows = engine.compute_all(&trending_bars(120, 300.0, -1.0));
        for row in rows.iter().take(49) {
            assert!(!row.ready);
            assert!(!row.sell_signal);
        }
    }
}
