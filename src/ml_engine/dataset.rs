//! Dataset - feature tables, labelled windows and the chronological split

use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use super::ModelError;
use crate::features::IndicatorEngine;
use crate::types::Bar;

/// Which per-bar inputs the network sees
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeatureMode {
    /// open, high, low, close, volume
    Ohlcv,
    /// rsi/100, close/sma20-1, close/sma50-1, atr/close, volume_ratio, 1-bar return
    Engineered,
}

impl FeatureMode {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ohlcv" | "raw" => Some(FeatureMode::Ohlcv),
            "engineered" | "indicators" => Some(FeatureMode::Engineered),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FeatureMode::Ohlcv => "ohlcv",
            FeatureMode::Engineered => "engineered",
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            FeatureMode::Ohlcv => 5,
            FeatureMode::Engineered => 6,
        }
    }

    /// Build the feature table for a bar window
    pub fn table(&self, bars: &[Bar], engine: &IndicatorEngine) -> FeatureTable {
        match self {
            FeatureMode::Ohlcv => ohlcv_table(bars),
            FeatureMode::Engineered => engineered_table(bars, engine),
        }
    }
}

impl std::fmt::Display for FeatureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature rows with the close of the bar each row belongs to
#[derive(Debug, Clone)]
pub struct FeatureTable {
    pub rows: Array2<f64>,
    pub closes: Vec<f64>,
    pub timestamps: Vec<i64>,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}

fn ohlcv_table(bars: &[Bar]) -> FeatureTable {
    let rows = Array2::from_shape_fn((bars.len(), 5), |(i, j)| {
        let b = &bars[i];
        match j {
            0 => b.open,
            1 => b.high,
            2 => b.low,
            3 => b.close,
            _ => b.volume,
        }
    });
    FeatureTable {
        rows,
        closes: bars.iter().map(|b| b.close).collect(),
        timestamps: bars.iter().map(|b| b.timestamp).collect(),
    }
}

fn engineered_table(bars: &[Bar], engine: &IndicatorEngine) -> FeatureTable {
    let feature_rows = engine.compute_all(bars);
    let mut flat = Vec::with_capacity(feature_rows.len() * 6);
    let mut closes = Vec::with_capacity(feature_rows.len());
    let mut timestamps = Vec::with_capacity(feature_rows.len());

    for (i, row) in feature_rows.iter().enumerate().skip(1) {
        let (Some(rsi), Some(s20), Some(s50), Some(atr), Some(vr)) =
            (row.rsi, row.sma20, row.sma50, row.atr, row.volume_ratio)
        else {
            continue;
        };
        let prev = bars[i - 1].close;
        if row.close <= 0.0 || s20 <= 0.0 || s50 <= 0.0 || prev <= 0.0 {
            continue;
        }
        flat.extend_from_slice(&[
            rsi / 100.0,
            row.close / s20 - 1.0,
            row.close / s50 - 1.0,
            atr / row.close,
            vr,
            row.close / prev - 1.0,
        ]);
        closes.push(row.close);
        timestamps.push(row.timestamp);
    }

    let rows = Array2::from_shape_vec((closes.len(), 6), flat)
        .unwrap_or_else(|_| Array2::zeros((0, 6)));
    FeatureTable {
        rows,
        closes,
        timestamps,
    }
}

/// Windows of `lookback` rows with their up/down labels
#[derive(Debug, Clone, Default)]
pub struct SequenceSet {
    pub sequences: Vec<Array2<f64>>,
    pub labels: Vec<f64>,
    /// Row index of the last bar in each window
    pub end_rows: Vec<usize>,
}

impl SequenceSet {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn positive_rate(&self) -> f64 {
        if self.labels.is_empty() {
            return 0.0;
        }
        self.labels.iter().sum::<f64>() / self.labels.len() as f64
    }
}

/// Label for the window ending at `t`: 1 when close[t + horizon] > close[t]
pub fn label_at(closes: &[f64], t: usize, horizon: usize) -> Option<f64> {
    let future = closes.get(t + horizon)?;
    let now = closes.get(t)?;
    Some(if future > now { 1.0 } else { 0.0 })
}

/// Labelled windows whose end row lies in `ends`
pub fn build_windows(
    rows: ArrayView2<'_, f64>,
    closes: &[f64],
    lookback: usize,
    horizon: usize,
    ends: std::ops::Range<usize>,
) -> SequenceSet {
    let mut set = SequenceSet::default();
    if lookback == 0 {
        return set;
    }
    for t in ends {
        if t + 1 < lookback || t >= rows.nrows() {
            continue;
        }
        let Some(label) = label_at(closes, t, horizon) else {
            continue;
        };
        set.sequences
            .push(rows.slice(s![t + 1 - lookback..=t, ..]).to_owned());
        set.labels.push(label);
        set.end_rows.push(t);
    }
    set
}

/// First end row of the validation block.
///
/// Windows are indexed by their end row `t` in `[max_lookback - 1, n_rows - 1 - horizon]`.
/// The last `validation_split` share of them is held out; every ensemble member
/// uses the same cut so their validation predictions line up.
pub fn split_point(
    n_rows: usize,
    max_lookback: usize,
    horizon: usize,
    validation_split: f64,
) -> Result<usize, ModelError> {
    let first_end = max_lookback.saturating_sub(1);
    let needed = max_lookback + horizon + 10;
    if n_rows < needed {
        return Err(ModelError::NotEnoughData {
            needed,
            got: n_rows,
        });
    }
    let last_end = n_rows - 1 - horizon;
    let n_windows = last_end - first_end + 1;
    let n_valid = ((n_windows as f64) * validation_split).round() as usize;
    let n_valid = n_valid.clamp(1, n_windows - 1);
    Ok(last_end + 1 - n_valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::IndicatorConfig;

    fn trending_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 + if i % 3 == 0 { -1.5 } else { 0.5 };
                Bar::new(i as i64 * 60_000, c - 0.2, c + 1.0, c - 1.0, c, 100.0 + (i % 7) as f64)
            })
            .collect()
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(FeatureMode::from_str("OHLCV"), Some(FeatureMode::Ohlcv));
        assert_eq!(FeatureMode::from_str("engineered"), Some(FeatureMode::Engineered));
        assert_eq!(FeatureMode::from_str("lstm"), None);
    }

    #[test]
    fn test_ohlcv_table_shape() {
        let bars = trending_bars(20);
        let table = FeatureMode::Ohlcv.table(&bars, &IndicatorEngine::default());
        assert_eq!(table.rows.dim(), (20, 5));
        assert_eq!(table.rows[[4, 3]], bars[4].close);
        assert_eq!(table.closes.len(), 20);
    }

    #[test]
    fn test_engineered_table_drops_warmup() {
        let bars = trending_bars(120);
        let engine = IndicatorEngine::new(IndicatorConfig::default());
        let table = FeatureMode::Engineered.table(&bars, &engine);
        assert!(!table.is_empty());
        assert!(table.len() < bars.len());
        assert_eq!(table.rows.ncols(), 6);
        // rsi / 100 stays in [0, 1]
        assert!(table.rows.column(0).iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_windows_and_labels() {
        let rows = Array2::from_shape_fn((6, 1), |(i, _)| i as f64);
        let closes = vec![1.0, 2.0, 1.5, 3.0, 3.0, 4.0];
        let set = build_windows(rows.view(), &closes, 3, 1, 0..6);
        // ends 2, 3, 4 have a next bar; end 5 does not
        assert_eq!(set.end_rows, vec![2, 3, 4]);
        assert_eq!(set.labels, vec![1.0, 0.0, 1.0]);
        assert_eq!(set.sequences[0].column(0).to_vec(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn test_split_point_holds_out_tail() {
        // windows end in [59, 498] -> 440 windows, 88 held out
        let cut = split_point(500, 60, 1, 0.2).unwrap();
        assert_eq!(cut, 499 - 88);
        assert!(matches!(
            split_point(50, 60, 1, 0.2),
            Err(ModelError::NotEnoughData { .. })
        ));
    }
}
