//! Single-lookback LSTM predictor

use ndarray::{s, ArrayView2};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::dataset::{build_windows, split_point};
use super::lstm::{bce, LstmNetwork};
use super::optimizer::Adam;
use super::scaler::MinMaxScaler;
use super::{ModelError, TrainingConfig, NEUTRAL_CONFIDENCE};

/// Result of one training run of a predictor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainReport {
    pub lookback: usize,
    pub epochs: usize,
    pub fine_tuned: bool,
    pub train_samples: usize,
    pub val_samples: usize,
    pub train_loss: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    /// P(up) for every validation window, in end-row order
    #[serde(skip)]
    pub val_predictions: Vec<f64>,
    #[serde(skip)]
    pub val_labels: Vec<f64>,
    #[serde(skip)]
    pub val_end_rows: Vec<usize>,
}

/// LSTM classifier over windows of `lookback` rows, with its own scaler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmPredictor {
    pub lookback: usize,
    pub scaler: Option<MinMaxScaler>,
    pub network: Option<LstmNetwork>,
}

impl LstmPredictor {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback,
            scaler: None,
            network: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.scaler.is_some() && self.network.is_some()
    }

    /// Train (or fine-tune) holding out the last `validation_split` of windows
    pub fn train(
        &mut self,
        rows: ArrayView2<'_, f64>,
        closes: &[f64],
        epochs: usize,
        cfg: &TrainingConfig,
    ) -> Result<TrainReport, ModelError> {
        let cut = split_point(rows.nrows(), self.lookback, cfg.horizon, cfg.validation_split)?;
        self.train_until(rows, closes, cut, epochs, cfg)
    }

    /// Train on windows ending before row `cut`; validate on the rest.
    ///
    /// The scaler is fit on rows `[0, cut)` only. The predictor is left untouched
    /// when training fails.
    pub fn train_until(
        &mut self,
        rows: ArrayView2<'_, f64>,
        closes: &[f64],
        cut: usize,
        epochs: usize,
        cfg: &TrainingConfig,
    ) -> Result<TrainReport, ModelError> {
        if rows.nrows() != closes.len() {
            return Err(ModelError::ShapeMismatch {
                expected: rows.nrows(),
                got: closes.len(),
            });
        }
        if cut < self.lookback || cut >= rows.nrows() {
            return Err(ModelError::NotEnoughData {
                needed: self.lookback + 1,
                got: cut,
            });
        }

        let scaler = MinMaxScaler::fit(rows.slice(s![..cut, ..]))?;
        let scaled = scaler.transform(rows)?;
        let train_set = build_windows(scaled.view(), closes, self.lookback, cfg.horizon, 0..cut);
        let val_set = build_windows(
            scaled.view(),
            closes,
            self.lookback,
            cfg.horizon,
            cut..rows.nrows(),
        );
        if train_set.is_empty() || val_set.is_empty() {
            return Err(ModelError::NotEnoughData {
                needed: self.lookback + cfg.horizon + 2,
                got: rows.nrows(),
            });
        }

        let n_features = rows.ncols();
        let mut rng = StdRng::seed_from_u64(cfg.network.seed.wrapping_add(self.lookback as u64));
        let (mut network, fine_tuned) = match &self.network {
            Some(existing) if existing.matches(n_features, &cfg.network) => (existing.clone(), true),
            _ => (LstmNetwork::new(n_features, &cfg.network, &mut rng), false),
        };
        network.dropout = cfg.network.dropout;
        debug!(
            lookback = self.lookback,
            parameters = network.parameter_count(),
            fine_tuned,
            "LSTM network ready"
        );

        let mut adam = Adam::new(cfg.network.learning_rate);
        let mut train_loss = f64::NAN;
        for epoch in 0..epochs.max(1) {
            train_loss = network.train_epoch(
                &train_set.sequences,
                &train_set.labels,
                cfg.network.batch_size,
                cfg.network.grad_clip,
                &mut adam,
                &mut rng,
            )?;
            debug!(
                lookback = self.lookback,
                epoch = epoch + 1,
                loss = train_loss,
                "LSTM epoch"
            );
        }

        let val_predictions: Vec<f64> = val_set
            .sequences
            .iter()
            .map(|seq| network.predict(seq.view()))
            .collect();
        let correct = val_predictions
            .iter()
            .zip(&val_set.labels)
            .filter(|(p, y)| (**p > 0.5) == (**y > 0.5))
            .count();
        let val_loss = val_predictions
            .iter()
            .zip(&val_set.labels)
            .map(|(p, y)| bce(*p, *y))
            .sum::<f64>()
            / val_set.len() as f64;
        if !val_loss.is_finite() {
            return Err(ModelError::Diverged);
        }

        self.scaler = Some(scaler);
        self.network = Some(network);

        Ok(TrainReport {
            lookback: self.lookback,
            epochs: epochs.max(1),
            fine_tuned,
            train_samples: train_set.len(),
            val_samples: val_set.len(),
            train_loss,
            val_loss,
            val_accuracy: correct as f64 / val_set.len() as f64,
            val_predictions,
            val_labels: val_set.labels,
            val_end_rows: val_set.end_rows,
        })
    }

    /// P(up) for the window ending at the last row; neutral when it cannot be computed
    pub fn predict_proba(&self, rows: ArrayView2<'_, f64>) -> f64 {
        let (Some(scaler), Some(network)) = (&self.scaler, &self.network) else {
            return NEUTRAL_CONFIDENCE;
        };
        if self.lookback == 0 || rows.nrows() < self.lookback {
            return NEUTRAL_CONFIDENCE;
        }
        let window = rows.slice(s![rows.nrows() - self.lookback.., ..]);
        match scaler.transform(window) {
            Ok(scaled) => {
                let p = network.predict(scaled.view());
                if p.is_finite() {
                    p
                } else {
                    NEUTRAL_CONFIDENCE
                }
            }
            Err(_) => NEUTRAL_CONFIDENCE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml_engine::NetworkConfig;
    use ndarray::Array2;

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            lookbacks: vec![8],
            epochs: 2,
            network: NetworkConfig {
                hidden1: 4,
                hidden2: 3,
                dense_units: 2,
                dropout: 0.1,
                batch_size: 16,
                ..NetworkConfig::default()
            },
            ..TrainingConfig::default()
        }
    }

    fn zigzag(n: usize) -> (Array2<f64>, Vec<f64>) {
        let closes: Vec<f64> = (0..n)
            .map(|i| 100.0 + (i as f64 * 0.7).sin() * 5.0 + i as f64 * 0.05)
            .collect();
        let rows = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { closes[i] } else { 1.0 + (i % 5) as f64 });
        (rows, closes)
    }

    #[test]
    fn test_untrained_is_neutral() {
        let p = LstmPredictor::new(8);
        let (rows, _) = zigzag(20);
        assert_eq!(p.predict_proba(rows.view()), NEUTRAL_CONFIDENCE);
    }

    #[test]
    fn test_train_and_predict() {
        let cfg = small_config();
        let (rows, closes) = zigzag(120);
        let mut p = LstmPredictor::new(8);
        let report = p.train(rows.view(), &closes, 2, &cfg).unwrap();

        assert!(p.is_trained());
        assert!(!report.fine_tuned);
        assert!(report.train_samples > report.val_samples);
        assert_eq!(report.val_predictions.len(), report.val_samples);
        assert!((0.0..=1.0).contains(&report.val_accuracy));

        let prob = p.predict_proba(rows.view());
        assert!(prob > 0.0 && prob < 1.0);
        // Too short for the window
        assert_eq!(p.predict_proba(rows.slice(s![..5, ..])), NEUTRAL_CONFIDENCE);
    }

    #[test]
    fn test_second_run_fine_tunes() {
        let cfg = small_config();
        let (rows, closes) = zigzag(120);
        let mut p = LstmPredictor::new(8);
        p.train(rows.view(), &closes, 1, &cfg).unwrap();
        let report = p.train(rows.view(), &closes, 1, &cfg).unwrap();
        assert!(report.fine_tuned);
    }

    #[test]
    fn test_failed_training_keeps_previous_state() {
        let cfg = small_config();
        let (rows, closes) = zigzag(120);
        let mut p = LstmPredictor::new(8);
        p.train(rows.view(), &closes, 1, &cfg).unwrap();
        let before = p.clone();
        let err = p.train(rows.slice(s![..10, ..]), &closes[..10], 1, &cfg);
        assert!(err.is_err());
        assert_eq!(p, before);
    }
}
