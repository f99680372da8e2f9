//! Multi-lookback LSTM ensemble with a logistic meta-learner

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use smartcore::linalg::basic::arrays::Array;
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::logistic_regression::{LogisticRegression, LogisticRegressionParameters};
use tracing::{debug, warn};

use super::dataset::{split_point, FeatureMode, FeatureTable};
use super::predictor::{LstmPredictor, TrainReport};
use super::{ModelError, TrainingConfig, NEUTRAL_CONFIDENCE};
use crate::features::IndicatorEngine;
use crate::types::Bar;

/// Logistic regression over member probabilities.
///
/// Fit with smartcore; only the coefficients are kept so the artifact stays plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaLearner {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Accuracy on the samples it was fit on
    pub fit_accuracy: f64,
    /// Accuracy on validation samples held out of the fit
    #[serde(default)]
    pub holdout_accuracy: f64,
}

impl MetaLearner {
    pub const MIN_SAMPLES: usize = 20;

    /// `None` when there are too few samples, only one class, or the solver fails
    pub fn fit(features: &[Vec<f64>], labels: &[f64]) -> Option<Self> {
        let n = labels.len();
        if n < Self::MIN_SAMPLES || features.len() != n {
            return None;
        }
        let width = features.first().map(|r| r.len()).unwrap_or(0);
        if width == 0 || features.iter().any(|r| r.len() != width) {
            return None;
        }
        let positives = labels.iter().filter(|y| **y > 0.5).count();
        if positives == 0 || positives == n {
            debug!("Meta-learner skipped: single class");
            return None;
        }

        let slices: Vec<&[f64]> = features.iter().map(|r| r.as_slice()).collect();
        let x = DenseMatrix::from_2d_array(&slices).ok()?;
        let y: Vec<i64> = labels.iter().map(|v| if *v > 0.5 { 1 } else { 0 }).collect();

        let model: LogisticRegression<f64, i64, DenseMatrix<f64>, Vec<i64>> =
            match LogisticRegression::fit(&x, &y, LogisticRegressionParameters::default()) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = ?e, "Meta-learner fit failed");
                    return None;
                }
            };

        let coef = model.coefficients();
        let (r, c) = coef.shape();
        let mut coefficients = Vec::with_capacity(r * c);
        for i in 0..r {
            for j in 0..c {
                coefficients.push(*coef.get((i, j)));
            }
        }
        if coefficients.len() != width || coefficients.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let intercept = *model.intercept().get((0, 0));
        if !intercept.is_finite() {
            return None;
        }

        let mut meta = Self {
            coefficients,
            intercept,
            fit_accuracy: 0.0,
            holdout_accuracy: 0.0,
        };
        meta.fit_accuracy = accuracy(features.iter().map(|r| meta.predict(r)), labels);
        Some(meta)
    }

    pub fn predict(&self, probs: &[f64]) -> f64 {
        let z: f64 = self.intercept
            + self
                .coefficients
                .iter()
                .zip(probs)
                .map(|(w, p)| w * p)
                .sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return NEUTRAL_CONFIDENCE;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn accuracy(preds: impl Iterator<Item = f64>, labels: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = preds
        .zip(labels)
        .filter(|(p, y)| (*p > 0.5) == (**y > 0.5))
        .count();
    correct as f64 / labels.len() as f64
}

/// Share of the stacked validation block the meta-learner is fit on; the tail scores it
pub const META_FIT_FRACTION: f64 = 0.6;

/// How member outputs get combined, with an accuracy measured on unseen samples
#[derive(Debug, Clone)]
pub struct Combiner {
    pub meta: Option<MetaLearner>,
    pub accuracy: f64,
}

/// Fit the meta-learner on the head of the validation block and keep it only when it
/// beats the plain mean on the held-out tail. The reported accuracy is that tail score
/// for the meta-learner, or the mean's accuracy over the whole block otherwise.
pub fn select_combiner(stacked: &[Vec<f64>], labels: &[f64]) -> Combiner {
    let n = labels.len().min(stacked.len());
    let (stacked, labels) = (&stacked[..n], &labels[..n]);
    let mean_only = Combiner {
        meta: None,
        accuracy: accuracy(stacked.iter().map(|row| mean(row)), labels),
    };

    let fit_len = (n as f64 * META_FIT_FRACTION).floor() as usize;
    if fit_len < MetaLearner::MIN_SAMPLES || fit_len >= n {
        return mean_only;
    }
    let (fit_x, held_x) = stacked.split_at(fit_len);
    let (fit_y, held_y) = labels.split_at(fit_len);
    let Some(mut meta) = MetaLearner::fit(fit_x, fit_y) else {
        return mean_only;
    };

    meta.holdout_accuracy = accuracy(held_x.iter().map(|row| meta.predict(row)), held_y);
    let mean_holdout = accuracy(held_x.iter().map(|row| mean(row)), held_y);
    debug!(
        meta_fit = meta.fit_accuracy,
        meta_holdout = meta.holdout_accuracy,
        mean_holdout,
        "Meta-learner scored"
    );
    if meta.holdout_accuracy > mean_holdout {
        Combiner {
            accuracy: meta.holdout_accuracy,
            meta: Some(meta),
        }
    } else {
        mean_only
    }
}

/// Outcome of training every member plus the meta-learner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleReport {
    pub members: Vec<TrainReport>,
    pub val_samples: usize,
    pub val_accuracy: f64,
    pub used_meta: bool,
    pub fine_tuned: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LstmEnsemble {
    pub feature_mode: FeatureMode,
    pub horizon: usize,
    pub members: Vec<LstmPredictor>,
    pub meta: Option<MetaLearner>,
}

impl LstmEnsemble {
    pub fn new(feature_mode: FeatureMode, lookbacks: &[usize], horizon: usize) -> Self {
        Self {
            feature_mode,
            horizon,
            members: lookbacks.iter().map(|&lb| LstmPredictor::new(lb)).collect(),
            meta: None,
        }
    }

    pub fn from_config(cfg: &TrainingConfig) -> Self {
        Self::new(cfg.feature_mode, &cfg.lookbacks, cfg.horizon)
    }

    pub fn lookbacks(&self) -> Vec<usize> {
        self.members.iter().map(|m| m.lookback).collect()
    }

    pub fn max_lookback(&self) -> usize {
        self.members.iter().map(|m| m.lookback).max().unwrap_or(0)
    }

    pub fn is_trained(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.is_trained())
    }

    /// Combine member probabilities: meta-learner when available, otherwise the mean
    pub fn combine(&self, probs: &[f64]) -> f64 {
        match &self.meta {
            Some(meta) if meta.coefficients.len() == probs.len() => meta.predict(probs),
            _ => mean(probs),
        }
    }

    /// P(up) for the window ending at the last row of `rows`
    pub fn predict_proba(&self, rows: ArrayView2<'_, f64>) -> f64 {
        if !self.is_trained() || rows.nrows() < self.max_lookback() {
            return NEUTRAL_CONFIDENCE;
        }
        let probs: Vec<f64> = self.members.iter().map(|m| m.predict_proba(rows)).collect();
        let p = self.combine(&probs);
        if p.is_finite() {
            p.clamp(0.0, 1.0)
        } else {
            NEUTRAL_CONFIDENCE
        }
    }

    /// P(up) for the latest bar of a live window
    pub fn predict_bars(&self, bars: &[Bar], engine: &IndicatorEngine) -> f64 {
        let table = self.feature_mode.table(bars, engine);
        self.predict_proba(table.rows.view())
    }

    /// Train every member on the same chronological cut, then fit the meta-learner on
    /// their validation predictions. `self` is only replaced when everything succeeds.
    pub fn train(
        &mut self,
        table: &FeatureTable,
        epochs: usize,
        cfg: &TrainingConfig,
    ) -> Result<EnsembleReport, ModelError> {
        if self.members.is_empty() {
            return Err(ModelError::NotTrained);
        }
        let cut = split_point(
            table.len(),
            self.max_lookback(),
            self.horizon,
            cfg.validation_split,
        )?;

        let mut members = self.members.clone();
        let mut reports = Vec::with_capacity(members.len());
        for member in members.iter_mut() {
            let report = member.train_until(table.rows.view(), &table.closes, cut, epochs, cfg)?;
            debug!(
                lookback = member.lookback,
                val_accuracy = report.val_accuracy,
                fine_tuned = report.fine_tuned,
                "Member trained"
            );
            reports.push(report);
        }

        let n_val = reports.iter().map(|r| r.val_predictions.len()).min().unwrap_or(0);
        let labels: Vec<f64> = reports[0].val_labels.iter().take(n_val).copied().collect();
        let stacked: Vec<Vec<f64>> = (0..n_val)
            .map(|k| reports.iter().map(|r| r.val_predictions[k]).collect())
            .collect();

        let Combiner {
            meta,
            accuracy: val_accuracy,
        } = select_combiner(&stacked, &labels);

        let fine_tuned = reports.iter().all(|r| r.fine_tuned);
        self.members = members;
        self.meta = meta;

        Ok(EnsembleReport {
            members: reports,
            val_samples: n_val,
            val_accuracy,
            used_meta: self.meta.is_some(),
            fine_tuned,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml_engine::NetworkConfig;
    use ndarray::Array2;

    #[test]
    fn test_meta_learner_separates_classes() {
        let mut features = Vec::new();
        let mut labels = Vec::new();
        for i in 0..60 {
            let p = (i as f64 + 0.5) / 60.0;
            features.push(vec![p, ((i * 7) % 10) as f64 / 10.0]);
            // a few flipped labels keep the data non-separable
            let up = (p > 0.5) ^ (i % 13 == 0);
            labels.push(if up { 1.0 } else { 0.0 });
        }
        let meta = MetaLearner::fit(&features, &labels).expect("meta fit");
        assert_eq!(meta.coefficients.len(), 2);
        assert!(meta.predict(&[0.95, 0.5]) > 0.5);
        assert!(meta.predict(&[0.05, 0.5]) < 0.5);
        assert!(meta.fit_accuracy > 0.8);
    }

    #[test]
    fn test_meta_learner_single_class_or_few_samples() {
        let features = vec![vec![0.6, 0.7]; 30];
        assert!(MetaLearner::fit(&features, &vec![1.0; 30]).is_none());
        assert!(MetaLearner::fit(&features[..5], &[1.0, 0.0, 1.0, 0.0, 1.0]).is_none());
    }

    #[test]
    fn test_noise_labels_do_not_inflate_accuracy() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(17);
        let n = 200;
        let stacked: Vec<Vec<f64>> = (0..n)
            .map(|_| vec![rng.gen_range(0.0..1.0), rng.gen_range(0.0..1.0)])
            .collect();
        let labels: Vec<f64> = (0..n).map(|_| if rng.gen_bool(0.5) { 1.0 } else { 0.0 }).collect();

        let combiner = select_combiner(&stacked, &labels);
        assert!(combiner.accuracy < 0.7, "accuracy {}", combiner.accuracy);

        if let Some(meta) = &combiner.meta {
            let fit_len = (n as f64 * META_FIT_FRACTION).floor() as usize;
            let tail = accuracy(
                stacked[fit_len..].iter().map(|row| meta.predict(row)),
                &labels[fit_len..],
            );
            assert_eq!(combiner.accuracy, meta.holdout_accuracy);
            assert!((tail - meta.holdout_accuracy).abs() < 1e-12);
        }
    }

    #[test]
    fn test_meta_dropped_when_tail_disagrees() {
        // Head: low first-member output means up. Tail: the relation flips back.
        let n = 100;
        let fit_len = (n as f64 * META_FIT_FRACTION).floor() as usize;
        let mut stacked = Vec::new();
        let mut labels = Vec::new();
        for i in 0..n {
            let p = ((i * 37) % 100) as f64 / 100.0 + 0.005;
            stacked.push(vec![p, ((i * 7) % 10) as f64 / 10.0]);
            let up = (if i < fit_len { p < 0.5 } else { p > 0.5 }) ^ (i % 11 == 0);
            labels.push(if up { 1.0 } else { 0.0 });
        }

        let combiner = select_combiner(&stacked, &labels);
        assert!(combiner.meta.is_none());
        let mean_accuracy = accuracy(stacked.iter().map(|row| mean(row)), &labels);
        assert!((combiner.accuracy - mean_accuracy).abs() < 1e-12);
    }

    #[test]
    fn test_small_block_uses_mean() {
        let stacked = vec![vec![0.8, 0.6], vec![0.2, 0.4], vec![0.7, 0.1]];
        let combiner = select_combiner(&stacked, &[1.0, 0.0, 1.0]);
        assert!(combiner.meta.is_none());
        assert!((combiner.accuracy - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_combine_falls_back_to_mean() {
        let ens = LstmEnsemble::new(FeatureMode::Ohlcv, &[60, 90], 1);
        assert!((ens.combine(&[0.8, 0.6]) - 0.7).abs() < 1e-12);
        assert_eq!(ens.combine(&[]), NEUTRAL_CONFIDENCE);
    }

    #[test]
    fn test_untrained_ensemble_is_neutral() {
        let ens = LstmEnsemble::new(FeatureMode::Ohlcv, &[5], 1);
        let rows = Array2::zeros((10, 5));
        assert_eq!(ens.predict_proba(rows.view()), NEUTRAL_CONFIDENCE);
    }

    #[test]
    fn test_train_two_members() {
        let n = 140;
        let closes: Vec<f64> = (0..n).map(|i| 50.0 + (i as f64 * 0.45).sin() * 3.0).collect();
        let table = FeatureTable {
            rows: Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { closes[i] } else { (i % 4) as f64 }),
            closes: closes.clone(),
            timestamps: (0..n as i64).collect(),
        };
        let cfg = TrainingConfig {
            lookbacks: vec![6, 10],
            network: NetworkConfig {
                hidden1: 4,
                hidden2: 3,
                dense_units: 2,
                dropout: 0.0,
                batch_size: 16,
                ..NetworkConfig::default()
            },
            ..TrainingConfig::default()
        };
        let mut ens = LstmEnsemble::from_config(&cfg);
        let report = ens.train(&table, 2, &cfg).unwrap();

        assert_eq!(report.members.len(), 2);
        assert_eq!(report.members[0].val_samples, report.members[1].val_samples);
        assert!(ens.is_trained());
        let p = ens.predict_proba(table.rows.view());
        assert!((0.0..=1.0).contains(&p));
    }
}
