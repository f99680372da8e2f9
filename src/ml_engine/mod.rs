//! ML Engine - LSTM confidence model
//!
//! This module implements:
//! - Min-max feature scaling fit on training data only
//! - A two-layer LSTM binary classifier trained with BPTT + Adam
//! - Multi-lookback ensemble with a logistic meta-learner
//! - Artifact persistence and the retraining pipeline
//!
//! The model answers one question: P(close[t + horizon] > close[t]).

pub mod dataset;
pub mod ensemble;
pub mod lstm;
pub mod optimizer;
pub mod persistence;
pub mod predictor;
pub mod scaler;
pub mod training;

pub use dataset::{FeatureMode, SequenceSet};
pub use ensemble::{LstmEnsemble, MetaLearner};
pub use lstm::LstmNetwork;
pub use persistence::{ModelArtifact, ModelStore, TrainingRecord};
pub use predictor::{LstmPredictor, TrainReport};
pub use scaler::MinMaxScaler;
pub use training::{TrainOutcome, TrainingPipeline};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AppConfig;

/// Probability returned when no usable model exists
pub const NEUTRAL_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("not enough data: need {needed} rows, got {got}")]
    NotEnoughData { needed: usize, got: usize },
    #[error("model is not trained")]
    NotTrained,
    #[error("feature width mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },
    #[error("training diverged (loss is not finite)")]
    Diverged,
    #[error("validation accuracy {accuracy:.3} below floor {floor:.3}")]
    BelowAccuracyFloor { accuracy: f64, floor: f64 },
    #[error("artifact error: {0}")]
    Artifact(String),
}

/// Network shape and optimiser settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub hidden1: usize,
    pub hidden2: usize,
    pub dense_units: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub grad_clip: f64,
    pub seed: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden1: 64,
            hidden2: 32,
            dense_units: 16,
            dropout: 0.3,
            learning_rate: 0.001,
            batch_size: 32,
            grad_clip: 1.0,
            seed: 42,
        }
    }
}

/// Everything the training pipeline needs to build and accept a model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    pub feature_mode: FeatureMode,
    pub lookbacks: Vec<usize>,
    pub epochs: usize,
    pub finetune_epochs: usize,
    pub horizon: usize,
    pub train_fetch_bars: usize,
    pub min_train_bars: usize,
    pub validation_split: f64,
    pub accuracy_floor: f64,
    pub max_model_age_secs: u64,
    pub network: NetworkConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            feature_mode: FeatureMode::Ohlcv,
            lookbacks: vec![60, 90],
            epochs: 5,
            finetune_epochs: 2,
            horizon: 1,
            train_fetch_bars: 500,
            min_train_bars: 400,
            validation_split: 0.2,
            accuracy_floor: 0.52,
            max_model_age_secs: 86_400,
            network: NetworkConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        let m = &cfg.model;
        Self {
            feature_mode: FeatureMode::from_str(&m.feature_mode).unwrap_or(FeatureMode::Ohlcv),
            lookbacks: m.lookbacks.clone(),
            epochs: m.epochs,
            finetune_epochs: m.finetune_epochs,
            horizon: m.horizon,
            train_fetch_bars: m.train_fetch_bars,
            min_train_bars: m.min_train_bars,
            validation_split: m.validation_split,
            accuracy_floor: m.accuracy_floor,
            max_model_age_secs: m.max_model_age_secs,
            network: NetworkConfig {
                hidden1: m.hidden1,
                hidden2: m.hidden2,
                dense_units: m.dense_units,
                dropout: m.dropout,
                learning_rate: m.learning_rate,
                batch_size: m.batch_size,
                grad_clip: m.grad_clip,
                seed: m.seed,
            },
        }
    }

    /// Same architecture and inputs; a saved model can be fine-tuned
    pub fn compatible_with(&self, other: &TrainingConfig) -> bool {
        self.feature_mode == other.feature_mode
            && self.lookbacks == other.lookbacks
            && self.horizon == other.horizon
            && self.network.hidden1 == other.network.hidden1
            && self.network.hidden2 == other.network.hidden2
            && self.network.dense_units == other.network.dense_units
    }
}
