//! Training pipeline - fetch, train or fine-tune, gate on accuracy, persist

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::ensemble::{EnsembleReport, LstmEnsemble};
use super::persistence::{ModelArtifact, ModelStore, TrainingRecord};
use super::{ModelError, TrainingConfig};
use crate::config::AppConfig;
use crate::features::{IndicatorConfig, IndicatorEngine};
use crate::market::MarketData;

#[derive(Debug)]
pub enum TrainOutcome {
    /// New model passed the accuracy floor and was saved
    Accepted(Box<ModelArtifact>),
    /// Model trained but was below the floor; the previous one stays
    Rejected { val_accuracy: f64, floor: f64 },
}

impl TrainOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, TrainOutcome::Accepted(_))
    }
}

pub struct TrainingPipeline {
    market: Arc<MarketData>,
    engine: IndicatorEngine,
    store: ModelStore,
    config: TrainingConfig,
}

impl TrainingPipeline {
    pub fn new(
        market: Arc<MarketData>,
        engine: IndicatorEngine,
        store: ModelStore,
        config: TrainingConfig,
    ) -> Self {
        Self {
            market,
            engine,
            store,
            config,
        }
    }

    pub fn from_app(app: &AppConfig, market: Arc<MarketData>) -> Self {
        Self::new(
            market,
            IndicatorEngine::new(IndicatorConfig::from_app(app)),
            ModelStore::new(&app.model.weights_dir),
            TrainingConfig::from_app(app),
        )
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn store(&self) -> &ModelStore {
        &self.store
    }

    pub fn engine(&self) -> &IndicatorEngine {
        &self.engine
    }

    /// True when there is no usable model for the current configuration
    pub fn needs_training(&self, artifact: Option<&ModelArtifact>) -> bool {
        match artifact {
            None => true,
            Some(a) => {
                !a.config.compatible_with(&self.config)
                    || !a.ensemble.is_trained()
                    || a.is_stale(self.config.max_model_age_secs, Utc::now())
            }
        }
    }

    /// Artifacts on disk that match the current configuration
    pub fn load_models(&self, symbols: &[String]) -> HashMap<String, ModelArtifact> {
        symbols
            .iter()
            .filter_map(|s| {
                let artifact = self.store.load(s)?;
                if !artifact.config.compatible_with(&self.config) {
                    warn!(symbol = %s, "Saved model has a different layout, ignoring");
                    return None;
                }
                Some((s.clone(), artifact))
            })
            .collect()
    }

    /// Train one symbol. A compatible saved model is fine-tuned, otherwise a fresh
    /// ensemble is trained. Errors leave whatever model the caller holds untouched.
    pub async fn train_symbol(&self, symbol: &str) -> Result<TrainOutcome> {
        let bars = self
            .market
            .fetch_bars(symbol, self.config.train_fetch_bars)
            .await
            .with_context(|| format!("fetch training bars for {symbol}"))?;
        if bars.len() < self.config.min_train_bars {
            return Err(ModelError::NotEnoughData {
                needed: self.config.min_train_bars,
                got: bars.len(),
            }
            .into());
        }

        let previous = self
            .store
            .load(symbol)
            .filter(|a| a.config.compatible_with(&self.config) && a.ensemble.is_trained());
        let (mut ensemble, epochs) = match previous {
            Some(a) => (a.ensemble, self.config.finetune_epochs),
            None => (LstmEnsemble::from_config(&self.config), self.config.epochs),
        };

        let config = self.config.clone();
        let engine = self.engine.clone();
        let (ensemble, report, rows) = tokio::task::spawn_blocking(
            move || -> Result<(LstmEnsemble, EnsembleReport, usize), ModelError> {
                let table = config.feature_mode.table(&bars, &engine);
                let report = ensemble.train(&table, epochs, &config)?;
                Ok((ensemble, report, table.len()))
            },
        )
        .await
        .context("training task panicked")??;

        let floor = self.config.accuracy_floor;
        if report.val_accuracy < floor {
            warn!(
                %symbol,
                val_accuracy = report.val_accuracy,
                floor,
                "Model rejected below accuracy floor"
            );
            self.record(symbol, &report, false, Some("below accuracy floor"));
            return Ok(TrainOutcome::Rejected {
                val_accuracy: report.val_accuracy,
                floor,
            });
        }

        let artifact = ModelArtifact::new(symbol, self.config.clone(), ensemble, &report, rows);
        let store = self.store.clone();
        let sym = symbol.to_string();
        let artifact = tokio::task::spawn_blocking(move || {
            store.save(&sym, &artifact).map(|_| artifact)
        })
        .await
        .context("save task panicked")??;

        self.record(symbol, &report, true, None);
        info!(
            %symbol,
            val_accuracy = report.val_accuracy,
            val_samples = report.val_samples,
            fine_tuned = report.fine_tuned,
            meta = report.used_meta,
            "🧠 Model accepted"
        );
        Ok(TrainOutcome::Accepted(Box::new(artifact)))
    }

    fn record(&self, symbol: &str, report: &EnsembleReport, accepted: bool, reason: Option<&str>) {
        let record = TrainingRecord {
            timestamp: Utc::now().timestamp_millis(),
            symbol: symbol.to_string(),
            accepted,
            fine_tuned: report.fine_tuned,
            val_accuracy: report.val_accuracy,
            val_samples: report.val_samples,
            used_meta: report.used_meta,
            reason: reason.map(str::to_string),
        };
        if let Err(e) = self.store.append_history(record) {
            warn!(%symbol, error = %e, "Failed to append training history");
        }
    }
}
