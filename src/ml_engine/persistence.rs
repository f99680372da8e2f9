//! ML Persistence - model artifacts and training history on disk
//!
//! One JSON artifact per symbol under `<dir>/<SYMBOLCLEAN>.json`, written atomically
//! with a single `.bak` of the previous version.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::ensemble::{EnsembleReport, LstmEnsemble};
use super::TrainingConfig;
use crate::types::clean_symbol;

pub const ARTIFACT_VERSION: u32 = 1;
pub const HISTORY_FILE: &str = "training_history.json";
pub const MAX_HISTORY: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetrics {
    pub val_accuracy: f64,
    pub val_samples: usize,
    pub member_accuracy: Vec<f64>,
    pub used_meta: bool,
    pub train_rows: usize,
}

/// Everything needed to restore a symbol's model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: u32,
    pub symbol: String,
    pub trained_at: DateTime<Utc>,
    pub config: TrainingConfig,
    pub ensemble: LstmEnsemble,
    pub metrics: ArtifactMetrics,
}

impl ModelArtifact {
    pub fn new(
        symbol: &str,
        config: TrainingConfig,
        ensemble: LstmEnsemble,
        report: &EnsembleReport,
        train_rows: usize,
    ) -> Self {
        Self {
            version: ARTIFACT_VERSION,
            symbol: symbol.to_string(),
            trained_at: Utc::now(),
            config,
            ensemble,
            metrics: ArtifactMetrics {
                val_accuracy: report.val_accuracy,
                val_samples: report.val_samples,
                member_accuracy: report.members.iter().map(|m| m.val_accuracy).collect(),
                used_meta: report.used_meta,
                train_rows,
            },
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.trained_at).num_seconds().max(0)
    }

    pub fn is_stale(&self, max_age_secs: u64, now: DateTime<Utc>) -> bool {
        self.age_secs(now) as u64 > max_age_secs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub timestamp: i64,
    pub symbol: String,
    pub accepted: bool,
    pub fine_tuned: bool,
    pub val_accuracy: f64,
    pub val_samples: usize,
    pub used_meta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Artifact store rooted at the weights directory
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, symbol: &str) -> PathBuf {
        self.dir.join(format!("{}.json", clean_symbol(symbol)))
    }

    /// Write the artifact atomically; the previous file becomes `<name>.json.bak`
    pub fn save(&self, symbol: &str, artifact: &ModelArtifact) -> Result<PathBuf> {
        let path = self.path_for(symbol);
        let json = serde_json::to_string(artifact).context("serialize model artifact")?;
        write_atomic(&path, json.as_bytes())?;
        info!(
            %symbol,
            path = %path.display(),
            val_accuracy = artifact.metrics.val_accuracy,
            "💾 Model saved"
        );
        Ok(path)
    }

    /// `None` when missing, unreadable or from another format version
    pub fn load(&self, symbol: &str) -> Option<ModelArtifact> {
        let path = self.path_for(symbol);
        if !path.exists() {
            return None;
        }
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%symbol, path = %path.display(), error = %e, "Model file unreadable");
                return None;
            }
        };
        match serde_json::from_str::<ModelArtifact>(&raw) {
            Ok(artifact) if artifact.version == ARTIFACT_VERSION => {
                info!(
                    %symbol,
                    trained_at = %artifact.trained_at,
                    val_accuracy = artifact.metrics.val_accuracy,
                    "📂 Model loaded"
                );
                Some(artifact)
            }
            Ok(artifact) => {
                warn!(
                    %symbol,
                    version = artifact.version,
                    expected = ARTIFACT_VERSION,
                    "Model version mismatch, ignoring"
                );
                None
            }
            Err(e) => {
                warn!(%symbol, path = %path.display(), error = %e, "Corrupt model file, ignoring");
                None
            }
        }
    }

    pub fn append_history(&self, record: TrainingRecord) -> Result<()> {
        let mut history = self.history();
        history.push(record);
        if history.len() > MAX_HISTORY {
            let excess = history.len() - MAX_HISTORY;
            history.drain(..excess);
        }
        let json = serde_json::to_string_pretty(&history)?;
        write_atomic(&self.dir.join(HISTORY_FILE), json.as_bytes())
    }

    /// Training history, oldest first; empty when missing or corrupt
    pub fn history(&self) -> Vec<TrainingRecord> {
        let path = self.dir.join(HISTORY_FILE);
        fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;

    if path.exists() {
        let mut bak = path.as_os_str().to_owned();
        bak.push(".bak");
        if let Err(e) = fs::copy(path, PathBuf::from(bak)) {
            warn!(path = %path.display(), error = %e, "Backup copy failed");
        }
    }
    fs::rename(&tmp, path).with_context(|| format!("rename into {}", path.display()))?;
    Ok(())
}
