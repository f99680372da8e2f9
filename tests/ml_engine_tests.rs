//! Integration tests for the ML engine

#[cfg(test)]
mod tests {
    use ndarray::Array2;
    use quantedge::features::IndicatorEngine;
    use quantedge::ml_engine::dataset::{build_windows, split_point};
    use quantedge::ml_engine::{
        FeatureMode, LstmEnsemble, MinMaxScaler, ModelArtifact, ModelError, ModelStore,
        NetworkConfig, TrainingConfig, NEUTRAL_CONFIDENCE,
    };
    use quantedge::types::Bar;

    fn wave_bars(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + (i as f64 * 0.25).sin() * 5.0 + i as f64 * 0.01;
                Bar::new(i as i64 * 900_000, c - 0.2, c + 0.8, c - 0.8, c, 40.0 + (i % 11) as f64)
            })
            .collect()
    }

    fn small_config() -> TrainingConfig {
        TrainingConfig {
            lookbacks: vec![8, 12],
            epochs: 2,
            finetune_epochs: 1,
            network: NetworkConfig {
                hidden1: 6,
                hidden2: 4,
                dense_units: 3,
                dropout: 0.1,
                ..NetworkConfig::default()
            },
            ..TrainingConfig::default()
        }
    }

    fn temp_store() -> ModelStore {
        ModelStore::new(std::env::temp_dir().join(format!("quantedge-it-{}", uuid::Uuid::new_v4())))
    }

    // ============================================================================
    // Dataset
    // ============================================================================

    #[test]
    fn test_windows_never_cross_the_split() {
        let rows = Array2::from_shape_fn((120, 5), |(i, j)| (i * 5 + j) as f64);
        let closes: Vec<f64> = (0..120).map(|i| i as f64).collect();
        let cut = split_point(120, 12, 1, 0.2).unwrap();

        let train = build_windows(rows.view(), &closes, 12, 1, 0..cut);
        let valid = build_windows(rows.view(), &closes, 12, 1, cut..120);
        assert!(train.end_rows.iter().all(|&t| t < cut));
        assert!(valid.end_rows.iter().all(|&t| t >= cut));
        // Last row has no future close
        assert!(!valid.end_rows.contains(&119));
        assert!(valid.labels.iter().all(|&y| y == 1.0));
    }

    #[test]
    fn test_split_needs_enough_rows() {
        assert!(matches!(
            split_point(20, 12, 1, 0.2),
            Err(ModelError::NotEnoughData { .. })
        ));
    }

    #[test]
    fn test_scaler_fit_on_training_rows_only() {
        let rows = Array2::from_shape_fn((10, 2), |(i, j)| (i + j) as f64);
        let scaler = MinMaxScaler::fit(rows.slice(ndarray::s![..5, ..])).unwrap();
        let scaled = scaler.transform(rows.view()).unwrap();
        assert_eq!(scaled[[0, 0]], 0.0);
        assert_eq!(scaled[[4, 0]], 1.0);
        // Later rows fall outside the fitted range
        assert!(scaled[[9, 0]] > 1.0);
    }

    // ============================================================================
    // Ensemble
    // ============================================================================

    #[test]
    fn test_untrained_ensemble_is_neutral() {
        let ensemble = LstmEnsemble::from_config(&small_config());
        assert!(!ensemble.is_trained());
        assert_eq!(
            ensemble.predict_bars(&wave_bars(200), &IndicatorEngine::default()),
            NEUTRAL_CONFIDENCE
        );
    }

    #[test]
    fn test_train_predict_save_load() {
        let cfg = small_config();
        let engine = IndicatorEngine::default();
        let bars = wave_bars(260);
        let table = FeatureMode::Ohlcv.table(&bars, &engine);

        let mut ensemble = LstmEnsemble::from_config(&cfg);
        let report = ensemble.train(&table, cfg.epochs, &cfg).unwrap();
        assert!(ensemble.is_trained());
        assert_eq!(report.members.len(), 2);
        assert!(report.val_samples > 0);
        assert!((0.0..=1.0).contains(&report.val_accuracy));
        assert!(!report.fine_tuned);

        let p = ensemble.predict_bars(&bars, &engine);
        assert!(p > 0.0 && p < 1.0);

        let store = temp_store();
        let artifact = ModelArtifact::new("SOL-USDT", cfg.clone(), ensemble, &report, table.len());
        let path = store.save("SOL-USDT", &artifact).unwrap();
        assert!(path.ends_with("SOLUSDT.json"));

        let loaded = store.load("SOL-USDT").unwrap();
        assert_eq!(loaded.symbol, "SOL-USDT");
        assert!(loaded.config.compatible_with(&cfg));
        let q = loaded.ensemble.predict_bars(&bars, &engine);
        assert!((p - q).abs() < 1e-9);

        // Fine-tuning a loaded model keeps its layout
        let mut tuned = loaded.ensemble.clone();
        let report = tuned.train(&table, cfg.finetune_epochs, &cfg).unwrap();
        assert!(report.fine_tuned);
        assert_eq!(tuned.lookbacks(), vec![8, 12]);

        let _ = std::fs::remove_dir_all(store.dir());
    }

    #[test]
    fn test_engineered_mode_drops_warmup_rows() {
        let bars = wave_bars(200);
        let table = FeatureMode::Engineered.table(&bars, &IndicatorEngine::default());
        assert!(table.len() < bars.len());
        assert_eq!(table.rows.ncols(), FeatureMode::Engineered.n_features());
        assert_eq!(table.closes.len(), table.len());
    }

    #[test]
    fn test_corrupt_artifact_is_missing() {
        let store = temp_store();
        std::fs::create_dir_all(store.dir()).unwrap();
        std::fs::write(store.path_for("BTC-USDT"), "{ not json").unwrap();
        assert!(store.load("BTC-USDT").is_none());
        assert!(store.load("ETH-USDT").is_none());
        let _ = std::fs::remove_dir_all(store.dir());
    }
}
