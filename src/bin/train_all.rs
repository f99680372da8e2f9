//! Train or fine-tune the confidence model for every configured symbol once
//!
//! Usage: cargo run --bin train-all [SYMBOL ...]

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use quantedge::config::AppConfig;
use quantedge::exchange::BingxClient;
use quantedge::market::MarketData;
use quantedge::ml_engine::{TrainOutcome, TrainingPipeline};
use quantedge::types::exchange_symbol;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    quantedge::init_tracing();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let client = Arc::new(BingxClient::from_config(&config.exchange)?);
    let market = Arc::new(MarketData::new(client, config.timeframe().unwrap_or_default()));

    let args: Vec<String> = std::env::args().skip(1).map(|s| exchange_symbol(&s)).collect();
    let symbols = if args.is_empty() {
        market.resolve_symbols(&config).await
    } else {
        args
    };

    let pipeline = TrainingPipeline::from_app(&config, market);
    info!(
        symbols = symbols.len(),
        lookbacks = ?pipeline.config().lookbacks,
        mode = %pipeline.config().feature_mode,
        "🧠 Training all symbols"
    );

    let (mut accepted, mut rejected, mut failed) = (0usize, 0usize, 0usize);
    for symbol in &symbols {
        match pipeline.train_symbol(symbol).await {
            Ok(TrainOutcome::Accepted(artifact)) => {
                accepted += 1;
                info!(
                    %symbol,
                    val_accuracy = artifact.metrics.val_accuracy,
                    path = %pipeline.store().path_for(symbol).display(),
                    "Saved"
                );
            }
            Ok(TrainOutcome::Rejected { val_accuracy, floor }) => {
                rejected += 1;
                warn!(%symbol, val_accuracy, floor, "Rejected");
            }
            Err(e) => {
                failed += 1;
                warn!(%symbol, error = %e, "Training failed");
            }
        }
    }

    info!(accepted, rejected, failed, "✅ Training run complete");
    Ok(())
}
