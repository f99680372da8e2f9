//! QuantEdge bot entry point

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

use quantedge::config::AppConfig;
use quantedge::exchange::{BingxClient, Exchange, PaperExchange};
use quantedge::notify::Notifier;
use quantedge::scheduler::Bot;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    quantedge::init_tracing();

    let config = AppConfig::load().context("Failed to load configuration")?;
    info!(config = %config.digest(), "⚙️ Configuration loaded");
    config.validate_env()?;

    let exchange = build_exchange(&config)?;
    info!(exchange = exchange.name(), dry_run = config.bot.dry_run, "🔌 Exchange ready");

    let notifier = Notifier::new(&config.telegram);
    if notifier.is_enabled() {
        notifier
            .send(&format!("🚀 QuantEdge {} starting", config.bot.tag))
            .await;
    }

    let bot = Arc::new(Bot::new(config, exchange, notifier).await?);
    info!(symbols = ?bot.symbols(), "📋 Trading symbols");
    bot.startup().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
        let _ = shutdown_tx.send(true);
    });

    bot.run(shutdown_rx).await?;
    info!("👋 QuantEdge stopped");
    Ok(())
}

fn build_exchange(config: &AppConfig) -> Result<Arc<dyn Exchange>> {
    let client: Arc<dyn Exchange> = Arc::new(BingxClient::from_config(&config.exchange)?);
    if config.bot.dry_run {
        return Ok(Arc::new(PaperExchange::new(
            client,
            config.exchange.paper_equity,
            config.exchange.paper_fee_bps,
        )));
    }
    Ok(client)
}
