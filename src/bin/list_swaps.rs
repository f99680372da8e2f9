//! List online USDT perpetual swaps on BingX

use anyhow::{Context, Result};

use quantedge::config::AppConfig;
use quantedge::exchange::{BingxClient, Exchange};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    quantedge::init_tracing();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let client = BingxClient::from_config(&config.exchange)?;

    let mut contracts: Vec<_> = client
        .list_contracts()
        .await
        .context("Failed to list contracts")?
        .into_iter()
        .filter(|c| c.online && c.symbol.ends_with("-USDT"))
        .collect();
    contracts.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    for c in &contracts {
        match c.min_quantity {
            Some(min) => println!("{:<16} min_qty={}", c.symbol, min),
            None => println!("{}", c.symbol),
        }
    }
    println!("{} USDT swaps", contracts.len());
    Ok(())
}
