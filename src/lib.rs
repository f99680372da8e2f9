//! QuantEdge Library
//!
//! Indicator + LSTM gated trading bot for BingX USDT perpetual swaps

pub mod config;
pub mod exchange;
pub mod execution;
pub mod features;
pub mod market;
pub mod ml_engine;
pub mod notify;
pub mod persistence;
pub mod risk;
pub mod scheduler;
pub mod strategy;
pub mod types;

use tracing_subscriber::EnvFilter;

/// Install the global subscriber: `RUST_LOG` filter (default `info`), JSON lines when
/// `LOG_FORMAT=json`
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = if json {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {e}");
    }
}
