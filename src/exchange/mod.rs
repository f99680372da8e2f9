//! Exchange access
//!
//! `Exchange` is the seam between trading logic and the venue:
//! - `BingxClient`: signed REST client for BingX perpetual swaps
//! - `PaperExchange`: simulated fills over real public market data (dry run)

pub mod error;
pub mod paper;
pub mod rest;
pub mod types;

pub use error::ExchangeError;
pub use paper::PaperExchange;
pub use rest::BingxClient;
pub use types::{
    Balance, Contract, ExchangePosition, OpenOrder, OrderAck, OrderRequest, OrderType, Ticker,
    TimeInForce,
};

use async_trait::async_trait;

use crate::types::{Bar, Side, Timeframe};

pub type ExchangeResult<T> = std::result::Result<T, ExchangeError>;

/// Everything the bot needs from a futures venue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Bars in ascending timestamp order, newest last
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> ExchangeResult<Vec<Bar>>;

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker>;

    /// Last funding rate as a fraction (0.0001 = 0.01%)
    async fn fetch_funding_rate(&self, symbol: &str) -> ExchangeResult<f64>;

    async fn list_contracts(&self) -> ExchangeResult<Vec<Contract>>;

    async fn fetch_balance(&self) -> ExchangeResult<Balance>;

    /// Non-flat positions for `symbol`
    async fn fetch_positions(&self, symbol: &str) -> ExchangeResult<Vec<ExchangePosition>>;

    async fn fetch_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>>;

    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<OrderAck>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()>;

    async fn set_leverage(&self, symbol: &str, side: Side, leverage: u32) -> ExchangeResult<()>;

    /// Venue name for logs
    fn name(&self) -> &'static str;
}
