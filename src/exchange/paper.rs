//! Paper Exchange
//!
//! Simulates order execution for dry runs. Market data (bars, tickers,
//! funding, contracts) comes from a real venue; orders fill against the
//! live last price and resting reduce-only orders trigger when price
//! crosses them.
//!
//! - Entries fill at last price (post-only limits fill at their limit price)
//! - Stops and take-profits are settled whenever positions or balance are read
//! - Taker fee charged on every simulated fill

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

use super::types::{
    Balance, Contract, ExchangePosition, OpenOrder, OrderAck, OrderRequest, OrderType, Ticker,
};
use super::{Exchange, ExchangeError, ExchangeResult};
use crate::types::{Bar, Side, Timeframe};

#[derive(Debug, Clone)]
struct PaperPosition {
    side: Side,
    amount: f64,
    entry_price: f64,
}

#[derive(Debug, Default)]
struct PaperState {
    cash: f64,
    positions: HashMap<String, PaperPosition>,
    orders: Vec<OpenOrder>,
    leverage: HashMap<String, u32>,
    next_id: u64,
    realized_pnl: f64,
    fees_paid: f64,
}

impl PaperState {
    fn next_order_id(&mut self) -> String {
        self.next_id += 1;
        format!("paper-{}", self.next_id)
    }

    /// Apply a fill to the position book and return realised PnL
    fn apply_fill(&mut self, symbol: &str, side: Side, amount: f64, price: f64, fee_rate: f64) -> f64 {
        let fee = amount * price * fee_rate;
        self.cash -= fee;
        self.fees_paid += fee;

        let mut realized = 0.0;
        let remove = match self.positions.get_mut(symbol) {
            None => {
                self.positions.insert(
                    symbol.to_string(),
                    PaperPosition {
                        side,
                        amount,
                        entry_price: price,
                    },
                );
                false
            }
            Some(pos) if pos.side == side => {
                let total = pos.amount + amount;
                pos.entry_price = (pos.entry_price * pos.amount + price * amount) / total;
                pos.amount = total;
                false
            }
            Some(pos) => {
                let closed = amount.min(pos.amount);
                realized = (price - pos.entry_price) * closed * pos.side.sign();
                pos.amount -= closed;
                let leftover = amount - closed;
                if leftover > 1e-12 {
                    // Flip to the other side with the remainder
                    pos.side = side;
                    pos.amount = leftover;
                    pos.entry_price = price;
                    false
                } else {
                    pos.amount <= 1e-12
                }
            }
        };
        if remove {
            self.positions.remove(symbol);
            // Orphaned protective orders go away with the position
            self.orders.retain(|o| !(o.symbol == symbol && o.reduce_only));
        }
        self.cash += realized;
        self.realized_pnl += realized;
        realized
    }

    /// Trigger resting reduce-only orders crossed by `price`
    fn settle(&mut self, symbol: &str, price: f64, fee_rate: f64) {
        let Some(pos) = self.positions.get(symbol).cloned() else {
            return;
        };
        let triggered = self.orders.iter().find(|o| {
            o.symbol == symbol && o.reduce_only && o.side == pos.side.opposite() && {
                match (o.order_type, pos.side) {
                    (Some(OrderType::StopMarket), Side::Buy) => price <= o.stop_price,
                    (Some(OrderType::StopMarket), Side::Sell) => price >= o.stop_price,
                    (_, Side::Buy) => price >= o.price,
                    (_, Side::Sell) => price <= o.price,
                }
            }
        });
        if let Some(order) = triggered.cloned() {
            let fill_price = if order.is_stop() { price } else { order.price };
            let pnl = self.apply_fill(symbol, order.side, pos.amount, fill_price, fee_rate);
            info!(
                %symbol,
                order_id = %order.order_id,
                fill_price,
                pnl,
                "📄 Paper protective order triggered"
            );
        }
    }
}

/// Simulated venue over real market data
pub struct PaperExchange {
    market: Arc<dyn Exchange>,
    state: Mutex<PaperState>,
    fee_rate: f64,
}

impl PaperExchange {
    pub fn new(market: Arc<dyn Exchange>, initial_equity: f64, fee_bps: f64) -> Self {
        Self {
            market,
            state: Mutex::new(PaperState {
                cash: initial_equity,
                ..Default::default()
            }),
            fee_rate: fee_bps / 10_000.0,
        }
    }

    fn lock(&self) -> ExchangeResult<std::sync::MutexGuard<'_, PaperState>> {
        self.state
            .lock()
            .map_err(|_| ExchangeError::Decode("paper state lock poisoned".into()))
    }

    async fn last_price(&self, symbol: &str) -> ExchangeResult<f64> {
        Ok(self.market.fetch_ticker(symbol).await?.last_price)
    }

    /// Realised PnL and fees so far
    pub fn totals(&self) -> (f64, f64) {
        self.lock()
            .map(|s| (s.realized_pnl, s.fees_paid))
            .unwrap_or((0.0, 0.0))
    }
}

#[async_trait]
impl Exchange for PaperExchange {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> ExchangeResult<Vec<Bar>> {
        self.market.fetch_bars(symbol, timeframe, limit).await
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        self.market.fetch_ticker(symbol).await
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> ExchangeResult<f64> {
        self.market.fetch_funding_rate(symbol).await
    }

    async fn list_contracts(&self) -> ExchangeResult<Vec<Contract>> {
        self.market.list_contracts().await
    }

    async fn fetch_balance(&self) -> ExchangeResult<Balance> {
        let symbols: Vec<String> = self.lock()?.positions.keys().cloned().collect();
        let mut prices = HashMap::new();
        for symbol in symbols {
            match self.last_price(&symbol).await {
                Ok(price) => {
                    prices.insert(symbol, price);
                }
                Err(e) => warn!(%symbol, error = %e, "Paper balance: no price"),
            }
        }

        let mut state = self.lock()?;
        for (symbol, price) in &prices {
            state.settle(symbol, *price, self.fee_rate);
        }
        let unrealized: f64 = state
            .positions
            .iter()
            .filter_map(|(symbol, pos)| {
                prices
                    .get(symbol)
                    .map(|p| (p - pos.entry_price) * pos.amount * pos.side.sign())
            })
            .sum();
        Ok(Balance {
            equity: state.cash + unrealized,
            available: state.cash,
        })
    }

    async fn fetch_positions(&self, symbol: &str) -> ExchangeResult<Vec<ExchangePosition>> {
        let price = self.last_price(symbol).await?;
        let mut state = self.lock()?;
        state.settle(symbol, price, self.fee_rate);
        Ok(state
            .positions
            .get(symbol)
            .map(|p| ExchangePosition {
                symbol: symbol.to_string(),
                side: p.side,
                amount: p.amount,
                entry_price: p.entry_price,
            })
            .into_iter()
            .collect())
    }

    async fn fetch_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>> {
        Ok(self
            .lock()?
            .orders
            .iter()
            .filter(|o| o.symbol == symbol)
            .cloned()
            .collect())
    }

    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<OrderAck> {
        if order.quantity <= 0.0 {
            return Err(ExchangeError::InvalidQuantity(format!(
                "quantity {} must be positive",
                order.quantity
            )));
        }

        // Protective orders rest until price crosses them
        if order.reduce_only {
            let mut state = self.lock()?;
            let Some(pos) = state.positions.get(&order.symbol) else {
                return Err(ExchangeError::PositionNotFound(format!(
                    "position not exist for {}",
                    order.symbol
                )));
            };
            if pos.side != order.side.opposite() {
                return Err(ExchangeError::ReduceOnlyRejected(
                    "reduceOnly order would increase position".into(),
                ));
            }
            let order_id = state.next_order_id();
            state.orders.push(OpenOrder {
                order_id: order_id.clone(),
                symbol: order.symbol.clone(),
                side: order.side,
                order_type: Some(order.order_type),
                quantity: order.quantity,
                price: order.price.unwrap_or(0.0),
                stop_price: order.stop_price.unwrap_or(0.0),
                reduce_only: true,
            });
            return Ok(OrderAck {
                order_id,
                avg_price: None,
                status: "NEW".into(),
            });
        }

        let fill_price = match (order.order_type, order.price) {
            (OrderType::Limit, Some(price)) => price,
            (OrderType::Market, _) => self.last_price(&order.symbol).await?,
            (other, _) => {
                return Err(ExchangeError::InvalidOrderType(format!(
                    "Invalid order type {} for paper entry",
                    other.as_api()
                )))
            }
        };

        let mut state = self.lock()?;
        let order_id = state.next_order_id();
        state.apply_fill(
            &order.symbol,
            order.side,
            order.quantity,
            fill_price,
            self.fee_rate,
        );
        info!(
            symbol = %order.symbol,
            side = %order.side,
            qty = order.quantity,
            fill_price,
            %order_id,
            "📄 Paper fill"
        );
        Ok(OrderAck {
            order_id,
            avg_price: Some(fill_price),
            status: "FILLED".into(),
        })
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let mut state = self.lock()?;
        let before = state.orders.len();
        state
            .orders
            .retain(|o| !(o.symbol == symbol && o.order_id == order_id));
        if state.orders.len() == before {
            return Err(ExchangeError::Api {
                code: 80018,
                msg: format!("order {order_id} not exist"),
            });
        }
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, _side: Side, leverage: u32) -> ExchangeResult<()> {
        self.lock()?.leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "paper"
    }
}
