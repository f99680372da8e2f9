//! Order execution - one `Trader` per symbol
//!
//! Owns the local position and keeps it in line with the exchange:
//! entries with reduce-only protective orders, trailing-stop moves and
//! reconciliation against exchange-side positions.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::ExecutionConfig;
use crate::exchange::{Exchange, ExchangeError, OrderAck, OrderRequest};
use crate::persistence::{Journal, OrderRecord};
use crate::risk::RiskManager;
use crate::types::{ClosedTrade, ExitReason, Position, Side};

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("position already open for {0}")]
    AlreadyOpen(String),
    #[error("invalid order amount {0}")]
    InvalidAmount(f64),
    #[error("no entry price available for {0}")]
    NoEntryPrice(String),
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// What reconciliation changed
#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Unchanged,
    /// Local position was gone on the exchange
    Closed(ClosedTrade),
    /// Exchange position picked up without a local record
    Adopted(Position),
}

/// Entry order style
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryMode {
    Market,
    PostOnly,
}

impl EntryMode {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "post_only" | "postonly" => EntryMode::PostOnly,
            _ => EntryMode::Market,
        }
    }
}

pub struct Trader {
    symbol: String,
    exchange: Arc<dyn Exchange>,
    risk: RiskManager,
    entry_mode: EntryMode,
    slip_buffer: f64,
    leverage: u32,
    journal: Arc<Journal>,
    position: Option<Position>,
}

impl Trader {
    pub fn new(
        symbol: &str,
        exchange: Arc<dyn Exchange>,
        risk: RiskManager,
        execution: &ExecutionConfig,
        leverage: u32,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            exchange,
            risk,
            entry_mode: EntryMode::from_str(&execution.entry_mode),
            slip_buffer: execution.slip_buffer,
            leverage,
            journal,
            position: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    pub fn has_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn risk(&self) -> &RiskManager {
        &self.risk
    }

    async fn last_price(&self) -> Option<f64> {
        match self.exchange.fetch_ticker(&self.symbol).await {
            Ok(t) if t.last_price.is_finite() && t.last_price > 0.0 => Some(t.last_price),
            Ok(_) => None,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Ticker unavailable");
                None
            }
        }
    }

    /// True when the exchange reports a non-flat position for this symbol
    pub async fn exchange_has_position(&self) -> Result<bool, ExecutionError> {
        let positions = self.exchange.fetch_positions(&self.symbol).await?;
        Ok(positions.iter().any(|p| p.amount > 0.0))
    }

    /// Open a position and protect it with reduce-only stop-loss and take-profit orders
    pub async fn open_position(
        &mut self,
        side: Side,
        amount: f64,
    ) -> Result<Position, ExecutionError> {
        if self.position.is_some() || self.exchange_has_position().await? {
            return Err(ExecutionError::AlreadyOpen(self.symbol.clone()));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(ExecutionError::InvalidAmount(amount));
        }

        let mut quoted = None;
        let order = match self.entry_mode {
            EntryMode::Market => OrderRequest::market(&self.symbol, side, amount),
            EntryMode::PostOnly => {
                let last = self
                    .last_price()
                    .await
                    .ok_or_else(|| ExecutionError::NoEntryPrice(self.symbol.clone()))?;
                quoted = Some(last);
                let price = last * (1.0 - side.sign() * self.slip_buffer);
                OrderRequest::post_only_limit(&self.symbol, side, amount, price)
            }
        };

        let ack = self.exchange.place_order(&order).await?;
        info!(
            symbol = %self.symbol,
            %side,
            amount,
            order_id = %ack.order_id,
            status = %ack.status,
            "📥 Entry order placed"
        );

        if let Err(e) = self
            .exchange
            .set_leverage(&self.symbol, side, self.leverage)
            .await
        {
            warn!(symbol = %self.symbol, leverage = self.leverage, error = %e, "Failed to set leverage");
        }

        let entry_price = match ack.avg_price.filter(|p| p.is_finite() && *p > 0.0) {
            Some(p) => p,
            None => match order.price.or(quoted) {
                Some(p) => p,
                None => self
                    .last_price()
                    .await
                    .ok_or_else(|| ExecutionError::NoEntryPrice(self.symbol.clone()))?,
            },
        };

        let levels = self.risk.levels(entry_price, side);
        let closing = side.opposite();

        let stop_order_id = self
            .place_protective(
                OrderRequest::stop_market(&self.symbol, closing, amount, levels.stop_loss),
                "stop-loss",
            )
            .await;
        let take_profit_order_id = self
            .place_protective(
                OrderRequest::take_profit_limit(&self.symbol, closing, amount, levels.take_profit),
                "take-profit",
            )
            .await;

        let position = Position {
            symbol: self.symbol.clone(),
            side,
            entry_price,
            amount,
            stop_loss_price: levels.stop_loss,
            take_profit_price: levels.take_profit,
            trailing_stop_price: levels.trailing_stop,
            last_trailing_price: entry_price,
            opened_at: Utc::now(),
            entry_order_id: Some(ack.order_id.clone()),
            stop_order_id,
            take_profit_order_id,
        };

        self.journal_order(&position, &ack.order_id, "entry").await;
        info!(
            symbol = %self.symbol,
            %side,
            entry = entry_price,
            stop_loss = levels.stop_loss,
            take_profit = levels.take_profit,
            "✅ Position opened"
        );

        self.position = Some(position.clone());
        Ok(position)
    }

    async fn place_protective(&self, order: OrderRequest, label: &str) -> Option<String> {
        match self.exchange.place_order(&order).await {
            Ok(OrderAck { order_id, .. }) => {
                debug!(symbol = %self.symbol, %order_id, label, "Protective order placed");
                Some(order_id)
            }
            Err(e) => {
                error!(symbol = %self.symbol, label, error = %e, "❌ Protective order failed");
                None
            }
        }
    }

    /// Advance the trailing stop. Returns the new stop level when it moved.
    pub async fn update_trailing_stop(&mut self) -> Result<Option<f64>, ExecutionError> {
        let Some(position) = self.position.as_ref() else {
            return Ok(None);
        };
        let price = self.exchange.fetch_ticker(&self.symbol).await?.last_price;
        let Some(new_stop) = self.risk.trailing_update(position, price) else {
            return Ok(None);
        };
        let (side, amount) = (position.side, position.amount);

        // Replacement first, then pull the superseded stops
        let order = OrderRequest::stop_market(&self.symbol, side.opposite(), amount, new_stop);
        let ack = match self.exchange.place_order(&order).await {
            Ok(ack) => ack,
            Err(e) if e.is_position_missing() => {
                warn!(symbol = %self.symbol, "Position gone while trailing, leaving it to reconcile");
                return Ok(None);
            }
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "❌ Trailing stop order failed, previous stop kept");
                return Err(e.into());
            }
        };

        self.cancel_reduce_only(true, Some(&ack.order_id)).await;

        let Some(position) = self.position.as_mut() else {
            return Ok(None);
        };
        let previous = position.stop_loss_price;
        position.stop_loss_price = new_stop;
        position.trailing_stop_price = new_stop;
        position.last_trailing_price = price;
        position.stop_order_id = Some(ack.order_id.clone());
        let snapshot = position.clone();

        self.journal_order(&snapshot, &ack.order_id, "trailing").await;
        info!(
            symbol = %self.symbol,
            price,
            from = previous,
            to = new_stop,
            "🔁 Trailing stop moved"
        );
        Ok(Some(new_stop))
    }

    /// Cancel resting reduce-only orders; `stops_only` keeps take-profits and `keep` spares one id
    async fn cancel_reduce_only(&self, stops_only: bool, keep: Option<&str>) {
        let orders = match self.exchange.fetch_open_orders(&self.symbol).await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(symbol = %self.symbol, error = %e, "Failed to list open orders");
                return;
            }
        };
        for order in orders
            .iter()
            .filter(|o| o.reduce_only && (!stops_only || o.is_stop()))
            .filter(|o| keep != Some(o.order_id.as_str()))
        {
            if let Err(e) = self
                .exchange
                .cancel_order(&self.symbol, &order.order_id)
                .await
            {
                warn!(symbol = %self.symbol, order_id = %order.order_id, error = %e, "Cancel failed");
            }
        }
    }

    /// Bring the local position in line with the exchange
    pub async fn reconcile(&mut self) -> Result<ReconcileOutcome, ExecutionError> {
        let positions = self.exchange.fetch_positions(&self.symbol).await?;
        let held = positions.into_iter().find(|p| p.amount > 0.0);

        match (self.position.take(), held) {
            (Some(local), None) => {
                let exit = match self.last_price().await {
                    Some(p) => p,
                    None => {
                        warn!(symbol = %self.symbol, "No price at close, using entry");
                        local.entry_price
                    }
                };
                let trade =
                    ClosedTrade::from_position(&local, exit, Utc::now(), ExitReason::ClosedOnExchange);
                if let Err(e) = self.journal.record_closed_trade(&trade).await {
                    warn!(symbol = %self.symbol, error = %e, "Failed to journal closed trade");
                }
                self.cancel_reduce_only(false, None).await;
                info!(
                    symbol = %self.symbol,
                    side = %trade.side,
                    entry = trade.entry_price,
                    exit = trade.exit_price,
                    pnl = trade.pnl,
                    pnl_pct = trade.pnl_pct,
                    "🏁 Position closed on exchange"
                );
                Ok(ReconcileOutcome::Closed(trade))
            }
            (None, Some(remote)) => {
                let entry = if remote.entry_price > 0.0 {
                    remote.entry_price
                } else {
                    self.last_price()
                        .await
                        .ok_or_else(|| ExecutionError::NoEntryPrice(self.symbol.clone()))?
                };
                let levels = self.risk.levels(entry, remote.side);
                let position = Position {
                    symbol: self.symbol.clone(),
                    side: remote.side,
                    entry_price: entry,
                    amount: remote.amount,
                    stop_loss_price: levels.stop_loss,
                    take_profit_price: levels.take_profit,
                    trailing_stop_price: levels.trailing_stop,
                    last_trailing_price: entry,
                    opened_at: Utc::now(),
                    entry_order_id: None,
                    stop_order_id: None,
                    take_profit_order_id: None,
                };
                self.journal_order(&position, "", "adopt").await;
                info!(
                    symbol = %self.symbol,
                    side = %position.side,
                    amount = position.amount,
                    entry,
                    "📎 Adopted exchange position"
                );
                self.position = Some(position.clone());
                Ok(ReconcileOutcome::Adopted(position))
            }
            (local, _) => {
                self.position = local;
                Ok(ReconcileOutcome::Unchanged)
            }
        }
    }

    async fn journal_order(&self, position: &Position, order_id: &str, kind: &str) {
        let record = OrderRecord {
            entry: position.entry_price,
            stop_loss: position.stop_loss_price,
            take_profit: position.take_profit_price,
            order_id: order_id.to_string(),
            ..OrderRecord::now(&self.symbol, position.side.as_api(), position.amount, kind)
        };
        if let Err(e) = self.journal.record_order(record).await {
            warn!(symbol = %self.symbol, error = %e, "Failed to journal order");
        }
    }
}
