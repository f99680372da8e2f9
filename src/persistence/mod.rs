//! CSV Persistence Module
//!
//! Order and closed-trade journals under the data directory, plus PnL snapshots

pub mod pnl;

pub use pnl::PnlStats;

use anyhow::{Context, Result};
use chrono::Utc;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{info, warn};

use crate::types::ClosedTrade;

pub const ORDERS_FILE: &str = "orders.csv";
pub const CLOSED_TRADES_FILE: &str = "closed_trades.csv";
pub const PNL_SNAPSHOT_FILE: &str = "pnl_snapshot.json";

/// One submitted order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub timestamp: i64,
    pub symbol: String,
    pub side: String,
    pub amount: f64,
    pub entry: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    pub order_id: String,
    /// entry, stop, take_profit, trailing, adopt
    pub kind: String,
}

impl OrderRecord {
    pub fn now(symbol: &str, side: &str, amount: f64, kind: &str) -> Self {
        Self {
            timestamp: Utc::now().timestamp_millis(),
            symbol: symbol.to_string(),
            side: side.to_string(),
            amount,
            entry: 0.0,
            stop_loss: 0.0,
            take_profit: 0.0,
            order_id: String::new(),
            kind: kind.to_string(),
        }
    }
}

/// Completed round trip as stored in CSV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTradeRecord {
    pub opened_at: i64,
    pub closed_at: i64,
    pub symbol: String,
    pub side: String,
    pub amount: f64,
    pub entry: f64,
    pub exit: f64,
    pub pnl: f64,
    pub pnl_pct: f64,
    pub reason: String,
}

impl From<&ClosedTrade> for ClosedTradeRecord {
    fn from(trade: &ClosedTrade) -> Self {
        Self {
            opened_at: trade.opened_at.timestamp_millis(),
            closed_at: trade.closed_at.timestamp_millis(),
            symbol: trade.symbol.clone(),
            side: trade.side.to_string(),
            amount: trade.amount,
            entry: trade.entry_price,
            exit: trade.exit_price,
            pnl: trade.pnl,
            pnl_pct: trade.pnl_pct,
            reason: trade.reason.to_string(),
        }
    }
}

/// Append-only CSV journal
pub struct Journal {
    data_dir: PathBuf,
    order_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
    trade_writer: Arc<AsyncRwLock<csv::Writer<std::fs::File>>>,
}

impl Journal {
    pub fn new(data_dir: &str) -> Result<Self> {
        let data_dir = PathBuf::from(data_dir);
        fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        let order_writer = Self::create_writer(&data_dir, ORDERS_FILE)?;
        let trade_writer = Self::create_writer(&data_dir, CLOSED_TRADES_FILE)?;

        Ok(Self {
            data_dir,
            order_writer: Arc::new(AsyncRwLock::new(order_writer)),
            trade_writer: Arc::new(AsyncRwLock::new(trade_writer)),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Header only when the file is new or empty
    fn create_writer(dir: &Path, filename: &str) -> Result<csv::Writer<std::fs::File>> {
        let path = dir.join(filename);
        let file_has_data =
            path.exists() && fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        Ok(WriterBuilder::new()
            .has_headers(!file_has_data)
            .from_writer(file))
    }

    pub async fn record_order(&self, record: OrderRecord) -> Result<()> {
        let mut writer = self.order_writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write order record")?;
        writer.flush().context("Failed to flush order journal")?;
        Ok(())
    }

    pub async fn record_closed_trade(&self, trade: &ClosedTrade) -> Result<()> {
        let record = ClosedTradeRecord::from(trade);
        let mut writer = self.trade_writer.write().await;
        writer
            .serialize(&record)
            .context("Failed to write closed trade")?;
        writer.flush().context("Failed to flush trade journal")?;
        Ok(())
    }

    /// Closed trades in file order; malformed rows are skipped
    pub fn load_closed_trades(&self) -> Result<Vec<ClosedTradeRecord>> {
        load_csv(&self.data_dir.join(CLOSED_TRADES_FILE))
    }

    pub fn load_orders(&self) -> Result<Vec<OrderRecord>> {
        load_csv(&self.data_dir.join(ORDERS_FILE))
    }

    /// Recompute PnL stats from the closed-trade journal and write the JSON snapshot
    pub fn write_pnl_snapshot(&self, starting_equity: f64) -> Result<PnlStats> {
        let trades = self.load_closed_trades()?;
        let stats = PnlStats::compute(&trades, starting_equity);
        let path = self.data_dir.join(PNL_SNAPSHOT_FILE);
        let json = serde_json::to_string_pretty(&stats)?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        info!(
            equity = stats.equity,
            total_pnl = stats.total_pnl,
            trades = stats.trades,
            win_rate = stats.win_rate,
            max_drawdown_pct = stats.max_drawdown_pct,
            sharpe = stats.sharpe,
            "📊 PnL snapshot written"
        );
        Ok(stats)
    }
}

fn load_csv<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = fs::File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
    let mut rows = Vec::new();
    for result in reader.deserialize() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping malformed CSV row"),
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExitReason, Position, Side};

    fn temp_dir() -> String {
        std::env::temp_dir()
            .join(format!("quantedge-journal-{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .to_string()
    }

    fn closed(pnl_sign: f64) -> ClosedTrade {
        let pos = Position {
            symbol: "BTC-USDT".into(),
            side: Side::Buy,
            entry_price: 100.0,
            amount: 1.0,
            stop_loss_price: 98.5,
            take_profit_price: 103.0,
            trailing_stop_price: 99.0,
            last_trailing_price: 100.0,
            opened_at: Utc::now(),
            entry_order_id: None,
            stop_order_id: None,
            take_profit_order_id: None,
        };
        ClosedTrade::from_position(&pos, 100.0 + pnl_sign * 2.0, Utc::now(), ExitReason::ClosedOnExchange)
    }

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = temp_dir();
        {
            let journal = Journal::new(&dir).unwrap();
            journal
                .record_order(OrderRecord::now("BTC-USDT", "BUY", 0.01, "entry"))
                .await
                .unwrap();
        }
        {
            let journal = Journal::new(&dir).unwrap();
            journal
                .record_order(OrderRecord::now("ETH-USDT", "SELL", 0.1, "entry"))
                .await
                .unwrap();
            assert_eq!(journal.load_orders().unwrap().len(), 2);
        }
        let raw = fs::read_to_string(PathBuf::from(&dir).join(ORDERS_FILE)).unwrap();
        assert_eq!(raw.matches("timestamp,symbol").count(), 1);
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_closed_trades_and_snapshot() {
        let dir = temp_dir();
        let journal = Journal::new(&dir).unwrap();
        journal.record_closed_trade(&closed(1.0)).await.unwrap();
        journal.record_closed_trade(&closed(-1.0)).await.unwrap();

        let trades = journal.load_closed_trades().unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].reason, "CLOSED_ON_EXCHANGE");
        assert!((trades[0].pnl - 2.0).abs() < 1e-9);

        let stats = journal.write_pnl_snapshot(100.0).unwrap();
        assert_eq!(stats.trades, 2);
        assert!((stats.equity - 100.0).abs() < 1e-9);
        assert!(PathBuf::from(&dir).join(PNL_SNAPSHOT_FILE).exists());
        let _ = fs::remove_dir_all(&dir);
    }
}
