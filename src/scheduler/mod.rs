//! Scheduler - the bot's periodic tasks
//!
//! One `Bot` owns every per-symbol trader and drives:
//! - the trading loop (signals, confidence gate, entries)
//! - trailing-stop refresh and exchange reconciliation
//! - the PnL report
//! - a separate retrain task that swaps models in place
//!
//! Per-symbol failures are logged and never stop a loop. Shutdown arrives on a
//! `watch` channel.

use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::exchange::Exchange;
use crate::execution::{ExecutionError, ReconcileOutcome, Trader};
use crate::features::{IndicatorConfig, IndicatorEngine};
use crate::market::MarketData;
use crate::ml_engine::{ModelArtifact, TrainOutcome, TrainingPipeline, NEUTRAL_CONFIDENCE};
use crate::notify::Notifier;
use crate::persistence::Journal;
use crate::risk::RiskManager;
use crate::strategy::{CooldownTracker, Decision, HoldReason, SignalEngine};

/// Symbol -> current model. Entries are replaced whole, never mutated.
pub type ModelMap = Arc<RwLock<HashMap<String, Arc<ModelArtifact>>>>;

pub struct Bot {
    config: AppConfig,
    exchange: Arc<dyn Exchange>,
    market: Arc<MarketData>,
    engine: IndicatorEngine,
    signals: SignalEngine,
    risk: RiskManager,
    symbols: Vec<String>,
    traders: HashMap<String, Mutex<Trader>>,
    cooldowns: Mutex<CooldownTracker>,
    models: ModelMap,
    pipeline: TrainingPipeline,
    journal: Arc<Journal>,
    notifier: Notifier,
}

impl Bot {
    /// Build the bot, resolving the symbol list from config or discovery
    pub async fn new(config: AppConfig, exchange: Arc<dyn Exchange>, notifier: Notifier) -> Result<Self> {
        let timeframe = config.timeframe().unwrap_or_default();
        let symbols = MarketData::new(exchange.clone(), timeframe)
            .resolve_symbols(&config)
            .await;
        Self::with_symbols(config, exchange, symbols, notifier)
    }

    pub fn with_symbols(
        config: AppConfig,
        exchange: Arc<dyn Exchange>,
        symbols: Vec<String>,
        notifier: Notifier,
    ) -> Result<Self> {
        let timeframe = config.timeframe().unwrap_or_default();
        let market = Arc::new(MarketData::new(exchange.clone(), timeframe));
        let journal = Arc::new(
            Journal::new(&config.persistence.data_dir).context("Failed to open trade journal")?,
        );
        let risk = RiskManager::from_app(&config);

        let traders = symbols
            .iter()
            .map(|s| {
                let trader = Trader::new(
                    s,
                    exchange.clone(),
                    risk.clone(),
                    &config.execution,
                    config.exchange.leverage,
                    journal.clone(),
                );
                (s.clone(), Mutex::new(trader))
            })
            .collect();

        Ok(Self {
            engine: IndicatorEngine::new(IndicatorConfig::from_app(&config)),
            signals: SignalEngine::from_app(&config),
            cooldowns: Mutex::new(CooldownTracker::new(config.strategy.cooldown_secs)),
            pipeline: TrainingPipeline::from_app(&config, market.clone()),
            models: Arc::new(RwLock::new(HashMap::new())),
            config,
            exchange,
            market,
            risk,
            symbols,
            traders,
            journal,
            notifier,
        })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn models(&self) -> ModelMap {
        self.models.clone()
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    pub fn trader(&self, symbol: &str) -> Option<&Mutex<Trader>> {
        self.traders.get(symbol)
    }

    /// Load saved models, train missing or stale ones, adopt exchange positions
    pub async fn startup(&self) {
        let loaded = self.pipeline.load_models(&self.symbols);
        info!(
            loaded = loaded.len(),
            symbols = self.symbols.len(),
            "📂 Models loaded from disk"
        );
        {
            let mut models = self.models.write().await;
            for (symbol, artifact) in loaded {
                models.insert(symbol, Arc::new(artifact));
            }
        }

        for symbol in self.stale_symbols().await {
            if let Err(e) = self.train_and_swap(&symbol).await {
                warn!(%symbol, error = %e, "Initial training failed");
            }
        }

        self.reconcile_all().await;
    }

    /// Symbols without a usable model
    async fn stale_symbols(&self) -> Vec<String> {
        let models = self.models.read().await;
        self.symbols
            .iter()
            .filter(|s| {
                self.pipeline
                    .needs_training(models.get(s.as_str()).map(|a| a.as_ref()))
            })
            .cloned()
            .collect()
    }

    /// Train one symbol and swap the model in when accepted
    pub async fn train_and_swap(&self, symbol: &str) -> Result<bool> {
        match self.pipeline.train_symbol(symbol).await? {
            TrainOutcome::Accepted(artifact) => {
                let accuracy = artifact.metrics.val_accuracy;
                self.models
                    .write()
                    .await
                    .insert(symbol.to_string(), Arc::new(*artifact));
                self.notifier.training(symbol, true, accuracy).await;
                Ok(true)
            }
            TrainOutcome::Rejected { val_accuracy, .. } => {
                self.notifier.training(symbol, false, val_accuracy).await;
                Ok(false)
            }
        }
    }

    /// P(up) from the current model, neutral without one
    async fn confidence(&self, symbol: &str, bars: &[crate::types::Bar]) -> f64 {
        let model = self.models.read().await.get(symbol).cloned();
        match model {
            Some(artifact) => artifact.ensemble.predict_bars(bars, &self.engine),
            None => NEUTRAL_CONFIDENCE,
        }
    }

    /// One trading-loop pass for a single symbol
    pub async fn evaluate_symbol(&self, symbol: &str) -> Result<Decision> {
        let Some(trader) = self.traders.get(symbol) else {
            anyhow::bail!("No trader for {symbol}");
        };

        let bars = self
            .market
            .fetch_bars(symbol, self.config.bot.lookback_bars)
            .await?;
        if bars.len() < self.config.bot.min_bars {
            return Ok(Decision::Hold(HoldReason::Warmup));
        }
        let (Some(row), Some(bar)) = (self.engine.latest(&bars), bars.last()) else {
            return Ok(Decision::Hold(HoldReason::Warmup));
        };
        if !row.ready {
            return Ok(Decision::Hold(HoldReason::Warmup));
        }

        let mut trader = trader.lock().await;
        if trader.has_position() {
            return Ok(Decision::Hold(HoldReason::PositionOpen));
        }
        {
            let cooldowns = self.cooldowns.lock().await;
            let now = Utc::now();
            if let Some(left) = cooldowns.remaining(symbol, now) {
                debug!(%symbol, remaining_secs = left.num_seconds(), "Cooling down");
                return Ok(Decision::Hold(HoldReason::Cooldown));
            }
            if cooldowns.is_duplicate_bar(symbol, bar) {
                return Ok(Decision::Hold(HoldReason::DuplicateBar));
            }
        }

        let confidence = self.confidence(symbol, &bars).await;
        let funding_pct = if self.config.strategy.funding_filter_pct.is_some() {
            self.market.fetch_funding_rate(symbol).await
        } else {
            0.0
        };
        let signal = self.signals.build_signal(symbol, &row, confidence);
        let decision = self.signals.evaluate(&signal, funding_pct);
        let Decision::Enter(side) = decision else {
            debug!(
                %symbol,
                ?decision,
                long = signal.long_score,
                short = signal.short_score,
                confidence,
                "Hold"
            );
            return Ok(decision);
        };

        let balance = match self.exchange.fetch_balance().await {
            Ok(b) => Some(b.equity),
            Err(e) => {
                warn!(%symbol, error = %e, "Balance unavailable, using fallback equity");
                None
            }
        };
        let equity = self.risk.effective_equity(balance);
        let amount = self
            .risk
            .position_size(equity, row.atr.unwrap_or(0.0), symbol);

        info!(
            %symbol,
            %side,
            amount,
            equity,
            confidence,
            long = signal.long_score,
            short = signal.short_score,
            "🎯 Strong signal"
        );

        let position = match trader.open_position(side, amount).await {
            Ok(position) => position,
            Err(ExecutionError::Exchange(e)) if e.is_permanent() => {
                // Same request on the same bar would be rejected again
                self.cooldowns.lock().await.mark_bar(symbol, bar);
                warn!(%symbol, error = %e, "⛔ Entry rejected permanently, skipping bar");
                return Err(anyhow::Error::new(e).context(format!("Entry rejected for {symbol}")));
            }
            Err(e) => return Err(e.into()),
        };
        self.cooldowns
            .lock()
            .await
            .mark_entry(symbol, bar, Utc::now());
        self.notifier.entry(&position, confidence).await;
        Ok(decision)
    }

    pub async fn run_trading_cycle(&self) {
        for symbol in &self.symbols {
            match self.evaluate_symbol(symbol).await {
                Ok(Decision::Enter(side)) => info!(%symbol, %side, "Entry placed"),
                Ok(Decision::Hold(reason)) => debug!(%symbol, %reason, "No entry"),
                Err(e) => warn!(%symbol, error = %e, "Trading cycle failed for symbol"),
            }
        }
    }

    pub async fn refresh_trailing(&self) {
        for (symbol, trader) in &self.traders {
            let mut trader = trader.lock().await;
            if !trader.has_position() {
                continue;
            }
            match trader.update_trailing_stop().await {
                Ok(Some(stop)) => {
                    let price = trader
                        .position()
                        .map(|p| p.last_trailing_price)
                        .unwrap_or(stop);
                    self.notifier.trailing(symbol, price, stop).await;
                }
                Ok(None) => {}
                Err(e) => warn!(%symbol, error = %e, "Trailing update failed"),
            }
        }
    }

    pub async fn reconcile_all(&self) {
        for (symbol, trader) in &self.traders {
            let outcome = trader.lock().await.reconcile().await;
            match outcome {
                Ok(ReconcileOutcome::Closed(trade)) => self.notifier.closed(&trade).await,
                Ok(ReconcileOutcome::Adopted(pos)) => {
                    debug!(%symbol, side = %pos.side, "Position adopted")
                }
                Ok(ReconcileOutcome::Unchanged) => {}
                Err(e) => warn!(%symbol, error = %e, "Reconcile failed"),
            }
        }
    }

    pub fn report_pnl(&self) {
        if let Err(e) = self
            .journal
            .write_pnl_snapshot(self.config.persistence.starting_equity)
        {
            warn!(error = %e, "PnL report failed");
        }
    }

    /// Next round-robin symbol plus every symbol whose model is missing or stale
    async fn retrain_targets(&self, cursor: &mut usize) -> Vec<String> {
        let mut targets = Vec::new();
        if !self.symbols.is_empty() {
            targets.push(self.symbols[*cursor % self.symbols.len()].clone());
            *cursor = (*cursor + 1) % self.symbols.len();
        }
        for symbol in self.stale_symbols().await {
            if !targets.contains(&symbol) {
                targets.push(symbol);
            }
        }
        targets
    }

    async fn retrain_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.model.retrain_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut cursor = 0usize;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    for symbol in self.retrain_targets(&mut cursor).await {
                        if *shutdown.borrow() {
                            return;
                        }
                        match self.train_and_swap(&symbol).await {
                            Ok(accepted) => debug!(%symbol, accepted, "Retrain finished"),
                            Err(e) => warn!(%symbol, error = %e, "Retrain failed"),
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("Retrain task stopping");
                    return;
                }
            }
        }
    }

    /// Run every loop until the shutdown flag flips
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let retrain = tokio::spawn(self.clone().retrain_loop(shutdown.clone()));

        let bot = &self.config.bot;
        let mut trading = interval(bot.loop_interval_secs);
        let mut trailing = interval(bot.trailing_update_secs);
        let mut reconcile = interval(bot.reconcile_interval_secs);
        let mut pnl = interval(bot.pnl_report_secs);

        info!(
            symbols = self.symbols.len(),
            exchange = self.exchange.name(),
            loop_secs = bot.loop_interval_secs,
            "🚀 Bot running"
        );

        loop {
            tokio::select! {
                _ = trading.tick() => self.run_trading_cycle().await,
                _ = trailing.tick() => self.refresh_trailing().await,
                _ = reconcile.tick() => self.reconcile_all().await,
                _ = pnl.tick() => self.report_pnl(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("🛑 Shutdown requested, stopping loops");
        if let Err(e) = retrain.await {
            error!(error = %e, "Retrain task panicked");
        }
        self.report_pnl();
        Ok(())
    }
}

fn interval(secs: u64) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{Balance, ExchangeError, MockExchange, OrderAck, Ticker};
    use crate::types::{Bar, Side};

    /// Steady uptrend with rising volume: every long condition holds
    fn uptrend(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 * 0.5;
                Bar::new(i as i64 * 3_600_000, c - 0.2, c + 0.3, c - 0.4, c, 100.0 + i as f64)
            })
            .collect()
    }

    fn config(tag: &str) -> AppConfig {
        let mut cfg = AppConfig::load().expect("defaults should load");
        let base = std::env::temp_dir().join(format!("quantedge-{tag}-{}", uuid::Uuid::new_v4()));
        cfg.persistence.data_dir = base.join("data").to_string_lossy().to_string();
        cfg.model.weights_dir = base.join("weights").to_string_lossy().to_string();
        cfg.strategy.funding_filter_pct = None;
        cfg.execution.entry_mode = "market".into();
        cfg
    }

    fn trading_exchange(n_bars: usize) -> MockExchange {
        let mut ex = MockExchange::new();
        ex.expect_fetch_bars()
            .returning(move |_, _, _| Ok(uptrend(n_bars)));
        ex.expect_fetch_positions().returning(|_| Ok(vec![]));
        ex.expect_fetch_balance().returning(|| {
            Ok(Balance {
                equity: 1000.0,
                available: 1000.0,
            })
        });
        ex.expect_set_leverage().returning(|_, _, _| Ok(()));
        ex.expect_place_order().returning(|o| {
            Ok(OrderAck {
                order_id: uuid::Uuid::new_v4().to_string(),
                avg_price: o.price.or(Some(199.5)),
                status: "FILLED".into(),
            })
        });
        ex.expect_fetch_ticker().returning(|s| {
            Ok(Ticker {
                symbol: s.to_string(),
                last_price: 199.5,
            })
        });
        ex.expect_fetch_open_orders().returning(|_| Ok(vec![]));
        ex
    }

    fn bot(cfg: AppConfig, ex: MockExchange) -> Bot {
        Bot::with_symbols(cfg, Arc::new(ex), vec!["BTC-USDT".into()], Notifier::disabled()).unwrap()
    }

    #[tokio::test]
    async fn test_neutral_confidence_blocks_entry() {
        let b = bot(config("gate"), trading_exchange(200));
        let decision = b.evaluate_symbol("BTC-USDT").await.unwrap();
        assert_eq!(decision, Decision::Hold(HoldReason::LowConfidence));
        assert!(!b.trader("BTC-USDT").unwrap().lock().await.has_position());
    }

    #[tokio::test]
    async fn test_entry_then_position_and_cooldown() {
        let mut cfg = config("entry");
        cfg.strategy.confidence_threshold = 0.4;
        let b = bot(cfg, trading_exchange(200));

        let decision = b.evaluate_symbol("BTC-USDT").await.unwrap();
        assert_eq!(decision, Decision::Enter(Side::Buy));
        {
            let trader = b.trader("BTC-USDT").unwrap().lock().await;
            let pos = trader.position().unwrap();
            assert_eq!(pos.side, Side::Buy);
            assert!(pos.amount >= 0.001);
        }
        assert_eq!(
            b.evaluate_symbol("BTC-USDT").await.unwrap(),
            Decision::Hold(HoldReason::PositionOpen)
        );

        // Exchange reports flat: closed, journaled, and still cooling down
        b.reconcile_all().await;
        assert!(!b.trader("BTC-USDT").unwrap().lock().await.has_position());
        assert_eq!(b.journal().load_closed_trades().unwrap().len(), 1);
        assert_eq!(
            b.evaluate_symbol("BTC-USDT").await.unwrap(),
            Decision::Hold(HoldReason::Cooldown)
        );
    }

    fn rejecting_exchange(err: fn() -> ExchangeError) -> MockExchange {
        let mut ex = MockExchange::new();
        ex.expect_fetch_bars().returning(|_, _, _| Ok(uptrend(200)));
        ex.expect_fetch_positions().returning(|_| Ok(vec![]));
        ex.expect_fetch_balance().returning(|| {
            Ok(Balance {
                equity: 1000.0,
                available: 1000.0,
            })
        });
        ex.expect_place_order().returning(move |_| Err(err()));
        ex
    }

    #[tokio::test]
    async fn test_permanent_rejection_skips_bar() {
        let mut cfg = config("rejected");
        cfg.strategy.confidence_threshold = 0.4;
        let b = bot(
            cfg,
            rejecting_exchange(|| {
                ExchangeError::classify(crate::exchange::error::CODE_TRADING_BLOCKED, "trading blocked")
            }),
        );

        assert!(b.evaluate_symbol("BTC-USDT").await.is_err());
        assert_eq!(
            b.evaluate_symbol("BTC-USDT").await.unwrap(),
            Decision::Hold(HoldReason::DuplicateBar)
        );
    }

    #[tokio::test]
    async fn test_transient_rejection_retries_same_bar() {
        let mut cfg = config("transient");
        cfg.strategy.confidence_threshold = 0.4;
        let b = bot(
            cfg,
            rejecting_exchange(|| ExchangeError::PendingOrders("busy".into())),
        );

        assert!(b.evaluate_symbol("BTC-USDT").await.is_err());
        assert!(b.evaluate_symbol("BTC-USDT").await.is_err());
    }

    #[tokio::test]
    async fn test_short_window_is_warmup() {
        let b = bot(config("warmup"), trading_exchange(50));
        assert_eq!(
            b.evaluate_symbol("BTC-USDT").await.unwrap(),
            Decision::Hold(HoldReason::Warmup)
        );
    }

    #[tokio::test]
    async fn test_cycle_survives_symbol_errors() {
        let mut ex = MockExchange::new();
        ex.expect_fetch_bars()
            .returning(|s, _, _| Err(ExchangeError::NoData(s.to_string())));
        let b = Bot::with_symbols(
            config("errors"),
            Arc::new(ex),
            vec!["BTC-USDT".into(), "ETH-USDT".into()],
            Notifier::disabled(),
        )
        .unwrap();
        assert!(b.evaluate_symbol("BTC-USDT").await.is_err());
        b.run_trading_cycle().await;
        assert!(b.evaluate_symbol("DOGE-USDT").await.is_err());
    }

    #[tokio::test]
    async fn test_retrain_swaps_model() {
        let mut cfg = config("retrain");
        cfg.model.lookbacks = vec![6, 10];
        cfg.model.hidden1 = 4;
        cfg.model.hidden2 = 3;
        cfg.model.dense_units = 2;
        cfg.model.dropout = 0.0;
        cfg.model.epochs = 1;
        cfg.model.train_fetch_bars = 300;
        cfg.model.min_train_bars = 250;
        cfg.model.accuracy_floor = 0.0;
        let b = bot(cfg, trading_exchange(300));

        assert!(b.models().read().await.is_empty());
        let mut cursor = 0;
        assert_eq!(b.retrain_targets(&mut cursor).await, vec!["BTC-USDT".to_string()]);
        assert_eq!(cursor, 0);

        assert!(b.train_and_swap("BTC-USDT").await.unwrap());
        let models = b.models();
        let map = models.read().await;
        assert!(map.get("BTC-USDT").unwrap().ensemble.is_trained());
    }

    #[test]
    fn test_shutdown_stops_run() {
        tokio_test::block_on(async {
            let mut cfg = config("shutdown");
            cfg.model.retrain_interval_secs = 3600;
            let mut ex = MockExchange::new();
            ex.expect_name().return_const("mock");
            ex.expect_fetch_bars()
                .returning(|s, _, _| Err(ExchangeError::NoData(s.to_string())));
            ex.expect_fetch_positions().returning(|_| Ok(vec![]));
            let b = Arc::new(bot(cfg, ex));

            let (tx, rx) = watch::channel(false);
            let handle = tokio::spawn(b.clone().run(rx));
            tokio::task::yield_now().await;
            tx.send(true).unwrap();
            handle.await.unwrap().unwrap();
            assert!(std::path::Path::new(&b.config.persistence.data_dir)
                .join(crate::persistence::PNL_SNAPSHOT_FILE)
                .exists());
        });
    }
}
