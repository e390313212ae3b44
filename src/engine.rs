use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::account::AccountService;
use crate::commands::{CancelOrderCommand, MakeOrderCommand, OrderCommand};
use crate::config::EngineConfig;
use crate::error::{ConfigError, FeedError, IngestError, SettlementError};
use crate::event_store::EventStore;
use crate::events::{OrderAcceptedEvent, OrderCanceledEvent, OrderEvent, OrderFilledEvent};
use crate::orderbook::OrderBook;
use crate::settlement;
use crate::ticker::{PriceFeed, TickerCache};
use crate::types::{Order, OrderBookSnapshot, OrderSide, Ticker, Trade};

/// Reference-price triggered matching over one order book per symbol.
///
/// Each book sits behind its own lock. Nothing here takes more than one
/// book lock at a time, and no lock is held across a call into the account
/// collaborator: a popped order is checked out in its book, still ranked
/// in views of it, until settlement either closes it or restores it.
pub struct TradingEngine {
    config: EngineConfig,
    symbols: Vec<String>,
    books: HashMap<String, Mutex<OrderBook>>,
    tickers: TickerCache,
    accounts: Arc<dyn AccountService>,
    event_store: Arc<dyn EventStore>,
    heartbeat: watch::Sender<Instant>,
    ticks: AtomicU64,
    restarts: AtomicU64,
}

impl TradingEngine {
    pub fn new(
        config: EngineConfig,
        accounts: Arc<dyn AccountService>,
        event_store: Arc<dyn EventStore>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let symbols = config.resolved_symbols();
        let books = symbols
            .iter()
            .map(|symbol| (symbol.clone(), Mutex::new(OrderBook::new(symbol.clone()))))
            .collect();
        let (heartbeat, _) = watch::channel(Instant::now());
        info!(symbols = ?symbols, "trading engine created");

        Ok(Self {
            config,
            symbols,
            books,
            tickers: TickerCache::new(),
            accounts,
            event_store,
            heartbeat,
            ticks: AtomicU64::new(0),
            restarts: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn book(&self, symbol: &str) -> Option<&Mutex<OrderBook>> {
        self.books.get(symbol)
    }

    pub fn tickers(&self) -> &TickerCache {
        &self.tickers
    }

    /// Parses a wire payload and applies it.
    pub async fn ingest(&self, payload: &str) -> Result<OrderEvent, IngestError> {
        let command = OrderCommand::from_json(payload)?;
        self.process_order(command).await
    }

    pub async fn process_order(&self, command: OrderCommand) -> Result<OrderEvent, IngestError> {
        let book = self
            .books
            .get(command.symbol())
            .ok_or_else(|| IngestError::UnknownSymbol {
                symbol: command.symbol().to_string(),
            })?;

        let event = match command {
            OrderCommand::Make(cmd) => Self::make_order(book, cmd).await?,
            OrderCommand::Cancel(cmd) => Self::cancel_order(book, cmd).await?,
        };
        self.publish(vec![event.clone()]).await;
        Ok(event)
    }

    async fn make_order(book: &Mutex<OrderBook>, cmd: MakeOrderCommand) -> Result<OrderEvent, IngestError> {
        let order = Order::from(cmd);
        let event = OrderAcceptedEvent {
            order_id: order.order_id.clone(),
            account_id: order.account_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price: order.price,
            quantity: order.quantity,
            timestamp: order.order_time,
        };

        if !book.lock().await.add(order) {
            return Err(IngestError::DuplicateOrder {
                order_id: event.order_id,
            });
        }
        info!(
            symbol = %event.symbol,
            order_id = %event.order_id,
            side = ?event.side,
            price = %event.price,
            quantity = %event.quantity,
            "order accepted"
        );
        Ok(OrderEvent::OrderAccepted(event))
    }

    async fn cancel_order(book: &Mutex<OrderBook>, cmd: CancelOrderCommand) -> Result<OrderEvent, IngestError> {
        let order = book.lock().await.cancel(&cmd.order_id)?;
        info!(symbol = %order.symbol, order_id = %order.order_id, "order canceled");
        Ok(OrderEvent::OrderCanceled(OrderCanceledEvent {
            order_id: order.order_id,
            account_id: order.account_id,
            symbol: order.symbol,
            timestamp: Utc::now(),
        }))
    }

    pub fn update_ticker(&self, snapshot: HashMap<String, Ticker>) {
        self.tickers.update(snapshot);
    }

    pub fn set_reference_price(&self, symbol: &str, price: Decimal) {
        self.tickers.set(symbol, Ticker::new(price, Utc::now()));
    }

    /// Pulls prices for the configured symbols from `feed`.
    pub async fn refresh_tickers(&self, feed: &dyn PriceFeed) -> Result<usize, FeedError> {
        let snapshot = feed.snapshot(&self.symbols).await?;
        let updated = snapshot.len();
        self.tickers.update(snapshot);
        debug!(updated, "tickers refreshed");
        Ok(updated)
    }

    /// One matching tick over every symbol with a known reference price,
    /// optionally applying `new_ticker` first. Returns the trades settled.
    pub async fn trade(&self, new_ticker: Option<HashMap<String, Ticker>>) -> Vec<Trade> {
        let started = Instant::now();
        if let Some(snapshot) = new_ticker {
            self.tickers.update(snapshot);
        }

        let mut trades = Vec::new();
        for symbol in &self.symbols {
            let (Some(ticker), Some(book)) = (self.tickers.get(symbol), self.books.get(symbol)) else {
                continue;
            };
            for side in [OrderSide::Buy, OrderSide::Sell] {
                trades.extend(self.match_side(symbol, book, side, ticker.price).await);
            }
        }

        self.heartbeat.send_replace(Instant::now());
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        let elapsed = started.elapsed();
        if elapsed > self.config.tick_period() {
            warn!(tick, ?elapsed, "matching tick overran its period");
        } else {
            debug!(tick, ?elapsed, trades = trades.len(), "matching tick done");
        }
        trades
    }

    /// Evaluates the best order of `side` against `reference_price`; with
    /// `drain_crossable` keeps going while orders cross and settle.
    async fn match_side(
        &self,
        symbol: &str,
        book: &Mutex<OrderBook>,
        side: OrderSide,
        reference_price: Decimal,
    ) -> Vec<Trade> {
        let mut trades = Vec::new();
        loop {
            let order_id = {
                let mut book = book.lock().await;
                let Some(order) = book.pop_best(side) else {
                    break;
                };
                if !order.crosses(reference_price) {
                    if !book.restore(&order.order_id) {
                        warn!(symbol, order_id = %order.order_id, "checked-out order could not be restored");
                    }
                    break;
                }
                order.order_id
            };

            match self.settle_checked_out(book, &order_id, reference_price).await {
                Ok(Some(trade)) => trades.push(trade),
                Ok(None) => {}
                Err(e) => {
                    warn!(symbol, order_id = %order_id, error = %e, "settlement failed, order restored");
                    break;
                }
            }
            if !self.config.drain_crossable {
                break;
            }
        }
        trades
    }

    /// Settles an order that has been popped from `book`.
    ///
    /// The live order is looked up by id; the account call runs on the
    /// blocking pool with no lock held. On failure the order goes back to
    /// its queue from the untouched index copy.
    async fn settle_checked_out(
        &self,
        book: &Mutex<OrderBook>,
        order_id: &str,
        fill_price: Decimal,
    ) -> Result<Option<Trade>, SettlementError> {
        let Some(mut order) = book.lock().await.get(order_id).cloned() else {
            return Ok(None);
        };
        let accounts = Arc::clone(&self.accounts);
        let fill_time = Utc::now();

        let outcome = tokio::task::spawn_blocking(move || {
            settlement::close_order(accounts.as_ref(), &mut order, fill_price, fill_time)
        })
        .await
        .map_err(|e| SettlementError::Collaborator(e.to_string()))
        .and_then(|result| result);

        match outcome {
            Ok(Some(settled)) => {
                book.lock().await.finalize_close(order_id);
                let trade = settled.trade.clone();
                info!(
                    symbol = %trade.symbol,
                    order_id = %trade.order_id,
                    side = ?trade.trade_side,
                    price = %trade.trade_price,
                    quantity = %trade.trade_quantity,
                    actual_cash = settled.actual_cash,
                    "order closed"
                );
                self.publish(vec![OrderEvent::OrderFilled(OrderFilledEvent {
                    trade: settled.trade,
                    order_cash: settled.order_cash,
                    actual_cash: settled.actual_cash,
                })])
                .await;
                Ok(Some(trade))
            }
            Ok(None) => {
                book.lock().await.finalize_close(order_id);
                Ok(None)
            }
            Err(e) => {
                if !book.lock().await.restore(order_id) {
                    warn!(order_id, "order vanished while being settled, not restored");
                }
                Err(e)
            }
        }
    }

    async fn publish(&self, events: Vec<OrderEvent>) {
        if let Err(e) = self.event_store.save_events(events).await {
            error!(error = %e, "failed to publish order events");
        }
    }

    pub async fn order_book(&self, symbol: &str) -> Option<OrderBookSnapshot> {
        let book = self.books.get(symbol)?;
        let snapshot = book.lock().await.snapshot(self.config.snapshot_depth);
        Some(snapshot)
    }

    pub async fn order(&self, symbol: &str, order_id: &str) -> Option<Order> {
        let book = self.books.get(symbol)?;
        let order = book.lock().await.get(order_id).cloned();
        order
    }

    /// Completion time of the last tick, or engine creation before the first.
    pub fn last_tick(&self) -> Instant {
        *self.heartbeat.borrow()
    }

    pub fn subscribe_heartbeat(&self) -> watch::Receiver<Instant> {
        self.heartbeat.subscribe()
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub fn restart_count(&self) -> u64 {
        self.restarts.load(Ordering::Relaxed)
    }

    pub(crate) fn record_restart(&self) -> u64 {
        self.restarts.fetch_add(1, Ordering::Relaxed) + 1
    }
}
