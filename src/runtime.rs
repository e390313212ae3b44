//! Background activities of a running engine.
//!
//! Four tasks share one `TradingEngine`: inbound order ingestion, ticker
//! refresh (live mode only), the matching tick and the watchdog. The
//! watchdog owns the tick task and replaces it when the heartbeat goes
//! stale. Every stop is cooperative: a tick in progress always finishes,
//! so a checked-out order ends up either closed or back in its book.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::TradingEngine;
use crate::ticker::PriceFeed;

/// Inbound queue carrying raw JSON order events.
pub fn order_channel(capacity: usize) -> (mpsc::Sender<String>, mpsc::Receiver<String>) {
    mpsc::channel(capacity)
}

/// Handle on a running engine's tasks.
pub struct EngineRuntime {
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
}

impl EngineRuntime {
    pub fn start(
        engine: Arc<TradingEngine>,
        orders: mpsc::Receiver<String>,
        feed: Option<Arc<dyn PriceFeed>>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::new();

        tasks.push((
            "ingestion",
            tokio::spawn(run_ingestion(engine.clone(), orders, shutdown.subscribe())),
        ));

        match (engine.config().live, feed) {
            (true, Some(feed)) => tasks.push((
                "ticker-refresh",
                tokio::spawn(run_ticker_refresh(engine.clone(), feed, shutdown.subscribe())),
            )),
            (true, None) => warn!("live mode without a price feed, tickers will only change when pushed"),
            (false, _) => info!("simulation mode, periodic ticker refresh disabled"),
        }

        tasks.push((
            "watchdog",
            tokio::spawn(run_watchdog(engine.clone(), shutdown.subscribe())),
        ));

        info!(symbols = ?engine.symbols(), "engine runtime started");
        Self { shutdown, tasks }
    }

    /// Signals every task to stop and waits for them. The tick task finishes
    /// the tick it is in before exiting.
    pub async fn shutdown(self) {
        self.shutdown.send_replace(true);
        for (name, handle) in self.tasks {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "task ended abnormally");
            }
        }
        info!("engine runtime stopped");
    }
}

async fn run_ingestion(
    engine: Arc<TradingEngine>,
    mut orders: mpsc::Receiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            _ = shutdown.changed() => break,
            payload = orders.recv() => match payload {
                Some(payload) => payload,
                None => {
                    warn!("inbound order queue closed, no new orders will be ingested");
                    break;
                }
            },
        };

        match engine.ingest(&payload).await {
            Ok(event) => debug!(order_id = event.order_id(), "inbound event applied"),
            Err(e) if e.is_retryable() => warn!(error = %e, "inbound event conflicts with settlement, dropped"),
            Err(e) => warn!(error = %e, "inbound event dropped"),
        }
    }
}

async fn run_ticker_refresh(
    engine: Arc<TradingEngine>,
    feed: Arc<dyn PriceFeed>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(engine.config().ticker_refresh_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = engine.refresh_tickers(feed.as_ref()).await {
            warn!(error = %e, "ticker refresh failed, matching continues on cached prices");
        }
    }
}

/// A running tick loop with its own stop signal.
struct TickTask {
    generation: u64,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl TickTask {
    fn spawn(engine: Arc<TradingEngine>, generation: u64) -> Self {
        let (stop, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_ticks(engine, stop_rx, generation));
        Self {
            generation,
            stop,
            handle,
        }
    }

    /// Asks the loop to exit after its current tick, without waiting.
    fn request_stop(&self) {
        self.stop.send_replace(true);
    }

    async fn stop(self) {
        self.request_stop();
        if let Err(e) = self.handle.await {
            error!(generation = self.generation, error = %e, "tick task ended abnormally");
        }
    }
}

async fn run_ticks(engine: Arc<TradingEngine>, mut stop: watch::Receiver<bool>, generation: u64) {
    let mut ticker = interval(engine.config().tick_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(generation, "tick task started");
    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            _ = ticker.tick() => {}
        }
        // Not raced against `stop`: a tick is never abandoned halfway.
        engine.trade(None).await;
    }
    debug!(generation, "tick task stopped");
}

async fn run_watchdog(engine: Arc<TradingEngine>, mut shutdown: watch::Receiver<bool>) {
    let threshold = engine.config().watchdog_restart_threshold();
    let mut generation = 0;
    let mut current = TickTask::spawn(engine.clone(), generation);
    let mut retired: Vec<TickTask> = Vec::new();
    let mut restarted_at = Instant::now();

    let mut ticker = interval(engine.config().watchdog_period());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let last_alive = engine.last_tick().max(restarted_at);
        let stalled_for = last_alive.elapsed();
        if stalled_for <= threshold {
            continue;
        }

        generation += 1;
        let restarts = engine.record_restart();
        warn!(
            stalled_for = ?stalled_for,
            threshold = ?threshold,
            generation,
            restarts,
            "tick loop stalled, restarting"
        );
        current.request_stop();
        retired.retain(|task| !task.handle.is_finished());
        retired.push(std::mem::replace(
            &mut current,
            TickTask::spawn(engine.clone(), generation),
        ));
        restarted_at = Instant::now();
    }

    current.stop().await;
    for task in retired {
        task.stop().await;
    }
}

