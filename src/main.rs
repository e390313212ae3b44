use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::Parser;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn, Level};

use sim_matching_engine::{
    order_channel, EngineConfig, EngineRuntime, InMemoryAccountService, InMemoryEventStore,
    PriceFeed, StaticPriceFeed, Ticker, TradingEngine,
};

/// Runs the matching engine, reading JSON order events from stdin, one per line.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// TOML engine config; defaults apply when omitted.
    #[arg(long)]
    config: Option<String>,

    /// Disable periodic ticker refresh; `--price` values are applied once.
    #[arg(long)]
    simulate: bool,

    /// Reference price, as SYMBOL=PRICE. Repeatable.
    #[arg(long = "price", value_parser = parse_price)]
    prices: Vec<(String, Decimal)>,

    /// Starting cash in cents for accounts seen for the first time.
    #[arg(long, default_value_t = 10_000_000)]
    default_cash: i64,

    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_price(s: &str) -> Result<(String, Decimal)> {
    let (symbol, price) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected SYMBOL=PRICE, got `{s}`"))?;
    let price = Decimal::from_str(price).with_context(|| format!("bad price in `{s}`"))?;
    Ok((symbol.to_string(), price))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = Level::from_str(&args.log_level).context("invalid --log-level")?;
    tracing_subscriber::fmt().with_max_level(level).init();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_toml(path)?,
        None => EngineConfig::default(),
    };
    if args.simulate {
        config.live = false;
    }

    let accounts = Arc::new(InMemoryAccountService::with_default_cash(args.default_cash));
    let store = Arc::new(InMemoryEventStore::new());
    let engine = Arc::new(TradingEngine::new(config.clone(), accounts, store)?);

    let feed = Arc::new(StaticPriceFeed::new());
    let now = Utc::now();
    for (symbol, price) in &args.prices {
        feed.set_price(symbol.clone(), Ticker::new(*price, now));
    }
    if !config.live {
        let snapshot: HashMap<String, Ticker> = args
            .prices
            .iter()
            .map(|(symbol, price)| (symbol.clone(), Ticker::new(*price, now)))
            .collect();
        engine.update_ticker(snapshot);
    }

    let (tx, rx) = order_channel(config.order_queue_capacity);
    let feed: Arc<dyn PriceFeed> = feed;
    let runtime = EngineRuntime::start(engine.clone(), rx, Some(feed));

    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    info!("end of input, engine keeps matching resting orders");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;
    info!("shutdown requested");
    reader.abort();
    runtime.shutdown().await;

    for symbol in engine.symbols() {
        if let Some(snapshot) = engine.order_book(symbol).await {
            info!(
                symbol = %snapshot.symbol,
                bid_levels = snapshot.bids.len(),
                ask_levels = snapshot.asks.len(),
                "final book"
            );
        }
    }
    info!(
        ticks = engine.tick_count(),
        restarts = engine.restart_count(),
        "engine stopped"
    );
    Ok(())
}
