pub mod types;
pub mod engine;
pub mod account;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod event_store;
pub mod orderbook;
pub mod runtime;
pub mod settlement;
pub mod ticker;

pub use types::{
    Order, OrderBookEntry, OrderBookSnapshot, OrderSide, OrderStatus, Ticker, Trade,
};
pub use engine::TradingEngine;
pub use account::{AccountService, InMemoryAccountService};
pub use commands::{CancelOrderCommand, MakeOrderCommand, OrderCommand, RawOrderEvent};
pub use config::EngineConfig;
pub use error::{
    AccountError, ConfigError, FeedError, IngestError, MalformedEventError, SettlementError,
    StoreError,
};
pub use events::{OrderAcceptedEvent, OrderCanceledEvent, OrderEvent, OrderFilledEvent};
pub use event_store::{EventStore, InMemoryEventStore};
pub use orderbook::{AskQueue, BidQueue, OrderBook};
pub use runtime::{order_channel, EngineRuntime};
pub use ticker::{PriceFeed, StaticPriceFeed, TickerCache};
