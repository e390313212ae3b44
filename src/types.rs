use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Closed,
}

/// A resting limit order.
///
/// `leaves_quantity` is derived from `quantity` and `cumulative_filled_quantity`
/// and is never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub cumulative_filled_quantity: Decimal,
    pub order_time: DateTime<Utc>,
    pub status: OrderStatus,
    pub fill_price: Option<Decimal>,
    pub fill_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_id: Uuid,
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub trade_price: Decimal,
    pub trade_quantity: Decimal,
    pub trade_side: OrderSide,
    pub created_at: DateTime<Utc>,
}

/// Latest reference price for a symbol.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub price: Decimal,
    pub as_of: DateTime<Utc>,
}

/// Point-in-time view of one symbol's book, best levels first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub symbol: String,
    pub bids: Vec<OrderBookEntry>,
    pub asks: Vec<OrderBookEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookEntry {
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_count: u64,
}

impl Order {
    pub fn new(
        order_id: impl Into<String>,
        account_id: impl Into<String>,
        symbol: impl Into<String>,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
        order_time: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            account_id: account_id.into(),
            symbol: symbol.into(),
            side,
            price,
            quantity,
            cumulative_filled_quantity: Decimal::ZERO,
            order_time,
            status: OrderStatus::Open,
            fill_price: None,
            fill_time: None,
        }
    }

    pub fn leaves_quantity(&self) -> Decimal {
        self.quantity - self.cumulative_filled_quantity
    }

    pub fn is_open(&self) -> bool {
        self.status == OrderStatus::Open
    }

    /// Whether this order crosses `reference_price`: a bid at or above it,
    /// or an ask at or below it.
    pub fn crosses(&self, reference_price: Decimal) -> bool {
        match self.side {
            OrderSide::Buy => self.price >= reference_price,
            OrderSide::Sell => self.price <= reference_price,
        }
    }
}

impl Ticker {
    pub fn new(price: Decimal, as_of: DateTime<Utc>) -> Self {
        Self { price, as_of }
    }
}

impl OrderBookSnapshot {
    pub fn new(symbol: String) -> Self {
        Self {
            symbol,
            bids: Vec::new(),
            asks: Vec::new(),
        }
    }
}
