use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::{OrderSide, Trade};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderAccepted(OrderAcceptedEvent),
    OrderCanceled(OrderCanceledEvent),
    OrderFilled(OrderFilledEvent),
}

impl OrderEvent {
    pub fn order_id(&self) -> &str {
        match self {
            OrderEvent::OrderAccepted(e) => &e.order_id,
            OrderEvent::OrderCanceled(e) => &e.order_id,
            OrderEvent::OrderFilled(e) => &e.trade.order_id,
        }
    }

    pub fn trade(&self) -> Option<&Trade> {
        match self {
            OrderEvent::OrderFilled(e) => Some(&e.trade),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAcceptedEvent {
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCanceledEvent {
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
}

/// One settlement. `order_cash` and `actual_cash` are in cents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderFilledEvent {
    pub trade: Trade,
    pub order_cash: i64,
    pub actual_cash: i64,
}
