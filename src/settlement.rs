use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::account::AccountService;
use crate::error::SettlementError;
use crate::types::{Order, OrderSide, OrderStatus, Trade};

/// A confirmed fill together with the cash figures handed to the account.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub trade: Trade,
    pub order_cash: i64,
    pub actual_cash: i64,
}

/// `round(price * quantity)` in cents. Halves round to even.
pub fn cash_cents(price: Decimal, quantity: Decimal) -> Result<i64, SettlementError> {
    price
        .checked_mul(quantity)
        .and_then(|notional| notional.checked_mul(Decimal::ONE_HUNDRED))
        .and_then(|cents| cents.round().to_i64())
        .ok_or(SettlementError::CashOverflow)
}

/// Fills the whole resting quantity of `order` at `fill_price`.
///
/// The order is only touched once the account accepts the mutation, so on
/// `Err` it is exactly as it was. An order that is already closed settles
/// to `Ok(None)`.
pub fn close_order(
    accounts: &dyn AccountService,
    order: &mut Order,
    fill_price: Decimal,
    fill_time: DateTime<Utc>,
) -> Result<Option<Settlement>, SettlementError> {
    if !order.is_open() {
        return Ok(None);
    }

    let quantity = order.leaves_quantity();
    let order_cash = cash_cents(order.price, quantity)?;
    let actual_cash = cash_cents(fill_price, quantity)?;

    match order.side {
        OrderSide::Buy => accounts.open_position(
            &order.account_id,
            &order.symbol,
            quantity,
            order_cash,
            actual_cash,
        )?,
        OrderSide::Sell => {
            accounts.close_position(&order.account_id, &order.symbol, quantity, actual_cash)?
        }
    }

    order.cumulative_filled_quantity += quantity;
    order.fill_price = Some(fill_price);
    order.fill_time = Some(fill_time);
    order.status = OrderStatus::Closed;

    let trade = Trade {
        trade_id: Uuid::new_v4(),
        order_id: order.order_id.clone(),
        account_id: order.account_id.clone(),
        symbol: order.symbol.clone(),
        trade_price: fill_price,
        trade_quantity: quantity,
        trade_side: order.side,
        created_at: fill_time,
    };

    Ok(Some(Settlement {
        trade,
        order_cash,
        actual_cash,
    }))
}
