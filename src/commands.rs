use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::MalformedEventError;
use crate::types::{Order, OrderSide};

/// Validated order intent. Every field required by the variant is present
/// and parsed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderCommand {
    Make(MakeOrderCommand),
    Cancel(CancelOrderCommand),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MakeOrderCommand {
    pub order_id: String,
    pub account_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub quantity: Decimal,
    pub order_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelOrderCommand {
    pub order_id: String,
    pub symbol: String,
}

/// Wire shape of an inbound event, as delivered by the transport:
///
/// ```json
/// {"event": "make", "symbol": "ABC", "order_id": "1", "side": "buy",
///  "price": "10.50", "quantity": 5, "order_time": "2024-03-01T09:30:00Z",
///  "account_id": "acct-1"}
/// ```
///
/// Prices and quantities may arrive as JSON strings or numbers.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOrderEvent {
    pub event: Option<String>,
    pub symbol: Option<String>,
    pub order_id: Option<Value>,
    pub side: Option<String>,
    pub price: Option<Value>,
    pub quantity: Option<Value>,
    pub order_time: Option<String>,
    pub account_id: Option<Value>,
}

impl OrderCommand {
    pub fn symbol(&self) -> &str {
        match self {
            OrderCommand::Make(cmd) => &cmd.symbol,
            OrderCommand::Cancel(cmd) => &cmd.symbol,
        }
    }

    pub fn order_id(&self) -> &str {
        match self {
            OrderCommand::Make(cmd) => &cmd.order_id,
            OrderCommand::Cancel(cmd) => &cmd.order_id,
        }
    }

    pub fn from_json(payload: &str) -> Result<Self, MalformedEventError> {
        let raw: RawOrderEvent = serde_json::from_str(payload)
            .map_err(|e| MalformedEventError::InvalidJson(e.to_string()))?;
        Self::try_from(raw)
    }
}

impl TryFrom<RawOrderEvent> for OrderCommand {
    type Error = MalformedEventError;

    fn try_from(raw: RawOrderEvent) -> Result<Self, Self::Error> {
        let event = raw.event.ok_or(MalformedEventError::MissingField("event"))?;
        let symbol = non_empty(raw.symbol, "symbol")?;
        let order_id = identifier(raw.order_id, "order_id")?;

        match event.to_ascii_lowercase().as_str() {
            "make" => {
                let side = parse_side(raw.side)?;
                let price = positive_decimal(raw.price, "price")?;
                let quantity = positive_decimal(raw.quantity, "quantity")?;
                let order_time = parse_time(raw.order_time)?;
                let account_id = identifier(raw.account_id, "account_id")?;
                Ok(OrderCommand::Make(MakeOrderCommand {
                    order_id,
                    account_id,
                    symbol,
                    side,
                    price,
                    quantity,
                    order_time,
                }))
            }
            "cancel" => Ok(OrderCommand::Cancel(CancelOrderCommand { order_id, symbol })),
            _ => Err(MalformedEventError::UnknownEvent(event)),
        }
    }
}

impl From<MakeOrderCommand> for Order {
    fn from(cmd: MakeOrderCommand) -> Self {
        Order::new(
            cmd.order_id,
            cmd.account_id,
            cmd.symbol,
            cmd.side,
            cmd.price,
            cmd.quantity,
            cmd.order_time,
        )
    }
}

fn non_empty(value: Option<String>, field: &'static str) -> Result<String, MalformedEventError> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(MalformedEventError::MissingField(field)),
    }
}

// Ids show up as strings or bare integers depending on the producer.
fn identifier(value: Option<Value>, field: &'static str) -> Result<String, MalformedEventError> {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        None | Some(Value::Null) | Some(Value::String(_)) => {
            Err(MalformedEventError::MissingField(field))
        }
        Some(other) => Err(MalformedEventError::Unparsable {
            field,
            value: other.to_string(),
        }),
    }
}

fn parse_side(value: Option<String>) -> Result<OrderSide, MalformedEventError> {
    let side = value.ok_or(MalformedEventError::MissingField("side"))?;
    match side.to_ascii_lowercase().as_str() {
        "buy" => Ok(OrderSide::Buy),
        "sell" => Ok(OrderSide::Sell),
        _ => Err(MalformedEventError::UnknownSide(side)),
    }
}

fn positive_decimal(value: Option<Value>, field: &'static str) -> Result<Decimal, MalformedEventError> {
    let text = match value {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        None | Some(Value::Null) => return Err(MalformedEventError::MissingField(field)),
        Some(other) => other.to_string(),
    };
    let parsed = Decimal::from_str(text.trim())
        .or_else(|_| Decimal::from_scientific(text.trim()))
        .map_err(|_| MalformedEventError::Unparsable {
            field,
            value: text.clone(),
        })?;
    if parsed <= Decimal::ZERO {
        return Err(MalformedEventError::NotPositive {
            field,
            value: parsed.to_string(),
        });
    }
    Ok(parsed)
}

/// Accepts RFC 3339 and naive ISO-8601 timestamps; naive ones are taken as UTC.
fn parse_time(value: Option<String>) -> Result<DateTime<Utc>, MalformedEventError> {
    let text = value.ok_or(MalformedEventError::MissingField("order_time"))?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&text) {
        return Ok(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::from_str(&text)
        .map(|naive| naive.and_utc())
        .map_err(|_| MalformedEventError::Unparsable {
            field: "order_time",
            value: text,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    const MAKE: &str = r#"{"event": "make", "symbol": "ABC", "order_id": "1", "side": "buy",
        "price": "10.50", "quantity": 5, "order_time": "2024-03-01T09:30:00Z", "account_id": "acct-1"}"#;

    #[test]
    fn test_parse_make_event() {
        let cmd = OrderCommand::from_json(MAKE).unwrap();
        let OrderCommand::Make(make) = cmd else {
            panic!("expected make");
        };
        assert_eq!(make.order_id, "1");
        assert_eq!(make.side, OrderSide::Buy);
        assert_eq!(make.price, Decimal::new(1050, 2));
        assert_eq!(make.quantity, Decimal::from(5));
        assert_eq!(make.order_time, Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_numeric_ids_and_naive_time() {
        let payload = r#"{"event": "make", "symbol": "ABC", "order_id": 7, "side": "SELL",
            "price": 9.95, "quantity": "3", "order_time": "2024-03-01T09:30:00.250", "account_id": 42}"#;
        let OrderCommand::Make(make) = OrderCommand::from_json(payload).unwrap() else {
            panic!("expected make");
        };
        assert_eq!(make.order_id, "7");
        assert_eq!(make.account_id, "42");
        assert_eq!(make.side, OrderSide::Sell);
        assert_eq!(make.price, Decimal::new(995, 2));
    }

    #[test]
    fn test_parse_cancel_needs_only_id_and_symbol() {
        let cmd = OrderCommand::from_json(r#"{"event": "cancel", "symbol": "ABC", "order_id": "1"}"#).unwrap();
        assert_eq!(
            cmd,
            OrderCommand::Cancel(CancelOrderCommand {
                order_id: "1".into(),
                symbol: "ABC".into()
            })
        );
    }

    #[test]
    fn test_missing_field_is_malformed() {
        let payload = MAKE.replace(r#""account_id": "acct-1""#, r#""account_id": null"#);
        assert_eq!(
            OrderCommand::from_json(&payload),
            Err(MalformedEventError::MissingField("account_id"))
        );
    }

    #[test]
    fn test_bad_price_and_time_are_malformed() {
        let bad_price = MAKE.replace(r#""10.50""#, r#""ten""#);
        assert!(matches!(
            OrderCommand::from_json(&bad_price),
            Err(MalformedEventError::Unparsable { field: "price", .. })
        ));

        let negative = MAKE.replace(r#""10.50""#, r#""-1""#);
        assert!(matches!(
            OrderCommand::from_json(&negative),
            Err(MalformedEventError::NotPositive { field: "price", .. })
        ));

        let bad_time = MAKE.replace("2024-03-01T09:30:00Z", "yesterday");
        assert!(matches!(
            OrderCommand::from_json(&bad_time),
            Err(MalformedEventError::Unparsable { field: "order_time", .. })
        ));
    }

    #[test]
    fn test_unknown_event_and_side() {
        let modify = MAKE.replace(r#""make""#, r#""modify""#);
        assert_eq!(
            OrderCommand::from_json(&modify),
            Err(MalformedEventError::UnknownEvent("modify".into()))
        );
        let hold = MAKE.replace(r#""buy""#, r#""hold""#);
        assert_eq!(
            OrderCommand::from_json(&hold),
            Err(MalformedEventError::UnknownSide("hold".into()))
        );
        assert!(matches!(
            OrderCommand::from_json("not json"),
            Err(MalformedEventError::InvalidJson(_))
        ));
    }
}
