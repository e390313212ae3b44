//! Error taxonomy for the engine and its collaborators.
//!
//! None of these are fatal: ingestion drops the offending event, settlement
//! puts the order back, the feed and store degrade to "no update".

use thiserror::Error;

/// Reasons an inbound event is rejected at the boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MalformedEventError {
    #[error("invalid json: {0}")]
    InvalidJson(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("unknown event kind `{0}`")]
    UnknownEvent(String),

    #[error("unknown side `{0}`")]
    UnknownSide(String),

    #[error("unparsable {field}: `{value}`")]
    Unparsable { field: &'static str, value: String },

    #[error("{field} must be positive, got {value}")]
    NotPositive { field: &'static str, value: String },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("malformed event: {0}")]
    Malformed(#[from] MalformedEventError),

    #[error("duplicate order id: {order_id}")]
    DuplicateOrder { order_id: String },

    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },

    /// The order is checked out by a settlement in progress. Retry later.
    #[error("order {order_id} is being settled")]
    OrderInFlight { order_id: String },
}

impl IngestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IngestError::OrderInFlight { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    #[error("insufficient funds in account {account_id}: required {required}, available {available}")]
    InsufficientFunds {
        account_id: String,
        required: i64,
        available: i64,
    },

    #[error("insufficient position in {symbol} for account {account_id}")]
    InsufficientPosition { account_id: String, symbol: String },

    #[error("amount out of range for account {account_id}")]
    Overflow { account_id: String },

    #[error("account service unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    #[error("account mutation failed: {0}")]
    Account(#[from] AccountError),

    #[error("cash amount overflows the cent range")]
    CashOverflow,

    #[error("account collaborator aborted: {0}")]
    Collaborator(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("price feed unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("event store write failed: {0}")]
    Write(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
