//! Exchange error classification

use thiserror::Error;

/// BingX: symbol is blocked from trading
pub const CODE_TRADING_BLOCKED: i64 = 101415;
/// BingX: request conflicts with pending orders
pub const CODE_PENDING_ORDERS: i64 = 101212;
/// BingX: signature verification failed
pub const CODE_BAD_SIGNATURE: i64 = 100001;
/// BingX: unknown or disabled api key
pub const CODE_BAD_API_KEY: i64 = 100413;

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("position does not exist: {0}")]
    PositionNotFound(String),
    #[error("invalid order quantity: {0}")]
    InvalidQuantity(String),
    #[error("trading blocked (101415): {0}")]
    TradingBlocked(String),
    #[error("pending orders block the request (101212): {0}")]
    PendingOrders(String),
    #[error("invalid order type: {0}")]
    InvalidOrderType(String),
    #[error("reduce-only order rejected: {0}")]
    ReduceOnlyRejected(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("exchange error {code}: {msg}")]
    Api { code: i64, msg: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("no data returned for {0}")]
    NoData(String),
}

impl ExchangeError {
    /// Map an API error code and message onto a variant.
    pub fn classify(code: i64, msg: &str) -> Self {
        let msg_owned = msg.to_string();
        let lower = msg.to_lowercase();
        match code {
            CODE_TRADING_BLOCKED => return ExchangeError::TradingBlocked(msg_owned),
            CODE_PENDING_ORDERS => return ExchangeError::PendingOrders(msg_owned),
            CODE_BAD_SIGNATURE | CODE_BAD_API_KEY => return ExchangeError::Auth(msg_owned),
            _ => {}
        }
        if lower.contains("position not exist") || lower.contains("position does not exist") {
            ExchangeError::PositionNotFound(msg_owned)
        } else if lower.contains("invalid order quantity") {
            ExchangeError::InvalidQuantity(msg_owned)
        } else if lower.contains("invalid order type") {
            ExchangeError::InvalidOrderType(msg_owned)
        } else if lower.contains("reduceonly") || lower.contains("reduce only") {
            ExchangeError::ReduceOnlyRejected(msg_owned)
        } else {
            ExchangeError::Api {
                code,
                msg: msg_owned,
            }
        }
    }

    /// The exchange has nothing to close or protect
    pub fn is_position_missing(&self) -> bool {
        matches!(self, ExchangeError::PositionNotFound(_))
    }

    /// Retrying the same request later cannot succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            ExchangeError::InvalidQuantity(_)
                | ExchangeError::InvalidOrderType(_)
                | ExchangeError::TradingBlocked(_)
                | ExchangeError::Auth(_)
        )
    }
}
