//! Exchange types: order requests, acknowledgements and BingX wire formats

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{Bar, Side};

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopMarket,
    TakeProfitMarket,
}

impl OrderType {
    pub fn as_api(&self) -> &'static str {
        match self {
            OrderType::Market => "MARKET",
            OrderType::Limit => "LIMIT",
            OrderType::StopMarket => "STOP_MARKET",
            OrderType::TakeProfitMarket => "TAKE_PROFIT_MARKET",
        }
    }

    pub fn from_api(s: &str) -> Option<Self> {
        match s {
            "MARKET" => Some(OrderType::Market),
            "LIMIT" => Some(OrderType::Limit),
            "STOP_MARKET" | "STOP" => Some(OrderType::StopMarket),
            "TAKE_PROFIT_MARKET" | "TAKE_PROFIT" => Some(OrderType::TakeProfitMarket),
            _ => None,
        }
    }
}

/// Time in force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Gtc,
    PostOnly,
}

impl TimeInForce {
    pub fn as_api(&self) -> &'static str {
        match self {
            TimeInForce::Gtc => "GTC",
            TimeInForce::PostOnly => "PostOnly",
        }
    }
}

/// Order to submit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub price: Option<f64>,
    pub stop_price: Option<f64>,
    pub reduce_only: bool,
    pub time_in_force: Option<TimeInForce>,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    fn base(symbol: &str, side: Side, order_type: OrderType, quantity: f64) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            order_type,
            quantity,
            price: None,
            stop_price: None,
            reduce_only: false,
            time_in_force: None,
            client_order_id: Some(uuid::Uuid::new_v4().simple().to_string()),
        }
    }

    pub fn market(symbol: &str, side: Side, quantity: f64) -> Self {
        Self::base(symbol, side, OrderType::Market, quantity)
    }

    /// Maker-only limit entry
    pub fn post_only_limit(symbol: &str, side: Side, quantity: f64, price: f64) -> Self {
        let mut order = Self::base(symbol, side, OrderType::Limit, quantity);
        order.price = Some(price);
        order.time_in_force = Some(TimeInForce::PostOnly);
        order
    }

    /// Reduce-only protective stop. `side` is the closing side.
    pub fn stop_market(symbol: &str, side: Side, quantity: f64, stop_price: f64) -> Self {
        let mut order = Self::base(symbol, side, OrderType::StopMarket, quantity);
        order.stop_price = Some(stop_price);
        order.reduce_only = true;
        order
    }

    /// Reduce-only take-profit limit. `side` is the closing side.
    pub fn take_profit_limit(symbol: &str, side: Side, quantity: f64, price: f64) -> Self {
        let mut order = Self::base(symbol, side, OrderType::Limit, quantity);
        order.price = Some(price);
        order.time_in_force = Some(TimeInForce::Gtc);
        order.reduce_only = true;
        order
    }

    /// Query parameters in BingX form (unsigned)
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", self.symbol.clone()),
            ("side", self.side.as_api().to_string()),
            ("positionSide", "BOTH".to_string()),
            ("type", self.order_type.as_api().to_string()),
            ("quantity", format_decimal(self.quantity)),
        ];
        if let Some(price) = self.price {
            params.push(("price", format_decimal(price)));
        }
        if let Some(stop) = self.stop_price {
            params.push(("stopPrice", format_decimal(stop)));
        }
        if self.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        if let Some(tif) = self.time_in_force {
            params.push(("timeInForce", tif.as_api().to_string()));
        }
        if let Some(ref id) = self.client_order_id {
            params.push(("clientOrderID", id.clone()));
        }
        params
    }
}

/// Render a float without exponent or trailing zeros
pub fn format_decimal(value: f64) -> String {
    let s = format!("{:.10}", value);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Exchange acknowledgement of a placed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    /// Average fill price, when the exchange reports one
    pub avg_price: Option<f64>,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last_price: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub equity: f64,
    pub available: f64,
}

/// Resting order as reported by the exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: String,
    pub symbol: String,
    pub side: Side,
    pub order_type: Option<OrderType>,
    pub quantity: f64,
    pub price: f64,
    pub stop_price: f64,
    pub reduce_only: bool,
}

impl OpenOrder {
    pub fn is_stop(&self) -> bool {
        self.order_type == Some(OrderType::StopMarket)
    }
}

/// Exchange-side position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub amount: f64,
    pub entry_price: f64,
}

/// Swap contract listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub online: bool,
    pub min_quantity: Option<f64>,
}

// ─────────────────────────────────────────────────────────────────
// Wire formats
// ─────────────────────────────────────────────────────────────────

/// `{code, msg, data}` wrapper around every BingX response
#[derive(Debug, Deserialize)]
pub(crate) struct ApiEnvelope<T> {
    pub code: i64,
    #[serde(default)]
    pub msg: String,
    pub data: Option<T>,
}

/// BingX sends most numbers as strings
pub(crate) fn de_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    value_to_f64(&value).ok_or_else(|| serde::de::Error::custom(format!("not a number: {value}")))
}

pub(crate) fn de_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_to_f64))
}

pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

pub(crate) fn value_to_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().parse().ok(),
        _ => None,
    }
}

/// Kline rows come as objects (v3) or arrays (v2)
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum RawKline {
    Array(Vec<serde_json::Value>),
    Object {
        #[serde(deserialize_with = "de_f64")]
        open: f64,
        #[serde(deserialize_with = "de_f64")]
        high: f64,
        #[serde(deserialize_with = "de_f64")]
        low: f64,
        #[serde(deserialize_with = "de_f64")]
        close: f64,
        #[serde(deserialize_with = "de_f64")]
        volume: f64,
        time: i64,
    },
}

impl RawKline {
    pub fn into_bar(self) -> Option<Bar> {
        match self {
            RawKline::Object {
                open,
                high,
                low,
                close,
                volume,
                time,
            } => Some(Bar::new(time, open, high, low, close, volume)),
            RawKline::Array(values) => {
                if values.len() < 6 {
                    return None;
                }
                let ts = values[0].as_i64().or_else(|| value_to_f64(&values[0]).map(|v| v as i64))?;
                Some(Bar::new(
                    ts,
                    value_to_f64(&values[1])?,
                    value_to_f64(&values[2])?,
                    value_to_f64(&values[3])?,
                    value_to_f64(&values[4])?,
                    value_to_f64(&values[5])?,
                ))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawTicker {
    pub symbol: String,
    #[serde(deserialize_with = "de_f64")]
    pub last_price: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPremiumIndex {
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub last_funding_rate: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawBalanceData {
    pub balance: RawBalance,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawBalance {
    #[serde(deserialize_with = "de_f64")]
    pub equity: f64,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub available_margin: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawPosition {
    pub symbol: String,
    #[serde(default)]
    pub position_side: String,
    #[serde(deserialize_with = "de_f64")]
    pub position_amt: f64,
    #[serde(deserialize_with = "de_f64")]
    pub avg_price: f64,
}

impl RawPosition {
    pub fn into_position(self) -> Option<ExchangePosition> {
        if self.position_amt == 0.0 {
            return None;
        }
        let side = match self.position_side.as_str() {
            "LONG" => Side::Buy,
            "SHORT" => Side::Sell,
            _ if self.position_amt < 0.0 => Side::Sell,
            _ => Side::Buy,
        };
        Some(ExchangePosition {
            symbol: self.symbol,
            side,
            amount: self.position_amt.abs(),
            entry_price: self.avg_price,
        })
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawOrderData {
    pub order: RawOrder,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOrder {
    #[serde(deserialize_with = "de_id")]
    pub order_id: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub avg_price: Option<f64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawOpenOrders {
    #[serde(default)]
    pub orders: Vec<RawOpenOrder>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOpenOrder {
    #[serde(deserialize_with = "de_id")]
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub orig_qty: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub price: Option<f64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub reduce_only: Option<bool>,
}

impl RawOpenOrder {
    pub fn into_open_order(self) -> Option<OpenOrder> {
        let order_type = OrderType::from_api(&self.order_type);
        Some(OpenOrder {
            order_id: self.order_id,
            symbol: self.symbol,
            side: Side::from_str(&self.side)?,
            // Protective orders are always placed reduce-only
            reduce_only: self.reduce_only.unwrap_or(matches!(
                order_type,
                Some(OrderType::StopMarket) | Some(OrderType::TakeProfitMarket)
            )),
            order_type,
            quantity: self.orig_qty.unwrap_or(0.0),
            price: self.price.unwrap_or(0.0),
            stop_price: self.stop_price.unwrap_or(0.0),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawContract {
    pub symbol: String,
    #[serde(default)]
    pub status: Option<i64>,
    #[serde(default, deserialize_with = "de_opt_f64")]
    pub trade_min_quantity: Option<f64>,
}

impl From<RawContract> for Contract {
    fn from(raw: RawContract) -> Self {
        Contract {
            symbol: raw.symbol,
            online: raw.status.map_or(true, |s| s == 1),
            min_quantity: raw.trade_min_quantity,
        }
    }
}
