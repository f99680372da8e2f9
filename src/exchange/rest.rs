//! BingX REST API Client
//!
//! Handles HTTP communication with the BingX perpetual swap API.
//! Private endpoints are signed with HMAC-SHA256 over the query string
//! and authenticated with the `X-BX-APIKEY` header.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, info};

use super::error::ExchangeError;
use super::types::{
    ApiEnvelope, Balance, Contract, ExchangePosition, OpenOrder, OrderAck, OrderRequest,
    RawBalanceData, RawContract, RawKline, RawOpenOrders, RawOrderData, RawPosition,
    RawPremiumIndex, RawTicker, Ticker,
};
use super::{Exchange, ExchangeResult};
use crate::config::ExchangeConfig;
use crate::types::{normalize_bars, Bar, Side, Timeframe};

const KLINES_PATH: &str = "/openApi/swap/v3/quote/klines";
const TICKER_PATH: &str = "/openApi/swap/v2/quote/ticker";
const PREMIUM_INDEX_PATH: &str = "/openApi/swap/v2/quote/premiumIndex";
const CONTRACTS_PATH: &str = "/openApi/swap/v2/quote/contracts";
const BALANCE_PATH: &str = "/openApi/swap/v2/user/balance";
const POSITIONS_PATH: &str = "/openApi/swap/v2/user/positions";
const ORDER_PATH: &str = "/openApi/swap/v2/trade/order";
const OPEN_ORDERS_PATH: &str = "/openApi/swap/v2/trade/openOrders";
const LEVERAGE_PATH: &str = "/openApi/swap/v2/trade/leverage";

/// Kline endpoint cap per request
const MAX_KLINE_LIMIT: usize = 1440;

type HmacSha256 = Hmac<Sha256>;

/// REST API client for BingX swaps
pub struct BingxClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    secret_key: Option<String>,
    recv_window_ms: u64,
}

impl BingxClient {
    /// Create a new REST client
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        secret_key: Option<String>,
        recv_window_ms: u64,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            secret_key,
            recv_window_ms,
        })
    }

    /// Build from config; credentials come from `BINGX_API_KEY` / `BINGX_SECRET_KEY`
    pub fn from_config(cfg: &ExchangeConfig) -> Result<Self> {
        let client = Self::new(
            cfg.active_base_url(),
            Self::resolve_env(&["BINGX_API_KEY"]),
            Self::resolve_env(&["BINGX_SECRET_KEY", "BINGX_API_SECRET"]),
            cfg.recv_window_ms,
            Duration::from_secs(cfg.timeout_secs),
        )?;
        info!(
            base_url = %client.base_url,
            demo = cfg.demo,
            authenticated = client.has_credentials(),
            "🔌 BingX client ready"
        );
        Ok(client)
    }

    fn resolve_env(var_names: &[&str]) -> Option<String> {
        for var in var_names {
            if let Ok(value) = std::env::var(var) {
                if !value.trim().is_empty() {
                    return Some(value.trim().to_string());
                }
            }
        }
        None
    }

    pub fn has_credentials(&self) -> bool {
        self.api_key.is_some() && self.secret_key.is_some()
    }

    /// Hex HMAC-SHA256 of `query` keyed with the API secret
    pub(crate) fn sign(secret: &str, query: &str) -> ExchangeResult<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ExchangeError::Auth(format!("invalid secret key: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn build_query(params: &[(&str, String)]) -> String {
        params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn signed_query(&self, mut params: Vec<(&'static str, String)>) -> ExchangeResult<String> {
        let secret = self
            .secret_key
            .as_deref()
            .ok_or_else(|| ExchangeError::Auth("BINGX_SECRET_KEY not configured".into()))?;
        params.push(("timestamp", Utc::now().timestamp_millis().to_string()));
        params.push(("recvWindow", self.recv_window_ms.to_string()));
        let query = Self::build_query(&params);
        let signature = Self::sign(secret, &query)?;
        Ok(format!("{query}&signature={signature}"))
    }

    async fn public_get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: Vec<(&'static str, String)>,
    ) -> ExchangeResult<T> {
        let url = if params.is_empty() {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}{}?{}", self.base_url, path, Self::build_query(&params))
        };
        let response = self.client.get(&url).send().await?;
        Self::decode(response, path).await
    }

    async fn signed_request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(&'static str, String)>,
    ) -> ExchangeResult<T> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ExchangeError::Auth("BINGX_API_KEY not configured".into()))?;
        let query = self.signed_query(params)?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!(%method, path, "signed request");
        let response = self
            .client
            .request(method, &url)
            .header("X-BX-APIKEY", api_key)
            .send()
            .await?;
        Self::decode(response, path).await
    }

    async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> ExchangeResult<T> {
        let status = response.status().as_u16();
        let body = response.text().await?;
        parse_envelope(status, &body, path)
    }
}

/// Unwrap `{code, msg, data}`, classifying non-zero codes
pub(crate) fn parse_envelope<T: DeserializeOwned>(
    status: u16,
    body: &str,
    path: &str,
) -> ExchangeResult<T> {
    let envelope: ApiEnvelope<serde_json::Value> = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(e) if (200..300).contains(&status) => {
            return Err(ExchangeError::Decode(format!("{path}: {e}")));
        }
        Err(_) => {
            let snippet: String = body.chars().take(200).collect();
            return Err(ExchangeError::Api {
                code: status as i64,
                msg: snippet,
            });
        }
    };
    if envelope.code != 0 {
        return Err(ExchangeError::classify(envelope.code, &envelope.msg));
    }
    let data = envelope
        .data
        .ok_or_else(|| ExchangeError::NoData(path.to_string()))?;
    serde_json::from_value(data).map_err(|e| ExchangeError::Decode(format!("{path}: {e}")))
}

#[async_trait]
impl Exchange for BingxClient {
    async fn fetch_bars(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> ExchangeResult<Vec<Bar>> {
        let rows: Vec<RawKline> = self
            .public_get(
                KLINES_PATH,
                vec![
                    ("symbol", symbol.to_string()),
                    ("interval", timeframe.as_interval().to_string()),
                    ("limit", limit.clamp(1, MAX_KLINE_LIMIT).to_string()),
                ],
            )
            .await?;
        let bars = normalize_bars(rows.into_iter().filter_map(RawKline::into_bar).collect());
        if bars.is_empty() {
            return Err(ExchangeError::NoData(format!("klines {symbol}")));
        }
        Ok(bars)
    }

    async fn fetch_ticker(&self, symbol: &str) -> ExchangeResult<Ticker> {
        let raw: RawTicker = self
            .public_get(TICKER_PATH, vec![("symbol", symbol.to_string())])
            .await?;
        Ok(Ticker {
            symbol: raw.symbol,
            last_price: raw.last_price,
        })
    }

    async fn fetch_funding_rate(&self, symbol: &str) -> ExchangeResult<f64> {
        let raw: RawPremiumIndex = self
            .public_get(PREMIUM_INDEX_PATH, vec![("symbol", symbol.to_string())])
            .await?;
        raw.last_funding_rate
            .ok_or_else(|| ExchangeError::NoData(format!("funding rate {symbol}")))
    }

    async fn list_contracts(&self) -> ExchangeResult<Vec<Contract>> {
        let raw: Vec<RawContract> = self.public_get(CONTRACTS_PATH, Vec::new()).await?;
        Ok(raw.into_iter().map(Contract::from).collect())
    }

    async fn fetch_balance(&self) -> ExchangeResult<Balance> {
        let raw: RawBalanceData = self
            .signed_request(Method::GET, BALANCE_PATH, Vec::new())
            .await?;
        Ok(Balance {
            equity: raw.balance.equity,
            available: raw.balance.available_margin.unwrap_or(raw.balance.equity),
        })
    }

    async fn fetch_positions(&self, symbol: &str) -> ExchangeResult<Vec<ExchangePosition>> {
        let raw: Vec<RawPosition> = self
            .signed_request(
                Method::GET,
                POSITIONS_PATH,
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        Ok(raw
            .into_iter()
            .filter(|p| p.symbol == symbol)
            .filter_map(RawPosition::into_position)
            .collect())
    }

    async fn fetch_open_orders(&self, symbol: &str) -> ExchangeResult<Vec<OpenOrder>> {
        let raw: RawOpenOrders = self
            .signed_request(
                Method::GET,
                OPEN_ORDERS_PATH,
                vec![("symbol", symbol.to_string())],
            )
            .await?;
        Ok(raw
            .orders
            .into_iter()
            .filter_map(|o| o.into_open_order())
            .collect())
    }

    async fn place_order(&self, order: &OrderRequest) -> ExchangeResult<OrderAck> {
        let raw: RawOrderData = self
            .signed_request(Method::POST, ORDER_PATH, order.to_params())
            .await?;
        let ack = OrderAck {
            order_id: raw.order.order_id,
            avg_price: raw.order.avg_price.filter(|p| *p > 0.0),
            status: raw.order.status.unwrap_or_else(|| "NEW".to_string()),
        };
        info!(
            symbol = %order.symbol,
            side = %order.side,
            order_type = order.order_type.as_api(),
            qty = order.quantity,
            reduce_only = order.reduce_only,
            order_id = %ack.order_id,
            "📨 Order accepted"
        );
        Ok(ack)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> ExchangeResult<()> {
        let _: serde_json::Value = self
            .signed_request(
                Method::DELETE,
                ORDER_PATH,
                vec![
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;
        Ok(())
    }

    async fn set_leverage(&self, symbol: &str, side: Side, leverage: u32) -> ExchangeResult<()> {
        let _: serde_json::Value = self
            .signed_request(
                Method::POST,
                LEVERAGE_PATH,
                vec![
                    ("symbol", symbol.to_string()),
                    ("side", side.position_side().to_string()),
                    ("leverage", leverage.to_string()),
                ],
            )
            .await?;
        info!(%symbol, leverage, side = side.position_side(), "Leverage set");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "bingx"
    }
}
