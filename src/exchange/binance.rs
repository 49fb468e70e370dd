use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde_json::Value;
use sha2::Sha256;

use crate::exchange::{
    ExchangeError, ExchangeGateway, ExchangePosition, InstrumentLimits, MarginMode, OpenOrder,
    OrderRequest, OrderStatus, OrderType,
};
use crate::models::{Candle, OrderSide, Side};

const BINANCE_FAPI_BASE: &str = "https://fapi.binance.com";

type HmacSha256 = Hmac<Sha256>;

/// Binance USDT-M futures REST client.
///
/// Translates Binance error codes into the gateway taxonomy so the core
/// never sees raw HTTP failures:
/// - 429 / -1003 -> RateLimited
/// - -2019       -> InsufficientMargin
/// - -1013/-4003/-4005 -> InvalidQuantity
/// - -4046 ("no need to change margin type") is success for margin mode
#[derive(Clone)]
pub struct BinanceFutures {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl BinanceFutures {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self::with_base_url(api_key, api_secret, BINANCE_FAPI_BASE.to_string())
    }

    /// Override the API host (tests point this at a local mock server).
    pub fn with_base_url(api_key: String, api_secret: String, base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            api_secret,
        }
    }

    fn sign(&self, query: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Malformed(format!("hmac key: {e}")))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_query(&self, params: &[(&str, String)]) -> Result<String, ExchangeError> {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!("timestamp={}", Utc::now().timestamp_millis()));
        let signature = self.sign(&query)?;
        query.push_str(&format!("&signature={signature}"));
        Ok(query)
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        query: &str,
    ) -> Result<Value, ExchangeError> {
        let url = format!("{}{}?{}", self.base_url, path, query);
        let response = self
            .client
            .request(method, &url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ExchangeError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(api_error(status.as_u16(), &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| ExchangeError::Malformed(format!("invalid json: {e}")))
    }

    async fn public_get(&self, path: &str, query: &str) -> Result<Value, ExchangeError> {
        self.request(reqwest::Method::GET, path, query).await
    }

    async fn signed(
        &self,
        method: reqwest::Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<Value, ExchangeError> {
        let query = self.signed_query(params)?;
        self.request(method, path, &query).await
    }
}

/// Map a Binance error payload ({"code": -2019, "msg": "..."}) to the
/// gateway taxonomy.
fn api_error(status: u16, body: &str) -> ExchangeError {
    if status == 429 || status == 418 {
        return ExchangeError::RateLimited;
    }

    let (code, msg) = match serde_json::from_str::<Value>(body) {
        Ok(v) => (
            v.get("code").and_then(Value::as_i64).unwrap_or(0),
            v.get("msg")
                .and_then(Value::as_str)
                .unwrap_or(body)
                .to_string(),
        ),
        Err(_) => (0, body.to_string()),
    };

    match code {
        -1003 => ExchangeError::RateLimited,
        -2019 => ExchangeError::InsufficientMargin,
        -1013 | -4003 | -4005 => ExchangeError::InvalidQuantity(msg),
        _ if status >= 500 => ExchangeError::Network(format!("http {status}: {msg}")),
        _ => ExchangeError::Rejected(format!("code {code}: {msg}")),
    }
}

fn as_f64(value: &Value) -> Result<f64, ExchangeError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| ExchangeError::Malformed("non-finite number".into())),
        Value::String(s) => s
            .parse()
            .map_err(|_| ExchangeError::Malformed(format!("expected number, got {s:?}"))),
        other => Err(ExchangeError::Malformed(format!(
            "expected number, got {other}"
        ))),
    }
}

fn parse_kline(entry: &Value) -> Result<Candle, ExchangeError> {
    let row = entry
        .as_array()
        .filter(|row| row.len() >= 6)
        .ok_or_else(|| ExchangeError::Malformed("kline entry is not a row".into()))?;

    let open_ms = row[0]
        .as_i64()
        .ok_or_else(|| ExchangeError::Malformed("kline open time".into()))?;
    let open_time: DateTime<Utc> = DateTime::from_timestamp_millis(open_ms)
        .ok_or_else(|| ExchangeError::Malformed("kline open time out of range".into()))?;

    Ok(Candle {
        open_time,
        open: as_f64(&row[1])?,
        high: as_f64(&row[2])?,
        low: as_f64(&row[3])?,
        close: as_f64(&row[4])?,
        volume: as_f64(&row[5])?,
    })
}

fn order_side_str(side: OrderSide) -> &'static str {
    match side {
        OrderSide::Buy => "BUY",
        OrderSide::Sell => "SELL",
    }
}

#[async_trait::async_trait]
impl ExchangeGateway for BinanceFutures {
    async fn get_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let query = format!("symbol={symbol}&interval={timeframe}&limit={limit}");
        let value = self.public_get("/fapi/v1/klines", &query).await?;

        value
            .as_array()
            .ok_or_else(|| ExchangeError::Malformed("klines response is not an array".into()))?
            .iter()
            .map(parse_kline)
            .collect()
    }

    async fn get_balance(&self, asset: &str) -> Result<f64, ExchangeError> {
        let value = self
            .signed(reqwest::Method::GET, "/fapi/v2/balance", &[])
            .await?;
        let entries = value
            .as_array()
            .ok_or_else(|| ExchangeError::Malformed("balance response is not an array".into()))?;

        for entry in entries {
            if entry.get("asset").and_then(Value::as_str) == Some(asset) {
                let free = entry
                    .get("availableBalance")
                    .ok_or_else(|| ExchangeError::Malformed("missing availableBalance".into()))?;
                return as_f64(free);
            }
        }
        Ok(0.0)
    }

    async fn get_open_position(
        &self,
        symbol: &str,
    ) -> Result<Option<ExchangePosition>, ExchangeError> {
        let value = self
            .signed(
                reqwest::Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", symbol.to_string())],
            )
            .await?;
        let entries = value
            .as_array()
            .ok_or_else(|| ExchangeError::Malformed("positionRisk is not an array".into()))?;

        for entry in entries {
            if entry.get("symbol").and_then(Value::as_str) != Some(symbol) {
                continue;
            }
            let amount = as_f64(
                entry
                    .get("positionAmt")
                    .ok_or_else(|| ExchangeError::Malformed("missing positionAmt".into()))?,
            )?;
            if amount == 0.0 {
                continue;
            }
            let entry_price = as_f64(
                entry
                    .get("entryPrice")
                    .ok_or_else(|| ExchangeError::Malformed("missing entryPrice".into()))?,
            )?;
            let unrealized_pnl = entry
                .get("unRealizedProfit")
                .map(as_f64)
                .transpose()?
                .unwrap_or(0.0);

            return Ok(Some(ExchangePosition {
                side: if amount > 0.0 { Side::Long } else { Side::Short },
                quantity: amount.abs(),
                entry_price,
                unrealized_pnl,
            }));
        }
        Ok(None)
    }

    async fn get_instrument_limits(&self, symbol: &str) -> Result<InstrumentLimits, ExchangeError> {
        let query = format!("symbol={symbol}");
        let value = self.public_get("/fapi/v1/exchangeInfo", &query).await?;

        let symbols = value
            .get("symbols")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::Malformed("exchangeInfo missing symbols".into()))?;
        let info = symbols
            .iter()
            .find(|s| s.get("symbol").and_then(Value::as_str) == Some(symbol))
            .ok_or_else(|| ExchangeError::Rejected(format!("unknown symbol {symbol}")))?;
        let filters = info
            .get("filters")
            .and_then(Value::as_array)
            .ok_or_else(|| ExchangeError::Malformed("exchangeInfo missing filters".into()))?;

        let mut limits = InstrumentLimits {
            quantity_step: 0.0,
            min_quantity: 0.0,
            max_quantity: None,
            min_notional: 0.0,
        };

        for filter in filters {
            match filter.get("filterType").and_then(Value::as_str) {
                Some("LOT_SIZE") => {
                    if let Some(step) = filter.get("stepSize") {
                        limits.quantity_step = as_f64(step)?;
                    }
                    if let Some(min) = filter.get("minQty") {
                        limits.min_quantity = as_f64(min)?;
                    }
                    if let Some(max) = filter.get("maxQty") {
                        limits.max_quantity = Some(as_f64(max)?);
                    }
                }
                Some("MIN_NOTIONAL") => {
                    if let Some(notional) = filter.get("notional") {
                        limits.min_notional = as_f64(notional)?;
                    }
                }
                _ => {}
            }
        }

        if limits.quantity_step == 0.0 {
            return Err(ExchangeError::Malformed(format!(
                "no LOT_SIZE filter for {symbol}"
            )));
        }
        Ok(limits)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        self.signed(
            reqwest::Method::POST,
            "/fapi/v1/leverage",
            &[
                ("symbol", symbol.to_string()),
                ("leverage", leverage.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn set_margin_mode(&self, symbol: &str, mode: MarginMode) -> Result<(), ExchangeError> {
        let mode_str = match mode {
            MarginMode::Isolated => "ISOLATED",
            MarginMode::Cross => "CROSSED",
        };
        let result = self
            .signed(
                reqwest::Method::POST,
                "/fapi/v1/marginType",
                &[
                    ("symbol", symbol.to_string()),
                    ("marginType", mode_str.to_string()),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // -4046: margin type already set; idempotent success
            Err(ExchangeError::Rejected(msg)) if msg.contains("-4046") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn place_order(&self, order: &OrderRequest) -> Result<String, ExchangeError> {
        let mut params = vec![
            ("symbol", order.symbol.clone()),
            ("side", order_side_str(order.side).to_string()),
            ("quantity", order.quantity.to_string()),
        ];
        match &order.order_type {
            OrderType::Market => params.push(("type", "MARKET".to_string())),
            OrderType::StopMarket { stop_price } => {
                params.push(("type", "STOP_MARKET".to_string()));
                params.push(("stopPrice", stop_price.to_string()));
            }
        }
        if order.reduce_only {
            params.push(("reduceOnly", "true".to_string()));
        }
        if let Some(client_id) = &order.client_order_id {
            params.push(("newClientOrderId", client_id.clone()));
        }

        let value = self
            .signed(reqwest::Method::POST, "/fapi/v1/order", &params)
            .await?;
        value
            .get("orderId")
            .and_then(Value::as_i64)
            .map(|id| id.to_string())
            .ok_or_else(|| ExchangeError::Malformed("order response missing orderId".into()))
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), ExchangeError> {
        self.signed(
            reqwest::Method::DELETE,
            "/fapi/v1/order",
            &[
                ("symbol", symbol.to_string()),
                ("orderId", order_id.to_string()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_order_status(
        &self,
        symbol: &str,
        order_id: &str,
    ) -> Result<OrderStatus, ExchangeError> {
        let value = self
            .signed(
                reqwest::Method::GET,
                "/fapi/v1/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await?;

        let status = value
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ExchangeError::Malformed("order status missing".into()))?;

        match status {
            "NEW" | "PARTIALLY_FILLED" => Ok(OrderStatus::Pending),
            "FILLED" => {
                let price = as_f64(
                    value
                        .get("avgPrice")
                        .ok_or_else(|| ExchangeError::Malformed("missing avgPrice".into()))?,
                )?;
                let quantity = as_f64(
                    value
                        .get("executedQty")
                        .ok_or_else(|| ExchangeError::Malformed("missing executedQty".into()))?,
                )?;
                Ok(OrderStatus::Filled { price, quantity })
            }
            "CANCELED" => Ok(OrderStatus::Canceled),
            "REJECTED" | "EXPIRED" => Ok(OrderStatus::Rejected),
            other => Err(ExchangeError::Malformed(format!(
                "unknown order status {other:?}"
            ))),
        }
    }

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OpenOrder>, ExchangeError> {
        let value = self
            .signed(
                reqwest::Method::GET,
                "/fapi/v1/openOrders",
                &[("symbol", symbol.to_string())],
            )
            .await?;
        let entries = value
            .as_array()
            .ok_or_else(|| ExchangeError::Malformed("openOrders is not an array".into()))?;

        let mut orders = Vec::with_capacity(entries.len());
        for entry in entries {
            let order_id = entry
                .get("orderId")
                .and_then(Value::as_i64)
                .ok_or_else(|| ExchangeError::Malformed("open order missing orderId".into()))?
                .to_string();
            let side = match entry.get("side").and_then(Value::as_str) {
                Some("BUY") => OrderSide::Buy,
                Some("SELL") => OrderSide::Sell,
                other => {
                    return Err(ExchangeError::Malformed(format!(
                        "open order side {other:?}"
                    )))
                }
            };
            let is_stop = matches!(
                entry.get("type").and_then(Value::as_str),
                Some("STOP_MARKET") | Some("STOP")
            );
            orders.push(OpenOrder {
                order_id,
                side,
                is_stop,
            });
        }
        Ok(orders)
    }
}
