// ===============================
// src/kucoin.rs
// ===============================
//
// Helper KuCoin REST v1: signer (API key v2) + model respons minimal.
// Semua validasi field wajib dilakukan di sini, sebelum masuk domain.
//
use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::domain::{ActiveOrder, OrderDetails, Side, Ticker};
use crate::error::GatewayError;

type HmacSha256 = Hmac<Sha256>;

pub const SUCCESS_CODE: &str = "200000";
pub const LIVE_REST_URL: &str = "https://api.kucoin.com";
pub const SANDBOX_REST_URL: &str = "https://openapi-sandbox.kucoin.com";

pub const PAGE_SIZE: u32 = 50;
// batas aman agar listing rusak tidak loop selamanya
pub const MAX_PAGES: u32 = 20;

pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub fn sign(secret: &str, payload: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC key");
    mac.update(payload.as_bytes());
    STANDARD.encode(mac.finalize().into_bytes())
}

#[derive(Clone)]
pub struct KucoinAuth {
    api_key: String,
    secret: String,
    passphrase: String,
}

impl std::fmt::Debug for KucoinAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KucoinAuth").field("api_key", &self.api_key).finish_non_exhaustive()
    }
}

impl KucoinAuth {
    pub fn new(api_key: String, secret: String, passphrase: String) -> Self {
        Self { api_key, secret, passphrase }
    }

    /// Header KC-API-* untuk satu request. `endpoint` termasuk query string.
    pub fn headers(&self, ts_ms: u64, method: &str, endpoint: &str, body: &str) -> Vec<(&'static str, String)> {
        let ts = ts_ms.to_string();
        let prehash = format!("{ts}{method}{endpoint}{body}");
        vec![
            ("KC-API-KEY", self.api_key.clone()),
            ("KC-API-SIGN", sign(&self.secret, &prehash)),
            ("KC-API-TIMESTAMP", ts),
            ("KC-API-PASSPHRASE", sign(&self.secret, &self.passphrase)),
            ("KC-API-KEY-VERSION", "2".to_string()),
        ]
    }
}

// ---- Envelope & payload ----
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Level1 {
    pub best_ask: Option<String>,
    pub best_bid: Option<String>,
    pub best_ask_size: Option<String>,
    pub best_bid_size: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderIdData {
    pub order_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderData {
    pub id: String,
    pub size: Option<String>,
    pub deal_size: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderPage {
    pub current_page: u32,
    pub total_page: u32,
    #[serde(default)]
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: String,
    pub side: String,
    pub price: String,
    pub size: String,
    #[serde(default)]
    pub deal_size: Option<String>,
}

fn decimal(field: &str, v: Option<&str>) -> Result<f64, GatewayError> {
    let raw = v.ok_or_else(|| GatewayError::Decode(format!("missing {field}")))?;
    let x: f64 = raw
        .trim()
        .parse()
        .map_err(|_| GatewayError::Decode(format!("{field} is not a decimal: {raw:?}")))?;
    if !x.is_finite() {
        return Err(GatewayError::Decode(format!("{field} is not finite")));
    }
    Ok(x)
}

/// Map HTTP status + envelope code to the gateway error taxonomy.
pub fn classify(status: u16, code: &str, msg: &str) -> GatewayError {
    match (status, code) {
        (429, _) | (_, "429000") => GatewayError::RateLimited,
        (401, _) | (_, "400001" | "400002" | "400003" | "400004" | "400005" | "400006" | "400007") => GatewayError::Auth,
        _ if code.is_empty() => GatewayError::Http { status, body: msg.to_string() },
        _ => GatewayError::Api { code: code.to_string(), msg: msg.to_string() },
    }
}

/// Unwrap `{code, data, msg}`; non-success codes and missing data become errors.
pub fn open_envelope<T>(status: u16, body: &str) -> Result<T, GatewayError>
where
    T: for<'de> Deserialize<'de>,
{
    let env: Envelope<T> = match serde_json::from_str(body) {
        Ok(env) => env,
        Err(e) => {
            if (200..300).contains(&status) {
                return Err(GatewayError::Decode(e.to_string()));
            }
            return Err(classify(status, "", body));
        }
    };
    if env.code != SUCCESS_CODE {
        return Err(classify(status, &env.code, env.msg.as_deref().unwrap_or_default()));
    }
    env.data.ok_or_else(|| GatewayError::Decode("envelope without data".into()))
}

impl TryFrom<Level1> for Ticker {
    type Error = GatewayError;
    fn try_from(l: Level1) -> Result<Self, Self::Error> {
        Ok(Ticker {
            best_ask: decimal("bestAsk", l.best_ask.as_deref())?,
            best_bid: decimal("bestBid", l.best_bid.as_deref())?,
            best_ask_size: decimal("bestAskSize", l.best_ask_size.as_deref())?,
            best_bid_size: decimal("bestBidSize", l.best_bid_size.as_deref())?,
        })
    }
}

impl TryFrom<OrderData> for OrderDetails {
    type Error = GatewayError;
    fn try_from(o: OrderData) -> Result<Self, Self::Error> {
        Ok(OrderDetails {
            size: decimal("size", o.size.as_deref())?,
            deal_size: decimal("dealSize", o.deal_size.as_deref())?,
            is_active: o.is_active.ok_or_else(|| GatewayError::Decode("missing isActive".into()))?,
            order_id: o.id,
        })
    }
}

impl TryFrom<OrderItem> for ActiveOrder {
    type Error = GatewayError;
    fn try_from(o: OrderItem) -> Result<Self, Self::Error> {
        let side = Side::parse(&o.side).ok_or_else(|| GatewayError::Decode(format!("unknown side {:?}", o.side)))?;
        Ok(ActiveOrder {
            side,
            price: decimal("price", Some(&o.price))?,
            size: decimal("size", Some(&o.size))?,
            deal_size: match o.deal_size.as_deref() {
                Some(d) => decimal("dealSize", Some(d))?,
                None => 0.0,
            },
            order_id: o.id,
        })
    }
}

impl OrderPage {
    /// One malformed row fails the whole page, so the mirror keeps its last state.
    pub fn into_orders(self) -> Result<Vec<ActiveOrder>, GatewayError> {
        self.items.into_iter().map(ActiveOrder::try_from).collect()
    }
}

/// Page to request after `page`, or `None` when the listing is complete or the cap is hit.
pub fn next_page(p: &OrderPage, page: u32) -> Option<u32> {
    if p.current_page >= p.total_page || page >= MAX_PAGES {
        None
    } else {
        Some(page + 1)
    }
}

/// Format a quantity without a trailing `.0` for whole numbers.
pub fn fmt_qty(q: f64) -> String {
    if q.fract() == 0.0 { format!("{}", q as i64) } else { format!("{q}") }
}
