// ===============================
// src/gateway_kucoin.rs
// ===============================
use async_trait::async_trait;
use rand::RngCore;
use reqwest::Method;
use serde_json::json;
use tokio::time::Duration;
use tracing::debug;
use url::Url;

use crate::domain::{ActiveOrder, OrderAck, OrderDetails, PriceLevel, Qty, Side, Ticker};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::kucoin::{
    fmt_qty, next_page, open_envelope, timestamp_ms, KucoinAuth, Level1, OrderData, OrderIdData, OrderPage, PAGE_SIZE,
};

/// KuCoin spot REST gateway. Satu `reqwest::Client` dipakai bersama semua worker.
pub struct KucoinGateway {
    http: reqwest::Client,
    base: Url,
    auth: Option<KucoinAuth>,
}

impl KucoinGateway {
    /// `auth = None` → hanya endpoint publik (ticker).
    pub fn new(base: &str, auth: Option<KucoinAuth>) -> Result<Self, GatewayError> {
        let base = Url::parse(base).map_err(|e| GatewayError::Transport(format!("bad rest url {base}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, base, auth })
    }

    async fn request<T>(&self, method: Method, endpoint: &str, body: Option<serde_json::Value>, signed: bool) -> Result<T, GatewayError>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        let url = self
            .base
            .join(endpoint)
            .map_err(|e| GatewayError::Transport(format!("bad endpoint {endpoint}: {e}")))?;
        let body_str = body.as_ref().map(|b| b.to_string()).unwrap_or_default();

        let mut req = self.http.request(method.clone(), url);
        if signed {
            let auth = self.auth.as_ref().ok_or(GatewayError::Auth)?;
            for (k, v) in auth.headers(timestamp_ms(), method.as_str(), endpoint, &body_str) {
                req = req.header(k, v);
            }
        }
        if body.is_some() {
            req = req.header("Content-Type", "application/json").body(body_str);
        }

        let rsp = req.send().await?;
        let status = rsp.status().as_u16();
        let text = rsp.text().await?;
        debug!(%method, endpoint, status, "kucoin rest");
        open_envelope(status, &text)
    }

    fn client_oid() -> String {
        let mut buf = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut buf);
        hex::encode(buf)
    }
}

#[async_trait]
impl Gateway for KucoinGateway {
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker, GatewayError> {
        let ep = format!("/api/v1/market/orderbook/level1?symbol={}", urlencoding::encode(symbol));
        let l1: Level1 = self.request(Method::GET, &ep, None, false).await?;
        Ticker::try_from(l1)
    }

    async fn place_limit_order(
        &self,
        symbol: &str,
        side: Side,
        size: Qty,
        price: PriceLevel,
    ) -> Result<OrderAck, GatewayError> {
        let body = json!({
            "clientOid": Self::client_oid(),
            "side": side.as_str(),
            "symbol": symbol,
            "type": "limit",
            "price": price.to_string(),
            "size": fmt_qty(size),
        });
        let d: OrderIdData = self.request(Method::POST, "/api/v1/orders", Some(body), true).await?;
        Ok(OrderAck { order_id: d.order_id })
    }

    async fn place_market_order(&self, symbol: &str, side: Side, size: Qty) -> Result<OrderAck, GatewayError> {
        let body = json!({
            "clientOid": Self::client_oid(),
            "side": side.as_str(),
            "symbol": symbol,
            "type": "market",
            "size": fmt_qty(size),
        });
        let d: OrderIdData = self.request(Method::POST, "/api/v1/orders", Some(body), true).await?;
        Ok(OrderAck { order_id: d.order_id })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let ep = format!("/api/v1/orders/{}", urlencoding::encode(order_id));
        let _: serde_json::Value = self.request(Method::DELETE, &ep, None, true).await?;
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> Result<OrderDetails, GatewayError> {
        let ep = format!("/api/v1/orders/{}", urlencoding::encode(order_id));
        let d: OrderData = self.request(Method::GET, &ep, None, true).await?;
        OrderDetails::try_from(d)
    }

    async fn list_active_orders(&self, symbol: &str) -> Result<Vec<ActiveOrder>, GatewayError> {
        let mut out = Vec::new();
        let mut page = 1;
        loop {
            let ep = format!(
                "/api/v1/orders?status=active&symbol={}&type=limit&currentPage={page}&pageSize={PAGE_SIZE}",
                urlencoding::encode(symbol)
            );
            let p: OrderPage = self.request(Method::GET, &ep, None, true).await?;
            let next = next_page(&p, page);
            out.extend(p.into_orders()?);
            match next {
                Some(n) => page = n,
                None => break,
            }
        }
        Ok(out)
    }
}
